//! Human-readable rendering.

use chrono::Duration;
use zarch_db::Archive;

const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];

/// `1536` → `1.5 KB`.
pub fn humanize_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Coarse "how long ago".
pub fn humanize_age(age: Duration) -> String {
    if age.num_seconds() < 60 {
        "just now".to_string()
    } else if age.num_minutes() < 60 {
        format!("{}m ago", age.num_minutes())
    } else if age.num_hours() < 24 {
        format!("{}h ago", age.num_hours())
    } else if age.num_days() < 30 {
        format!("{}d ago", age.num_days())
    } else if age.num_days() < 365 {
        format!("{}mo ago", age.num_days() / 30)
    } else {
        format!("{}y ago", age.num_days() / 365)
    }
}

/// One line per archive for list output.
pub fn archive_line(archive: &Archive) -> String {
    let location = if archive.managed { "managed" } else { "external" };
    format!(
        "{:<8}  {:<32}  {:>9}  {:<8}  {:<8}  {}",
        archive.short_uid(),
        truncate(&archive.name, 32),
        humanize_size(archive.size),
        archive.status,
        location,
        humanize_age(archive.age()),
    )
}

pub fn archive_header() -> String {
    format!(
        "{:<8}  {:<32}  {:>9}  {:<8}  {:<8}  {}",
        "UID", "NAME", "SIZE", "STATUS", "STORAGE", "CREATED"
    )
}

/// Full record for `show`.
pub fn archive_details(archive: &Archive) -> String {
    let mut out = Vec::new();
    out.push(format!("Name:        {}", archive.name));
    out.push(format!("UID:         {}", archive.uid));
    out.push(format!("ID:          {}", archive.id));
    out.push(format!("Path:        {}", archive.path));
    out.push(format!(
        "Size:        {} ({} bytes)",
        humanize_size(archive.size),
        archive.size
    ));
    out.push(format!(
        "Created:     {} ({})",
        archive.created.format("%Y-%m-%d %H:%M:%S UTC"),
        humanize_age(archive.age())
    ));
    out.push(format!("Status:      {}", archive.status));
    out.push(format!(
        "Storage:     {}",
        if archive.managed { "managed" } else { "external" }
    ));
    if let Some(checksum) = &archive.checksum {
        out.push(format!("Checksum:    {checksum}"));
    }
    if let Some(profile) = &archive.profile {
        out.push(format!("Profile:     {profile}"));
    }
    if let Some(seen) = archive.last_seen {
        out.push(format!("Last seen:   {}", seen.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    if let Some(deleted) = archive.deleted_at {
        out.push(format!("Deleted:     {}", deleted.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    if let Some(original) = &archive.original_path {
        out.push(format!("Original:    {original}"));
    }
    if archive.uploaded {
        out.push(format!(
            "Uploaded:    {}{}",
            archive.destination.as_deref().unwrap_or("yes"),
            archive
                .uploaded_at
                .map(|at| format!(" at {}", at.format("%Y-%m-%d %H:%M:%S UTC")))
                .unwrap_or_default()
        ));
    }
    if let Some(metadata) = &archive.metadata {
        out.push(format!("Metadata:    {metadata}"));
    }
    out.join("\n")
}

/// Candidate table shown when an identifier matches several archives.
pub fn ambiguous(input: &str, candidates: &[Archive]) -> String {
    let mut out = vec![
        format!("'{input}' matches {} archives:", candidates.len()),
        String::new(),
        format!(
            "  {:<8}  {:<32}  {:<8}  {:>9}  {}",
            "UID", "NAME", "STORAGE", "SIZE", "CREATED"
        ),
    ];
    for archive in candidates {
        out.push(format!(
            "  {:<8}  {:<32}  {:<8}  {:>9}  {}",
            archive.short_uid(),
            truncate(&archive.name, 32),
            if archive.managed { "managed" } else { "external" },
            humanize_size(archive.size),
            humanize_age(archive.age()),
        ));
    }
    out.push(String::new());
    out.push("Use a longer prefix or the full UID.".to_string());
    out.join("\n")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{kept}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_humanize_size() {
        assert_eq!(humanize_size(0), "0 B");
        assert_eq!(humanize_size(1023), "1023 B");
        assert_eq!(humanize_size(1536), "1.5 KB");
        assert_eq!(humanize_size(1_572_864), "1.5 MB");
        assert_eq!(humanize_size(5 * 1024 * 1024 * 1024), "5.0 GB");
    }

    #[test]
    fn test_humanize_age() {
        assert_eq!(humanize_age(Duration::seconds(5)), "just now");
        assert_eq!(humanize_age(Duration::minutes(12)), "12m ago");
        assert_eq!(humanize_age(Duration::hours(3)), "3h ago");
        assert_eq!(humanize_age(Duration::days(4)), "4d ago");
        assert_eq!(humanize_age(Duration::days(95)), "3mo ago");
        assert_eq!(humanize_age(Duration::days(800)), "2y ago");
    }

    #[test]
    fn test_ambiguous_lists_every_candidate() {
        let mut a = Archive::new("a.7z", "/a.7z", 10);
        a.uid = "01HZX4K9Q2M7WBCDEFGHJKMNPQ".into();
        let mut b = Archive::new("b.7z", "/b.7z", 2048);
        b.uid = "01HZX4K9Q2M7WBCDEFGHJKMNPR".into();
        b.managed = true;

        let text = ambiguous("01HZX4K9", &[a, b]);
        assert!(text.starts_with("'01HZX4K9' matches 2 archives:"));
        assert!(text.contains("a.7z"));
        assert!(text.contains("b.7z"));
        assert!(text.contains("managed"));
        assert!(text.contains("2.0 KB"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }
}
