//! Per-archive commands.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::Args;
use zarch_db::queries;

use super::{resolver, ListFilter};
use crate::config::Config;
use crate::display;
use crate::manager::{Manager, RegisterOptions};

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Archive file to register
    pub file: PathBuf,
    /// Registry name (defaults to the file name)
    #[arg(long)]
    pub name: Option<String>,
    /// Compression profile the archive was made with
    #[arg(long)]
    pub profile: Option<String>,
    /// Leave the file where it is instead of moving it into managed storage
    #[arg(long, conflicts_with = "managed")]
    pub external: bool,
    /// Move the file into managed storage
    #[arg(long)]
    pub managed: bool,
    /// Free-form metadata, stored verbatim
    #[arg(long)]
    pub metadata: Option<String>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub filter: ListFilter,
    /// Use a saved query instead of filter flags
    #[arg(long, value_name = "NAME")]
    pub query: Option<String>,
    /// Save the given filters under NAME
    #[arg(long, value_name = "NAME", conflicts_with = "query")]
    pub save_query: Option<String>,
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub fn add(manager: &Manager, config: &Config, args: AddArgs) -> anyhow::Result<()> {
    let managed = if args.external {
        false
    } else {
        args.managed || config.storage.use_managed_default
    };
    let archive = manager.register(
        &args.file,
        RegisterOptions {
            name: args.name,
            profile: args.profile,
            managed,
            metadata: args.metadata,
        },
    )?;
    println!(
        "Registered {} ({}) at {}",
        archive.name,
        archive.short_uid(),
        archive.path
    );
    Ok(())
}

pub fn list(manager: &Manager, args: ListArgs) -> anyhow::Result<()> {
    let store = manager.store();
    let filter = match &args.query {
        Some(name) => {
            let saved = queries::get(store, name)?;
            queries::record_use(store, name)?;
            serde_json::from_value(saved.filters)
                .with_context(|| format!("saved query '{name}' has unreadable filters"))?
        }
        None => args.filter,
    };
    if let Some(name) = &args.save_query {
        queries::save(store, name, &serde_json::to_value(&filter)?)?;
        eprintln!("Saved query '{name}'");
    }

    let archives = filter.apply(store)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&archives)?);
        return Ok(());
    }
    if archives.is_empty() {
        println!("No archives.");
        return Ok(());
    }
    println!("{}", display::archive_header());
    for archive in &archives {
        println!("{}", display::archive_line(archive));
    }
    let total: u64 = archives.iter().map(|a| a.size).sum();
    println!(
        "\n{} archives, {}",
        archives.len(),
        display::humanize_size(total)
    );
    Ok(())
}

pub fn show(manager: &Manager, config: &Config, id: &str) -> anyhow::Result<()> {
    let mut archive = resolver(manager.store(), config).resolve(id)?;
    manager.refresh_presence(&mut archive)?;
    println!("{}", display::archive_details(&archive));
    Ok(())
}

pub fn resolve(
    manager: &Manager,
    config: &Config,
    id: &str,
    min_prefix: Option<usize>,
) -> anyhow::Result<()> {
    let mut lookup = resolver(manager.store(), config);
    if let Some(length) = min_prefix {
        lookup = lookup.with_min_prefix_length(length);
    }
    let archive = lookup.resolve(id)?;
    println!("{}\t{}\t{}", archive.uid, archive.name, archive.path);
    Ok(())
}

pub fn relocate(manager: &Manager, config: &Config, id: &str, dest: &Path) -> anyhow::Result<()> {
    let mut archive = resolver(manager.store(), config).resolve(id)?;
    manager.relocate(&mut archive, dest)?;
    println!("Moved {} to {}", archive.name, archive.path);
    Ok(())
}

pub fn delete(manager: &Manager, config: &Config, id: &str, force: bool) -> anyhow::Result<()> {
    let mut archive = resolver(manager.store(), config).resolve(id)?;
    if force {
        manager.force_delete(&mut archive, Utc::now())?;
        println!(
            "Removed the file of {}; its entry stays in the trash until `zarch trash purge`",
            archive.name
        );
        return Ok(());
    }
    manager.trash(&mut archive, Utc::now())?;
    println!(
        "Deleted {} ({}); purged after {} days unless restored with `zarch restore {}`",
        archive.name,
        archive.short_uid(),
        config.storage.retention_days,
        archive.uid
    );
    Ok(())
}

pub fn restore(
    manager: &Manager,
    config: &Config,
    id: &str,
    dry_run: bool,
) -> anyhow::Result<()> {
    let mut archive = resolver(manager.store(), config).resolve(id)?;
    if dry_run {
        let target = manager.restore_target(&archive)?;
        println!("Would restore {} -> {}", archive.path, target.display());
        return Ok(());
    }
    let target = manager.restore(&mut archive)?;
    println!("Restored {} to {}", archive.name, target.display());
    Ok(())
}

pub fn upload_mark(
    manager: &Manager,
    config: &Config,
    id: &str,
    destination: &str,
) -> anyhow::Result<()> {
    let mut archive = resolver(manager.store(), config).resolve(id)?;
    manager.mark_uploaded(&mut archive, destination)?;
    println!("Marked {} as uploaded to {destination}", archive.name);
    Ok(())
}
