//! Managed storage workspace.
//!
//! Layout under the managed root:
//!
//! ```text
//! registry.db   archive registry
//! archives/     files zarch owns
//! trash/        soft-deleted managed files awaiting purge
//! ```
//!
//! The registry only records paths; every file move happens here, before the
//! matching row update.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, ensure, Context};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use zarch_db::{Archive, ArchiveStore, Status};

const REGISTRY_FILE: &str = "registry.db";
const ARCHIVES_DIR: &str = "archives";
const TRASH_DIR: &str = "trash";

/// How [`Manager::register`] should record a file.
#[derive(Debug, Default, Clone)]
pub struct RegisterOptions {
    /// Registry name; defaults to the file name.
    pub name: Option<String>,
    pub profile: Option<String>,
    /// Move the file into managed storage.
    pub managed: bool,
    pub metadata: Option<String>,
}

pub struct Manager {
    base: PathBuf,
    store: ArchiveStore,
}

impl Manager {
    /// Open the workspace rooted at `base`, creating it if needed.
    pub fn open(base: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let base = base.into();
        create_private_dir(&base.join(ARCHIVES_DIR))?;
        let base = fs::canonicalize(&base)?;
        let store = ArchiveStore::open(base.join(REGISTRY_FILE))?;

        let filled = store.backfill_uids(|| store.uid_generator().generate())?;
        if filled > 0 {
            info!(count = filled, "Assigned UIDs to legacy archives");
        }
        Ok(Self { base, store })
    }

    /// Open only the registry, leaving pending migrations alone.
    pub fn open_registry_for_maintenance(base: &Path) -> anyhow::Result<ArchiveStore> {
        Ok(ArchiveStore::open_for_maintenance(base.join(REGISTRY_FILE))?)
    }

    pub fn store(&self) -> &ArchiveStore {
        &self.store
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn archives_dir(&self) -> PathBuf {
        self.base.join(ARCHIVES_DIR)
    }

    pub fn trash_dir(&self) -> PathBuf {
        self.base.join(TRASH_DIR)
    }

    /// Where a managed archive called `name` lives.
    pub fn managed_path(&self, name: &str) -> PathBuf {
        self.archives_dir().join(name)
    }

    /// Record `file` in the registry, moving it into managed storage first
    /// when asked to.
    pub fn register(&self, file: &Path, options: RegisterOptions) -> anyhow::Result<Archive> {
        let meta = fs::metadata(file).with_context(|| format!("reading {}", file.display()))?;
        ensure!(meta.is_file(), "{} is not a regular file", file.display());

        let name = match options.name {
            Some(name) => name,
            None => file_name(file)?,
        };
        check_name(&name)?;
        ensure!(
            !self.store.exists(&name)?,
            "an archive named '{name}' is already registered"
        );

        let checksum = sha256_file(file)?;
        let source = fs::canonicalize(file)?;
        let target = if options.managed {
            let target = self.managed_path(&name);
            if source != target {
                ensure!(!target.exists(), "{} already exists", target.display());
                move_or_copy(&source, &target)?;
            }
            target
        } else {
            source.clone()
        };

        let mut archive = Archive::new(name, path_string(&target), meta.len());
        archive.checksum = Some(checksum);
        archive.profile = options.profile;
        archive.managed = options.managed;
        archive.metadata = options.metadata;
        archive.last_seen = Some(Utc::now());

        if let Err(e) = self.store.add(&mut archive) {
            if target != source {
                if let Err(undo) = move_or_copy(&target, &source) {
                    warn!(error = %undo, path = %target.display(), "Could not return file after failed registration");
                }
            }
            return Err(e.into());
        }
        info!(uid = %archive.uid, name = %archive.name, "Archive registered");
        Ok(archive)
    }

    /// Move the file of `archive` to `dest`. A directory destination keeps
    /// the file name.
    pub fn relocate(&self, archive: &mut Archive, dest: &Path) -> anyhow::Result<()> {
        ensure!(
            !archive.is_deleted(),
            "archive '{}' is deleted; restore it first",
            archive.name
        );
        let target = if dest.is_dir() {
            dest.join(file_name(Path::new(&archive.path))?)
        } else {
            dest.to_path_buf()
        };
        ensure!(!target.exists(), "{} already exists", target.display());

        let before = archive.clone();
        let source = PathBuf::from(&archive.path);
        move_or_copy(&source, &target)?;
        let target = fs::canonicalize(&target).unwrap_or(target);
        archive.managed = target.starts_with(self.archives_dir());
        archive.path = path_string(&target);
        archive.last_seen = Some(Utc::now());
        self.commit(archive, before, Some((source.as_path(), target.as_path())))
    }

    /// Soft delete. Managed files go to the trash; external files stay put.
    pub fn trash(&self, archive: &mut Archive, now: DateTime<Utc>) -> anyhow::Result<()> {
        if archive.is_deleted() {
            bail!("archive '{}' is already deleted", archive.name);
        }
        let before = archive.clone();
        if archive.managed {
            let trash_dir = self.trash_dir();
            create_private_dir(&trash_dir)?;
            let source = PathBuf::from(&archive.path);
            let target = trash_dir.join(file_name(&source)?);
            ensure!(!target.exists(), "{} is already in the trash", target.display());
            move_or_copy(&source, &target)?;
            archive.mark_trashed(path_string(&target), now);
            self.commit(archive, before, Some((source.as_path(), target.as_path())))?;
        } else {
            archive.mark_deleted(now);
            self.commit(archive, before, None)?;
        }
        debug!(uid = %archive.uid, "Archive moved to trash");
        Ok(())
    }

    /// Where [`Manager::restore`] would put `archive` back.
    pub fn restore_target(&self, archive: &Archive) -> anyhow::Result<PathBuf> {
        ensure!(
            archive.is_deleted(),
            "archive '{}' is not deleted (status={})",
            archive.name,
            archive.status
        );
        Ok(match &archive.original_path {
            Some(original) => PathBuf::from(original),
            None if archive.managed => self.managed_path(&archive.name),
            None => PathBuf::from(&archive.path),
        })
    }

    /// Undo a soft delete. Returns where the archive now lives.
    pub fn restore(&self, archive: &mut Archive) -> anyhow::Result<PathBuf> {
        let target = self.restore_target(archive)?;
        let source = PathBuf::from(&archive.path);
        ensure!(
            source.exists(),
            "{} no longer exists; archive '{}' cannot be restored",
            source.display(),
            archive.name
        );

        let before = archive.clone();
        let moved = archive.managed && source != target;
        if moved {
            ensure!(!target.exists(), "{} already exists", target.display());
            if let Some(parent) = target.parent() {
                create_private_dir(parent)?;
            }
            move_or_copy(&source, &target)?;
        }
        archive.mark_restored(path_string(&target), Utc::now());
        self.commit(archive, before, moved.then_some((source.as_path(), target.as_path())))?;
        Ok(target)
    }

    /// Remove the file now and mark the archive deleted. The row stays in
    /// the trash listing until purged.
    pub fn force_delete(&self, archive: &mut Archive, now: DateTime<Utc>) -> anyhow::Result<()> {
        remove_if_present(Path::new(&archive.path))?;
        archive.mark_removed(now);
        self.store.update(archive)?;
        info!(uid = %archive.uid, name = %archive.name, "Archive file removed");
        Ok(())
    }

    /// Write `archive` after its file moved `from -> to`. If the row cannot
    /// be written the file goes back and `archive` is reset to `before`.
    fn commit(
        &self,
        archive: &mut Archive,
        before: Archive,
        moved: Option<(&Path, &Path)>,
    ) -> anyhow::Result<()> {
        let Err(e) = self.store.update(archive) else {
            return Ok(());
        };
        if let Some((from, to)) = moved {
            if let Err(undo) = move_or_copy(to, from) {
                warn!(error = %undo, path = %to.display(), "Could not move file back after failed update");
            }
        }
        *archive = before;
        Err(e.into())
    }

    /// Deleted archives, most recently deleted first.
    pub fn trashed(&self) -> anyhow::Result<Vec<Archive>> {
        let mut archives: Vec<_> = self
            .store
            .list()?
            .into_iter()
            .filter(Archive::is_deleted)
            .collect();
        archives.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
        Ok(archives)
    }

    /// Deleted archives whose retention has run out, or every deleted
    /// archive when `all` is set.
    pub fn purge_candidates(&self, retention_days: u32, all: bool) -> anyhow::Result<Vec<Archive>> {
        let now = Utc::now();
        Ok(self
            .trashed()?
            .into_iter()
            .filter(|a| all || purge_due(a, retention_days).is_some_and(|due| due <= now))
            .collect())
    }

    /// Permanently remove `archives`. Only files inside the trash are
    /// deleted from disk.
    pub fn purge(&self, archives: &[Archive]) -> anyhow::Result<usize> {
        let trash_dir = self.trash_dir();
        for archive in archives {
            let path = Path::new(&archive.path);
            if archive.managed && path.starts_with(&trash_dir) {
                remove_if_present(path)?;
            }
            self.store.delete(&archive.name)?;
        }
        if !archives.is_empty() {
            info!(count = archives.len(), "Purged trashed archives");
        }
        Ok(archives.len())
    }

    pub fn mark_uploaded(&self, archive: &mut Archive, destination: &str) -> anyhow::Result<()> {
        archive.mark_uploaded(destination, Utc::now());
        self.store.update(archive)?;
        Ok(())
    }

    /// Reconcile the recorded status with what is on disk. Deleted archives
    /// are left alone. Returns true when the row changed.
    pub fn refresh_presence(&self, archive: &mut Archive) -> anyhow::Result<bool> {
        let on_disk = Path::new(&archive.path).exists();
        match archive.status {
            Status::Present if !on_disk => archive.mark_missing(),
            Status::Missing if on_disk => {
                archive.status = Status::Present;
                archive.last_seen = Some(Utc::now());
            }
            Status::Present => archive.last_seen = Some(Utc::now()),
            _ => return Ok(false),
        }
        self.store.update(archive)?;
        Ok(true)
    }

    pub fn close(self) -> anyhow::Result<()> {
        self.store.close()?;
        Ok(())
    }
}

/// When a deleted archive becomes eligible for purge.
pub fn purge_due(archive: &Archive, retention_days: u32) -> Option<DateTime<Utc>> {
    archive
        .deleted_at?
        .checked_add_signed(Duration::days(i64::from(retention_days)))
}

/// Hex SHA-256 of a file, streamed.
pub fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Rename, falling back to copy-and-remove across filesystems.
fn move_or_copy(src: &Path, dst: &Path) -> anyhow::Result<()> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    let mut reader = File::open(src).with_context(|| format!("opening {}", src.display()))?;
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut writer = options
        .open(dst)
        .with_context(|| format!("creating {}", dst.display()))?;
    io::copy(&mut reader, &mut writer)?;
    writer.sync_all()?;
    fs::remove_file(src).with_context(|| format!("removing {}", src.display()))?;
    Ok(())
}

fn remove_if_present(path: &Path) -> anyhow::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
    }
}

fn create_private_dir(dir: &Path) -> anyhow::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o750);
    }
    builder
        .create(dir)
        .with_context(|| format!("creating {}", dir.display()))
}

fn file_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))
}

/// Names double as file names in managed storage.
fn check_name(name: &str) -> anyhow::Result<()> {
    let mut components = Path::new(name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    ensure!(
        single && !name.contains(['/', '\\']),
        "invalid archive name '{name}': expected a plain file name"
    );
    Ok(())
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
