//! Archive root management: opening archive files for live publishes and
//! listing, renaming and removing finished ones.
//!
//! Every user-supplied name is resolved lexically against the root before any
//! filesystem call; a name that would climb above the root is refused outright.
//! The folder it lands in must also canonicalize to somewhere under the root, so
//! symlinked folders cannot lead outside either.

use std::{
    collections::HashSet,
    ffi::OsStr,
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use thiserror::Error;
use time::{OffsetDateTime, macros::format_description};
use tokio::fs::{self, File, OpenOptions};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::{
    services::file_times::{CreationClock, PlatformClock},
    state::TopicKey,
};

/// Errors raised while touching the archive root.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("path escapes the archive root: {0}")]
    OutsideRoot(String),
    #[error("invalid file name: {0}")]
    InvalidName(String),
    #[error("archived file not found: {0}")]
    NotFound(String),
    #[error("archived file already exists: {0}")]
    AlreadyExists(String),
    #[error("archive i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// Finished archive found while scanning the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedFile {
    /// Bare file name.
    pub filename: String,
    /// Path relative to the archive root, `/`-separated.
    pub path: String,
    pub created: SystemTime,
}

/// Filesystem view of the archive root.
#[derive(Clone)]
pub struct ArchiveDirectory {
    root: PathBuf,
    clock: Arc<dyn CreationClock>,
}

impl ArchiveDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_clock(root, Arc::new(PlatformClock))
    }

    /// Use a custom creation-time source instead of the platform one.
    pub fn with_clock(root: impl Into<PathBuf>, clock: Arc<dyn CreationClock>) -> Self {
        Self {
            root: root.into(),
            clock,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    /// Create the file receiving a new archived publish of `topic`.
    ///
    /// Files land in a per-publish folder named after the current UTC minute and
    /// carry the topic's last path component as name. An existing file is never
    /// reused: when the name is taken the file is numbered (`show-1.mp3`, ...).
    pub async fn create(&self, topic: &TopicKey) -> Result<(PathBuf, File), ArchiveError> {
        let name = topic
            .basename()
            .ok_or_else(|| ArchiveError::InvalidName(topic.to_string()))?;
        let folder = self.root.join(folder_stamp(OffsetDateTime::now_utc()));
        fs::create_dir_all(&folder).await?;

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let path = folder.join(numbered_name(name, attempt));
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((path, file)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(ArchiveError::AlreadyExists(format!(
            "{}/{name}",
            folder.display()
        )))
    }

    /// Scan the root for archived files, newest first.
    ///
    /// Files whose name appears in `active` are still being written and are left out.
    /// The scan is blocking; call it from a blocking-friendly context.
    pub fn list(&self, active: &HashSet<String>) -> Vec<ArchivedFile> {
        let mut files: Vec<ArchivedFile> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(error = %err, "skipping unreadable archive entry");
                    None
                }
            })
            .filter(|entry| !entry.file_type().is_dir())
            .filter_map(|entry| {
                let filename = entry.file_name().to_str()?.to_string();
                if active.contains(&filename) {
                    return None;
                }
                let metadata = entry.metadata().ok()?;
                let relative = entry.path().strip_prefix(&self.root).ok()?;
                Some(ArchivedFile {
                    filename,
                    path: slash_path(relative),
                    created: self.clock.created(&metadata),
                })
            })
            .collect();

        files.sort_by(|a, b| {
            b.created
                .cmp(&a.created)
                .then_with(|| a.path.cmp(&b.path))
        });
        files
    }

    /// Join `relative` onto the root, refusing anything that would leave it.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, ArchiveError> {
        let mut parts: Vec<&OsStr> = Vec::new();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::CurDir | Component::RootDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(ArchiveError::OutsideRoot(relative.to_string()));
                    }
                }
                Component::Prefix(_) => {
                    return Err(ArchiveError::OutsideRoot(relative.to_string()));
                }
            }
        }

        if parts.is_empty() {
            return Err(ArchiveError::InvalidName(relative.to_string()));
        }
        Ok(parts
            .into_iter()
            .fold(self.root.clone(), |path, part| path.join(part)))
    }

    /// Delete an archived file. There is no undo.
    pub async fn remove(&self, relative: &str) -> Result<(), ArchiveError> {
        let path = self.existing_file(relative).await?;
        fs::remove_file(&path).await?;
        info!(path = %path.display(), "removed archived file");
        Ok(())
    }

    /// Move an archived file to `new_name`, both relative to the root.
    ///
    /// The new name must keep the file's extension and must not overwrite an
    /// existing entry. Returns the new root-relative path.
    pub async fn rename(&self, relative: &str, new_name: &str) -> Result<String, ArchiveError> {
        let source = self.existing_file(relative).await?;
        let new_name = new_name.trim();
        let target = self.resolve(new_name)?;

        if source.extension() != target.extension() {
            return Err(ArchiveError::InvalidName(format!(
                "'{new_name}' must keep the extension of '{relative}'"
            )));
        }
        self.ensure_within_root(&target, new_name).await?;
        if fs::try_exists(&target).await? {
            return Err(ArchiveError::AlreadyExists(new_name.to_string()));
        }

        fs::rename(&source, &target).await?;
        info!(
            from = %source.display(),
            to = %target.display(),
            "renamed archived file"
        );
        Ok(target
            .strip_prefix(&self.root)
            .map(slash_path)
            .unwrap_or_else(|_| new_name.to_string()))
    }

    /// Resolve `relative` and require it to be a regular file, not following symlinks.
    async fn existing_file(&self, relative: &str) -> Result<PathBuf, ArchiveError> {
        let path = self.resolve(relative)?;
        self.ensure_within_root(&path, relative).await?;
        let metadata = match fs::symlink_metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ArchiveError::NotFound(relative.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        if !metadata.is_file() {
            return Err(ArchiveError::InvalidName(relative.to_string()));
        }
        Ok(path)
    }

    /// Require the folder holding `path` to exist and to really live under the root.
    async fn ensure_within_root(&self, path: &Path, relative: &str) -> Result<(), ArchiveError> {
        let folder = path.parent().unwrap_or(&self.root);
        let not_found = |err: io::Error| {
            if err.kind() == ErrorKind::NotFound {
                ArchiveError::NotFound(format!("folder of '{relative}' does not exist"))
            } else {
                err.into()
            }
        };
        let root = fs::canonicalize(&self.root).await.map_err(not_found)?;
        let folder = fs::canonicalize(folder).await.map_err(not_found)?;
        if !folder.starts_with(&root) {
            return Err(ArchiveError::OutsideRoot(relative.to_string()));
        }
        Ok(())
    }
}

const MAX_NAME_ATTEMPTS: usize = 1000;

/// `show.mp3` for the first attempt, then `show-1.mp3`, `show-2.mp3`, ...
fn numbered_name(name: &str, attempt: usize) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    let path = Path::new(name);
    match (
        path.file_stem().and_then(OsStr::to_str),
        path.extension().and_then(OsStr::to_str),
    ) {
        (Some(stem), Some(extension)) => format!("{stem}-{attempt}.{extension}"),
        _ => format!("{name}-{attempt}"),
    }
}

/// Minute-resolution folder name for a new archive, e.g. `202410181533`.
fn folder_stamp(now: OffsetDateTime) -> String {
    now.format(format_description!("[year][month][day][hour][minute]"))
        .unwrap_or_else(|_| (now.unix_timestamp() / 60).to_string())
}

fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| component.as_os_str().to_str())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use time::macros::datetime;

    use super::*;

    /// Uses the modification time so tests can order files deterministically.
    struct ModifiedClock;

    impl CreationClock for ModifiedClock {
        fn created(&self, metadata: &std::fs::Metadata) -> SystemTime {
            metadata.modified().unwrap()
        }
    }

    fn write_file(path: &Path, age_secs: u64) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let file = std::fs::File::create(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
    }

    #[test]
    fn folder_stamp_has_minute_resolution() {
        assert_eq!(
            folder_stamp(datetime!(2024-10-18 15:33:59 UTC)),
            "202410181533"
        );
    }

    #[tokio::test]
    async fn create_uses_dated_folder_and_topic_basename() {
        let dir = tempfile::tempdir().unwrap();
        let archives = ArchiveDirectory::new(dir.path());

        let (path, _file) = archives
            .create(&TopicKey::from_path("/shows/show1.mp3"))
            .await
            .unwrap();

        assert_eq!(path.file_name().unwrap(), "show1.mp3");
        let folder = path.parent().unwrap();
        assert_eq!(folder.parent().unwrap(), dir.path());
        assert_eq!(folder.file_name().unwrap().len(), 12);
        assert!(path.exists());
    }

    #[test]
    fn numbered_names_keep_the_extension() {
        assert_eq!(numbered_name("show.mp3", 0), "show.mp3");
        assert_eq!(numbered_name("show.mp3", 1), "show-1.mp3");
        assert_eq!(numbered_name("live", 2), "live-2");
    }

    #[tokio::test]
    async fn create_never_reuses_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let archives = ArchiveDirectory::new(dir.path());
        let stamp = folder_stamp(OffsetDateTime::now_utc());
        write_file(&dir.path().join(&stamp).join("show.mp3"), 0);
        std::fs::write(dir.path().join(&stamp).join("show.mp3"), b"earlier").unwrap();

        let (first, _file) = archives
            .create(&TopicKey::from_path("/a/show.mp3"))
            .await
            .unwrap();
        let (second, _file) = archives
            .create(&TopicKey::from_path("/b/show.mp3"))
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(first.extension().unwrap(), "mp3");
        assert_eq!(second.extension().unwrap(), "mp3");
        // the minute may have rolled over; only an existing file must survive
        if first.parent().unwrap().ends_with(&stamp) {
            assert_eq!(first.file_name().unwrap(), "show-1.mp3");
        }
        assert_eq!(
            std::fs::read(dir.path().join(&stamp).join("show.mp3")).unwrap(),
            b"earlier"
        );
    }

    #[tokio::test]
    async fn create_rejects_topics_without_a_name() {
        let dir = tempfile::tempdir().unwrap();
        let archives = ArchiveDirectory::new(dir.path());

        let result = archives.create(&TopicKey::from_path("/..")).await;
        assert!(matches!(result, Err(ArchiveError::InvalidName(_))));
    }

    #[test]
    fn list_is_newest_first_and_skips_active_archives() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("202401010000/old.mp3"), 300);
        write_file(&dir.path().join("202401010005/new.mp3"), 10);
        write_file(&dir.path().join("202401010006/live.mp3"), 1);
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();

        let archives = ArchiveDirectory::with_clock(dir.path(), Arc::new(ModifiedClock));
        let files = archives.list(&HashSet::from(["live.mp3".to_string()]));

        let paths: Vec<&str> = files.iter().map(|file| file.path.as_str()).collect();
        assert_eq!(paths, vec!["202401010005/new.mp3", "202401010000/old.mp3"]);
        assert_eq!(files[0].filename, "new.mp3");
    }

    #[test]
    fn list_of_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let archives = ArchiveDirectory::new(dir.path().join("nope"));
        assert!(archives.list(&HashSet::new()).is_empty());
    }

    #[test]
    fn resolve_stays_under_root() {
        let archives = ArchiveDirectory::new("/srv/archived");

        assert_eq!(
            archives.resolve("2024/a.mp3").unwrap(),
            PathBuf::from("/srv/archived/2024/a.mp3")
        );
        assert_eq!(
            archives.resolve("/2024/./b/../a.mp3").unwrap(),
            PathBuf::from("/srv/archived/2024/a.mp3")
        );
        assert!(matches!(
            archives.resolve("../../etc/passwd"),
            Err(ArchiveError::OutsideRoot(_))
        ));
        assert!(matches!(
            archives.resolve("2024/../../x.mp3"),
            Err(ArchiveError::OutsideRoot(_))
        ));
        assert!(matches!(
            archives.resolve("./"),
            Err(ArchiveError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn rename_with_traversal_creates_nothing() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("archived");
        write_file(&root.join("202401010000/show.mp3"), 0);
        let archives = ArchiveDirectory::new(&root);

        let result = archives
            .rename("202401010000/show.mp3", "../../etc/passwer")
            .await;

        assert!(matches!(result, Err(ArchiveError::OutsideRoot(_))));
        assert!(root.join("202401010000/show.mp3").exists());
        assert!(!outer.path().join("etc").exists());
    }

    #[tokio::test]
    async fn rename_moves_file_within_root() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("202401010000/show.mp3"), 0);
        let archives = ArchiveDirectory::new(dir.path());

        let renamed = archives
            .rename("202401010000/show.mp3", " 202401010000/best-of.mp3 ")
            .await
            .unwrap();

        assert_eq!(renamed, "202401010000/best-of.mp3");
        assert!(dir.path().join("202401010000/best-of.mp3").exists());
        assert!(!dir.path().join("202401010000/show.mp3").exists());
    }

    #[tokio::test]
    async fn rename_keeps_extension_and_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("a/show.mp3"), 0);
        write_file(&dir.path().join("a/taken.mp3"), 0);
        let archives = ArchiveDirectory::new(dir.path());

        assert!(matches!(
            archives.rename("a/show.mp3", "a/show.txt").await,
            Err(ArchiveError::InvalidName(_))
        ));
        assert!(matches!(
            archives.rename("a/show.mp3", "a/taken.mp3").await,
            Err(ArchiveError::AlreadyExists(_))
        ));
        assert!(matches!(
            archives.rename("a/show.mp3", "missing/show.mp3").await,
            Err(ArchiveError::NotFound(_))
        ));
        assert!(matches!(
            archives.rename("a/ghost.mp3", "a/other.mp3").await,
            Err(ArchiveError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn remove_only_touches_regular_files_under_root() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("archived");
        write_file(&root.join("a/show.mp3"), 0);
        write_file(&outer.path().join("secret.mp3"), 0);
        let archives = ArchiveDirectory::new(&root);

        assert!(matches!(
            archives.remove("../secret.mp3").await,
            Err(ArchiveError::OutsideRoot(_))
        ));
        assert!(outer.path().join("secret.mp3").exists());

        assert!(matches!(
            archives.remove("a").await,
            Err(ArchiveError::InvalidName(_))
        ));
        assert!(matches!(
            archives.remove("a/ghost.mp3").await,
            Err(ArchiveError::NotFound(_))
        ));

        archives.remove("a/show.mp3").await.unwrap();
        assert!(!root.join("a/show.mp3").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinked_folders_do_not_lead_outside_the_root() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("archived");
        let elsewhere = outer.path().join("elsewhere");
        write_file(&root.join("a/show.mp3"), 0);
        write_file(&elsewhere.join("secret.mp3"), 0);
        std::os::unix::fs::symlink(&elsewhere, root.join("link")).unwrap();
        let archives = ArchiveDirectory::new(&root);

        assert!(matches!(
            archives.rename("a/show.mp3", "link/x.mp3").await,
            Err(ArchiveError::OutsideRoot(_))
        ));
        assert!(!elsewhere.join("x.mp3").exists());
        assert!(root.join("a/show.mp3").exists());

        assert!(matches!(
            archives.remove("link/secret.mp3").await,
            Err(ArchiveError::OutsideRoot(_))
        ));
        assert!(elsewhere.join("secret.mp3").exists());
    }
}
