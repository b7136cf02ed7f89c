//! Filing downloaded files into the `<root>/<YYYY>/<MM>/` tree.
//!
//! Publication never overwrites: a file is hard-linked to its candidate name,
//! which fails if the name is taken, so two writers can never clobber each
//! other. An occupied name holding identical bytes makes the item a
//! duplicate; different bytes move on to the next `name-N.ext` candidate.
//! Each filed item leaves a small record under [`RECORD_DIR`] so a later run
//! can skip it without downloading.

use std::fs::{self, FileTimes};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::error::PlaceError;
use super::fetch::TempFile;
use super::item::MediaItem;
use super::paths::{collision_candidate, date_dir, item_filename};

/// Upper bound on `name-N.ext` candidates tried for one item.
pub const MAX_CANDIDATES: usize = 10_000;

/// Directory under the root holding one placement record per backed-up item.
pub const RECORD_DIR: &str = ".gphotos-placed";

/// Which file holds an item. Written whenever an item is placed or found to
/// be a duplicate.
#[derive(Debug, Serialize, Deserialize)]
struct PlacementRecord {
    id: String,
    /// Relative to the backup root.
    path: PathBuf,
    size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementResult {
    Placed(PathBuf),
    /// Identical content already lives at this path; nothing was written.
    Duplicate(PathBuf),
}

impl PlacementResult {
    pub fn path(&self) -> &Path {
        match self {
            PlacementResult::Placed(p) | PlacementResult::Duplicate(p) => p,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Organizer {
    root: PathBuf,
}

enum PublishError {
    Occupied,
    CrossDevice,
    Io(io::Error),
}

/// Hidden copy of a temp file inside the destination directory. Removed on
/// drop unless it was renamed into place.
struct StagedCopy {
    path: PathBuf,
}

impl Drop for StagedCopy {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

impl Organizer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn destination_dir(&self, item: &MediaItem) -> PathBuf {
        date_dir(&self.root, item.capture_time.as_ref())
    }

    /// Canonical (first-choice) path for the item.
    pub fn destination_path(&self, item: &MediaItem) -> PathBuf {
        self.destination_dir(item).join(item_filename(item))
    }

    /// The file an earlier run filed this item at, if it is still there with
    /// the recorded size.
    ///
    /// Only a placement record proves an item is backed up. A same-named file
    /// without one may be a different photo, so the item is fetched and
    /// [`Organizer::place`] compares content.
    pub fn existing_copy(&self, item: &MediaItem) -> Option<PathBuf> {
        let raw = fs::read(self.record_path(&item.id)).ok()?;
        let record: PlacementRecord = match serde_json::from_slice(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Ignoring unreadable placement record for {}: {}", item.id, e);
                return None;
            }
        };
        if record.id != item.id {
            return None;
        }
        let path = self.root.join(&record.path);
        let meta = fs::metadata(&path).ok()?;
        (meta.is_file() && meta.len() == record.size).then_some(path)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        let digest = Sha256::digest(id.as_bytes());
        let name: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        self.root.join(RECORD_DIR).join(format!("{}.json", name))
    }

    fn write_record(&self, item: &MediaItem, path: &Path, size: u64) -> io::Result<()> {
        let record = PlacementRecord {
            id: item.id.clone(),
            path: path.strip_prefix(&self.root).unwrap_or(path).to_path_buf(),
            size,
        };
        let dir = self.root.join(RECORD_DIR);
        fs::create_dir_all(&dir)?;
        let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp, serde_json::to_vec(&record)?)?;
        fs::rename(&tmp, self.record_path(&item.id)).inspect_err(|_| {
            let _ = fs::remove_file(&tmp);
        })
    }

    /// A missing record only costs a re-download and a content check later.
    fn remember(&self, item: &MediaItem, path: &Path, size: u64) {
        if let Err(e) = self.write_record(item, path, size) {
            tracing::warn!("Could not record placement of {}: {}", item.id, e);
        }
    }

    /// Move `temp` to its destination, or discard it as a duplicate.
    pub fn place(&self, temp: TempFile, item: &MediaItem) -> Result<PlacementResult, PlaceError> {
        let dir = self.destination_dir(item);
        fs::create_dir_all(&dir).map_err(|e| PlaceError::io(&dir, e))?;
        let filename = item_filename(item);

        let mut staged: Option<StagedCopy> = None;
        for n in 0..MAX_CANDIDATES {
            let candidate = dir.join(collision_candidate(&filename, n));
            let published = loop {
                let source = staged.as_ref().map_or(temp.path(), |s| s.path.as_path());
                match publish(source, &candidate) {
                    Err(PublishError::CrossDevice) if staged.is_none() => {
                        tracing::debug!(
                            "{} is on another filesystem, staging in {}",
                            temp.path().display(),
                            dir.display()
                        );
                        staged = Some(stage(&temp, &dir, &filename)?);
                    }
                    other => break other,
                }
            };
            match published {
                Ok(()) => {
                    if let Some(t) = item.capture_time {
                        if let Err(e) = set_file_mtime(&candidate, t.timestamp()) {
                            tracing::warn!("Could not set mtime on {}: {}", candidate.display(), e);
                        }
                    }
                    self.remember(item, &candidate, temp.len());
                    return Ok(PlacementResult::Placed(candidate));
                }
                Err(PublishError::Occupied) => {
                    if same_content(&candidate, &temp)
                        .map_err(|e| PlaceError::io(&candidate, e))?
                    {
                        self.remember(item, &candidate, temp.len());
                        return Ok(PlacementResult::Duplicate(candidate));
                    }
                    tracing::debug!("{} holds different content", candidate.display());
                }
                Err(PublishError::CrossDevice) => {
                    return Err(PlaceError::io(
                        &candidate,
                        io::Error::from(io::ErrorKind::CrossesDevices),
                    ));
                }
                Err(PublishError::Io(e)) => return Err(PlaceError::io(&candidate, e)),
            }
        }
        Err(PlaceError::NoFreeName {
            filename,
            tried: MAX_CANDIDATES,
        })
    }
}

/// No-clobber publish of `src` at `dst`. The source stays in place after a
/// hard link; its owner removes it.
fn publish(src: &Path, dst: &Path) -> Result<(), PublishError> {
    match fs::hard_link(src, dst) {
        Ok(()) => Ok(()),
        Err(e) => match e.kind() {
            io::ErrorKind::AlreadyExists => Err(PublishError::Occupied),
            io::ErrorKind::CrossesDevices => Err(PublishError::CrossDevice),
            io::ErrorKind::Unsupported | io::ErrorKind::PermissionDenied => {
                // No hard links here: check, then rename.
                if fs::symlink_metadata(dst).is_ok() {
                    return Err(PublishError::Occupied);
                }
                fs::rename(src, dst).map_err(|e| match e.kind() {
                    io::ErrorKind::CrossesDevices => PublishError::CrossDevice,
                    _ => PublishError::Io(e),
                })
            }
            _ => Err(PublishError::Io(e)),
        },
    }
}

/// Copy `temp` next to its destination, sync it, and check the length.
fn stage(temp: &TempFile, dir: &Path, filename: &str) -> Result<StagedCopy, PlaceError> {
    let staged = StagedCopy {
        path: dir.join(format!(".{}.{}.partial", filename, Uuid::new_v4().simple())),
    };
    let copied = fs::copy(temp.path(), &staged.path).map_err(|e| PlaceError::io(&staged.path, e))?;
    fs::File::open(&staged.path)
        .and_then(|f| f.sync_all())
        .map_err(|e| PlaceError::io(&staged.path, e))?;
    if copied != temp.len() {
        return Err(PlaceError::StagingMismatch {
            path: staged.path.clone(),
            expected: temp.len(),
            actual: copied,
        });
    }
    Ok(staged)
}

/// Size first, then SHA-256 of the existing file against the streamed hash.
fn same_content(existing: &Path, temp: &TempFile) -> io::Result<bool> {
    let meta = fs::metadata(existing)?;
    if !meta.is_file() || meta.len() != temp.len() {
        return Ok(false);
    }
    let mut hasher = Sha256::new();
    io::copy(&mut fs::File::open(existing)?, &mut hasher)?;
    let digest: [u8; 32] = hasher.finalize().into();
    Ok(&digest == temp.sha256())
}

/// Set the modification and access times of a file to the given Unix
/// timestamp. Uses `std::fs::File::set_times` (stable since Rust 1.75).
///
/// Handles negative timestamps (dates before 1970) gracefully by clamping
/// to the Unix epoch.
fn set_file_mtime(path: &Path, timestamp: i64) -> io::Result<()> {
    let time = if timestamp >= 0 {
        UNIX_EPOCH + Duration::from_secs(timestamp as u64)
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(timestamp.unsigned_abs()))
            .unwrap_or(SystemTime::UNIX_EPOCH)
    };
    let times = FileTimes::new().set_modified(time).set_accessed(time);
    let file = fs::File::options().write(true).open(path)?;
    file.set_times(times)?;
    Ok(())
}
