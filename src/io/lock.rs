use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const LOCK_FILE: &str = ".lock";
const DEFAULT_WAIT: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_millis(100);

/// Advisory lock on a tree directory, held by one `ht` command at a time.
///
/// Commands that rewrite `records.json`, `view.toml` or `.state.json`
/// take it for their whole read-modify-write. The lock file stays on disk;
/// while held it names the holding process, and it is emptied on release.
pub struct TreeLock {
    file: File,
    path: PathBuf,
}

/// The process named in a held lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    pub pid: u32,
    pub command: String,
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ht {} (pid {})", self.command, self.pid)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("could not open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not lock {path}: {source}")]
    Flock {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("tree at {} is busy: held by {}", .path.display(), describe(.holder))]
    Busy {
        path: PathBuf,
        holder: Option<LockHolder>,
    },
}

fn describe(holder: &Option<LockHolder>) -> String {
    match holder {
        Some(holder) => holder.to_string(),
        None => "another ht process".to_string(),
    }
}

impl TreeLock {
    /// Lock `tree_dir` on behalf of `command`, waiting up to `wait` for a
    /// current holder to finish.
    pub fn acquire(tree_dir: &Path, command: &str, wait: Duration) -> Result<Self, LockError> {
        let path = tree_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| LockError::Open {
                path: path.clone(),
                source: e,
            })?;

        let deadline = Instant::now() + wait;
        let mut backoff = Duration::from_millis(5);
        while !try_lock(&file).map_err(|e| LockError::Flock {
            path: path.clone(),
            source: e,
        })? {
            let now = Instant::now();
            if now >= deadline {
                let holder = Self::holder(tree_dir);
                return Err(LockError::Busy { path, holder });
            }
            std::thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }

        let mut lock = TreeLock { file, path };
        if let Err(e) = lock.record_holder(command) {
            tracing::warn!(error = %e, "could not record lock holder");
        }
        tracing::debug!(path = %lock.path.display(), command, "tree lock acquired");
        Ok(lock)
    }

    pub fn acquire_default(tree_dir: &Path, command: &str) -> Result<Self, LockError> {
        Self::acquire(tree_dir, command, DEFAULT_WAIT)
    }

    /// Who holds the lock on `tree_dir`, if anyone left their name.
    pub fn holder(tree_dir: &Path) -> Option<LockHolder> {
        let text = fs::read_to_string(tree_dir.join(LOCK_FILE)).ok()?;
        let (pid, command) = text.trim().split_once(' ')?;
        Some(LockHolder {
            pid: pid.parse().ok()?,
            command: command.to_string(),
        })
    }

    fn record_holder(&mut self, command: &str) -> std::io::Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        writeln!(self.file, "{} {}", std::process::id(), command)?;
        self.file.flush()
    }
}

impl Drop for TreeLock {
    fn drop(&mut self) {
        // the flock goes with the handle; only the holder line needs clearing
        let _ = self.file.set_len(0);
    }
}

/// `Ok(false)` when someone else holds the lock.
#[cfg(unix)]
fn try_lock(file: &File) -> std::io::Result<bool> {
    use std::os::unix::io::AsRawFd;
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> std::io::Result<bool> {
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn holder_is_recorded_and_cleared() {
        let tmp = TempDir::new().unwrap();
        let lock = TreeLock::acquire_default(tmp.path(), "mv").unwrap();
        assert_eq!(
            TreeLock::holder(tmp.path()),
            Some(LockHolder {
                pid: std::process::id(),
                command: "mv".to_string(),
            })
        );
        drop(lock);
        assert_eq!(TreeLock::holder(tmp.path()), None);
        assert!(TreeLock::acquire_default(tmp.path(), "show").is_ok());
    }

    #[test]
    fn busy_lock_names_its_holder() {
        let tmp = TempDir::new().unwrap();
        let _held = TreeLock::acquire_default(tmp.path(), "toggle").unwrap();
        let err = match TreeLock::acquire(tmp.path(), "mv", Duration::from_millis(50)) {
            Err(e) => e,
            Ok(_) => panic!("second lock should not be granted"),
        };
        assert!(matches!(
            &err,
            LockError::Busy { holder: Some(h), .. } if h.command == "toggle"
        ));
        assert!(err.to_string().contains("held by ht toggle (pid "));
    }

    #[test]
    fn unreadable_holder_line_is_ignored() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(LOCK_FILE), "garbage").unwrap();
        assert_eq!(TreeLock::holder(tmp.path()), None);
        let _lock = TreeLock::acquire_default(tmp.path(), "config").unwrap();
        assert_eq!(TreeLock::holder(tmp.path()).unwrap().command, "config");
    }
}
