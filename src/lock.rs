//! Feature-scope locking and atomic file operations.
//!
//! Reconciliation is single-writer per feature scope. The lock is a file
//! containing the holder's pid, acquisition time, and a token; acquisition
//! polls for a configured window before failing with `LockTimeout`. A lock
//! whose timestamp is older than the staleness window and whose pid is no
//! longer running is force-reclaimed. Release happens on drop, so every
//! exit path (success, error, interruption) releases the lock.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::LockConfig;
use crate::error::{Error, Result};

/// Contents of a feature lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub token: Uuid,
}

/// A held feature lock; released when dropped
#[derive(Debug)]
pub struct FeatureLock {
    path: PathBuf,
    token: Uuid,
}

impl FeatureLock {
    /// Acquire the lock for a feature scope, polling up to the configured
    /// wait window.
    ///
    /// A stale lock (older than `stale_secs`, holder process dead) is
    /// reclaimed. A fresh lock held by a live process results in
    /// `LockTimeout` after the window elapses; callers must retry later,
    /// never force.
    pub fn acquire(path: impl AsRef<Path>, feature: &str, config: &LockConfig) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let start = Instant::now();
        let wait = Duration::from_millis(config.wait_ms);
        let poll = Duration::from_millis(config.poll_ms);

        loop {
            match Self::try_create(path) {
                Ok(lock) => return Ok(lock),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    let holder_pid = match Self::examine(path, config)? {
                        Examined::Reclaimed => continue,
                        Examined::Held(pid) => pid,
                    };
                    if start.elapsed() >= wait {
                        return Err(Error::LockTimeout {
                            feature: feature.to_string(),
                            holder_pid,
                        });
                    }
                    std::thread::sleep(poll);
                }
                Err(err) => return Err(Error::Io(err)),
            }
        }
    }

    /// Atomically create the lock file with our info
    fn try_create(path: &Path) -> io::Result<FeatureLock> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let info = LockInfo {
            pid: std::process::id(),
            acquired_at: Utc::now(),
            token: Uuid::new_v4(),
        };
        let json = serde_json::to_string(&info).map_err(io::Error::other)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        Ok(FeatureLock {
            path: path.to_path_buf(),
            token: info.token,
        })
    }

    /// Inspect an existing lock file, reclaiming it if stale.
    ///
    /// Holds an advisory flock on the lock file while reading so two
    /// processes never reclaim the same lock concurrently.
    fn examine(path: &Path, config: &LockConfig) -> Result<Examined> {
        let file = match File::open(path) {
            Ok(file) => file,
            // Holder released between our create attempt and now
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Examined::Reclaimed),
            Err(err) => return Err(Error::Io(err)),
        };
        if file.try_lock_exclusive().is_err() {
            // Another process is examining or writing; report whoever the
            // file currently names as holder
            let pid = fs::read_to_string(path)
                .ok()
                .and_then(|content| serde_json::from_str::<LockInfo>(&content).ok())
                .map(|info| info.pid)
                .unwrap_or(0);
            return Ok(Examined::Held(pid));
        }

        let content = fs::read_to_string(path).unwrap_or_default();
        let info: LockInfo = match serde_json::from_str(&content) {
            Ok(info) => info,
            // Unreadable lock files count as stale once past the window
            Err(_) => LockInfo {
                pid: 0,
                acquired_at: Utc::now(),
                token: Uuid::nil(),
            },
        };

        let age = Utc::now().signed_duration_since(info.acquired_at);
        let stale = age.num_seconds() >= config.stale_secs as i64;
        if stale && !process_alive(info.pid) {
            tracing::warn!(pid = info.pid, path = %path.display(), "reclaiming stale lock");
            fs::remove_file(path)?;
            let _ = file.unlock();
            return Ok(Examined::Reclaimed);
        }
        let _ = file.unlock();
        Ok(Examined::Held(info.pid))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

enum Examined {
    Reclaimed,
    Held(u32),
}

impl Drop for FeatureLock {
    fn drop(&mut self) {
        // Only remove the file if it still holds our token; a reclaimed
        // lock belongs to someone else by now.
        let ours = fs::read_to_string(&self.path)
            .ok()
            .and_then(|content| serde_json::from_str::<LockInfo>(&content).ok())
            .map(|info| info.token == self.token)
            .unwrap_or(false);
        if ours {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Check whether a process is still running.
///
/// Linux reads /proc; other platforms conservatively report alive, so a
/// stale lock there surfaces as LockTimeout instead of being forced.
fn process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    #[cfg(target_os = "linux")]
    {
        Path::new(&format!("/proc/{pid}")).exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        true
    }
}

/// Atomically write data to a file.
///
/// Writes to a temporary file in the same directory, flushes, then renames
/// over the target. On any failure the original file is left untouched and
/// `WriteFailure` is raised; a reader never observes a partial write.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Temp file in the same directory, required for an atomic rename
    let temp_path = path.with_extension(format!("tmp.{}", std::process::id()));

    let result = (|| -> io::Result<()> {
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
        return Err(Error::WriteFailure(path.to_path_buf()));
    }
    Ok(())
}

/// Atomically write string data to a file
pub fn write_atomic_str(path: impl AsRef<Path>, data: &str) -> Result<()> {
    write_atomic(path, data.as_bytes())
}
