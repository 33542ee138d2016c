//! Lock manager: a single `<root>/googet.lock` file gating all mutating
//! operations, with stale-holder detection and recovery.
//!
//! Uses `fs2` for the `flock`/Windows locking primitive, the same
//! advisory-locking crate other package-oriented crates in this corpus
//! reach for.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{ErrorKind, GooError};

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const WAIT_TIMEOUT: Duration = Duration::from_secs(70);

/// Lower bound on the mtime-touch interval, so short `max_age` values in
/// tests don't spin the refresher thread.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

pub struct LockGuard {
    path: PathBuf,
    file: Option<File>,
    refresh_stop: Option<Arc<AtomicBool>>,
    refresh_handle: Option<JoinHandle<()>>,
}

impl LockGuard {
    pub fn release(mut self) -> Result<(), GooError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<(), GooError> {
        if let Some(stop) = self.refresh_stop.take() {
            stop.store(true, Ordering::SeqCst);
        }
        if let Some(handle) = self.refresh_handle.take() {
            let _ = handle.join();
        }
        if let Some(file) = self.file.take() {
            let _ = fs2::FileExt::unlock(&file);
            drop(file);
            match std::fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(GooError::wrap(
                        ErrorKind::Filesystem,
                        format!("failed to remove lock file '{}'", self.path.display()),
                        e.into(),
                    ))
                }
            }
        }
        Ok(())
    }
}

/// Spawns a background thread that touches `lock_path`'s mtime at an
/// interval well under `max_age`, so a long-running holder is never judged
/// stale by a concurrent waiter's `is_stale()` (spec Invariant 5).
fn spawn_refresher(lock_path: PathBuf, max_age: Duration, stop: Arc<AtomicBool>) -> JoinHandle<()> {
    let interval = (max_age / 4).max(MIN_REFRESH_INTERVAL);
    std::thread::spawn(move || {
        while !sleep_until_stopped_or(&stop, interval) {
            if let Ok(file) = OpenOptions::new().write(true).open(&lock_path) {
                let _ = file.set_modified(std::time::SystemTime::now());
            }
        }
    })
}

/// Sleeps up to `total`, polling `stop` in short slices so release() isn't
/// blocked for a full interval. Returns `true` if `stop` fired during the sleep.
fn sleep_until_stopped_or(stop: &AtomicBool, total: Duration) -> bool {
    let step = Duration::from_millis(200);
    let mut slept = Duration::ZERO;
    while slept < total {
        if stop.load(Ordering::SeqCst) {
            return true;
        }
        let chunk = step.min(total - slept);
        std::thread::sleep(chunk);
        slept += chunk;
    }
    stop.load(Ordering::SeqCst)
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            log::warn!("failed to release lock on drop: {e}");
        }
    }
}

fn read_pid(file: &mut File) -> Option<u32> {
    file.seek(SeekFrom::Start(0)).ok()?;
    let mut buf = String::new();
    file.read_to_string(&mut buf).ok()?;
    buf.trim().parse().ok()
}

fn process_is_live_googet(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let exe_link = format!("/proc/{pid}/exe");
        match std::fs::read_link(&exe_link) {
            Ok(target) => target
                .file_stem()
                .map(|s| s == "googet")
                .unwrap_or(false),
            Err(_) => false, // no such /proc entry: process is gone
        }
    }
    #[cfg(not(unix))]
    {
        // Best-effort elsewhere: assume live to avoid killing unrelated holders.
        let _ = pid;
        true
    }
}

fn kill_process(pid: u32) {
    #[cfg(unix)]
    {
        let _ = std::process::Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .status();
    }
    #[cfg(not(unix))]
    {
        let _ = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F"])
            .status();
    }
}

fn is_stale(lock_path: &Path, max_age: Duration) -> bool {
    let Ok(meta) = std::fs::metadata(lock_path) else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    std::time::SystemTime::now()
        .duration_since(modified)
        .map(|age| age > max_age)
        .unwrap_or(false)
}

fn reclaim_stale(lock_path: &Path) -> Result<(), GooError> {
    let pid = OpenOptions::new()
        .read(true)
        .open(lock_path)
        .ok()
        .and_then(|mut f| read_pid(&mut f));

    if let Some(pid) = pid {
        if process_is_live_googet(pid) {
            log::warn!("lock held by stale but live googet process {pid}; terminating it");
            kill_process(pid);
        }
    }

    // Short retry for OS handle release.
    for _ in 0..5 {
        match std::fs::remove_file(lock_path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(_) => std::thread::sleep(Duration::from_millis(100)),
        }
    }
    std::fs::remove_file(lock_path)
        .or_else(|e| if e.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(e) })
        .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to remove stale lock", e.into()))
}

/// Acquires `<root>/googet.lock`, recovering a stale holder first and
/// waiting (polling every 5s, up to 70s) for a live holder to release.
pub fn obtain_lock(lock_path: &Path, max_age: Duration) -> Result<LockGuard, GooError> {
    if lock_path.exists() && is_stale(lock_path, max_age) {
        reclaim_stale(lock_path)?;
    }

    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(lock_path)
            .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to open lock file", e.into()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = file.set_permissions(std::fs::Permissions::from_mode(0o600));
        }

        match file.try_lock_exclusive() {
            Ok(()) => {
                let mut file = file;
                let pid = std::process::id().to_string();
                file.set_len(0).ok();
                file.seek(SeekFrom::Start(0)).ok();
                file.write_all(pid.as_bytes()).map_err(|e| {
                    GooError::wrap(ErrorKind::Filesystem, "failed to write pid to lock file", e.into())
                })?;
                file.set_len(pid.len() as u64).ok();

                // Downgrade to shared so other instances may read the PID while waiting.
                fs2::FileExt::unlock(&file).ok();
                file.lock_shared().map_err(|e| {
                    GooError::wrap(ErrorKind::Filesystem, "failed to downgrade lock", e.into())
                })?;

                let refresh_stop = Arc::new(AtomicBool::new(false));
                let refresh_handle = spawn_refresher(lock_path.to_path_buf(), max_age, refresh_stop.clone());

                return Ok(LockGuard {
                    path: lock_path.to_path_buf(),
                    file: Some(file),
                    refresh_stop: Some(refresh_stop),
                    refresh_handle: Some(refresh_handle),
                });
            }
            Err(_) => {
                if Instant::now() >= deadline {
                    return Err(GooError::new(
                        ErrorKind::Filesystem,
                        "timed out waiting for GooGet lock after 70s",
                    ));
                }
                println!("GooGet lock already held, waiting...");
                std::thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("googet.lock");
        let guard = obtain_lock(&lock_path, Duration::from_secs(600)).unwrap();
        assert!(lock_path.exists());
        guard.release().unwrap();
        assert!(!lock_path.exists());
    }

    #[test]
    fn stale_lock_from_dead_pid_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("googet.lock");
        std::fs::write(&lock_path, b"999999999").unwrap();
        let old_time = std::time::SystemTime::now() - Duration::from_secs(3600);
        let file = File::open(&lock_path).unwrap();
        file.set_modified(old_time).ok();

        let guard = obtain_lock(&lock_path, Duration::from_secs(60)).unwrap();
        guard.release().unwrap();
    }

    #[test]
    fn held_lock_mtime_is_refreshed() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("googet.lock");
        // max_age of 20s gives a refresh interval of MIN_REFRESH_INTERVAL (5s, the floor).
        let guard = obtain_lock(&lock_path, Duration::from_secs(20)).unwrap();

        let initial = std::fs::metadata(&lock_path).unwrap().modified().unwrap();
        let backdated = initial - Duration::from_secs(15);
        File::open(&lock_path).unwrap().set_modified(backdated).ok();

        std::thread::sleep(Duration::from_secs(6));
        let refreshed = std::fs::metadata(&lock_path).unwrap().modified().unwrap();
        assert!(refreshed > backdated, "mtime should have been touched by the refresher thread");

        guard.release().unwrap();
    }
}
