//! Per-target run lock.
//!
//! An exclusive flock on `<root>/.deckhand/deploy.lock` held for the run's
//! duration. flock releases on process exit, so a crashed deploy never
//! wedges the target; the pid written into the file is diagnostic only.

use crate::error::{DeployError, Result};
use crate::paths;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    // Dropping the File releases the flock.
    _file: File,
}

impl RunLock {
    /// Acquire the lock for a target root, failing fast with `LockHeld` if
    /// another run owns it.
    pub fn acquire(root: &Path) -> Result<Self> {
        let path = paths::lock_path(root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if !try_flock_exclusive(&file)? {
            let pid = read_pid(&mut file);
            return Err(DeployError::LockHeld { path, pid });
        }

        // Lock acquired; record our pid for diagnostics.
        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_pid(file: &mut File) -> u32 {
    let mut buf = String::new();
    let _ = file.read_to_string(&mut buf);
    buf.trim().parse().unwrap_or(0)
}

/// Try to acquire an exclusive flock (non-blocking). `Ok(false)` means
/// another process holds it.
fn try_flock_exclusive(file: &File) -> Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: flock on a valid fd owned by `file`; LOCK_NB keeps it
        // non-blocking.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock
            || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(DeployError::Io(err))
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}
