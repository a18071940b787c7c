//! Exclusive ownership of the local endpoint.
//!
//! An advisory OS file lock (flock) on `<socket>.lock`, held for the life of
//! the listener. Whoever holds it owns the socket path; a second daemon fails
//! to take it and refuses to start.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub(crate) struct EndpointLock {
    file: File,
}

impl EndpointLock {
    /// Take the lock guarding `socket_path`, failing with `NameTaken` if
    /// another process holds it.
    pub(crate) fn acquire(socket_path: &Path) -> Result<Self> {
        let path = lock_path(socket_path);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match lock_file_nonblocking(&file) {
            Ok(()) => {
                // Owner info for debugging only.
                let _ = file.set_len(0);
                let _ = file.seek(SeekFrom::Start(0));
                let _ = writeln!(file, "pid={}", std::process::id());
                let _ = file.flush();

                Ok(Self { file })
            }
            Err(e) if is_lock_busy(&e) => Err(Error::NameTaken(format!(
                "{} is owned by another event-reporter instance",
                socket_path.display()
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for EndpointLock {
    fn drop(&mut self) {
        // The lock file stays: unlinking it could hand two processes locks
        // on different inodes for the same path.
        let _ = unlock_file(&self.file);
    }
}

fn lock_path(socket_path: &Path) -> PathBuf {
    let mut name = socket_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    socket_path.with_file_name(name)
}

fn is_lock_busy(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock)
        || matches!(error.raw_os_error(), Some(11) | Some(35))
}

#[cfg(unix)]
fn lock_file_nonblocking(file: &File) -> io::Result<()> {
    const LOCK_EX: i32 = 2;
    const LOCK_NB: i32 = 4;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
    const LOCK_UN: i32 = 8;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
extern "C" {
    fn flock(fd: i32, operation: i32) -> i32;
}

#[cfg(not(unix))]
compile_error!("event-reporter endpoint locks currently require Unix (macOS/Linux)");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path() {
        assert_eq!(
            lock_path(Path::new("/run/event-reporter/events.sock")),
            PathBuf::from("/run/event-reporter/events.sock.lock")
        );
    }

    #[test]
    fn test_second_acquire_is_name_taken() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("events.sock");

        let first = EndpointLock::acquire(&socket).unwrap();
        let err = EndpointLock::acquire(&socket).err().unwrap();
        assert!(matches!(err, Error::NameTaken(_)));

        drop(first);
        assert!(EndpointLock::acquire(&socket).is_ok());
    }
}
