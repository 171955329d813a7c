//! Purpose: External notification sources that nudge a broadcaster when something changes.
//! Exports: `NotificationSource`, `NotifyError`, `DirWatch`.
//! Role: Latency optimization for event-driven waits; correctness must not depend on it.
//! Invariants: Failures never panic or block progress; engines fall back to timeouts.
//! Invariants: Unsupported platforms/operations surface as `NotifyError::Unavailable`.
//! Invariants: `disable` returns only after the watch worker has stopped posting.
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crate::core::broadcast::Broadcaster;
use crate::core::error::{Error, ErrorKind};

#[derive(Debug)]
pub enum NotifyError {
    Unavailable,
    Io(io::Error),
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::Unavailable => write!(f, "change notifications unavailable"),
            NotifyError::Io(err) => write!(f, "change notifications failed: {err}"),
        }
    }
}

impl From<NotifyError> for Error {
    fn from(err: NotifyError) -> Self {
        let message = err.to_string();
        match err {
            NotifyError::Unavailable => Error::new(ErrorKind::Notify).with_message(message),
            NotifyError::Io(source) => Error::new(ErrorKind::Notify)
                .with_message(message)
                .with_source(source),
        }
    }
}

/// Asynchronous "something relevant changed" signal feeding a broadcaster.
pub trait NotificationSource: Send {
    fn is_enabled(&self) -> bool;

    /// Start delivering signals to `broadcaster`. Enabling an enabled source is a no-op.
    fn enable(&mut self, broadcaster: &Broadcaster) -> Result<(), NotifyError>;

    /// Stop delivering signals. Disabling a disabled source is a no-op.
    fn disable(&mut self);
}

/// Watches one directory for entries being created, removed, or renamed.
pub struct DirWatch {
    dir: PathBuf,
    worker: Option<Worker>,
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl DirWatch {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            worker: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl NotificationSource for DirWatch {
    fn is_enabled(&self) -> bool {
        self.worker.is_some()
    }

    fn enable(&mut self, broadcaster: &Broadcaster) -> Result<(), NotifyError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let stop = Arc::new(AtomicBool::new(false));
        let handle = backend::spawn(&self.dir, stop.clone(), broadcaster.clone())?;
        self.worker = Some(Worker { stop, handle });
        Ok(())
    }

    fn disable(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Release);
            let _ = worker.handle.join();
        }
    }
}

impl Drop for DirWatch {
    fn drop(&mut self) {
        self.disable();
    }
}

#[cfg(target_os = "linux")]
mod backend {
    use super::NotifyError;
    use crate::core::broadcast::Broadcaster;
    use std::ffi::CString;
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread::{self, JoinHandle};
    use tracing::{debug, warn};

    // Only events that can change which entries exist; content writes are ignored.
    const WATCH_MASK: u32 = libc::IN_CREATE
        | libc::IN_DELETE
        | libc::IN_MOVED_FROM
        | libc::IN_MOVED_TO
        | libc::IN_DELETE_SELF
        | libc::IN_MOVE_SELF;

    // Upper bound on how long `disable` waits for the worker.
    const POLL_INTERVAL_MS: libc::c_int = 100;

    pub(super) fn spawn(
        dir: &Path,
        stop: Arc<AtomicBool>,
        broadcaster: Broadcaster,
    ) -> Result<JoinHandle<()>, NotifyError> {
        let fd = open_watch(dir)?;
        let label = dir.display().to_string();
        thread::Builder::new()
            .name("condwait-dirwatch".to_string())
            .spawn(move || pump(fd, &stop, &broadcaster, &label))
            .map_err(NotifyError::Io)
    }

    fn open_watch(dir: &Path) -> Result<OwnedFd, NotifyError> {
        let c_path =
            CString::new(dir.as_os_str().as_bytes()).map_err(|_| NotifyError::Unavailable)?;
        let raw = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if raw < 0 {
            return Err(map_watch_error(io::Error::last_os_error()));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        let wd = unsafe { libc::inotify_add_watch(fd.as_raw_fd(), c_path.as_ptr(), WATCH_MASK) };
        if wd < 0 {
            return Err(map_watch_error(io::Error::last_os_error()));
        }
        Ok(fd)
    }

    fn pump(fd: OwnedFd, stop: &AtomicBool, broadcaster: &Broadcaster, label: &str) {
        let mut buf = [0u8; 4096];
        while !stop.load(Ordering::Acquire) {
            let mut pfd = libc::pollfd {
                fd: fd.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            let rc = unsafe { libc::poll(&mut pfd, 1, POLL_INTERVAL_MS) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                warn!(dir = label, error = %err, "directory watch failed; relying on timeouts");
                return;
            }
            if rc == 0 {
                continue;
            }
            let mut changed = false;
            loop {
                let n = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
                if n <= 0 {
                    break;
                }
                changed = true;
            }
            if changed {
                broadcaster.notify();
            }
        }
        debug!(dir = label, "directory watch stopped");
    }

    fn map_watch_error(err: io::Error) -> NotifyError {
        match err.raw_os_error() {
            Some(code) if code == libc::ENOSYS || code == libc::ENOTSUP => {
                NotifyError::Unavailable
            }
            _ => NotifyError::Io(err),
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod backend {
    use super::NotifyError;
    use crate::core::broadcast::Broadcaster;
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread::JoinHandle;

    pub(super) fn spawn(
        _dir: &Path,
        _stop: Arc<AtomicBool>,
        _broadcaster: Broadcaster,
    ) -> Result<JoinHandle<()>, NotifyError> {
        Err(NotifyError::Unavailable)
    }
}
