use super::Signal;
use std::{
    io,
    os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
    time::Duration,
};

/// A [`Signal`] backed by a Linux `eventfd(2)` counter.
///
/// Each notification adds one to the kernel counter; a wait reads (and
/// thereby resets) it, so any number of notifications are consumed at once.
///
/// Because an `EventFd` is a file descriptor, a loop that already blocks in
/// `poll`/`epoll_wait` on other descriptors can register it alongside them
/// (see [`AsRawFd`]), and call [`EventFd::reset`] once it polls readable,
/// instead of calling [`Signal::wait`].
#[derive(Debug)]
pub struct EventFd {
    fd: OwnedFd,
}

impl EventFd {
    /// Creates a new non-blocking, close-on-exec eventfd.
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // Safety: `eventfd` just returned this descriptor, and nobody else
        // owns it.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { fd })
    }

    /// Reads and resets the counter, returning how many notifications were
    /// pending (`0` if none were).
    pub fn reset(&self) -> io::Result<u64> {
        let mut buf = 0u64.to_ne_bytes();
        loop {
            let n = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n >= 0 {
                return Ok(u64::from_ne_bytes(buf));
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return Ok(0),
                _ => return Err(err),
            }
        }
    }

    fn poll_readable(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let timeout_ms = match timeout {
            None => -1,
            // round up, so that a short timeout doesn't become a busy poll.
            Some(timeout) => {
                let ms = (timeout.as_nanos() + 999_999) / 1_000_000;
                ms.min(libc::c_int::MAX as u128) as libc::c_int
            }
        };
        let mut pollfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        loop {
            let n = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
            if n >= 0 {
                return Ok(n > 0);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

impl Signal for EventFd {
    fn notify(&self) -> io::Result<()> {
        let buf = 1u64.to_ne_bytes();
        loop {
            let n = unsafe {
                libc::write(
                    self.fd.as_raw_fd(),
                    buf.as_ptr() as *const libc::c_void,
                    buf.len(),
                )
            };
            if n >= 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                // the counter is saturated, which means the loop has plenty
                // of notifications pending already.
                io::ErrorKind::WouldBlock => return Ok(()),
                _ => return Err(err),
            }
        }
    }

    fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        if !self.poll_readable(timeout)? {
            return Ok(false);
        }
        Ok(self.reset()? > 0)
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for EventFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
