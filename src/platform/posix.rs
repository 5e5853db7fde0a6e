// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX primitives behind the notification FIFOs and the crash guard:
// named FIFOs, non-blocking open/read/write, poll, self-pipes and signal
// dispositions. Everything here is a thin, errno-preserving wrapper.

use std::ffi::CString;
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::Duration;

/// Permissions of every FIFO: the arbiter runs with different credentials.
pub const FIFO_MODE: libc::mode_t = 0o666;

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

// ---------------------------------------------------------------------------
// FIFOs
// ---------------------------------------------------------------------------

fn not_a_fifo(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("{what} exists and is not a FIFO"),
    )
}

fn is_fifo(st: &libc::stat) -> bool {
    st.st_mode & libc::S_IFMT == libc::S_IFIFO
}

/// Create a FIFO at `path`, or reuse a FIFO already there, then force
/// `FIFO_MODE` regardless of the process umask. Anything else at `path` is
/// an error and is left untouched.
pub fn make_fifo(path: &Path) -> io::Result<()> {
    let c = c_path(path)?;
    let ret = unsafe { libc::mkfifo(c.as_ptr(), FIFO_MODE) };
    if ret == -1 {
        let e = io::Error::last_os_error();
        if e.raw_os_error() != Some(libc::EEXIST) {
            return Err(e);
        }
        let mut st = MaybeUninit::<libc::stat>::uninit();
        if unsafe { libc::lstat(c.as_ptr(), st.as_mut_ptr()) } == -1 {
            return Err(io::Error::last_os_error());
        }
        if !is_fifo(unsafe { &st.assume_init() }) {
            return Err(not_a_fifo(&path.display().to_string()));
        }
    }
    if unsafe { libc::chmod(c.as_ptr(), FIFO_MODE) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Fail unless `fd` refers to a FIFO.
pub fn ensure_fifo(fd: RawFd) -> io::Result<()> {
    let mut st = MaybeUninit::<libc::stat>::uninit();
    if unsafe { libc::fstat(fd, st.as_mut_ptr()) } == -1 {
        return Err(io::Error::last_os_error());
    }
    if !is_fifo(unsafe { &st.assume_init() }) {
        return Err(not_a_fifo(&format!("fd {fd}")));
    }
    Ok(())
}

/// How a FIFO end is opened. Every mode is non-blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FifoAccess {
    /// Read end that also counts as a writer, so the reader never sees
    /// hang-up while no peer has the FIFO open.
    ReadHeld,
    Read,
    /// Fails with `ENXIO` when nobody holds the read end.
    Write,
}

pub fn open_fifo(path: &Path, access: FifoAccess) -> io::Result<OwnedFd> {
    let c = c_path(path)?;
    let flags = match access {
        FifoAccess::ReadHeld => libc::O_RDWR,
        FifoAccess::Read => libc::O_RDONLY,
        FifoAccess::Write => libc::O_WRONLY,
    } | libc::O_NONBLOCK
        | libc::O_CLOEXEC;
    let fd = unsafe { libc::open(c.as_ptr(), flags) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Remove a FIFO. A missing file is not an error.
pub fn remove_fifo(path: &Path) -> io::Result<()> {
    let c = c_path(path)?;
    if unsafe { libc::unlink(c.as_ptr()) } == -1 {
        let e = io::Error::last_os_error();
        if e.raw_os_error() != Some(libc::ENOENT) {
            return Err(e);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Raw I/O
// ---------------------------------------------------------------------------

/// One `read(2)`, retried on `EINTR`. Returns the byte count.
pub fn read_some(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let e = io::Error::last_os_error();
        if e.raw_os_error() != Some(libc::EINTR) {
            return Err(e);
        }
    }
}

/// Write all of `buf`. Records here are far below `PIPE_BUF`, so a single
/// `write(2)` is atomic; a short write is reported as `WriteZero`.
pub fn write_record(fd: RawFd, buf: &[u8]) -> io::Result<()> {
    loop {
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n == buf.len() as isize {
            return Ok(());
        }
        if n >= 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short record write"));
        }
        let e = io::Error::last_os_error();
        if e.raw_os_error() != Some(libc::EINTR) {
            return Err(e);
        }
    }
}

/// Wait until any of `fds` is readable (or hung up). Returns, per fd,
/// whether it has something to read. All `false` means timeout.
pub fn poll_readable(fds: &[RawFd], timeout: Duration) -> io::Result<Vec<bool>> {
    let mut pfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();
    let ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    let ret = unsafe { libc::poll(pfds.as_mut_ptr(), pfds.len() as libc::nfds_t, ms) };
    if ret == -1 {
        let e = io::Error::last_os_error();
        if e.raw_os_error() == Some(libc::EINTR) {
            return Ok(vec![false; fds.len()]);
        }
        return Err(e);
    }
    Ok(pfds
        .iter()
        .map(|p| p.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
        .collect())
}

// ---------------------------------------------------------------------------
// Pipes
// ---------------------------------------------------------------------------

/// An anonymous pipe used to wake a thread.
pub struct Pipe {
    pub read: OwnedFd,
    pub write: OwnedFd,
}

impl Pipe {
    /// Both ends close-on-exec; `nonblocking_read` controls the read end,
    /// the write end is always non-blocking so a full pipe never stalls the writer.
    pub fn new(nonblocking_read: bool) -> io::Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
            return Err(io::Error::last_os_error());
        }
        let pipe = unsafe {
            Self {
                read: OwnedFd::from_raw_fd(fds[0]),
                write: OwnedFd::from_raw_fd(fds[1]),
            }
        };
        set_fd_flags(pipe.read.as_raw_fd(), nonblocking_read)?;
        set_fd_flags(pipe.write.as_raw_fd(), true)?;
        Ok(pipe)
    }

    /// Write one byte; a full pipe already guarantees a pending wakeup.
    pub fn poke(&self, byte: u8) -> io::Result<()> {
        match write_record(self.write.as_raw_fd(), &[byte]) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            other => other,
        }
    }

    /// Discard everything currently buffered on a non-blocking read end.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        while matches!(read_some(self.read.as_raw_fd(), &mut buf), Ok(n) if n > 0) {}
    }
}

fn set_fd_flags(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    unsafe {
        if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) == -1 {
            return Err(io::Error::last_os_error());
        }
        if nonblocking {
            let fl = libc::fcntl(fd, libc::F_GETFL);
            if fl == -1 || libc::fcntl(fd, libc::F_SETFL, fl | libc::O_NONBLOCK) == -1 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Install `handler` for `signo` with every signal blocked while it runs.
/// Returns the disposition it replaced.
pub fn install_handler(
    signo: libc::c_int,
    handler: extern "C" fn(libc::c_int),
) -> io::Result<libc::sigaction> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as usize;
        libc::sigfillset(&mut action.sa_mask);
        action.sa_flags = 0;
        let mut previous: libc::sigaction = std::mem::zeroed();
        if libc::sigaction(signo, &action, &mut previous) == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(previous)
    }
}

/// Put back a disposition returned by [`install_handler`].
/// Async-signal-safe.
pub fn restore_handler(signo: libc::c_int, previous: &libc::sigaction) {
    unsafe {
        libc::sigaction(signo, previous, std::ptr::null_mut());
    }
}

/// Block `signals` on the calling thread so their handlers run elsewhere.
pub fn block_on_current_thread(signals: &[libc::c_int]) -> io::Result<()> {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        for &s in signals {
            libc::sigaddset(&mut set, s);
        }
        let eno = libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
    }
    Ok(())
}
