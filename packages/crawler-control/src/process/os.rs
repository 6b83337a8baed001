//! Signals and liveness probes for worker pids.

use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Gone,
}

#[cfg(unix)]
fn pid_t(pid: u32) -> Option<libc::pid_t> {
    // 0 and negative values address process groups, never a single worker
    libc::pid_t::try_from(pid).ok().filter(|p| *p > 0)
}

#[cfg(unix)]
fn signal(pid: u32, sig: libc::c_int) -> io::Result<()> {
    let Some(pid) = pid_t(pid) else {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid pid"));
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, sig) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Signal-0 probe. `EPERM` still means the process exists.
#[cfg(unix)]
pub fn probe(pid: u32) -> Liveness {
    if pid_t(pid).is_none() {
        return Liveness::Gone;
    }
    match signal(pid, 0) {
        Ok(()) => Liveness::Alive,
        Err(e) if e.raw_os_error() == Some(libc::ESRCH) => Liveness::Gone,
        Err(_) => Liveness::Alive,
    }
}

/// Ask the worker to shut down (SIGTERM).
#[cfg(unix)]
pub fn terminate(pid: u32) -> io::Result<()> {
    signal(pid, libc::SIGTERM)
}

#[cfg(unix)]
pub fn force_kill(pid: u32) -> io::Result<()> {
    signal(pid, libc::SIGKILL)
}

#[cfg(not(unix))]
pub fn probe(_pid: u32) -> Liveness {
    Liveness::Gone
}

#[cfg(not(unix))]
pub fn terminate(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "graceful termination requires unix signals",
    ))
}

#[cfg(not(unix))]
pub fn force_kill(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "killing by pid requires unix signals",
    ))
}
