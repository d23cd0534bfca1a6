//! Signalfd-backed shutdown wait
//!
//! SIGINT/SIGTERM/SIGQUIT are blocked and routed into a signalfd; the
//! main thread blocks reading it while the reactors run. Install this
//! before spawning any thread so the mask is inherited everywhere -
//! otherwise a signal delivered to a reactor thread would take the
//! default disposition and kill the process.

use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};

use crate::error::SetupError;

/// Make writes to peer-closed sockets fail with `EPIPE` instead of
/// terminating the process.
pub fn ignore_sigpipe() {
    unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) };
}

pub struct ShutdownSignal {
    fd: SignalFd,
}

impl ShutdownSignal {
    /// Block the shutdown signals on the calling thread (and every thread
    /// spawned after this) and open the signalfd.
    pub fn install() -> Result<Self, SetupError> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGINT);
        mask.add(Signal::SIGTERM);
        mask.add(Signal::SIGQUIT);
        mask.thread_block().map_err(SetupError::Signal)?;

        let fd = SignalFd::with_flags(&mask, SfdFlags::SFD_CLOEXEC).map_err(SetupError::Signal)?;
        Ok(Self { fd })
    }

    /// Block until one of the masked signals arrives; returns its number.
    /// `None` only on an unrecoverable signalfd read error.
    pub fn wait(&mut self) -> Option<i32> {
        loop {
            match self.fd.read_signal() {
                Ok(Some(info)) => return Some(info.ssi_signo as i32),
                Ok(None) => continue,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => {
                    hive_core::herror!("signalfd read failed: {}", e);
                    return None;
                }
            }
        }
    }
}
