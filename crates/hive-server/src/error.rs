//! Fatal startup errors
//!
//! Anything here means the process cannot serve and must abort with a
//! non-zero exit. Runtime per-connection failures never use these; they
//! are handled where they occur and at worst cost one connection.

use core::fmt;

#[derive(Debug)]
pub enum SetupError {
    /// A raw socket call failed during listener setup.
    Socket { op: &'static str, errno: i32 },

    /// Could not create or configure the epoll instance.
    Epoll(nix::errno::Errno),

    /// Could not block signals or create the signalfd.
    Signal(nix::errno::Errno),

    /// Could not spawn a reactor or worker thread.
    Thread(std::io::Error),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Socket { op, errno } => {
                write!(
                    f,
                    "{} failed: {}",
                    op,
                    std::io::Error::from_raw_os_error(*errno)
                )
            }
            SetupError::Epoll(e) => write!(f, "epoll setup failed: {}", e),
            SetupError::Signal(e) => write!(f, "signal setup failed: {}", e),
            SetupError::Thread(e) => write!(f, "thread spawn failed: {}", e),
        }
    }
}

impl std::error::Error for SetupError {}
