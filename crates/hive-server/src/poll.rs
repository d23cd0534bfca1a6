//! Edge-triggered epoll wrapper
//!
//! Thin layer over nix's `Epoll`, keyed by raw fd. Every registration is
//! edge-triggered, so callers must drain reads and writes to `EAGAIN` on
//! each notification. The wait is bounded (milliseconds) so the reactor
//! observes the shutdown flag at a fixed cadence even when idle.

use std::os::fd::BorrowedFd;

use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use crate::error::SetupError;

pub struct Poller {
    epoll: Epoll,
}

impl Poller {
    pub fn new() -> Result<Self, SetupError> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(SetupError::Epoll)?;
        Ok(Self { epoll })
    }

    fn read_interest() -> EpollFlags {
        EpollFlags::EPOLLIN | EpollFlags::EPOLLRDHUP | EpollFlags::EPOLLET
    }

    fn write_interest() -> EpollFlags {
        EpollFlags::EPOLLOUT | EpollFlags::EPOLLRDHUP | EpollFlags::EPOLLET
    }

    /// Register a new fd for read readiness.
    pub fn add_readable(&self, fd: i32) -> nix::Result<()> {
        let event = EpollEvent::new(Self::read_interest(), fd as u64);
        self.epoll.add(unsafe { BorrowedFd::borrow_raw(fd) }, event)
    }

    /// Flip an already-registered fd back to read interest.
    pub fn watch_readable(&self, fd: i32) -> nix::Result<()> {
        let mut event = EpollEvent::new(Self::read_interest(), fd as u64);
        self.epoll
            .modify(unsafe { BorrowedFd::borrow_raw(fd) }, &mut event)
    }

    /// Flip an already-registered fd to write interest (pending response).
    pub fn watch_writable(&self, fd: i32) -> nix::Result<()> {
        let mut event = EpollEvent::new(Self::write_interest(), fd as u64);
        self.epoll
            .modify(unsafe { BorrowedFd::borrow_raw(fd) }, &mut event)
    }

    pub fn delete(&self, fd: i32) -> nix::Result<()> {
        self.epoll.delete(unsafe { BorrowedFd::borrow_raw(fd) })
    }

    /// Wait for events with a millisecond-bounded timeout.
    pub fn wait(&self, events: &mut [EpollEvent], timeout_ms: u16) -> nix::Result<usize> {
        self.epoll.wait(events, EpollTimeout::from(timeout_ms))
    }
}
