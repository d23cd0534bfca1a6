//! Listening socket setup and non-blocking accept
//!
//! Each reactor binds its own listener with `SO_REUSEPORT`, letting the
//! kernel spread incoming connections across reactors without a shared
//! accept lock. All sockets are non-blocking; the accept path is driven
//! by edge-triggered readiness and drains until `EAGAIN`.

use std::net::{IpAddr, Ipv4Addr};

use crate::error::SetupError;

const LISTEN_BACKLOG: i32 = 4096;

pub(crate) fn last_errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

pub struct Listener {
    fd: i32,
}

impl Listener {
    /// Create, configure, bind and listen. `SO_REUSEADDR` + `SO_REUSEPORT`
    /// + `TCP_NODELAY`, bound to INADDR_ANY.
    pub fn bind(port: u16) -> Result<Self, SetupError> {
        let fd = unsafe {
            libc::socket(
                libc::AF_INET,
                libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                0,
            )
        };
        if fd < 0 {
            return Err(SetupError::Socket {
                op: "socket",
                errno: last_errno(),
            });
        }

        unsafe {
            let opt: i32 = 1;
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &opt as *const _ as *const _,
                4,
            );
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEPORT,
                &opt as *const _ as *const _,
                4,
            );
            libc::setsockopt(
                fd,
                libc::IPPROTO_TCP,
                libc::TCP_NODELAY,
                &opt as *const _ as *const _,
                4,
            );
        }

        let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        addr.sin_family = libc::AF_INET as u16;
        addr.sin_addr.s_addr = 0; // INADDR_ANY
        addr.sin_port = port.to_be();

        let ret = unsafe {
            libc::bind(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of_val(&addr) as u32,
            )
        };
        if ret != 0 {
            let errno = last_errno();
            unsafe { libc::close(fd) };
            return Err(SetupError::Socket { op: "bind", errno });
        }

        if unsafe { libc::listen(fd, LISTEN_BACKLOG) } != 0 {
            let errno = last_errno();
            unsafe { libc::close(fd) };
            return Err(SetupError::Socket {
                op: "listen",
                errno,
            });
        }

        Ok(Self { fd })
    }

    #[inline]
    pub fn fd(&self) -> i32 {
        self.fd
    }

    /// Accept one connection. `Ok(None)` means the accept queue is drained
    /// (`EAGAIN`); the caller stops its accept loop there. The accepted
    /// socket is non-blocking with `TCP_NODELAY` set.
    pub fn accept(&self) -> std::io::Result<Option<(i32, IpAddr)>> {
        let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        let mut addr_len: libc::socklen_t = std::mem::size_of::<libc::sockaddr_in>() as u32;

        loop {
            let fd = unsafe {
                libc::accept4(
                    self.fd,
                    &mut addr as *mut _ as *mut libc::sockaddr,
                    &mut addr_len,
                    libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                )
            };
            if fd >= 0 {
                unsafe {
                    let opt: i32 = 1;
                    libc::setsockopt(
                        fd,
                        libc::IPPROTO_TCP,
                        libc::TCP_NODELAY,
                        &opt as *const _ as *const _,
                        4,
                    );
                }
                let ip = IpAddr::V4(Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)));
                return Ok(Some((fd, ip)));
            }

            match last_errno() {
                libc::EAGAIN => return Ok(None),
                libc::EINTR => continue,
                // The peer can vanish between queueing and accept
                libc::ECONNABORTED => continue,
                errno => return Err(std::io::Error::from_raw_os_error(errno)),
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpStream;

    fn free_port() -> u16 {
        // Bind port 0 with the std listener just to learn a free port
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    }

    #[test]
    fn test_bind_and_accept_until_drained() {
        let port = free_port();
        let listener = Listener::bind(port).unwrap();
        assert_eq!(listener.accept().unwrap(), None);

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client.write_all(b"hi").unwrap();

        // Non-blocking accept needs a moment for the handshake
        let mut accepted = None;
        for _ in 0..100 {
            if let Some(pair) = listener.accept().unwrap() {
                accepted = Some(pair);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let (fd, ip) = accepted.expect("no connection accepted");
        assert!(fd >= 0);
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::LOCALHOST));

        // Queue drained again
        assert_eq!(listener.accept().unwrap(), None);
        unsafe { libc::close(fd) };
    }

    #[test]
    fn test_two_listeners_share_a_port() {
        let port = free_port();
        let a = Listener::bind(port).unwrap();
        let b = Listener::bind(port).unwrap();
        assert!(a.fd() >= 0 && b.fd() >= 0);
    }
}
