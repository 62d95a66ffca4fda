//! Boolean `SOL_SOCKET` options.

use std::os::fd::RawFd;

use crate::error::{Result, TransportError};

/// Socket-level options exposed on [`Endpoint`](crate::Endpoint).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOption {
    ReuseAddr,
    KeepAlive,
    Broadcast,
}

impl SocketOption {
    pub fn name(self) -> &'static str {
        match self {
            Self::ReuseAddr => "SO_REUSEADDR",
            Self::KeepAlive => "SO_KEEPALIVE",
            Self::Broadcast => "SO_BROADCAST",
        }
    }

    fn raw(self) -> libc::c_int {
        match self {
            Self::ReuseAddr => libc::SO_REUSEADDR,
            Self::KeepAlive => libc::SO_KEEPALIVE,
            Self::Broadcast => libc::SO_BROADCAST,
        }
    }
}

pub(crate) fn set_bool(fd: RawFd, option: SocketOption, enabled: bool) -> Result<()> {
    let value: libc::c_int = enabled.into();

    // SAFETY: `value` is a valid readable c_int for the given length, and `fd`
    // is an open socket descriptor kept alive by the calling endpoint.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            option.raw(),
            (&value as *const libc::c_int).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    if rc == 0 {
        Ok(())
    } else {
        Err(TransportError::SetOption {
            option: option.name(),
            source: std::io::Error::last_os_error(),
        })
    }
}

pub(crate) fn get_bool(fd: RawFd, option: SocketOption) -> Result<bool> {
    let mut value: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;

    // SAFETY: `value` and `len` are valid writable pointers for the provided
    // sizes, and `fd` is an open socket descriptor kept alive by the caller.
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            option.raw(),
            (&mut value as *mut libc::c_int).cast::<libc::c_void>(),
            &mut len,
        )
    };

    if rc == 0 {
        Ok(value != 0)
    } else {
        Err(TransportError::GetOption {
            option: option.name(),
            source: std::io::Error::last_os_error(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::Endpoint;

    use super::*;

    #[test]
    fn toggles_keepalive() {
        let (left, _right) = Endpoint::unix_pair().unwrap();
        let listener = Endpoint::listen_tcp("127.0.0.1:0".parse().unwrap()).unwrap();
        let stream = Endpoint::connect_tcp(listener.local_addr().unwrap()).unwrap();

        stream.set_option(SocketOption::KeepAlive, true).unwrap();
        assert!(stream.option(SocketOption::KeepAlive).unwrap());
        stream.set_option(SocketOption::KeepAlive, false).unwrap();
        assert!(!stream.option(SocketOption::KeepAlive).unwrap());

        // Unix sockets accept the option call as well.
        assert!(left.option(SocketOption::ReuseAddr).is_ok());
    }

    #[test]
    fn broadcast_on_udp() {
        let socket = Endpoint::bind_udp("127.0.0.1:0".parse().unwrap()).unwrap();
        socket.set_option(SocketOption::Broadcast, true).unwrap();
        assert!(socket.option(SocketOption::Broadcast).unwrap());
    }

    #[test]
    fn invalid_descriptor_reports_getsockopt_failure() {
        let err = get_bool(-1, SocketOption::ReuseAddr).unwrap_err();
        assert!(matches!(err, TransportError::GetOption { .. }));
        assert_eq!(err.code(), crate::DiagnosticCode::SocketGetOption);
        assert_eq!(err.os_error(), Some(libc::EBADF));
    }
}
