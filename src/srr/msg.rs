//! Shared `sendmsg`/`recvmsg`/`ioctl` plumbing (§4.2, §6 Socket layer).
//!
//! `original_source/network/network.c` rebuilds an almost-identical
//! `msghdr`/`iovec` pair at five call sites (`tcp_send_recv_sync_no_cb`,
//! `udp_send_sync_no_cb`, `udp_recv_sync_no_cb`, and the three `_async_tpl`
//! callbacks), differing only in flags and whether a destination/source
//! address is attached. That's factored into the two functions below.

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;

use crate::endpoint;

/// Flags for the blocking, full-drain sync path.
pub(crate) const SYNC_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
/// Flags for the oneshot-rearm async path (non-blocking).
pub(crate) const ASYNC_FLAGS: libc::c_int = libc::MSG_NOSIGNAL | libc::MSG_DONTWAIT;
/// Flags for a truncation peek: the datagram must not be consumed.
pub(crate) const PEEK_FLAGS: libc::c_int = libc::MSG_NOSIGNAL | libc::MSG_PEEK;

/// Sends `data` over `fd`, addressed to `dst` when given (UDP) or unaddressed
/// (TCP, already-connected). Returns the number of bytes the kernel accepted.
pub(crate) fn send(fd: RawFd, data: &[u8], dst: Option<&SocketAddr>, flags: libc::c_int) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: data.as_ptr() as *mut libc::c_void,
        iov_len: data.len(),
    };
    let mut header: libc::msghdr = unsafe { mem::zeroed() };
    header.msg_iov = &mut iov;
    header.msg_iovlen = 1;

    let dst_storage;
    if let Some(addr) = dst {
        let (storage, len) = endpoint::to_raw(addr);
        dst_storage = storage;
        header.msg_name = &dst_storage as *const _ as *mut libc::c_void;
        header.msg_namelen = len;
    }

    let sent = unsafe { libc::sendmsg(fd, &header, flags) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(sent as usize)
}

/// Receives into `data` from `fd`. When `capture_src` is set, the sender's
/// address is decoded and returned (UDP); TCP recv, reading from an
/// already-connected socket, has no per-call source to report.
pub(crate) fn recv(
    fd: RawFd,
    data: &mut [u8],
    capture_src: bool,
    flags: libc::c_int,
) -> io::Result<(usize, Option<SocketAddr>)> {
    let mut iov = libc::iovec {
        iov_base: data.as_mut_ptr() as *mut libc::c_void,
        iov_len: data.len(),
    };
    let mut header: libc::msghdr = unsafe { mem::zeroed() };
    header.msg_iov = &mut iov;
    header.msg_iovlen = 1;

    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    if capture_src {
        header.msg_name = &mut storage as *mut _ as *mut libc::c_void;
        header.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    }

    let received = unsafe { libc::recvmsg(fd, &mut header, flags) };
    if received < 0 {
        return Err(io::Error::last_os_error());
    }

    let src = if capture_src {
        endpoint::from_raw(&storage, header.msg_namelen).ok()
    } else {
        None
    };

    Ok((received as usize, src))
}

/// `SIOCOUTQ`: bytes still queued for transmission (the SEND-side residual
/// the sync/async SEND paths report as `has_more_bytes`).
pub(crate) fn queued_outgoing(fd: RawFd) -> io::Result<usize> {
    queued(fd, libc::SIOCOUTQ as _)
}

/// `SIOCINQ`: bytes queued for receipt — used both for the RECV-side
/// residual and the UDP truncation-peek length check.
pub(crate) fn queued_incoming(fd: RawFd) -> io::Result<usize> {
    queued(fd, libc::SIOCINQ as _)
}

fn queued(fd: RawFd, request: libc::c_ulong) -> io::Result<usize> {
    let mut value: libc::c_int = 0;
    let res = unsafe { libc::ioctl(fd, request, &mut value as *mut libc::c_int) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(value.max(0) as usize)
}
