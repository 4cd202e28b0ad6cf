//! The endpoint collaborator (§6): "a tagged union `{IPv4, IPv6}` over
//! `{TCP, UDP}`" and the `translate_endpoint` address-family canonicalizer.
//!
//! `std::net::SocketAddr` is already exactly the IPv4/IPv6 tagged union the
//! spec describes, so it's reused directly rather than reinvented; only the
//! raw `sockaddr_storage` (de)serialization needed to populate `msghdr` is
//! added here.

use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::RawFd;

/// Which protocol an endpoint/socket pair is used for. Corresponds to the
/// original's `ep_type` (`EPT_TCP`/`EPT_UDP`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// A socket address tagged with the protocol it's meaningful for.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    pub addr: SocketAddr,
    pub protocol: Protocol,
}

impl Endpoint {
    pub fn new(addr: SocketAddr, protocol: Protocol) -> Endpoint {
        Endpoint { addr, protocol }
    }
}

/// An endpoint paired with the socket it's reached through — the
/// `endpoint_socket_t` collaborator (`aux.src`/`aux.dst` in §3).
#[derive(Debug)]
pub struct EndpointSocket {
    pub socket: RawFd,
    pub endpoint: Endpoint,
}

impl EndpointSocket {
    pub fn new(socket: RawFd, endpoint: Endpoint) -> EndpointSocket {
        EndpointSocket { socket, endpoint }
    }
}

/// Folds an IPv4-mapped IPv6 address down to plain IPv4, and leaves
/// everything else untouched. This is the only address-family translation
/// `network.c`'s `translate_endpoint` is ever exercised against (a UDP
/// recvmsg populating a generic `sockaddr_storage` destination).
pub fn canonicalize(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(v4) => SocketAddr::V4(SocketAddrV4::new(v4, v6.port())),
            None => SocketAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// Populates a `sockaddr_storage` from a `SocketAddr`, returning the storage
/// and the length of the populated prefix, suitable for `msghdr::msg_name`.
pub(crate) fn to_raw(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let raw = sockaddr_in(v4);
            unsafe {
                let dst = &mut storage as *mut _ as *mut libc::sockaddr_in;
                *dst = raw;
            }
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let raw = sockaddr_in6(v6);
            unsafe {
                let dst = &mut storage as *mut _ as *mut libc::sockaddr_in6;
                *dst = raw;
            }
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

/// Reconstructs a `SocketAddr` from a populated `sockaddr_storage`, as
/// produced by a `recvmsg` with `msg_name` set to a generic destination.
pub(crate) fn from_raw(storage: &libc::sockaddr_storage, len: libc::socklen_t) -> io::Result<SocketAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET if len as usize >= mem::size_of::<libc::sockaddr_in>() => {
            let raw = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(raw.sin_addr.s_addr));
            let port = u16::from_be(raw.sin_port);
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        libc::AF_INET6 if len as usize >= mem::size_of::<libc::sockaddr_in6>() => {
            let raw = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(raw.sin6_addr.s6_addr);
            let port = u16::from_be(raw.sin6_port);
            Ok(SocketAddr::V6(SocketAddrV6::new(ip, port, raw.sin6_flowinfo, raw.sin6_scope_id)))
        }
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "recvmsg returned an address of unknown or truncated family",
        )),
    }
}

fn sockaddr_in(addr: &SocketAddrV4) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        },
        sin_zero: [0; 8],
    }
}

fn sockaddr_in6(addr: &SocketAddrV6) -> libc::sockaddr_in6 {
    libc::sockaddr_in6 {
        sin6_family: libc::AF_INET6 as libc::sa_family_t,
        sin6_port: addr.port().to_be(),
        sin6_flowinfo: addr.flowinfo(),
        sin6_addr: libc::in6_addr {
            s6_addr: addr.ip().octets(),
        },
        sin6_scope_id: addr.scope_id(),
    }
}
