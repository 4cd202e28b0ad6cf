//! UDP send/recv (§4.2): single-shot datagram transfer, with a
//! truncation-peek path on receive.
//!
//! Grounded on `original_source/network/network.c`'s `udp_send_sync_no_cb`,
//! `udp_send_async_tpl`, `udp_recv_sync_no_cb`, and `udp_recv_async_tpl`.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use super::msg;
use super::{CompletionResult, Srr};
use crate::endpoint::{self, Endpoint, Protocol};
use crate::error::SrrError;
use crate::reactor::{Direction, Reactor};

fn dst(srr: &Srr) -> (RawFd, Endpoint) {
    let es = srr.dst.as_ref().expect("UDP send requires aux.dst");
    debug_assert!(es.socket >= 0 && es.endpoint.protocol == Protocol::Udp);
    (es.socket, es.endpoint)
}

fn src(srr: &Srr) -> (RawFd, Endpoint) {
    let es = srr.src.as_ref().expect("UDP recv requires aux.src");
    debug_assert!(es.socket >= 0 && es.endpoint.protocol == Protocol::Udp);
    (es.socket, es.endpoint)
}

// ---- send ----

/// Loops `sendmsg` to the destination until the whole buffer is reported
/// sent or a negative return breaks the loop, matching
/// `udp_send_sync_no_cb`. A datagram socket normally accepts the whole
/// buffer in one call; the loop handles partial progress defensively, as
/// the original does.
pub(crate) fn send_sync(mut srr: Srr) -> CompletionResult {
    let (fd, endpoint) = dst(&srr);
    let total = srr.buffer.size();
    let mut error = None;

    srr.bytes_operated = 0;
    while srr.bytes_operated < total {
        let offset = srr.bytes_operated;
        match msg::send(fd, srr.buffer.remainder(offset), Some(&endpoint.addr), msg::SYNC_FLAGS) {
            Ok(n) => srr.bytes_operated += n,
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }

    let has_more_bytes = msg::queued_outgoing(fd).unwrap_or(0);

    CompletionResult {
        endpoint,
        error: error.map(SrrError::from),
        bytes_operated: srr.bytes_operated,
        has_more_bytes,
        buffer: srr.buffer,
    }
}

pub(crate) fn start_send_async(srr: Box<Srr>) {
    let (fd, _) = dst(&srr);
    let reactor = srr.reactor.clone().expect("UDP async send requires a reactor handle");
    let mut srr = srr;
    srr.bytes_operated = 0;
    arm_send(reactor, fd, srr);
}

fn arm_send(reactor: Arc<Reactor>, fd: RawFd, srr: Box<Srr>) {
    let mut pending = Some(srr);
    let reactor_handle = reactor.clone();
    reactor.post(fd, Direction::Write, true, move |fd, _direction| {
        let srr = pending.take().expect("oneshot UDP send job dispatched more than once");
        on_send_ready(reactor_handle.clone(), fd, srr);
    });
}

fn on_send_ready(reactor: Arc<Reactor>, fd: RawFd, mut srr: Box<Srr>) {
    let (_, endpoint) = dst(&srr);
    let offset = srr.bytes_operated;

    match msg::send(fd, srr.buffer.remainder(offset), Some(&endpoint.addr), msg::ASYNC_FLAGS) {
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => arm_send(reactor, fd, srr),
        Err(e) => finish(srr, endpoint, Some(SrrError::from(e)), 0),
        Ok(n) => {
            srr.bytes_operated += n;
            if srr.bytes_operated < srr.buffer.size() {
                arm_send(reactor, fd, srr);
            } else {
                let has_more_bytes = msg::queued_outgoing(fd).unwrap_or(0);
                finish(srr, endpoint, None, has_more_bytes);
            }
        }
    }
}

// ---- recv ----

/// Queries the incoming queue length first; if it exceeds the caller's
/// remaining buffer capacity, performs a single `MSG_PEEK` recv and reports
/// `BufferTooSmall` without consuming the datagram. Otherwise a normal recv
/// is performed once and the source address is canonicalized, matching
/// `udp_recv_sync_no_cb`.
pub(crate) fn recv_sync(mut srr: Srr) -> CompletionResult {
    let (fd, endpoint) = src(&srr);
    let offset = srr.bytes_operated;
    let remaining = srr.buffer.size() - offset;

    let queued = match msg::queued_incoming(fd) {
        Ok(n) => n,
        Err(e) => {
            return CompletionResult {
                endpoint,
                error: Some(SrrError::from(e)),
                bytes_operated: srr.bytes_operated,
                has_more_bytes: 0,
                buffer: srr.buffer,
            }
        }
    };

    if queued > remaining {
        return match msg::recv(fd, srr.buffer.remainder_mut(offset), true, msg::PEEK_FLAGS) {
            Ok((peeked, _)) => CompletionResult {
                endpoint,
                error: Some(SrrError::BufferTooSmall),
                bytes_operated: peeked,
                has_more_bytes: queued,
                buffer: srr.buffer,
            },
            Err(e) => CompletionResult {
                endpoint,
                error: Some(SrrError::from(e)),
                bytes_operated: srr.bytes_operated,
                has_more_bytes: queued,
                buffer: srr.buffer,
            },
        };
    }

    match msg::recv(fd, srr.buffer.remainder_mut(offset), true, msg::SYNC_FLAGS) {
        Ok((n, from)) => {
            srr.bytes_operated += n;
            let endpoint = Endpoint::new(
                from.map(endpoint::canonicalize).unwrap_or(endpoint.addr),
                endpoint.protocol,
            );
            CompletionResult {
                endpoint,
                error: None,
                bytes_operated: srr.bytes_operated,
                has_more_bytes: 0,
                buffer: srr.buffer,
            }
        }
        Err(e) => CompletionResult {
            endpoint,
            error: Some(SrrError::from(e)),
            bytes_operated: srr.bytes_operated,
            has_more_bytes: 0,
            buffer: srr.buffer,
        },
    }
}

pub(crate) fn start_recv_async(srr: Box<Srr>) {
    let (fd, _) = src(&srr);
    let reactor = srr.reactor.clone().expect("UDP async recv requires a reactor handle");
    reactor.post(fd, Direction::Read, true, {
        let mut pending = Some(srr);
        move |fd, _direction| {
            let srr = pending.take().expect("oneshot UDP recv job dispatched more than once");
            on_recv_ready(fd, srr);
        }
    });
}

/// Single-shot: unlike TCP/UDP-send, a UDP recv never re-arms itself — it
/// either completes with data, completes with `BufferTooSmall`, or fails,
/// all in the one callback invocation (§4.2's async UDP RECV state machine:
/// `ARMED → DONE` only).
fn on_recv_ready(fd: RawFd, mut srr: Box<Srr>) {
    let (_, endpoint) = src(&srr);
    let offset = srr.bytes_operated;
    let remaining = srr.buffer.size() - offset;

    let queued = match msg::queued_incoming(fd) {
        Ok(n) => n,
        Err(e) => {
            finish(srr, endpoint, Some(SrrError::from(e)), 0);
            return;
        }
    };

    if queued > remaining {
        match msg::recv(fd, srr.buffer.remainder_mut(offset), true, msg::PEEK_FLAGS) {
            Ok((peeked, _)) => {
                srr.bytes_operated = peeked;
                finish(srr, endpoint, Some(SrrError::BufferTooSmall), queued);
            }
            Err(e) => finish(srr, endpoint, Some(SrrError::from(e)), queued),
        }
        return;
    }

    match msg::recv(fd, srr.buffer.remainder_mut(offset), true, msg::ASYNC_FLAGS) {
        Ok((n, from)) => {
            srr.bytes_operated += n;
            let endpoint = Endpoint::new(
                from.map(endpoint::canonicalize).unwrap_or(endpoint.addr),
                endpoint.protocol,
            );
            finish(srr, endpoint, None, 0);
        }
        Err(e) => finish(srr, endpoint, Some(SrrError::from(e)), 0),
    }
}

fn finish(mut srr: Box<Srr>, endpoint: Endpoint, error: Option<SrrError>, has_more_bytes: usize) {
    if let Some(mut callback) = srr.callback.take() {
        callback(CompletionResult {
            endpoint,
            error,
            bytes_operated: srr.bytes_operated,
            has_more_bytes,
            buffer: srr.buffer,
        });
    }
}
