//! TCP send/recv (§4.2): partial-progress streaming in blocking full-drain
//! (sync) and oneshot-rearm (async) modes.
//!
//! Grounded on `original_source/network/network.c`'s
//! `tcp_send_recv_sync_no_cb` and `tcp_send_recv_async_tpl`. Unlike the
//! original, the endpoint used for accounting (`srb->operation.op` then the
//! matching `aux` half) is always read before it's used, eliminating Open
//! Question 2's use-before-init by construction.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use super::msg;
use super::{CompletionResult, Op, Srr};
use crate::endpoint::{Endpoint, Protocol};
use crate::error::SrrError;
use crate::reactor::{Direction, Reactor};

fn endpoint_socket(srr: &Srr, op: Op) -> (RawFd, Endpoint) {
    let es = match op {
        Op::Send => srr.dst.as_ref().expect("TCP send requires aux.dst"),
        Op::Recv => srr.src.as_ref().expect("TCP recv requires aux.src"),
    };
    debug_assert!(es.socket >= 0 && es.endpoint.protocol == Protocol::Tcp);
    (es.socket, es.endpoint)
}

fn direction_for(op: Op) -> Direction {
    match op {
        Op::Send => Direction::Write,
        Op::Recv => Direction::Read,
    }
}

fn residual(fd: RawFd, op: Op) -> io::Result<usize> {
    match op {
        Op::Send => msg::queued_outgoing(fd),
        Op::Recv => msg::queued_incoming(fd),
    }
}

fn transfer_once(fd: RawFd, srr: &mut Srr, op: Op, flags: libc::c_int) -> io::Result<usize> {
    let offset = srr.bytes_operated;
    match op {
        Op::Send => msg::send(fd, srr.buffer.remainder(offset), None, flags),
        Op::Recv => msg::recv(fd, srr.buffer.remainder_mut(offset), false, flags).map(|(n, _)| n),
    }
}

pub(crate) fn sync(mut srr: Srr) -> CompletionResult {
    let op = srr.operation.op;
    let (fd, endpoint) = endpoint_socket(&srr, op);

    let total = srr.buffer.size();
    let mut error = None;

    while srr.bytes_operated < total {
        match transfer_once(fd, &mut srr, op, msg::SYNC_FLAGS) {
            Ok(n) => srr.bytes_operated += n,
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }

    let has_more_bytes = residual(fd, op).unwrap_or(0);

    CompletionResult {
        endpoint,
        error: error.map(SrrError::from),
        bytes_operated: srr.bytes_operated,
        has_more_bytes,
        buffer: srr.buffer,
    }
}

pub(crate) fn start_async(srr: Box<Srr>) {
    let op = srr.operation.op;
    let (fd, _) = endpoint_socket(&srr, op);
    let reactor = srr.reactor.clone().expect("TCP async requires a reactor handle");
    arm(reactor, fd, direction_for(op), srr);
}

fn arm(reactor: Arc<Reactor>, fd: RawFd, direction: Direction, srr: Box<Srr>) {
    let mut pending = Some(srr);
    let reactor_handle = reactor.clone();
    reactor.post(fd, direction, true, move |fd, direction| {
        let srr = pending.take().expect("oneshot TCP job dispatched more than once");
        on_ready(reactor_handle.clone(), fd, direction, srr);
    });
}

fn on_ready(reactor: Arc<Reactor>, fd: RawFd, direction: Direction, mut srr: Box<Srr>) {
    let op = srr.operation.op;

    match transfer_once(fd, &mut srr, op, msg::ASYNC_FLAGS) {
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => arm(reactor, fd, direction, srr),
        Err(e) => {
            let endpoint = endpoint_socket(&srr, op).1;
            finish(srr, endpoint, Some(SrrError::from(e)), 0);
        }
        Ok(n) => {
            srr.bytes_operated += n;
            if srr.bytes_operated < srr.buffer.size() {
                arm(reactor, fd, direction, srr);
            } else {
                let has_more_bytes = residual(fd, op).unwrap_or(0);
                let endpoint = endpoint_socket(&srr, op).1;
                finish(srr, endpoint, None, has_more_bytes);
            }
        }
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
