//! The send/receive request (SRR) engine (§3, §4.2): a protocol-aware state
//! machine that drives one TCP stream or UDP datagram transfer to completion,
//! synchronously or via reactor callbacks.
//!
//! Grounded on `original_source/network/network.c`'s `srb_t`/`srb_operate`/
//! `srb_operate_no_cb` and its `OPERATOR_IDX`/`OPERATORS`/`OPERATORS_NO_CB`
//! dispatch tables, translated here into a `match (Protocol, Op)` instead of
//! a function-pointer array indexed by a packed bit (§9 Design Notes).

mod msg;
mod tcp;
mod udp;

use std::sync::Arc;

use crate::buffer::SrrBuffer;
use crate::endpoint::{Endpoint, EndpointSocket, Protocol};
use crate::error::SrrError;
use crate::reactor::Reactor;

/// `srb_operation_t`: which half of a transfer this request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Send,
    Recv,
}

/// `{operation.type, operation.op}` from §3 — the pair the engine dispatches
/// on.
#[derive(Debug, Clone, Copy)]
pub struct Operation {
    pub protocol: Protocol,
    pub op: Op,
}

/// The network completion result (§3): returned by sync operations and
/// passed to async callbacks.
///
/// The original's `ctx` field is dropped here: a Rust closure already
/// captures whatever context it needs, so a separate `void *ctx` parameter
/// would be redundant plumbing rather than a faithful port of anything
/// observable (see DESIGN.md).
pub struct CompletionResult {
    pub endpoint: Endpoint,
    /// `None` is success (`err == 0` in the original); `Some` carries either
    /// a wrapped kernel error or the synthetic `BufferTooSmall` sentinel.
    pub error: Option<SrrError>,
    pub bytes_operated: usize,
    pub has_more_bytes: usize,
    pub buffer: SrrBuffer,
}

/// A send/receive request (§3). Built with the `with_*` setters and handed to
/// [`srr_operate`] (async) or [`srr_operate_no_cb`] (sync), both of which
/// take ownership — this crate's stand-in for the original's heap-owned
/// `srb_t` plus its `deallocate(srb)` at completion.
pub struct Srr {
    operation: Operation,
    src: Option<EndpointSocket>,
    dst: Option<EndpointSocket>,
    buffer: SrrBuffer,
    bytes_operated: usize,
    reactor: Option<Arc<Reactor>>,
    callback: Option<Box<dyn FnMut(CompletionResult) + Send>>,
}

impl Srr {
    pub fn new(operation: Operation, buffer: SrrBuffer) -> Srr {
        Srr {
            operation,
            src: None,
            dst: None,
            buffer,
            bytes_operated: 0,
            reactor: None,
            callback: None,
        }
    }

    /// `aux.src` (§3): meaningful for RECV.
    pub fn with_src(mut self, src: EndpointSocket) -> Srr {
        self.src = Some(src);
        self
    }

    /// `aux.dst` (§3): meaningful for SEND.
    pub fn with_dst(mut self, dst: EndpointSocket) -> Srr {
        self.dst = Some(dst);
        self
    }

    /// Presence selects async mode (§4.2's dispatch table); absence (the
    /// default) selects sync mode.
    pub fn with_reactor(mut self, reactor: Arc<Reactor>) -> Srr {
        self.reactor = Some(reactor);
        self
    }

    pub fn with_callback<F>(mut self, callback: F) -> Srr
    where
        F: FnMut(CompletionResult) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Resumes accounting from a caller-defined point (§3 invariant:
    /// `bytes_operated ≤ buffer_size`).
    pub fn with_bytes_operated(mut self, bytes_operated: usize) -> Srr {
        self.bytes_operated = bytes_operated;
        self
    }
}

/// Async entry point (§6): asserts a reactor handle is present, dispatches by
/// `(protocol, op)`, and submits the first readiness intent. Returns
/// immediately; the terminal [`CompletionResult`] (if any) arrives through
/// the request's callback.
pub fn srr_operate(srr: Srr) {
    assert!(srr.reactor.is_some(), "srr_operate requires a reactor handle");
    let srr = Box::new(srr);
    match (srr.operation.protocol, srr.operation.op) {
        (Protocol::Tcp, _) => tcp::start_async(srr),
        (Protocol::Udp, Op::Send) => udp::start_send_async(srr),
        (Protocol::Udp, Op::Recv) => udp::start_recv_async(srr),
    }
}

/// Sync entry point (§6): asserts no reactor handle is present, drives the
/// transfer to completion on the calling thread, and returns the result.
pub fn srr_operate_no_cb(srr: Srr) -> CompletionResult {
    assert!(srr.reactor.is_none(), "srr_operate_no_cb requires no reactor handle");
    match (srr.operation.protocol, srr.operation.op) {
        (Protocol::Tcp, _) => tcp::sync(srr),
        (Protocol::Udp, Op::Send) => udp::send_sync(srr),
        (Protocol::Udp, Op::Recv) => udp::recv_sync(srr),
    }
}
