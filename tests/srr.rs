//! End-to-end SRR engine scenarios from §8: TCP sync/async round trips,
//! async partial-progress send, and UDP truncation-peek.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reactor_net::endpoint::{Endpoint, EndpointSocket, Protocol};
use reactor_net::srr::{srr_operate, srr_operate_no_cb, Op, Operation};
use reactor_net::{Reactor, Srr, SrrBuffer};

mod util;

const TIMEOUT: Duration = Duration::from_secs(5);

fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();
    (client, server)
}

#[test]
fn tcp_sync_send_then_sync_recv_round_trips() {
    util::init();
    let (mut client, server) = tcp_pair();

    client.write_all(b"ping").unwrap();

    let mut incoming = [0u8; 4];
    let peer_addr = client.peer_addr().unwrap();
    let srr = Srr::new(
        Operation {
            protocol: Protocol::Tcp,
            op: Op::Recv,
        },
        SrrBuffer::from_slice(&mut incoming),
    )
    .with_src(EndpointSocket::new(server.as_raw_fd(), Endpoint::new(peer_addr, Protocol::Tcp)));
    let result = srr_operate_no_cb(srr);

    assert!(result.error.is_none());
    assert_eq!(result.bytes_operated, 4);
    assert_eq!(&incoming, b"ping");

    let mut outgoing = *b"pong";
    let srr = Srr::new(
        Operation {
            protocol: Protocol::Tcp,
            op: Op::Send,
        },
        SrrBuffer::from_slice(&mut outgoing),
    )
    .with_dst(EndpointSocket::new(server.as_raw_fd(), Endpoint::new(peer_addr, Protocol::Tcp)));
    let result = srr_operate_no_cb(srr);
    assert!(result.error.is_none());
    assert_eq!(result.bytes_operated, 4);

    let mut reply = [0u8; 4];
    client.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"pong");
}

#[test]
fn tcp_sync_empty_buffer_send_completes_immediately() {
    util::init();
    let (client, server) = tcp_pair();
    let peer_addr = client.peer_addr().unwrap();

    let mut empty: [u8; 0] = [];
    let srr = Srr::new(
        Operation {
            protocol: Protocol::Tcp,
            op: Op::Send,
        },
        SrrBuffer::from_slice(&mut empty),
    )
    .with_dst(EndpointSocket::new(server.as_raw_fd(), Endpoint::new(peer_addr, Protocol::Tcp)));
    let result = srr_operate_no_cb(srr);

    assert!(result.error.is_none());
    assert_eq!(result.bytes_operated, 0);
}

#[test]
fn tcp_async_send_then_recv_round_trips_through_the_reactor() {
    util::init();
    let (client, server) = tcp_pair();
    client.set_nonblocking(true).unwrap();
    server.set_nonblocking(true).unwrap();
    let peer_addr = client.peer_addr().unwrap();

    let reactor = Arc::new(Reactor::new().unwrap());
    let handle = {
        let reactor = reactor.clone();
        thread::spawn(move || reactor.run().unwrap())
    };

    let (send_done_tx, send_done_rx) = channel();
    let mut outgoing = *b"hello";
    let srr = Srr::new(
        Operation {
            protocol: Protocol::Tcp,
            op: Op::Send,
        },
        SrrBuffer::from_slice(&mut outgoing),
    )
    .with_dst(EndpointSocket::new(server.as_raw_fd(), Endpoint::new(peer_addr, Protocol::Tcp)))
    .with_reactor(reactor.clone())
    .with_callback(move |result| {
        send_done_tx.send((result.error.is_none(), result.bytes_operated)).unwrap();
    });
    srr_operate(srr);

    let (ok, n) = send_done_rx.recv_timeout(TIMEOUT).expect("send callback never fired");
    assert!(ok);
    assert_eq!(n, 5);

    let mut buf = [0u8; 5];
    client.set_nonblocking(false).unwrap();
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello");

    client.write_all(b"world").unwrap();

    let (recv_done_tx, recv_done_rx) = channel();
    let mut incoming = [0u8; 5];
    let srr = Srr::new(
        Operation {
            protocol: Protocol::Tcp,
            op: Op::Recv,
        },
        SrrBuffer::from_slice(&mut incoming),
    )
    .with_src(EndpointSocket::new(server.as_raw_fd(), Endpoint::new(peer_addr, Protocol::Tcp)))
    .with_reactor(reactor.clone())
    .with_callback(move |result| {
        recv_done_tx
            .send((result.error.is_none(), result.bytes_operated, result.buffer.as_slice().to_vec()))
            .unwrap();
    });
    srr_operate(srr);

    let (ok, n, data) = recv_done_rx.recv_timeout(TIMEOUT).expect("recv callback never fired");
    assert!(ok);
    assert_eq!(n, 5);
    assert_eq!(data, b"world");

    reactor.stop(false);
    handle.join().unwrap();
}

#[test]
fn tcp_async_send_completes_despite_a_slow_reader_forcing_partial_progress() {
    util::init();
    let (client, server) = tcp_pair();
    server.set_nonblocking(true).unwrap();

    // shrink the sender's kernel send buffer so a multi-megabyte payload
    // cannot be accepted in a single non-blocking sendmsg, forcing at least
    // one would-block re-arm cycle (§8 scenario 2).
    unsafe {
        let size: libc::c_int = 4096;
        let _ = libc::setsockopt(
            server.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            &size as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }

    let payload_len = 2 * 1024 * 1024;
    let mut payload = vec![0u8; payload_len];
    for (i, b) in payload.iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }

    let reactor = Arc::new(Reactor::new().unwrap());
    let handle = {
        let reactor = reactor.clone();
        thread::spawn(move || reactor.run().unwrap())
    };

    let reader = {
        let mut client = client;
        thread::spawn(move || {
            let mut received = Vec::with_capacity(payload_len);
            let mut buf = [0u8; 8192];
            while received.len() < payload_len {
                let n = client.read(&mut buf).unwrap();
                assert!(n > 0, "peer closed before all bytes arrived");
                received.extend_from_slice(&buf[..n]);
            }
            received
        })
    };

    let peer_addr = server.local_addr().unwrap();
    let (tx, rx) = channel();
    let srr = Srr::new(
        Operation {
            protocol: Protocol::Tcp,
            op: Op::Send,
        },
        SrrBuffer::from_slice(&mut payload),
    )
    .with_dst(EndpointSocket::new(server.as_raw_fd(), Endpoint::new(peer_addr, Protocol::Tcp)))
    .with_reactor(reactor.clone())
    .with_callback(move |result| {
        tx.send((result.error.is_none(), result.bytes_operated)).unwrap();
    });
    srr_operate(srr);

    let (ok, n) = rx.recv_timeout(Duration::from_secs(30)).expect("send never completed");
    assert!(ok);
    assert_eq!(n, payload_len);

    let received = reader.join().unwrap();
    assert_eq!(received.len(), payload_len);

    reactor.stop(false);
    handle.join().unwrap();
}

fn udp_pair() -> (UdpSocket, UdpSocket) {
    let a = UdpSocket::bind("127.0.0.1:0").unwrap();
    let b = UdpSocket::bind("127.0.0.1:0").unwrap();
    a.connect(b.local_addr().unwrap()).unwrap();
    b.connect(a.local_addr().unwrap()).unwrap();
    (a, b)
}

#[test]
fn udp_async_recv_reports_buffer_too_small_and_leaves_datagram_queued() {
    util::init();
    let (a, b) = udp_pair();
    a.set_nonblocking(true).unwrap();
    b.set_nonblocking(true).unwrap();

    let datagram = b"123456789";
    a.send(datagram).unwrap();
    thread::sleep(Duration::from_millis(20));

    let reactor = Arc::new(Reactor::new().unwrap());
    let handle = {
        let reactor = reactor.clone();
        thread::spawn(move || reactor.run().unwrap())
    };

    let src_addr = a.local_addr().unwrap();
    let mut small = [0u8; 4];
    let (tx, rx) = channel();
    let srr = Srr::new(
        Operation {
            protocol: Protocol::Udp,
            op: Op::Recv,
        },
        SrrBuffer::from_slice(&mut small),
    )
    .with_src(EndpointSocket::new(b.as_raw_fd(), Endpoint::new(src_addr, Protocol::Udp)))
    .with_reactor(reactor.clone())
    .with_callback(move |result| {
        tx.send((result.error.is_some(), result.bytes_operated, result.has_more_bytes))
            .unwrap();
    });
    srr_operate(srr);

    let (is_err, bytes_operated, has_more_bytes) = rx.recv_timeout(TIMEOUT).expect("recv callback never fired");
    assert!(is_err);
    assert_eq!(bytes_operated, 4);
    assert_eq!(has_more_bytes, 9);

    // the datagram must still be queued: a second recv with a big enough
    // buffer returns it in full.
    let mut big = [0u8; 16];
    let srr = Srr::new(
        Operation {
            protocol: Protocol::Udp,
            op: Op::Recv,
        },
        SrrBuffer::from_slice(&mut big),
    )
    .with_src(EndpointSocket::new(b.as_raw_fd(), Endpoint::new(src_addr, Protocol::Udp)));
    let result = srr_operate_no_cb(srr);
    assert!(result.error.is_none());
    assert_eq!(result.bytes_operated, 9);
    assert_eq!(&big[..9], datagram);

    reactor.stop(false);
    handle.join().unwrap();
}

#[test]
fn udp_async_send_round_trips() {
    util::init();
    let (a, b) = udp_pair();
    a.set_nonblocking(true).unwrap();
    b.set_nonblocking(true).unwrap();

    let reactor = Arc::new(Reactor::new().unwrap());
    let handle = {
        let reactor = reactor.clone();
        thread::spawn(move || reactor.run().unwrap())
    };

    let dst_addr = b.local_addr().unwrap();
    let mut out = *b"datagram";
    let (tx, rx) = channel();
    let srr = Srr::new(
        Operation {
            protocol: Protocol::Udp,
            op: Op::Send,
        },
        SrrBuffer::from_slice(&mut out),
    )
    .with_dst(EndpointSocket::new(a.as_raw_fd(), Endpoint::new(dst_addr, Protocol::Udp)))
    .with_reactor(reactor.clone())
    .with_callback(move |result| {
        tx.send(result.error.is_none()).unwrap();
    });
    srr_operate(srr);

    assert!(rx.recv_timeout(TIMEOUT).expect("send callback never fired"));

    let mut incoming = [0u8; 16];
    let n = b.recv(&mut incoming).unwrap();
    assert_eq!(&incoming[..n], b"datagram");

    reactor.stop(false);
    handle.join().unwrap();
}
