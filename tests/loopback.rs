//! End-to-end exercises of the public API over real localhost UDP.

use std::net::UdpSocket;
use std::thread;
use std::time::Duration;

use cap::{CapSocket, Error, SockOpt, SockOptKey};

fn bind_local() -> CapSocket {
    CapSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap()
}

#[test]
fn transfer_two_messages_in_order() {
    let server = bind_local();
    server.listen().unwrap();
    let server_addr = server.local_addr();

    let reader = thread::spawn(move || {
        let stream = server.accept().unwrap();
        let mut buf = [0u8; 1024];

        let n = stream.recv(&mut buf).unwrap();
        let first = buf[..n].to_vec();
        let n = stream.recv(&mut buf).unwrap();
        let second = buf[..n].to_vec();
        let after_fin = stream.recv(&mut buf);

        (first, second, after_fin)
    });

    let client = bind_local();
    let mut stream = client.connect(server_addr).unwrap();
    stream.sendto(b"first message").unwrap();
    stream.sendto(b"the second").unwrap();
    stream.close().unwrap();

    let (first, second, after_fin) = reader.join().unwrap();
    assert_eq!(first, b"first message");
    assert_eq!(second, b"the second");
    assert!(matches!(after_fin, Err(Error::ConnectionClosed)));
}

#[test]
fn fragmented_transfer_reassembles() {
    let server = bind_local();
    server.set_option(SockOpt::PayloadMax(3)).unwrap();
    server.listen().unwrap();
    let server_addr = server.local_addr();

    let message = b"a message that spans a dozen segments".to_vec();
    let expected = message.clone();

    let reader = thread::spawn(move || {
        let stream = server.accept().unwrap();
        let mut buf = [0u8; 1024];
        let n = stream.recv(&mut buf).unwrap();
        buf[..n].to_vec()
    });

    let client = bind_local();
    client.set_option(SockOpt::PayloadMax(3)).unwrap();
    let mut stream = client.connect(server_addr).unwrap();
    stream.sendto(&message).unwrap();

    assert_eq!(reader.join().unwrap(), expected);
    stream.close().unwrap();
}

#[test]
fn empty_message_is_distinguishable_from_eof() {
    let server = bind_local();
    server.listen().unwrap();
    let server_addr = server.local_addr();

    let reader = thread::spawn(move || {
        let stream = server.accept().unwrap();
        let mut buf = [0u8; 16];
        let empty = stream.recv(&mut buf);
        let eof = stream.recv(&mut buf);
        (empty, eof.err())
    });

    let client = bind_local();
    let mut stream = client.connect(server_addr).unwrap();
    stream.sendto(b"").unwrap();
    stream.close().unwrap();

    let (empty, eof) = reader.join().unwrap();
    assert_eq!(empty.unwrap(), 0);
    assert!(matches!(eof, Some(Error::ConnectionClosed)));
}

#[test]
fn recv_truncates_into_short_buffer() {
    let server = bind_local();
    server.listen().unwrap();
    let server_addr = server.local_addr();

    let reader = thread::spawn(move || {
        let stream = server.accept().unwrap();
        let mut buf = [0u8; 4];
        let n = stream.recv(&mut buf).unwrap();
        buf[..n].to_vec()
    });

    let client = bind_local();
    let stream = client.connect(server_addr).unwrap();
    stream.sendto(b"truncated").unwrap();

    assert_eq!(reader.join().unwrap(), b"trun");
}

#[test]
fn connect_times_out_against_silent_peer() {
    // A bound UDP socket that never answers anything.
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();

    let client = bind_local();
    client
        .set_option(SockOpt::RtoInitial(Duration::from_millis(50)))
        .unwrap();
    client.set_option(SockOpt::HandshakeRetries(2)).unwrap();

    let err = client.connect(silent.local_addr().unwrap()).unwrap_err();
    assert!(matches!(err, Error::ConnectTimeout));
}

#[test]
fn accept_without_listen_fails() {
    let socket = bind_local();
    assert!(matches!(socket.accept(), Err(Error::NotConnected)));
}

#[test]
fn bind_twice_is_address_in_use() {
    let first = bind_local();
    let err = CapSocket::bind(first.local_addr()).unwrap_err();
    assert!(matches!(err, Error::AddressInUse));
}

#[test]
fn sendto_after_close_fails() {
    let server = bind_local();
    server.listen().unwrap();
    let server_addr = server.local_addr();

    let acceptor = thread::spawn(move || {
        let _stream = server.accept().unwrap();
        // Hold the connection open long enough for the client's close
        // handshake to complete.
        thread::sleep(Duration::from_millis(500));
    });

    let client = bind_local();
    let mut stream = client.connect(server_addr).unwrap();
    stream.close().unwrap();

    assert!(matches!(stream.sendto(b"late"), Err(Error::ConnectionClosed)));
    acceptor.join().unwrap();
}

#[test]
fn nonblocking_recv_and_accept_would_block() {
    let server = bind_local();
    server.listen().unwrap();
    let server_addr = server.local_addr();

    // Nothing has connected yet.
    server.set_option(SockOpt::Nonblock(true)).unwrap();
    assert!(matches!(server.accept(), Err(Error::WouldBlock)));
    server.set_option(SockOpt::Nonblock(false)).unwrap();

    let client = bind_local();
    let stream_c = client.connect(server_addr).unwrap();
    let stream_s = server.accept().unwrap();

    // Established but idle: a non-blocking recv has nothing to return.
    server.set_option(SockOpt::Nonblock(true)).unwrap();
    assert!(matches!(
        stream_s.recv(&mut [0u8; 16]),
        Err(Error::WouldBlock)
    ));
    server.set_option(SockOpt::Nonblock(false)).unwrap();

    stream_c.sendto(b"now").unwrap();
    let mut buf = [0u8; 16];
    let n = stream_s.recv(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"now");
}

#[test]
fn options_round_trip_through_engine() {
    let socket = bind_local();

    socket.set_option(SockOpt::Window(8)).unwrap();
    socket
        .set_option(SockOpt::TimeWait(Duration::from_millis(100)))
        .unwrap();

    assert_eq!(socket.option(SockOptKey::Window).unwrap(), SockOpt::Window(8));
    assert_eq!(
        socket.option(SockOptKey::TimeWait).unwrap(),
        SockOpt::TimeWait(Duration::from_millis(100))
    );
    // Untouched keys report their defaults.
    assert_eq!(
        socket.option(SockOptKey::MaxRetries).unwrap(),
        SockOpt::MaxRetries(8)
    );
    assert_eq!(
        socket.option(SockOptKey::PayloadMax).unwrap(),
        SockOpt::PayloadMax(1024)
    );
}
