//! End-to-end tests of the stream engine over local transports and mock
//! peers.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{read_msg, wait_for_state, wait_until};
use devio_rs_parser::{ParserMsg, ubx};
use devio_rs_stream::mock::MockTcpPeer;
use devio_rs_stream::{Stream, StreamError, StreamOpts, StreamState};

fn mon_ver() -> Vec<u8> {
    ubx::frame(ubx::CLS_MON, ubx::ID_MON_VER, &[]).unwrap()
}

#[test]
fn loopback_echo() {
    let mut stream = Stream::from_spec("loop://,N=lo-echo").unwrap();
    assert!(stream.start());
    assert!(wait_for_state(&stream, StreamState::Connected, Duration::from_secs(2)));

    assert!(stream.write(&mon_ver(), 1000));
    let msg = read_msg(&stream, Duration::from_secs(2)).expect("echoed message");
    assert_eq!(msg.name, "UBX-MON-VER");
    assert_eq!(msg.data, mon_ver());

    // Wait() signals data availability
    assert!(stream.write(&mon_ver(), 1000));
    assert!(stream.wait(2000));

    stream.stop(100);
    assert_eq!(stream.state(), StreamState::Closed);
}

#[test]
fn write_order_is_preserved() {
    let mut stream = Stream::from_spec("loop://").unwrap();
    assert!(stream.start());
    assert!(wait_for_state(&stream, StreamState::Connected, Duration::from_secs(2)));

    // Three separate writes drain to the transport in call order
    let frames = [
        ubx::frame(0x01, 0x07, &[1u8; 4]).unwrap(),
        ubx::frame(0x0a, 0x04, &[]).unwrap(),
        ubx::frame(0x02, 0x15, &[3u8; 8]).unwrap(),
    ];
    for frame in &frames {
        assert!(stream.write(frame, 1000));
    }
    let names: Vec<String> = (0..3)
        .map(|_| read_msg(&stream, Duration::from_secs(2)).expect("echo").name)
        .collect();
    assert_eq!(names, ["UBX-NAV-PVT", "UBX-MON-VER", "UBX-RXM-RAWX"]);

    // Autobaud makes no sense on a loopback
    assert!(!stream.autobaud(devio_rs_stream::AutobaudMode::Auto));
    assert_eq!(stream.baudrate(), 0);

    stream.stop(0);
}

#[test]
fn write_fails_when_not_connected() {
    let mut stream = Stream::from_spec("loop://").unwrap();

    // Never started
    assert!(!stream.write(b"data", 100));

    // Started then stopped
    assert!(stream.start());
    assert!(wait_for_state(&stream, StreamState::Connected, Duration::from_secs(2)));
    stream.stop(0);
    assert!(!stream.write(b"data", 100));
    let mut msg = ParserMsg::default();
    assert!(!stream.read(&mut msg, 0));
}

#[test]
fn tcp_client_roundtrip() {
    let peer = MockTcpPeer::start(mon_ver());
    let mut stream =
        Stream::from_spec(&format!("tcpcli://127.0.0.1:{},N=tcp1", peer.addr().port())).unwrap();
    assert!(stream.start());
    assert!(wait_for_state(&stream, StreamState::Connected, Duration::from_secs(5)));

    // Frame pushed by the peer arrives parsed
    let msg = read_msg(&stream, Duration::from_secs(2)).expect("peer frame");
    assert_eq!(msg.name, "UBX-MON-VER");

    // Writes reach the peer in order
    let frame = ubx::frame(0x01, 0x07, &[7u8; 16]).unwrap();
    assert!(stream.write(&frame, 1000));
    assert!(wait_until(Duration::from_secs(2), || peer.received() == frame));

    stream.stop(500);
    assert_eq!(stream.state(), StreamState::Closed);
}

#[test]
fn tcp_client_observed_transitions_are_legal() {
    let peer = MockTcpPeer::start(Vec::new());
    let mut stream =
        Stream::from_spec(&format!("tcpcli://127.0.0.1:{}", peer.addr().port())).unwrap();

    let transitions: Arc<Mutex<Vec<(StreamState, StreamState)>>> = Arc::new(Mutex::new(Vec::new()));
    let observed = transitions.clone();
    stream.add_state_observer(move |old, new, _error, _info| {
        observed.lock().unwrap().push((old, new));
    });

    assert!(stream.start());
    assert!(wait_for_state(&stream, StreamState::Connected, Duration::from_secs(5)));
    stream.stop(0);

    use StreamState::*;
    for &(old, new) in transitions.lock().unwrap().iter() {
        let legal = matches!(
            (old, new),
            (Closed, Connecting)
                | (Connecting, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connected, Connected)
                | (Connected, Error)
                | (Error, Connecting)
                | (Error, Closed)
                // stop() forces CLOSED from any state
                | (Connecting, Closed)
                | (Connected, Closed)
        );
        assert!(legal, "illegal transition {old:?} -> {new:?}");
    }
}

#[test]
fn inactivity_timeout_triggers_retry_cycle() {
    // Peer that never sends anything
    let peer = MockTcpPeer::start(Vec::new());
    let mut opts =
        StreamOpts::from_spec(&format!("tcpcli://127.0.0.1:{}", peer.addr().port())).unwrap();
    opts.inact_to = Duration::from_millis(300);
    opts.retry_to = Duration::from_millis(300);

    let mut stream = Stream::from_opts(opts).unwrap();
    let errors: Arc<Mutex<Vec<StreamError>>> = Arc::new(Mutex::new(Vec::new()));
    let observed = errors.clone();
    stream.add_state_observer(move |_old, new, error, _info| {
        if new == StreamState::Error {
            observed.lock().unwrap().push(error);
        }
    });

    assert!(stream.start());
    assert!(wait_for_state(&stream, StreamState::Connected, Duration::from_secs(5)));

    // No data → NO_DATA_RECV, transport closed, reconnect after retry_to
    assert!(wait_until(Duration::from_secs(3), || {
        errors.lock().unwrap().contains(&StreamError::NoDataRecv)
    }));
    assert!(wait_until(Duration::from_secs(3), || peer.connections() >= 2));

    stream.stop(0);
}

#[test]
fn connect_failure_without_retry_ends_closed() {
    // Grab a port nobody listens on
    let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = unused.local_addr().unwrap().port();
    drop(unused);

    // tcpcli has no retry by default
    let mut stream = Stream::from_spec(&format!("tcpcli://127.0.0.1:{port}")).unwrap();
    assert!(stream.start());
    assert!(wait_for_state(&stream, StreamState::Closed, Duration::from_secs(5)));
    assert_eq!(stream.error(), StreamError::ConnectFail);
    stream.stop(0);
}

#[test]
fn stop_and_restart_repeats_the_pipeline() {
    let peer = MockTcpPeer::start(Vec::new());
    let mut stream =
        Stream::from_spec(&format!("tcpcli://127.0.0.1:{}", peer.addr().port())).unwrap();

    assert!(stream.start());
    assert!(!stream.start());
    assert!(wait_for_state(&stream, StreamState::Connected, Duration::from_secs(5)));
    stream.stop(0);
    assert_eq!(stream.state(), StreamState::Closed);

    assert!(stream.start());
    assert!(wait_for_state(&stream, StreamState::Connected, Duration::from_secs(5)));
    assert!(wait_until(Duration::from_secs(2), || peer.connections() == 2));
    stream.stop(0);
}

#[test]
fn fileout_captures_and_filein_replays() {
    let path = std::env::temp_dir().join(format!("devio-test-capture-{}.bin", std::process::id()));
    std::fs::remove_file(&path).ok();

    let mut writer = Stream::from_spec(&format!("fileout://{}", path.display())).unwrap();
    assert!(writer.start());
    assert!(wait_for_state(&writer, StreamState::Connected, Duration::from_secs(2)));
    let frame_a = mon_ver();
    let frame_b = ubx::frame(0x01, 0x07, &[1u8; 8]).unwrap();
    assert!(writer.write(&frame_a, 1000));
    assert!(writer.write(&frame_b, 1000));
    writer.stop(1000);

    let captured = std::fs::read(&path).unwrap();
    let mut expected = frame_a.clone();
    expected.extend_from_slice(&frame_b);
    assert_eq!(captured, expected);

    let mut reader = Stream::from_spec(&format!("filein://{}", path.display())).unwrap();
    assert!(reader.start());
    let msg = read_msg(&reader, Duration::from_secs(2)).expect("first frame");
    assert_eq!(msg.name, "UBX-MON-VER");
    let msg = read_msg(&reader, Duration::from_secs(2)).expect("second frame");
    assert_eq!(msg.name, "UBX-NAV-PVT");
    // End of recording
    assert!(wait_for_state(&reader, StreamState::Closed, Duration::from_secs(2)));
    reader.stop(0);

    std::fs::remove_file(&path).ok();
}

#[test]
fn udp_client_to_server() {
    // Find a free UDP port
    let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let mut server = Stream::from_spec(&format!("udpsvr://127.0.0.1:{port}")).unwrap();
    assert!(server.start());
    assert!(wait_for_state(&server, StreamState::Connected, Duration::from_secs(2)));

    let mut client = Stream::from_spec(&format!("udpcli://127.0.0.1:{port}")).unwrap();
    assert!(client.start());
    assert!(wait_for_state(&client, StreamState::Connected, Duration::from_secs(2)));

    assert!(client.write(&mon_ver(), 1000));
    let msg = read_msg(&server, Duration::from_secs(3)).expect("datagram");
    assert_eq!(msg.name, "UBX-MON-VER");

    client.stop(100);
    server.stop(0);
}

#[cfg(unix)]
#[test]
fn exec_cat_roundtrip() {
    if !std::path::Path::new("/bin/cat").exists() {
        eprintln!("skipping: /bin/cat not available");
        return;
    }
    let mut stream = Stream::from_spec("exec:///bin/cat").unwrap();
    assert!(stream.start());
    assert!(wait_for_state(&stream, StreamState::Connected, Duration::from_secs(2)));

    assert!(stream.write(&mon_ver(), 1000));
    let msg = read_msg(&stream, Duration::from_secs(3)).expect("echoed by cat");
    assert_eq!(msg.name, "UBX-MON-VER");
    stream.stop(500);
}

#[cfg(unix)]
#[test]
fn ipc_server_client_pair() {
    let name = format!("t{}", std::process::id());

    let mut server = Stream::from_spec(&format!("ipcsvr://{name}")).unwrap();
    assert!(server.start());
    assert!(wait_for_state(&server, StreamState::Connected, Duration::from_secs(2)));

    let mut client = Stream::from_spec(&format!("ipccli://{name}")).unwrap();
    assert!(client.start());
    assert!(wait_for_state(&client, StreamState::Connected, Duration::from_secs(5)));

    // Wait for the server to pick the client up
    assert!(wait_until(Duration::from_secs(2), || {
        server.info().contains("attached")
    }));

    assert!(client.write(&mon_ver(), 1000));
    let msg = read_msg(&server, Duration::from_secs(3)).expect("client data");
    assert_eq!(msg.name, "UBX-MON-VER");

    let frame = ubx::frame(0x01, 0x07, &[2u8; 4]).unwrap();
    assert!(server.write(&frame, 1000));
    let msg = read_msg(&client, Duration::from_secs(3)).expect("server data");
    assert_eq!(msg.name, "UBX-NAV-PVT");

    client.stop(100);
    server.stop(100);
}

#[cfg(unix)]
#[test]
fn ipc_client_tolerates_late_server() {
    let name = format!("late{}", std::process::id());

    // Client first: the link does not exist yet, so it cycles through the
    // retry path (its hotplug default) until the server appears
    let mut opts = StreamOpts::from_spec(&format!("ipccli://{name}")).unwrap();
    assert!(opts.hotplug);
    opts.retry_to = Duration::from_millis(200);
    let mut client = Stream::from_opts(opts).unwrap();
    assert!(client.start());
    std::thread::sleep(Duration::from_millis(300));
    assert_ne!(client.state(), StreamState::Connected);

    let mut server = Stream::from_spec(&format!("ipcsvr://{name}")).unwrap();
    assert!(server.start());
    assert!(wait_for_state(&client, StreamState::Connected, Duration::from_secs(5)));

    client.stop(0);
    server.stop(0);
}

#[test]
fn tcp_server_accepts_and_fans_out() {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let mut server = Stream::from_spec(&format!("tcpsvr://127.0.0.1:{port}")).unwrap();
    assert!(server.start());
    assert!(wait_for_state(&server, StreamState::Connected, Duration::from_secs(2)));

    use std::io::{Read, Write};
    let mut client = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
    client.write_all(&mon_ver()).unwrap();
    let msg = read_msg(&server, Duration::from_secs(3)).expect("client bytes");
    assert_eq!(msg.name, "UBX-MON-VER");

    let frame = ubx::frame(0x01, 0x07, &[9u8; 8]).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        server.info().contains("1 clients")
    }));
    assert!(server.write(&frame, 1000));
    let mut received = vec![0u8; frame.len()];
    client.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
    client.read_exact(&mut received).unwrap();
    assert_eq!(received, frame);

    server.stop(100);
}

#[test]
fn generator_streams_emit_messages() {
    let mut opts = StreamOpts::from_spec("gga://47.3/8.5/420.0:1.0:GN").unwrap();
    // Speed the test up below the grammar's 1 s floor
    if let devio_rs_protocol::StreamPath::Gga(path) = &mut opts.path {
        path.period_ms = 100;
    }
    let mut gga = Stream::from_opts(opts).unwrap();
    assert!(gga.start());
    let msg = read_msg(&gga, Duration::from_secs(3)).expect("gga sentence");
    assert_eq!(msg.name, "NMEA-GN-GGA");
    gga.stop(0);

    let mut opts = StreamOpts::from_spec("sta://4278387.0/635620.0/4672340.0:1.0:7:1006").unwrap();
    if let devio_rs_protocol::StreamPath::Sta(path) = &mut opts.path {
        path.period_ms = 100;
    }
    let mut sta = Stream::from_opts(opts).unwrap();
    assert!(sta.start());
    let msg = read_msg(&sta, Duration::from_secs(3)).expect("sta message");
    assert_eq!(msg.name, "RTCM3-TYPE1006");
    sta.stop(0);
}

#[test]
fn unsupported_schemes_rejected_by_factory() {
    let opts = StreamOpts::from_spec("spidev:///dev/spidev0.0").unwrap();
    assert!(Stream::from_opts(opts).is_err());
    let opts = StreamOpts::from_spec("canstr://can0:0x10:0x11").unwrap();
    assert!(Stream::from_opts(opts).is_err());
}
