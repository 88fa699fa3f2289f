//! Telnet/RFC2217 negotiation, COM-port configuration and autobaud tests
//! against the mock access server.

mod common;

use std::time::Duration;

use common::{read_msg, wait_for_state, wait_until};
use devio_rs_parser::ubx;
use devio_rs_stream::mock::{MockRfc2217Server, Rfc2217Config};
use devio_rs_stream::{Stream, StreamError, StreamOpts, StreamState};

#[test]
fn negotiates_and_configures_the_port() {
    let frame = ubx::frame(ubx::CLS_MON, ubx::ID_MON_VER, &[]).unwrap();
    let server = MockRfc2217Server::start(Rfc2217Config {
        data_after_negotiation: frame,
        ..Rfc2217Config::default()
    });

    let mut stream =
        Stream::from_spec(&format!("telnet://127.0.0.1:{}", server.addr().port())).unwrap();
    assert!(stream.start());
    assert!(wait_for_state(&stream, StreamState::Connected, Duration::from_secs(5)));

    // Default baudrate was configured on the remote port
    assert!(wait_until(Duration::from_secs(2), || {
        server.baudrates().first() == Some(&115200)
    }));

    // The fixed COM-port-option sequence arrived in order:
    // baud, datasize, parity, stopsize, flow, DTR, RTS, linestate,
    // modemstate, signature, signature poll, purge
    assert!(wait_until(Duration::from_secs(2), || {
        server.cpo_commands().len() >= 12
    }));
    assert_eq!(
        server.cpo_commands()[..12],
        [1, 2, 3, 4, 5, 5, 5, 6, 7, 0, 0, 12]
    );

    // In-band user data passes the filter and reaches the parser
    let msg = read_msg(&stream, Duration::from_secs(2)).expect("server data");
    assert_eq!(msg.name, "UBX-MON-VER");

    stream.stop(0);
}

#[test]
fn refused_option_fails_negotiation() {
    let server = MockRfc2217Server::start(Rfc2217Config {
        refuse_com_port_option: true,
        ..Rfc2217Config::default()
    });

    let mut opts =
        StreamOpts::from_spec(&format!("telnet://127.0.0.1:{}", server.addr().port())).unwrap();
    // No retry: the failure is terminal and easy to observe
    opts.retry_to = Duration::ZERO;

    let mut stream = Stream::from_opts(opts).unwrap();
    assert!(stream.start());
    assert!(wait_for_state(&stream, StreamState::Closed, Duration::from_secs(5)));
    assert_eq!(stream.error(), StreamError::TelnetError);
    assert!(stream.info().contains("COM_PORT_OPTION"), "{}", stream.info());
    stream.stop(0);
}

#[test]
fn autobaud_discovers_device_rate() {
    // The "device" answers UBX polls only at 230400 baud
    let server = MockRfc2217Server::start(Rfc2217Config {
        answer_poll_at_baud: Some(230400),
        ..Rfc2217Config::default()
    });

    let mut stream = Stream::from_spec(&format!(
        "telnet://127.0.0.1:{}:115200:ubx",
        server.addr().port()
    ))
    .unwrap();
    assert!(stream.start());

    // Steps run 115200 → 921600 → 460800 → 230400 (match)
    assert!(wait_for_state(&stream, StreamState::Connected, Duration::from_secs(15)));
    assert_eq!(stream.baudrate(), 230400);
    assert!(stream.opts().spec.contains(":230400:"), "{}", stream.opts().spec);
    assert!(server.baudrates().contains(&230400));

    stream.stop(0);
}

#[test]
fn set_baudrate_while_connected() {
    let server = MockRfc2217Server::start(Rfc2217Config::default());

    let mut stream =
        Stream::from_spec(&format!("telnet://127.0.0.1:{}", server.addr().port())).unwrap();
    assert!(stream.start());
    assert!(wait_for_state(&stream, StreamState::Connected, Duration::from_secs(5)));

    assert!(stream.set_baudrate(460800));
    assert_eq!(stream.baudrate(), 460800);
    assert!(wait_until(Duration::from_secs(2), || {
        server.baudrates().contains(&460800)
    }));

    // Invalid rates are rejected without touching the stream
    assert!(!stream.set_baudrate(12345));
    assert_eq!(stream.baudrate(), 460800);

    stream.stop(0);
}
