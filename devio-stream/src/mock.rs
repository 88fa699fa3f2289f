//! In-process mock peers for tests: a plain TCP peer, an NTRIP caster and an
//! RFC2217 telnet server.
//!
//! The mocks speak blocking std networking on their own threads so tests can
//! drive the blocking `Stream` API without a runtime of their own.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use devio_rs_parser::{Parser, ubx};
use devio_rs_protocol::telnet::{IAC, RxFilter, SB, SE, TelnetCode, TelnetEvent};

/// A TCP peer that pushes a fixed byte sequence to every client and captures
/// everything it receives.
pub struct MockTcpPeer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<u8>>>,
    connections: Arc<AtomicUsize>,
}

impl MockTcpPeer {
    pub fn start(send_on_connect: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock peer");
        let addr = listener.local_addr().expect("local addr");
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let thread_received = received.clone();
        let thread_connections = connections.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                thread_connections.fetch_add(1, Ordering::SeqCst);
                let _ = stream.write_all(&send_on_connect);
                let received = thread_received.clone();
                std::thread::spawn(move || {
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.read(&mut buf) {
                            Ok(0) | Err(_) => break,
                            Ok(n) => received.lock().unwrap().extend_from_slice(&buf[..n]),
                        }
                    }
                });
            }
        });

        Self {
            addr,
            received,
            connections,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn received(&self) -> Vec<u8> {
        self.received.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// An NTRIP caster answering every request with a fixed response line (and
/// optional payload bytes), capturing the raw requests.
pub struct MockNtripCaster {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockNtripCaster {
    pub fn start(response: &str, payload: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock caster");
        let addr = listener.local_addr().expect("local addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let response = response.to_owned();

        let thread_requests = requests.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let request = read_request(&mut stream);
                thread_requests.lock().unwrap().push(request);
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.write_all(&payload);
                let _ = stream.flush();
                // Hold the connection until the client goes away
                let mut sink = [0u8; 1024];
                while matches!(stream.read(&mut sink), Ok(n) if n > 0) {}
            }
        });

        Self {
            addr,
            requests,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn read_request(stream: &mut TcpStream) -> String {
    let mut request = Vec::new();
    let mut buf = [0u8; 512];
    loop {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                request.extend_from_slice(&buf[..n]);
                if request.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
        }
    }
    String::from_utf8_lossy(&request).into_owned()
}

/// Behavior switches for [`MockRfc2217Server`].
#[derive(Clone)]
pub struct Rfc2217Config {
    /// Refuse COM_PORT_OPTION (reply WONT/DONT) instead of agreeing.
    pub refuse_com_port_option: bool,
    /// Reply to a UBX-MON-VER poll, but only while the negotiated baudrate
    /// equals this value (simulates a device stuck at one rate).
    pub answer_poll_at_baud: Option<u32>,
    /// User data pushed to the client once negotiation is complete.
    pub data_after_negotiation: Vec<u8>,
}

impl Default for Rfc2217Config {
    fn default() -> Self {
        Self {
            refuse_com_port_option: false,
            answer_poll_at_baud: None,
            data_after_negotiation: Vec::new(),
        }
    }
}

/// A telnet/RFC2217 access server: answers option negotiation, records
/// COM-port-option subnegotiations and optionally behaves like a u-blox
/// receiver listening at one specific baudrate.
pub struct MockRfc2217Server {
    addr: SocketAddr,
    baudrates: Arc<Mutex<Vec<u32>>>,
    cpo_commands: Arc<Mutex<Vec<u8>>>,
}

impl MockRfc2217Server {
    pub fn start(config: Rfc2217Config) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock rfc2217");
        let addr = listener.local_addr().expect("local addr");
        let baudrates = Arc::new(Mutex::new(Vec::new()));
        let cpo_commands = Arc::new(Mutex::new(Vec::new()));

        let thread_baudrates = baudrates.clone();
        let thread_commands = cpo_commands.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let config = config.clone();
                let baudrates = thread_baudrates.clone();
                let commands = thread_commands.clone();
                std::thread::spawn(move || {
                    serve_connection(stream, config, baudrates, commands);
                });
            }
        });

        Self {
            addr,
            baudrates,
            cpo_commands,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// All baudrates the client has requested via SET_BAUDRATE, in order.
    pub fn baudrates(&self) -> Vec<u32> {
        self.baudrates.lock().unwrap().clone()
    }

    /// All COM-port-option command codes received, in order.
    pub fn cpo_commands(&self) -> Vec<u8> {
        self.cpo_commands.lock().unwrap().clone()
    }
}

fn serve_connection(
    mut stream: TcpStream,
    config: Rfc2217Config,
    baudrates: Arc<Mutex<Vec<u32>>>,
    commands: Arc<Mutex<Vec<u8>>>,
) {
    const WILL: u8 = TelnetCode::Will as u8;
    const WONT: u8 = TelnetCode::Wont as u8;
    const DO: u8 = TelnetCode::Do as u8;
    const DONT: u8 = TelnetCode::Dont as u8;
    const COM_PORT_OPTION: u8 = 44;

    let mut filter = RxFilter::new();
    let mut parser = Parser::new();
    let mut current_baud: u32 = 0;
    let mut replies_sent = 0usize;
    let mut data_sent = false;
    let mut buf = [0u8; 4096];

    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let (kept, events) = filter.filter(&mut buf[..n]);

        for event in events {
            match event {
                TelnetEvent::Negotiate { code, option } => {
                    let refuse =
                        config.refuse_com_port_option && option == COM_PORT_OPTION;
                    let reply = match code {
                        TelnetCode::Do => {
                            if refuse {
                                WONT
                            } else {
                                WILL
                            }
                        }
                        TelnetCode::Will => {
                            if refuse {
                                DONT
                            } else {
                                DO
                            }
                        }
                        _ => continue,
                    };
                    if stream.write_all(&[IAC, reply, option]).is_err() {
                        return;
                    }
                    replies_sent += 1;
                }
                TelnetEvent::Suboption(data) => {
                    if data.len() >= 2 && data[0] == COM_PORT_OPTION {
                        commands.lock().unwrap().push(data[1]);
                        // SET_BAUDRATE carries a big-endian u32
                        if data[1] == 1 && data.len() >= 6 {
                            let baud =
                                u32::from_be_bytes([data[2], data[3], data[4], data[5]]);
                            baudrates.lock().unwrap().push(baud);
                            current_baud = baud;
                        }
                        // Signature poll: answer with our name
                        if data[1] == 0 && data.len() == 2 {
                            let mut reply = vec![IAC, SB, COM_PORT_OPTION, 100];
                            reply.extend_from_slice(b"mock-rfc2217");
                            reply.extend_from_slice(&[IAC, SE]);
                            if stream.write_all(&reply).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }

        // User data: behave like a receiver when asked to
        if kept > 0 {
            parser.add(&buf[..kept]);
            while let Some(msg) = parser.process() {
                if msg.name == "UBX-MON-VER" {
                    if let Some(answer_baud) = config.answer_poll_at_baud {
                        if current_baud == answer_baud {
                            let reply = ubx::frame(ubx::CLS_MON, ubx::ID_MON_VER, b"MOCK 1.00")
                                .unwrap_or_default();
                            if stream.write_all(&reply).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }

        if replies_sent >= 6 && !data_sent && !config.data_after_negotiation.is_empty() {
            if stream.write_all(&config.data_after_negotiation).is_err() {
                return;
            }
            data_sent = true;
        }
    }
}
