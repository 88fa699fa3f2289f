//! The public stream object and the scheme-keyed factory.

use std::sync::Arc;
use std::time::{Duration, Instant};

use devio_rs_parser::{ParserMsg, ParserStats};
use devio_rs_protocol::{
    AutobaudMode, BAUDRATES, SpecError, StreamError, StreamMode, StreamOpts, StreamState,
    StreamType,
};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::base::StreamShared;
#[cfg(unix)]
use crate::ipc;
use crate::reactor::Reactor;
use crate::{exec, files, generator, loopback, serial, tcp, tcpsvr, tls, udp};

/// Control requests from application threads to the reactor.
pub(crate) enum Control {
    SetBaudrate(u32, oneshot::Sender<bool>),
    Autobaud(AutobaudMode, oneshot::Sender<bool>),
}

/// A message stream over one transport.
///
/// Created from a spec string (or pre-parsed [`StreamOpts`]) by the factory;
/// the scheme selects the transport. [`start`](Self::start) spawns the
/// stream's reactor thread which drives the connect pipeline and keeps the
/// stream connected (reconnecting per the retry policy) until
/// [`stop`](Self::stop).
///
/// All methods may be called from any thread. `read`/`wait` block the calling
/// thread up to their timeout; `write` may block while the reactor drains the
/// write queue.
pub struct Stream {
    shared: Arc<StreamShared>,
    reactor: Option<Reactor>,
    control: Option<mpsc::UnboundedSender<Control>>,
}

impl Stream {
    /// Create a stream from a spec string.
    pub fn from_spec(spec: &str) -> Result<Self, SpecError> {
        Self::from_opts(StreamOpts::from_spec(spec)?)
    }

    /// Create a stream from parsed options.
    pub fn from_opts(opts: StreamOpts) -> Result<Self, SpecError> {
        match opts.stype {
            StreamType::Spidev | StreamType::Canstr => Err(SpecError::one(format!(
                "scheme for {} not supported in this build",
                opts.stype.as_str()
            ))),
            #[cfg(not(unix))]
            StreamType::IpcSvr | StreamType::IpcCli => Err(SpecError::one(
                "ipc streams require a unix platform".to_owned(),
            )),
            _ => Ok(Self {
                shared: StreamShared::new(opts),
                reactor: None,
                control: None,
            }),
        }
    }

    /// Start the stream: spawn the reactor and begin the connect pipeline.
    ///
    /// Returns false if the stream is already running, a required resource
    /// could not be set up (bad TLS trust anchor), or a non-hotplug serial
    /// device failed to open.
    pub fn start(&mut self) -> bool {
        if self.reactor.is_some() {
            return false;
        }

        let shared = self.shared.clone();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let reactor = match shared.stype {
            StreamType::Serial => {
                let (ack_tx, ack_rx) = std::sync::mpsc::channel();
                let ack = if shared.hotplug { None } else { Some(ack_tx) };
                let spawned = Reactor::spawn(&shared.name.clone(), move |cancel| {
                    serial::run(shared, cancel, control_rx, ack)
                });
                let Ok(reactor) = spawned else { return false };
                if !self.shared.hotplug {
                    // First open happens synchronously from the caller's
                    // point of view; a missing device fails start()
                    if !ack_rx.recv().unwrap_or(false) {
                        reactor.shutdown_and_join();
                        return false;
                    }
                }
                reactor
            }
            StreamType::TcpCli
            | StreamType::TcpCliS
            | StreamType::NtripCli
            | StreamType::NtripCliS
            | StreamType::NtripSvr
            | StreamType::NtripSvrS
            | StreamType::Telnet
            | StreamType::TelnetS => {
                let tls_context = if shared.stype.is_tls() {
                    match tls::build(self.shared.opts().tls_files_path.as_deref()) {
                        Ok(context) => Some(context),
                        Err(e) => {
                            warn!("Stream({}) TLS setup: {e}", self.shared.name);
                            return false;
                        }
                    }
                } else {
                    None
                };
                let spawned = Reactor::spawn(&shared.name.clone(), move |cancel| {
                    tcp::run(shared, cancel, control_rx, tls_context)
                });
                let Ok(reactor) = spawned else { return false };
                reactor
            }
            StreamType::TcpSvr => return self.spawn_simple(tcpsvr::run),
            StreamType::UdpCli | StreamType::UdpSvr => return self.spawn_simple(udp::run),
            StreamType::FileIn | StreamType::FileOut => return self.spawn_simple(files::run),
            StreamType::Loopback => return self.spawn_simple(loopback::run),
            StreamType::Exec => return self.spawn_simple(exec::run),
            #[cfg(unix)]
            StreamType::IpcSvr | StreamType::IpcCli => return self.spawn_simple(ipc::run),
            StreamType::Gga | StreamType::Sta => return self.spawn_simple(generator::run),
            // Rejected by from_opts
            _ => return false,
        };

        self.reactor = Some(reactor);
        self.control = Some(control_tx);
        true
    }

    fn spawn_simple<F, Fut>(&mut self, driver: F) -> bool
    where
        F: FnOnce(Arc<StreamShared>, crate::reactor::ShutdownRx) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + 'static,
    {
        let shared = self.shared.clone();
        match Reactor::spawn(&shared.name.clone(), move |cancel| driver(shared, cancel)) {
            Ok(reactor) => {
                self.reactor = Some(reactor);
                true
            }
            Err(_) => false,
        }
    }

    /// Stop the stream: cancel all reactor operations, wait up to `linger_ms`
    /// for pending writes to drain, join the reactor thread and clear both
    /// queues. The stream ends in CLOSED and can be started again (which
    /// repeats the full connect pipeline).
    pub fn stop(&mut self, linger_ms: u32) {
        let Some(reactor) = self.reactor.take() else {
            return;
        };
        if linger_ms > 0 {
            let deadline = Instant::now() + Duration::from_millis(linger_ms as u64);
            while self.shared.write_pending() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        if self.shared.write_pending() {
            warn!("Stream({}) cancelling pending writes", self.shared.name);
        }
        reactor.shutdown_and_join();
        self.control = None;
        self.shared.clear_queues();
        self.shared.set_state_closed();
    }

    /// Pop the next received message, waiting up to `timeout_ms`.
    ///
    /// Note: with a timeout this waits once for the data-ready signal and
    /// then retries a single non-blocking pop, so it can return false before
    /// the full timeout has elapsed; see the engine documentation.
    pub fn read(&self, msg: &mut ParserMsg, timeout_ms: u32) -> bool {
        self.shared.read(msg, timeout_ms)
    }

    /// Queue data for transmission, waiting up to `timeout_ms` for queue
    /// space. True only if the entire buffer was queued.
    pub fn write(&self, data: &[u8], timeout_ms: u32) -> bool {
        self.shared.write(data, timeout_ms)
    }

    /// Wait until any bytes (not necessarily a full message) were received.
    pub fn wait(&self, timeout_ms: u32) -> bool {
        self.shared.wait(timeout_ms)
    }

    /// Current baudrate; 0 for streams without a configurable rate.
    pub fn baudrate(&self) -> u32 {
        self.shared.baudrate()
    }

    /// Change the baudrate (serial and telnet streams). When running, the
    /// change is applied to the open transport; the typed options are always
    /// updated.
    pub fn set_baudrate(&self, baudrate: u32) -> bool {
        if !BAUDRATES.contains(&baudrate) || !self.baud_capable() {
            return false;
        }
        if let Some(control) = &self.control {
            let (reply_tx, reply_rx) = oneshot::channel();
            if control
                .send(Control::SetBaudrate(baudrate, reply_tx))
                .is_ok()
            {
                return reply_rx.blocking_recv().unwrap_or(false);
            }
        }
        // Not running: just update the options
        self.shared.commit_baudrate(baudrate);
        true
    }

    /// Start autobauding on a running serial or telnet stream. Returns true
    /// if the procedure was started.
    pub fn autobaud(&self, mode: AutobaudMode) -> bool {
        if !self.baud_capable() {
            return false;
        }
        let Some(control) = &self.control else {
            return false;
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if control.send(Control::Autobaud(mode, reply_tx)).is_err() {
            return false;
        }
        reply_rx.blocking_recv().unwrap_or(false)
    }

    fn baud_capable(&self) -> bool {
        matches!(
            self.shared.stype,
            StreamType::Serial | StreamType::Telnet | StreamType::TelnetS
        )
    }

    /// A copy of the stream options (canonical spec included).
    pub fn opts(&self) -> StreamOpts {
        self.shared.opts()
    }

    pub fn stype(&self) -> StreamType {
        self.shared.stype
    }

    pub fn mode(&self) -> StreamMode {
        self.shared.mode
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// Error detail; meaningful while [`state`](Self::state) is ERROR.
    pub fn error(&self) -> StreamError {
        self.shared.error()
    }

    /// Human-readable state detail (connect stage, endpoint, baudrate, ...).
    pub fn info(&self) -> String {
        self.shared.info()
    }

    /// Counters of the embedded protocol parser.
    pub fn parser_stats(&self) -> ParserStats {
        self.shared.parser_stats()
    }

    /// Register a state observer, called synchronously on every transition
    /// (including same-state info updates) as `(old, new, error, info)`.
    pub fn add_state_observer<F>(&self, observer: F)
    where
        F: Fn(StreamState, StreamState, StreamError, &str) + Send + Sync + 'static,
    {
        self.shared.add_state_observer(Arc::new(observer));
    }

    /// Register a read observer, called whenever new messages are queued.
    pub fn add_read_observer<F>(&self, observer: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.add_read_observer(Arc::new(observer));
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.stop(0);
    }
}
