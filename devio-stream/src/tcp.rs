//! The shared TCP-family connect pipeline and connected-state loop, used by
//! the plain TCP, NTRIP and Telnet/RFC2217 client streams.
//!
//! The pipeline is: resolve → connect (each candidate endpoint in turn) →
//! TLS handshake (secure schemes) → protocol request/response (NTRIP login,
//! telnet negotiation) → connected. The whole pre-connected phase runs under
//! the connect timeout; every stage reports progress through increasingly
//! specific CONNECTING info strings and every failure enters the shared
//! retry cycle.

use std::sync::Arc;

use devio_rs_protocol::telnet::{RxFilter, escape_iac};
use devio_rs_protocol::{StreamError, StreamPath, StreamType};
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::base::StreamShared;
use crate::reactor::{ShutdownRx, cancelled};
use crate::stream::Control;
use crate::tls::TlsContext;
use crate::{autobaud, ntrip, telnet};

/// Chunk sizes for draining the write ring to the transport.
pub(crate) const TX_CHUNK: usize = 16 * 1024;
// Some RFC2217 servers dislike large packets; keep telnet chunks small so
// IAC doubling stays under half a packet
pub(crate) const TELNET_TX_CHUNK: usize = 256;

pub(crate) trait Io: AsyncRead + AsyncWrite + Unpin {}
impl<T: AsyncRead + AsyncWrite + Unpin> Io for T {}

pub(crate) type BoxedIo = Box<dyn Io>;

/// How one connect-and-serve attempt ended.
pub(crate) enum AttemptEnd {
    Cancelled,
    Failed,
}

/// How the connected-state loop ended (error state already set on failure).
pub(crate) enum ServeEnd {
    Cancelled,
    Failed,
}

enum EstablishError {
    Timeout,
    Other(StreamError, String),
}

/// Driver for tcpcli(s), ntripcli(s)/ntripsvr(s) and telnet(s) streams.
pub(crate) async fn run(
    shared: Arc<StreamShared>,
    mut cancel: ShutdownRx,
    mut ctrl: mpsc::UnboundedReceiver<Control>,
    tls_context: Option<TlsContext>,
) {
    loop {
        match attempt(&shared, &mut cancel, &mut ctrl, &tls_context).await {
            AttemptEnd::Cancelled => break,
            AttemptEnd::Failed => {
                if shared.retry_to.is_zero() {
                    break;
                }
                if !retry_pause(&shared, &mut cancel, &mut ctrl).await {
                    break;
                }
            }
        }
    }
    shared.set_state_closed();
}

/// Sleep out the retry timeout, still answering control requests (options
/// are updated even while disconnected). Returns false when cancelled.
pub(crate) async fn retry_pause(
    shared: &Arc<StreamShared>,
    cancel: &mut ShutdownRx,
    ctrl: &mut mpsc::UnboundedReceiver<Control>,
) -> bool {
    let deadline = tokio::time::Instant::now() + shared.retry_to;
    let mut ctrl_open = true;
    loop {
        tokio::select! {
            _ = cancelled(cancel) => return false,
            _ = tokio::time::sleep_until(deadline) => return true,
            message = ctrl.recv(), if ctrl_open => match message {
                Some(Control::SetBaudrate(baudrate, reply)) => {
                    shared.commit_baudrate(baudrate);
                    let _ = reply.send(true);
                }
                Some(Control::Autobaud(_mode, reply)) => {
                    let _ = reply.send(false);
                }
                None => ctrl_open = false,
            }
        }
    }
}

async fn attempt(
    shared: &Arc<StreamShared>,
    cancel: &mut ShutdownRx,
    ctrl: &mut mpsc::UnboundedReceiver<Control>,
    tls_context: &Option<TlsContext>,
) -> AttemptEnd {
    let establish = establish(shared, tls_context);
    let conn_to = shared.conn_to;
    let result = tokio::select! {
        _ = cancelled(cancel) => return AttemptEnd::Cancelled,
        result = async {
            if conn_to.is_zero() {
                establish.await
            } else {
                match tokio::time::timeout(conn_to, establish).await {
                    Ok(result) => result,
                    Err(_) => Err(EstablishError::Timeout),
                }
            }
        } => result,
    };

    let (mut io, info, mut filter) = match result {
        Ok(established) => established,
        Err(EstablishError::Timeout) => {
            shared.set_state_error(StreamError::ConnectTimeout, "");
            return AttemptEnd::Failed;
        }
        Err(EstablishError::Other(error, detail)) => {
            shared.set_state_error(error, &detail);
            return AttemptEnd::Failed;
        }
    };

    shared.set_state_connected(&info);
    match serve(shared, cancel, ctrl, &mut io, filter.as_mut()).await {
        ServeEnd::Cancelled => AttemptEnd::Cancelled,
        ServeEnd::Failed => AttemptEnd::Failed,
    }
}

/// Resolve, connect, handshake and negotiate, returning the established
/// transport, the CONNECTED info string and the telnet filter (for telnet
/// streams).
async fn establish(
    shared: &Arc<StreamShared>,
    tls_context: &Option<TlsContext>,
) -> Result<(BoxedIo, String, Option<RxFilter>), EstablishError> {
    let opts = shared.opts();
    let endpoint = match &opts.path {
        StreamPath::TcpClient(endpoint) => endpoint.clone(),
        StreamPath::Ntrip(path) => path.endpoint.clone(),
        StreamPath::Telnet(path) => path.endpoint.clone(),
        other => {
            return Err(EstablishError::Other(
                StreamError::DeviceFail,
                format!("not a tcp path: {other:?}"),
            ));
        }
    };

    // Resolve
    shared.set_state_connecting(&format!("resolve {endpoint}"));
    let addrs = crate::net::resolve(&endpoint)
        .await
        .map_err(|e| EstablishError::Other(StreamError::ResolveFail, e))?;

    // Connect, trying each candidate in turn
    let mut connect_errors = String::new();
    let mut connected = None;
    for addr in addrs {
        shared.set_state_connecting(&format!("attempting {addr}"));
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                debug!("connected {addr}");
                connected = Some((stream, addr));
                break;
            }
            Err(e) => {
                shared.set_state_connecting(&format!("{addr} failed: {e}"));
                if !connect_errors.is_empty() {
                    connect_errors.push_str(", ");
                }
                connect_errors.push_str(&format!("{e} ({addr})"));
            }
        }
    }
    let Some((stream, addr)) = connected else {
        return Err(EstablishError::Other(
            StreamError::ConnectFail,
            connect_errors,
        ));
    };
    stream.set_nodelay(true).ok();

    // TLS handshake for the secure schemes
    let mut io: BoxedIo = match tls_context {
        Some(context) => {
            shared.set_state_connecting("handshake");
            let server_name = ServerName::try_from(endpoint.host.clone())
                .map_err(|e| EstablishError::Other(StreamError::TlsError, e.to_string()))?;
            let connector = TlsConnector::from(context.config.clone());
            let tls_stream = connector
                .connect(server_name, stream)
                .await
                .map_err(|e| EstablishError::Other(StreamError::TlsError, e.to_string()))?;
            Box::new(tls_stream)
        }
        None => Box::new(stream),
    };

    // Protocol request/response
    match opts.stype {
        StreamType::NtripCli
        | StreamType::NtripCliS
        | StreamType::NtripSvr
        | StreamType::NtripSvrS => {
            let mountpoint = ntrip::handshake(shared, &mut io, &opts)
                .await
                .map_err(|(error, detail)| EstablishError::Other(error, detail))?;
            Ok((io, mountpoint, None))
        }
        StreamType::Telnet | StreamType::TelnetS => {
            let filter = telnet::establish_session(shared, &mut io, &opts)
                .await
                .map_err(|(error, detail)| EstablishError::Other(error, detail))?;
            let info = format!("{addr} {}", shared.baudrate());
            Ok((io, info, Some(filter)))
        }
        _ => Ok((io, addr.to_string(), None)),
    }
}

/// Drain the write ring into the transport. Returns once the ring is empty
/// (signalling the write semaphore) or on the first transport error.
pub(crate) async fn drain_write_queue<S: AsyncWrite + Unpin>(
    io: &mut S,
    shared: &StreamShared,
    telnet_escape: bool,
) -> std::io::Result<()> {
    let chunk_size = if telnet_escape { TELNET_TX_CHUNK } else { TX_CHUNK };
    loop {
        let chunk = {
            let mut queue = shared
                .write_queue
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let n = queue.used().min(chunk_size);
            if n == 0 {
                None
            } else {
                let mut buf = vec![0u8; n];
                queue.read(&mut buf);
                Some(buf)
            }
        };
        let Some(chunk) = chunk else {
            shared.notify_tx_done();
            return Ok(());
        };
        if telnet_escape {
            io.write_all(&escape_iac(&chunk)).await?;
        } else {
            io.write_all(&chunk).await?;
        }
        io.flush().await?;
    }
}

enum Act {
    Cancel,
    Inactive,
    Read(std::io::Result<usize>),
    Wake,
    Ctrl(Option<Control>),
}

/// The connected-state loop: pump received bytes into the engine, drain the
/// write ring, honor the inactivity timeout and (for telnet) the baud control
/// requests. Single task; operations interleave at await points.
pub(crate) async fn serve<S: AsyncRead + AsyncWrite + Unpin>(
    shared: &Arc<StreamShared>,
    cancel: &mut ShutdownRx,
    ctrl: &mut mpsc::UnboundedReceiver<Control>,
    io: &mut S,
    mut filter: Option<&mut RxFilter>,
) -> ServeEnd {
    let telnet = filter.is_some();
    let mut rx_buf = vec![0u8; 8 * 1024];
    let inact = shared.inact_to;
    let far = tokio::time::Instant::now() + std::time::Duration::from_secs(365 * 86400);
    let mut deadline = if inact.is_zero() {
        far
    } else {
        tokio::time::Instant::now() + inact
    };
    let mut ctrl_open = true;

    // Data may already be queued from before the (re)connect
    if shared.write_pending() {
        shared.write_wakeup.notify_one();
    }

    loop {
        let act = tokio::select! {
            _ = cancelled(cancel) => Act::Cancel,
            _ = tokio::time::sleep_until(deadline) => Act::Inactive,
            result = io.read(&mut rx_buf) => Act::Read(result),
            _ = shared.write_wakeup.notified() => Act::Wake,
            message = ctrl.recv(), if ctrl_open => Act::Ctrl(message),
        };

        match act {
            Act::Cancel => return ServeEnd::Cancelled,
            Act::Inactive => {
                shared.set_state_error(StreamError::NoDataRecv, "");
                return ServeEnd::Failed;
            }
            Act::Read(Ok(0)) => {
                shared.set_state_error(StreamError::ConnLost, "read: eof");
                return ServeEnd::Failed;
            }
            Act::Read(Ok(n)) => {
                let kept = match filter.as_deref_mut() {
                    Some(rx_filter) => {
                        // Negotiation replies after connect are ignored
                        let (kept, _events) = rx_filter.filter(&mut rx_buf[..n]);
                        kept
                    }
                    None => n,
                };
                if kept > 0 {
                    shared.process_read(&rx_buf[..kept]);
                }
                if !inact.is_zero() {
                    deadline = tokio::time::Instant::now() + inact;
                }
            }
            Act::Read(Err(e)) => {
                shared.set_state_error(StreamError::ConnLost, &format!("read: {e}"));
                return ServeEnd::Failed;
            }
            Act::Wake => {
                if let Err(e) = drain_write_queue(io, shared, telnet).await {
                    shared.set_state_error(StreamError::ConnLost, &format!("write: {e}"));
                    return ServeEnd::Failed;
                }
            }
            Act::Ctrl(None) => ctrl_open = false,
            Act::Ctrl(Some(Control::SetBaudrate(baudrate, reply))) => {
                let ok = if telnet {
                    telnet::set_baudrate(io, shared, baudrate).await
                } else {
                    false
                };
                let _ = reply.send(ok);
                if ok {
                    shared.set_state_connected(&baudrate.to_string());
                    if !inact.is_zero() {
                        deadline = tokio::time::Instant::now() + inact;
                    }
                }
            }
            Act::Ctrl(Some(Control::Autobaud(mode, reply))) => match filter.as_deref_mut() {
                None => {
                    let _ = reply.send(false);
                }
                Some(rx_filter) => {
                    let _ = reply.send(true);
                    let mut probe = telnet::TelnetProbe::new(io, rx_filter, shared);
                    let ok = tokio::select! {
                        _ = cancelled(cancel) => return ServeEnd::Cancelled,
                        ok = autobaud::run(shared, &mut probe, mode) => ok,
                    };
                    if ok {
                        shared.set_state_connected(&shared.baudrate().to_string());
                        if !inact.is_zero() {
                            deadline = tokio::time::Instant::now() + inact;
                        }
                    } else {
                        shared.set_state_error(StreamError::ConnectFail, "autobaud fail");
                        return ServeEnd::Failed;
                    }
                }
            },
        }
    }
}
