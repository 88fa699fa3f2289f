//! UDP client (write-only) and server (read-only) transports.

use std::sync::Arc;

use devio_rs_protocol::{StreamError, StreamPath};
use tokio::net::UdpSocket;
use tracing::warn;

use crate::base::StreamShared;
use crate::reactor::{ShutdownRx, cancelled};

// Keep datagrams under the common ethernet MTU
const MAX_DATAGRAM: usize = 1024;

pub(crate) async fn run(shared: Arc<StreamShared>, mut cancel: ShutdownRx) {
    let opts = shared.opts();
    match &opts.path {
        StreamPath::UdpClient(endpoint) => client(&shared, &mut cancel, endpoint.clone()).await,
        StreamPath::UdpServer(endpoint) => server(&shared, &mut cancel, endpoint.clone()).await,
        other => warn!("Stream({}) not a udp path: {other:?}", shared.name),
    }
    shared.set_state_closed();
}

async fn client(
    shared: &Arc<StreamShared>,
    cancel: &mut ShutdownRx,
    endpoint: devio_rs_protocol::HostPort,
) {
    shared.set_state_connecting(&format!("resolve {endpoint}"));
    let addrs = match crate::net::resolve(&endpoint).await {
        Ok(addrs) => addrs,
        Err(e) => {
            shared.set_state_error(StreamError::ResolveFail, &e);
            return;
        }
    };

    let mut connected = None;
    for addr in addrs {
        let bind = if addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let Ok(socket) = UdpSocket::bind(bind).await else {
            continue;
        };
        if socket.connect(addr).await.is_ok() {
            connected = Some((socket, addr));
            break;
        }
    }
    let Some((socket, addr)) = connected else {
        shared.set_state_error(StreamError::ConnectFail, "no usable endpoint");
        return;
    };

    shared.set_state_connected(&addr.to_string());
    if shared.write_pending() {
        shared.write_wakeup.notify_one();
    }
    loop {
        tokio::select! {
            _ = cancelled(cancel) => return,
            _ = shared.write_wakeup.notified() => {
                loop {
                    let chunk = {
                        let mut queue = shared.write_queue.lock().unwrap_or_else(|e| e.into_inner());
                        let n = queue.used().min(MAX_DATAGRAM);
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
                        break;
                    };
                    if let Err(e) = socket.send(&chunk).await {
                        warn!("Stream({}) send: {e}", shared.name);
                    }
                }
            }
        }
    }
}

async fn server(
    shared: &Arc<StreamShared>,
    cancel: &mut ShutdownRx,
    endpoint: devio_rs_protocol::HostPort,
) {
    shared.set_state_connecting(&format!("resolve {endpoint}"));
    let addrs = match crate::net::resolve(&endpoint).await {
        Ok(addrs) => addrs,
        Err(e) => {
            shared.set_state_error(StreamError::ResolveFail, &e);
            return;
        }
    };

    let mut bound = None;
    let mut bind_error = String::new();
    for addr in addrs {
        match UdpSocket::bind(addr).await {
            Ok(socket) => {
                bound = Some(socket);
                break;
            }
            Err(e) => bind_error = format!("bind {addr}: {e}"),
        }
    }
    let Some(socket) = bound else {
        shared.set_state_error(StreamError::DeviceFail, &bind_error);
        return;
    };

    let local = socket
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    shared.set_state_connected(&local);

    let mut buf = vec![0u8; 2048];
    loop {
        tokio::select! {
            _ = cancelled(cancel) => return,
            result = socket.recv_from(&mut buf) => match result {
                Ok((n, _peer)) => shared.process_read(&buf[..n]),
                Err(e) => warn!("Stream({}) recv: {e}", shared.name),
            }
        }
    }
}
