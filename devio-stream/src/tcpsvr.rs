//! TCP server transport: accepts up to `max_clients` clients, fans written
//! data out to all of them and feeds every client's bytes to the parser.

use std::cell::RefCell;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;

use devio_rs_protocol::{StreamError, StreamPath};
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::tcp::OwnedWriteHalf;
use tracing::{debug, warn};

use crate::base::StreamShared;
use crate::reactor::{ShutdownRx, cancelled};
use crate::tcp::TX_CHUNK;

pub(crate) async fn run(shared: Arc<StreamShared>, mut cancel: ShutdownRx) {
    let opts = shared.opts();
    let StreamPath::TcpServer(endpoint) = &opts.path else {
        return;
    };

    shared.set_state_connecting(&format!("resolve {endpoint}"));
    let addrs = match crate::net::resolve(endpoint).await {
        Ok(addrs) => addrs,
        Err(e) => {
            shared.set_state_error(StreamError::ResolveFail, &e);
            shared.set_state_closed();
            return;
        }
    };

    let mut listener = None;
    let mut bind_error = String::new();
    for addr in addrs {
        match TcpListener::bind(addr).await {
            Ok(bound) => {
                listener = Some(bound);
                break;
            }
            Err(e) => bind_error = format!("bind {addr}: {e}"),
        }
    }
    let Some(listener) = listener else {
        shared.set_state_error(StreamError::DeviceFail, &bind_error);
        shared.set_state_closed();
        return;
    };

    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    shared.set_state_connected(&format!("{local} (0 clients)"));

    let clients: Rc<RefCell<Vec<(SocketAddr, OwnedWriteHalf)>>> = Rc::new(RefCell::new(Vec::new()));
    let dead: Rc<RefCell<HashSet<SocketAddr>>> = Rc::new(RefCell::new(HashSet::new()));
    let max_clients = opts.max_clients;

    if shared.write_pending() {
        shared.write_wakeup.notify_one();
    }
    loop {
        tokio::select! {
            _ = cancelled(&mut cancel) => break,
            _ = tokio::time::sleep(std::time::Duration::from_millis(300)) => {}
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    if clients.borrow().len() >= max_clients {
                        warn!("Stream({}) refusing client {peer} (full)", shared.name);
                        drop(stream);
                    } else {
                        debug!("client {peer} connected");
                        stream.set_nodelay(true).ok();
                        let (mut read_half, write_half) = stream.into_split();
                        clients.borrow_mut().push((peer, write_half));
                        let count = clients.borrow().len();
                        shared.set_state_connected(&format!("{local} ({count} clients)"));

                        let task_shared = shared.clone();
                        let task_dead = dead.clone();
                        tokio::task::spawn_local(async move {
                            let mut buf = vec![0u8; 4096];
                            loop {
                                match read_half.read(&mut buf).await {
                                    Ok(0) | Err(_) => break,
                                    Ok(n) => task_shared.process_read(&buf[..n]),
                                }
                            }
                            task_dead.borrow_mut().insert(peer);
                        });
                    }
                }
                Err(e) => warn!("Stream({}) accept: {e}", shared.name),
            },
            _ = shared.write_wakeup.notified() => {
                loop {
                    let chunk = {
                        let mut queue = shared.write_queue.lock().unwrap_or_else(|e| e.into_inner());
                        let n = queue.used().min(TX_CHUNK);
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
                    // Spawned client tasks never touch `clients`, so holding
                    // the borrow across the writes is fine
                    let mut list = clients.borrow_mut();
                    for (peer, write_half) in list.iter_mut() {
                        if write_half.write_all(&chunk).await.is_err() {
                            dead.borrow_mut().insert(*peer);
                        }
                    }
                }
            }
        }

        // Prune disconnected clients and report the new count
        if !dead.borrow().is_empty() {
            let before = clients.borrow().len();
            {
                let dead_now = dead.borrow();
                clients
                    .borrow_mut()
                    .retain(|(peer, _)| !dead_now.contains(peer));
            }
            dead.borrow_mut().clear();
            let count = clients.borrow().len();
            if count != before {
                debug!("{} client(s) disconnected", before - count);
                shared.set_state_connected(&format!("{local} ({count} clients)"));
            }
        }
    }

    shared.set_state_closed();
}
