//! Interprocess transport over a named Unix domain socket pair.
//!
//! The server creates (and on shutdown removes) the socket under the system
//! temp directory and serves one client at a time; the client only connects.
//! With its hotplug default the client tolerates a server that is not up yet.

#![cfg(unix)]

use std::path::PathBuf;
use std::sync::Arc;

use devio_rs_protocol::{StreamError, StreamPath};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::debug;

use crate::base::StreamShared;
use crate::reactor::{ShutdownRx, cancelled};
use crate::stream::Control;
use crate::tcp::{ServeEnd, serve};

/// Filesystem location of the rendezvous socket for a link name.
pub fn socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("devio-ipc-{name}.sock"))
}

pub(crate) async fn run(shared: Arc<StreamShared>, mut cancel: ShutdownRx) {
    let opts = shared.opts();
    let StreamPath::Ipc(path) = &opts.path else {
        return;
    };
    let socket = socket_path(&path.name);

    if shared.stype == devio_rs_protocol::StreamType::IpcSvr {
        server(&shared, &mut cancel, &socket).await;
        std::fs::remove_file(&socket).ok();
    } else {
        client(&shared, &mut cancel, &socket).await;
    }
    shared.set_state_closed();
}

async fn server(shared: &Arc<StreamShared>, cancel: &mut ShutdownRx, socket: &PathBuf) {
    shared.set_state_connecting("bind");
    // A stale socket from a crashed server would block the bind
    std::fs::remove_file(socket).ok();
    let listener = match UnixListener::bind(socket) {
        Ok(listener) => listener,
        Err(e) => {
            shared.set_state_error(StreamError::DeviceFail, &format!("bind: {e}"));
            return;
        }
    };

    let (_ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Control>();
    loop {
        // Keep the transition graph intact after a client detach error
        if shared.state() == devio_rs_protocol::StreamState::Error {
            shared.set_state_connecting("accept");
        }
        shared.set_state_connected("listening");
        let mut stream = tokio::select! {
            _ = cancelled(cancel) => return,
            result = listener.accept() => match result {
                Ok((stream, _addr)) => stream,
                Err(e) => {
                    shared.set_state_error(StreamError::DeviceFail, &format!("accept: {e}"));
                    return;
                }
            },
        };

        debug!("ipc client attached");
        shared.set_state_connected("client attached");
        match serve(shared, cancel, &mut ctrl_rx, &mut stream, None).await {
            ServeEnd::Cancelled => return,
            // Client detached; wait for the next one
            ServeEnd::Failed => {}
        }
    }
}

async fn client(shared: &Arc<StreamShared>, cancel: &mut ShutdownRx, socket: &PathBuf) {
    let (_ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Control>();
    loop {
        shared.set_state_connecting("attach");
        match UnixStream::connect(socket).await {
            Ok(mut stream) => {
                shared.set_state_connected(&socket.display().to_string());
                match serve(shared, cancel, &mut ctrl_rx, &mut stream, None).await {
                    ServeEnd::Cancelled => return,
                    ServeEnd::Failed => {}
                }
            }
            Err(e) => {
                shared.set_state_error(StreamError::DeviceFail, &format!("attach: {e}"));
            }
        }
        if shared.retry_to.is_zero() {
            return;
        }
        tokio::select! {
            _ = cancelled(cancel) => return,
            _ = tokio::time::sleep(shared.retry_to) => {}
        }
    }
}
