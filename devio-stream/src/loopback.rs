//! Loopback transport: echoes written bytes back to the read side, with an
//! optional delay and rate limit.

use std::sync::Arc;
use std::time::Duration;

use devio_rs_protocol::StreamPath;
use tracing::warn;

use crate::base::StreamShared;
use crate::reactor::{ShutdownRx, cancelled};

const ECHO_CHUNK: usize = 1024;

pub(crate) async fn run(shared: Arc<StreamShared>, mut cancel: ShutdownRx) {
    let opts = shared.opts();
    let StreamPath::Loopback(path) = &opts.path else {
        warn!("Stream({}) not a loopback path", shared.name);
        return;
    };
    let delay = Duration::from_secs_f64(path.delay_ms / 1e3);
    let rate = path.rate;

    shared.set_state_connected("loopback");
    if shared.write_pending() {
        shared.write_wakeup.notify_one();
    }
    'run: loop {
        tokio::select! {
            _ = cancelled(&mut cancel) => break 'run,
            _ = shared.write_wakeup.notified() => {
                loop {
                    let chunk = {
                        let mut queue = shared.write_queue.lock().unwrap_or_else(|e| e.into_inner());
                        let n = queue.used().min(ECHO_CHUNK);
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
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = cancelled(&mut cancel) => break 'run,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    if rate > 0 {
                        let pause = Duration::from_secs_f64(chunk.len() as f64 / rate as f64);
                        tokio::select! {
                            _ = cancelled(&mut cancel) => break 'run,
                            _ = tokio::time::sleep(pause) => {}
                        }
                    }
                    shared.process_read(&chunk);
                }
            }
        }
    }
    shared.set_state_closed();
}
