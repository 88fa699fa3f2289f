//! File transports: replay from a file (filein) and capture to a file
//! (fileout).

use std::sync::Arc;
use std::time::Duration;

use devio_rs_protocol::{StreamError, StreamPath};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::warn;

use crate::base::StreamShared;
use crate::reactor::{ShutdownRx, cancelled};
use crate::tcp::TX_CHUNK;

const READ_CHUNK: usize = 512;

// Replay speed 1.0 corresponds to a 115200 baud line
const BYTES_PER_SEC_AT_SPEED_1: f64 = 11520.0;

pub(crate) async fn run(shared: Arc<StreamShared>, mut cancel: ShutdownRx) {
    let opts = shared.opts();
    match &opts.path {
        StreamPath::FileIn(path) => replay(&shared, &mut cancel, path.clone()).await,
        StreamPath::FileOut(path) => capture(&shared, &mut cancel, path.clone()).await,
        other => warn!("Stream({}) not a file path: {other:?}", shared.name),
    }
    shared.set_state_closed();
}

async fn replay(
    shared: &Arc<StreamShared>,
    cancel: &mut ShutdownRx,
    path: devio_rs_protocol::path::FileInPath,
) {
    shared.set_state_connecting("open");
    let mut file = match tokio::fs::File::open(&path.file).await {
        Ok(file) => file,
        Err(e) => {
            shared.set_state_error(StreamError::DeviceFail, &format!("open: {e}"));
            return;
        }
    };

    // Without a timestamp sidecar the offset maps to bytes at the nominal
    // replay rate
    let rate = if path.speed > 0.0 {
        Some(path.speed * BYTES_PER_SEC_AT_SPEED_1)
    } else {
        None
    };
    if let Some(rate) = rate {
        let skip = (path.offset_s * rate) as u64;
        if skip > 0 && file.seek(std::io::SeekFrom::Start(skip)).await.is_err() {
            shared.set_state_error(StreamError::DeviceFail, "seek failed");
            return;
        }
    }

    shared.set_state_connected(&path.file);
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let result = tokio::select! {
            _ = cancelled(cancel) => return,
            result = file.read(&mut buf) => result,
        };
        match result {
            // End of the recording: the stream is done
            Ok(0) => return,
            Ok(n) => {
                shared.process_read(&buf[..n]);
                if let Some(rate) = rate {
                    let pause = Duration::from_secs_f64(n as f64 / rate);
                    tokio::select! {
                        _ = cancelled(cancel) => return,
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
            }
            Err(e) => {
                shared.set_state_error(StreamError::DeviceFail, &format!("read: {e}"));
                return;
            }
        }
    }
}

async fn capture(
    shared: &Arc<StreamShared>,
    cancel: &mut ShutdownRx,
    path: devio_rs_protocol::path::FileOutPath,
) {
    shared.set_state_connecting("open");
    let mut file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path.file)
        .await
    {
        Ok(file) => file,
        Err(e) => {
            shared.set_state_error(StreamError::DeviceFail, &format!("open: {e}"));
            return;
        }
    };

    shared.set_state_connected(&path.file);
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
                    if let Err(e) = file.write_all(&chunk).await {
                        shared.set_state_error(StreamError::DeviceFail, &format!("write: {e}"));
                        return;
                    }
                }
                if file.flush().await.is_err() {
                    shared.set_state_error(StreamError::DeviceFail, "flush failed");
                    return;
                }
            }
        }
    }
}
