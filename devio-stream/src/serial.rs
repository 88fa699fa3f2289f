//! Serial port transport.

use std::sync::Arc;

use devio_rs_protocol::{AutobaudMode, SerialFlow, StreamError, StreamPath};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::warn;

use crate::autobaud::{self, BaudProbe};
use crate::base::StreamShared;
use crate::reactor::{ShutdownRx, cancelled};
use crate::stream::Control;
use crate::tcp::drain_write_queue;

enum CycleEnd {
    Cancelled,
    Failed,
    /// No retry possible (first open of a non-hotplug stream failed).
    Terminal,
}

/// Driver for serial:// streams. `ack` reports the first open attempt back
/// to `start()` for non-hotplug streams.
pub(crate) async fn run(
    shared: Arc<StreamShared>,
    mut cancel: ShutdownRx,
    mut ctrl: mpsc::UnboundedReceiver<Control>,
    ack: Option<std::sync::mpsc::Sender<bool>>,
) {
    let mut first_ack = ack;
    loop {
        match cycle(&shared, &mut cancel, &mut ctrl, &mut first_ack).await {
            CycleEnd::Cancelled | CycleEnd::Terminal => break,
            CycleEnd::Failed => {
                if shared.retry_to.is_zero() {
                    break;
                }
                if !crate::tcp::retry_pause(&shared, &mut cancel, &mut ctrl).await {
                    break;
                }
            }
        }
    }
    shared.set_state_closed();
}

async fn cycle(
    shared: &Arc<StreamShared>,
    cancel: &mut ShutdownRx,
    ctrl: &mut mpsc::UnboundedReceiver<Control>,
    first_ack: &mut Option<std::sync::mpsc::Sender<bool>>,
) -> CycleEnd {
    shared.set_state_connecting("open");
    let mut port = match open_port(shared) {
        Ok(port) => {
            if let Some(ack) = first_ack.take() {
                let _ = ack.send(true);
            }
            port
        }
        Err(message) => {
            shared.set_state_error(StreamError::DeviceFail, &message);
            if let Some(ack) = first_ack.take() {
                // start() fails; the stream never enters the retry cycle
                let _ = ack.send(false);
                return CycleEnd::Terminal;
            }
            return CycleEnd::Failed;
        }
    };

    let autobaud_mode = match &shared.opts().path {
        StreamPath::Serial(path) => path.autobaud,
        _ => AutobaudMode::None,
    };
    if autobaud_mode != AutobaudMode::None {
        let ok = {
            let mut probe = SerialProbe {
                port: &mut port,
                shared,
            };
            tokio::select! {
                _ = cancelled(cancel) => return CycleEnd::Cancelled,
                ok = autobaud::run(shared, &mut probe, autobaud_mode) => ok,
            }
        };
        if !ok {
            shared.set_state_error(StreamError::ConnectFail, "autobaud fail");
            return CycleEnd::Failed;
        }
    }

    shared.set_state_connected(&shared.baudrate().to_string());
    serve(shared, cancel, ctrl, &mut port).await
}

fn open_port(shared: &Arc<StreamShared>) -> Result<SerialStream, String> {
    let opts = shared.opts();
    let StreamPath::Serial(path) = &opts.path else {
        return Err("not a serial path".to_owned());
    };

    let builder = tokio_serial::new(path.device.as_str(), shared.baudrate())
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(match path.flow {
            SerialFlow::Off => FlowControl::None,
            SerialFlow::Sw => FlowControl::Software,
            SerialFlow::Hw => FlowControl::Hardware,
        });

    let mut port = builder
        .open_native_async()
        .map_err(|e| format!("open: {e}"))?;

    #[cfg(unix)]
    port.set_exclusive(true).map_err(|e| format!("lock: {e}"))?;

    // Some receivers only talk with RTS/DTR cleared
    if let Err(e) = port.write_request_to_send(false) {
        warn!("Stream({}) clear RTS: {e}", shared.name);
    }
    if let Err(e) = port.write_data_terminal_ready(false) {
        warn!("Stream({}) clear DTR: {e}", shared.name);
    }

    Ok(port)
}

enum Act {
    Cancel,
    Inactive,
    Read(std::io::Result<usize>),
    Wake,
    Ctrl(Option<Control>),
}

async fn serve(
    shared: &Arc<StreamShared>,
    cancel: &mut ShutdownRx,
    ctrl: &mut mpsc::UnboundedReceiver<Control>,
    port: &mut SerialStream,
) -> CycleEnd {
    let mut rx_buf = vec![0u8; 4096];
    let inact = shared.inact_to;
    let far = tokio::time::Instant::now() + std::time::Duration::from_secs(365 * 86400);
    let mut deadline = if inact.is_zero() {
        far
    } else {
        tokio::time::Instant::now() + inact
    };
    let mut ctrl_open = true;

    if shared.write_pending() {
        shared.write_wakeup.notify_one();
    }

    loop {
        let act = tokio::select! {
            _ = cancelled(cancel) => Act::Cancel,
            _ = tokio::time::sleep_until(deadline) => Act::Inactive,
            result = port.read(&mut rx_buf) => Act::Read(result),
            _ = shared.write_wakeup.notified() => Act::Wake,
            message = ctrl.recv(), if ctrl_open => Act::Ctrl(message),
        };

        match act {
            Act::Cancel => return CycleEnd::Cancelled,
            Act::Inactive => {
                shared.set_state_error(StreamError::NoDataRecv, "");
                return CycleEnd::Failed;
            }
            Act::Read(Ok(0)) => {
                shared.set_state_error(StreamError::DeviceFail, "read: eof");
                return CycleEnd::Failed;
            }
            Act::Read(Ok(n)) => {
                shared.process_read(&rx_buf[..n]);
                if !inact.is_zero() {
                    deadline = tokio::time::Instant::now() + inact;
                }
            }
            Act::Read(Err(e)) => {
                shared.set_state_error(StreamError::DeviceFail, &format!("read: {e}"));
                return CycleEnd::Failed;
            }
            Act::Wake => {
                if let Err(e) = drain_write_queue(port, shared, false).await {
                    shared.set_state_error(StreamError::DeviceFail, &format!("write: {e}"));
                    return CycleEnd::Failed;
                }
            }
            Act::Ctrl(None) => ctrl_open = false,
            Act::Ctrl(Some(Control::SetBaudrate(baudrate, reply))) => {
                let ok = port.set_baud_rate(baudrate).is_ok();
                if ok {
                    shared.commit_baudrate(baudrate);
                    shared.set_state_connected(&baudrate.to_string());
                    if !inact.is_zero() {
                        deadline = tokio::time::Instant::now() + inact;
                    }
                } else {
                    warn!("Stream({}) set baudrate {baudrate} failed", shared.name);
                }
                let _ = reply.send(ok);
            }
            Act::Ctrl(Some(Control::Autobaud(mode, reply))) => {
                let _ = reply.send(true);
                let ok = {
                    let mut probe = SerialProbe {
                        port: &mut *port,
                        shared,
                    };
                    tokio::select! {
                        _ = cancelled(cancel) => return CycleEnd::Cancelled,
                        ok = autobaud::run(shared, &mut probe, mode) => ok,
                    }
                };
                if ok {
                    shared.set_state_connected(&shared.baudrate().to_string());
                    if !inact.is_zero() {
                        deadline = tokio::time::Instant::now() + inact;
                    }
                } else {
                    shared.set_state_error(StreamError::ConnectFail, "autobaud fail");
                    return CycleEnd::Failed;
                }
            }
        }
    }
}

/// Autobaud strategy over a local serial port.
struct SerialProbe<'a> {
    port: &'a mut SerialStream,
    shared: &'a Arc<StreamShared>,
}

impl BaudProbe for SerialProbe<'_> {
    async fn set_baud(&mut self, baudrate: u32) -> bool {
        if self.port.set_baud_rate(baudrate).is_err() {
            return false;
        }
        self.shared.commit_baudrate(baudrate);
        true
    }

    async fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.write_all(data).await?;
        self.port.flush().await
    }

    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port.read(buf).await
    }
}
