//! Subprocess transport: writes go to the child's stdin, its stdout is read
//! as stream data.

use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::task::{Context, Poll};

use devio_rs_protocol::{StreamError, StreamPath};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

use crate::base::StreamShared;
use crate::reactor::{ShutdownRx, cancelled};
use crate::stream::Control;
use crate::tcp::{ServeEnd, serve};

/// The child's stdio pair presented as one bidirectional transport so the
/// shared connected loop can drive it.
struct ChildIo {
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl AsyncRead for ChildIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for ChildIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stdin).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdin).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdin).poll_shutdown(cx)
    }
}

pub(crate) async fn run(shared: Arc<StreamShared>, mut cancel: ShutdownRx) {
    // The connected loop wants a control channel; exec has no baud control
    let (_ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Control>();

    loop {
        let failed = cycle(&shared, &mut cancel, &mut ctrl_rx).await;
        if !failed {
            break;
        }
        if shared.retry_to.is_zero() {
            break;
        }
        tokio::select! {
            _ = cancelled(&mut cancel) => break,
            _ = tokio::time::sleep(shared.retry_to) => {}
        }
    }
    shared.set_state_closed();
}

/// One spawn-and-serve cycle; returns true when the retry cycle should run.
async fn cycle(
    shared: &Arc<StreamShared>,
    cancel: &mut ShutdownRx,
    ctrl: &mut mpsc::UnboundedReceiver<Control>,
) -> bool {
    let opts = shared.opts();
    let StreamPath::Exec(path) = &opts.path else {
        return false;
    };

    shared.set_state_connecting("spawn");
    let mut child = match spawn_child(path) {
        Ok(child) => child,
        Err(e) => {
            shared.set_state_error(StreamError::DeviceFail, &format!("spawn: {e}"));
            return true;
        }
    };
    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        shared.set_state_error(StreamError::DeviceFail, "no stdio");
        return true;
    };
    let mut io = ChildIo { stdin, stdout };

    shared.set_state_connected(&path.argv[0]);
    let end = serve(shared, cancel, ctrl, &mut io, None).await;
    drop(io);
    let _ = child.kill().await;

    match end {
        ServeEnd::Cancelled => false,
        ServeEnd::Failed => true,
    }
}

fn spawn_child(path: &devio_rs_protocol::path::ExecPath) -> std::io::Result<Child> {
    Command::new(&path.argv[0])
        .args(&path.argv[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
}
