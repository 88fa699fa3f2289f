//! One reactor thread per stream: a dedicated OS thread running a
//! current-thread tokio runtime. All async operations of a stream execute on
//! this thread; shutdown is signalled through a watch channel that every
//! await point races against.

use std::future::Future;
use std::thread::JoinHandle;

use tokio::sync::watch;
use tracing::Instrument;
use tracing::warn;

pub(crate) type ShutdownRx = watch::Receiver<bool>;

/// Completes when shutdown has been requested (or the stream handle was
/// dropped).
pub(crate) async fn cancelled(shutdown: &mut ShutdownRx) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

pub(crate) struct Reactor {
    handle: Option<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl Reactor {
    /// Spawn the reactor thread. `make` builds the driver future on the new
    /// thread (the future itself need not be `Send`).
    pub fn spawn<F, Fut>(name: &str, make: F) -> std::io::Result<Self>
    where
        F: FnOnce(ShutdownRx) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let span = tracing::info_span!("stream", name = %name);
        let handle = std::thread::Builder::new()
            .name(format!("stream-{name}"))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        warn!("reactor runtime: {e}");
                        return;
                    }
                };
                let local = tokio::task::LocalSet::new();
                local.block_on(&runtime, make(shutdown_rx).instrument(span));
            })?;
        Ok(Self {
            handle: Some(handle),
            shutdown: shutdown_tx,
        })
    }

    /// Request shutdown and join the reactor thread.
    pub fn shutdown_and_join(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
