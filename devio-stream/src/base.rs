//! The shared stream engine: state machine, bounded queues, backpressure
//! semaphores and observer dispatch.
//!
//! One [`StreamShared`] is the cross-thread surface between application
//! threads (blocking `read`/`write`/`wait`) and the stream's reactor thread
//! (the transport driver). Everything else is per-transport.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use devio_rs_parser::{Parser, ParserMsg, ParserStats};
use devio_rs_protocol::{StreamError, StreamMode, StreamOpts, StreamState, StreamType};
use tracing::{info, warn};

/// State change observer: `(old_state, new_state, error, info)`. Called
/// synchronously on the thread performing the transition, including for
/// same-state info-only updates.
pub type StateObserver = Arc<dyn Fn(StreamState, StreamState, StreamError, &str) + Send + Sync>;

/// Read-ready observer, called whenever new messages arrive in the queue.
pub type ReadObserver = Arc<dyn Fn() + Send + Sync>;

/// Fixed-capacity byte ring buffer for the write queue.
#[derive(Debug)]
pub(crate) struct RingBuffer {
    buf: Box<[u8]>,
    head: usize,
    used: usize,
}

impl RingBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            used: 0,
        }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn avail(&self) -> usize {
        self.buf.len() - self.used
    }

    /// Append as much of `data` as fits; returns the number of bytes taken.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.avail());
        let tail = (self.head + self.used) % self.buf.len();
        let first = n.min(self.buf.len() - tail);
        self.buf[tail..tail + first].copy_from_slice(&data[..first]);
        if n > first {
            self.buf[..n - first].copy_from_slice(&data[first..n]);
        }
        self.used += n;
        n
    }

    /// Pop up to `out.len()` bytes; returns the number of bytes copied.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.used);
        let first = n.min(self.buf.len() - self.head);
        out[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        if n > first {
            out[first..n].copy_from_slice(&self.buf[..n - first]);
        }
        self.head = (self.head + n) % self.buf.len();
        self.used -= n;
        n
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.used = 0;
    }
}

/// Binary semaphore on a condvar: `notify` leaves at most one permit.
#[derive(Debug, Default)]
pub(crate) struct BinarySemaphore {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl BinarySemaphore {
    pub fn notify(&self) {
        let mut flag = self.flag.lock().unwrap_or_else(|e| e.into_inner());
        *flag = true;
        self.cond.notify_one();
    }

    /// Wait up to `timeout` for a permit; consumes it when woken.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flag = self.flag.lock().unwrap_or_else(|e| e.into_inner());
        while !*flag {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, _result) = self
                .cond
                .wait_timeout(flag, remaining)
                .unwrap_or_else(|e| e.into_inner());
            flag = guard;
        }
        *flag = false;
        true
    }
}

// Throttle period for repeating warnings
const WARN_THROTTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct ThrottledWarn {
    state: Mutex<(Option<Instant>, u64)>,
}

impl ThrottledWarn {
    /// Returns `Some(suppressed_count)` when the caller should log now.
    fn fire(&self) -> Option<u64> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match state.0 {
            Some(last) if now.duration_since(last) < WARN_THROTTLE => {
                state.1 += 1;
                None
            }
            _ => {
                let suppressed = state.1;
                *state = (Some(now), 0);
                Some(suppressed)
            }
        }
    }
}

/// The engine state shared between application threads and the reactor.
pub(crate) struct StreamShared {
    // Immutable after construction
    pub name: String,
    pub stype: StreamType,
    pub mode: StreamMode,
    pub conn_to: Duration,
    pub inact_to: Duration,
    pub retry_to: Duration,
    pub hotplug: bool,
    pub quiet: bool,
    read_queue_len: usize,

    // Mutable typed options (baudrate updates re-canonicalize the spec)
    opts: Mutex<StreamOpts>,
    baudrate: AtomicU32,

    // State machine
    state: AtomicU8,
    error: AtomicU8,
    state_seen: AtomicBool,
    info: Mutex<String>,
    display: String,

    // Read side
    read_queue: Mutex<VecDeque<ParserMsg>>,
    parser: Mutex<Parser>,
    read_sem: BinarySemaphore,
    read_ovfl_warn: ThrottledWarn,
    cannot_read_warn: ThrottledWarn,

    // Write side
    pub write_queue: Mutex<RingBuffer>,
    pub tx_ongoing: AtomicBool,
    write_sem: BinarySemaphore,
    /// Wakes the reactor's write drain.
    pub write_wakeup: tokio::sync::Notify,
    write_ovfl_warn: ThrottledWarn,
    cannot_write_warn: ThrottledWarn,

    // Observers
    state_observers: Mutex<Vec<StateObserver>>,
    read_observers: Mutex<Vec<ReadObserver>>,
}

impl StreamShared {
    pub fn new(opts: StreamOpts) -> Arc<Self> {
        if !opts.quiet {
            info!("Stream({}) {}", opts.name, opts.spec);
        }
        Arc::new(Self {
            name: opts.name.clone(),
            stype: opts.stype,
            mode: opts.mode,
            conn_to: opts.conn_to,
            inact_to: opts.inact_to,
            retry_to: opts.retry_to,
            hotplug: opts.hotplug,
            quiet: opts.quiet,
            read_queue_len: opts.read_queue_len,
            baudrate: AtomicU32::new(opts.baudrate()),
            state: AtomicU8::new(StreamState::Closed.to_u8()),
            error: AtomicU8::new(StreamError::None.to_u8()),
            state_seen: AtomicBool::new(false),
            info: Mutex::new(String::new()),
            display: opts.display.clone(),
            read_queue: Mutex::new(VecDeque::new()),
            parser: Mutex::new(Parser::new()),
            read_sem: BinarySemaphore::default(),
            read_ovfl_warn: ThrottledWarn::default(),
            cannot_read_warn: ThrottledWarn::default(),
            write_queue: Mutex::new(RingBuffer::with_capacity(
                opts.write_queue_len
                    .max(devio_rs_protocol::opts::WRITE_QUEUE_LEN_MIN),
            )),
            tx_ongoing: AtomicBool::new(false),
            write_sem: BinarySemaphore::default(),
            write_wakeup: tokio::sync::Notify::new(),
            write_ovfl_warn: ThrottledWarn::default(),
            cannot_write_warn: ThrottledWarn::default(),
            state_observers: Mutex::new(Vec::new()),
            read_observers: Mutex::new(Vec::new()),
            opts: Mutex::new(opts),
        })
    }

    // -- State --

    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn error(&self) -> StreamError {
        StreamError::from_u8(self.error.load(Ordering::Acquire))
    }

    pub fn info(&self) -> String {
        self.info.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn opts(&self) -> StreamOpts {
        self.opts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn baudrate(&self) -> u32 {
        self.baudrate.load(Ordering::Acquire)
    }

    /// Commit a (discovered or requested) baudrate into the typed options and
    /// re-canonicalize the spec.
    pub fn commit_baudrate(&self, baudrate: u32) {
        let mut opts = self.opts.lock().unwrap_or_else(|e| e.into_inner());
        opts.set_baudrate(baudrate);
        self.baudrate.store(baudrate, Ordering::Release);
    }

    pub fn set_state_closed(&self) {
        // A stream that never reported anything, or is already closed, stays
        // quiet
        if !self.state_seen.load(Ordering::Acquire) || self.state() != StreamState::Closed {
            let error = self.error();
            let info = self.info();
            self.set_state(StreamState::Closed, error, &info);
        }
    }

    pub fn set_state_connecting(&self, info: &str) {
        self.set_state(StreamState::Connecting, StreamError::None, info);
    }

    pub fn set_state_connected(&self, info: &str) {
        self.set_state(StreamState::Connected, StreamError::None, info);
    }

    pub fn set_state_error(&self, error: StreamError, info: &str) {
        self.set_state(StreamState::Error, error, info);
    }

    fn set_state(&self, state: StreamState, error: StreamError, info: &str) {
        let old_state;
        {
            let mut info_guard = self.info.lock().unwrap_or_else(|e| e.into_inner());
            old_state = self.state();
            self.state.store(state.to_u8(), Ordering::Release);
            self.error.store(error.to_u8(), Ordering::Release);
            info_guard.clear();
            info_guard.push_str(info);

            let mut line = format!("{} {}", state.as_str(), self.display);
            if error != StreamError::None {
                line.push(' ');
                line.push_str(error.as_str());
            }
            if !info.is_empty() {
                line.push_str(" - ");
                line.push_str(info);
            }
            match state {
                StreamState::Error => warn!("Stream({}) {line}", self.name),
                _ if !self.quiet => info!("Stream({}) {line}", self.name),
                _ => {}
            }
        }
        let observers = self
            .state_observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for observer in observers {
            observer(old_state, state, error, info);
        }
        self.state_seen.store(true, Ordering::Release);
    }

    pub fn add_state_observer(&self, observer: StateObserver) {
        self.state_observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    pub fn add_read_observer(&self, observer: ReadObserver) {
        self.read_observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    // -- Read side (reactor → application) --

    /// Feed received bytes through the parser into the read queue. Called by
    /// the transport driver on the reactor thread.
    pub fn process_read(&self, data: &[u8]) {
        let mut have_msg = false;
        let mut overflow = false;
        {
            let mut parser = self.parser.lock().unwrap_or_else(|e| e.into_inner());
            if !parser.add(data) {
                // Not expected with sane read sizes
                warn!("Stream({}) rx parser overflow", self.name);
                parser.reset();
                parser.add(data);
            }
            let mut queue = self.read_queue.lock().unwrap_or_else(|e| e.into_inner());
            while let Some(msg) = parser.process() {
                if queue.len() < self.read_queue_len {
                    queue.push_back(msg);
                    have_msg = true;
                } else {
                    overflow = true;
                }
            }
        }

        if overflow {
            if let Some(suppressed) = self.read_ovfl_warn.fire() {
                warn!("Stream({}) rx queue overflow (x{})", self.name, suppressed + 1);
            }
        }

        if have_msg {
            self.read_sem.notify();
            let observers = self
                .read_observers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            for observer in observers {
                observer();
            }
        }
    }

    /// Pop the next received message.
    ///
    /// With a timeout, waits *once* on the read semaphore and then retries a
    /// single non-blocking pop. It can therefore report "no message" before
    /// the full timeout has elapsed even though data arrives shortly after;
    /// callers wanting a hard wait should loop themselves.
    pub fn read(&self, msg: &mut ParserMsg, timeout_ms: u32) -> bool {
        if let Some(queued) = self
            .read_queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            *msg = queued;
            return true;
        }

        if self.state() != StreamState::Connected || self.mode == StreamMode::Wo {
            if let Some(suppressed) = self.cannot_read_warn.fire() {
                warn!("Stream({}) cannot read (x{})", self.name, suppressed + 1);
            }
            return false;
        }

        if timeout_ms > 0 && self.wait(timeout_ms) {
            if let Some(queued) = self
                .read_queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
            {
                *msg = queued;
                return true;
            }
        }

        false
    }

    /// Wait for any received data (not necessarily a complete message).
    pub fn wait(&self, timeout_ms: u32) -> bool {
        self.mode != StreamMode::Wo
            && self
                .read_sem
                .wait_for(Duration::from_millis(timeout_ms as u64))
    }

    pub fn parser_stats(&self) -> ParserStats {
        self.parser
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .stats()
    }

    // -- Write side (application → reactor) --

    /// Queue `data` for transmission, blocking up to `timeout_ms` for ring
    /// space. All-or-nothing from the caller's point of view: `true` means
    /// the entire buffer was queued; `false` leaves any already-queued prefix
    /// queued but reports the write as failed.
    pub fn write(&self, data: &[u8], timeout_ms: u32) -> bool {
        if data.is_empty() {
            return false;
        }
        if self.state() != StreamState::Connected || self.mode == StreamMode::Ro {
            if let Some(suppressed) = self.cannot_write_warn.fire() {
                warn!("Stream({}) cannot write (x{})", self.name, suppressed + 1);
            }
            return false;
        }

        let mut offset = 0;
        let mut remaining = Duration::from_millis(timeout_ms as u64);
        loop {
            {
                let mut queue = self.write_queue.lock().unwrap_or_else(|e| e.into_inner());
                let taken = queue.write(&data[offset..]);
                if taken > 0 {
                    offset += taken;
                    self.tx_ongoing.store(true, Ordering::Release);
                    self.write_wakeup.notify_one();
                }
            }

            if offset == data.len() {
                return true;
            }
            if remaining.is_zero() {
                break;
            }

            // Wait for the reactor to drain the ring, then try again with
            // whatever budget is left
            let t0 = Instant::now();
            self.write_sem.wait_for(remaining);
            let elapsed = t0.elapsed().max(Duration::from_millis(1));
            if elapsed >= remaining {
                break;
            }
            remaining -= elapsed;
        }

        if let Some(suppressed) = self.write_ovfl_warn.fire() {
            warn!("Stream({}) tx buffer overflow (x{})", self.name, suppressed + 1);
        }
        false
    }

    /// Reactor side: signal that the write ring has been fully drained.
    pub fn notify_tx_done(&self) {
        self.tx_ongoing.store(false, Ordering::Release);
        self.write_sem.notify();
    }

    /// True while queued bytes have not reached the transport yet.
    pub fn write_pending(&self) -> bool {
        self.tx_ongoing.load(Ordering::Acquire)
            || self
                .write_queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .used()
                > 0
    }

    /// Drop everything still queued in both directions (stream stopped).
    pub fn clear_queues(&self) {
        self.read_queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.write_queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.tx_ongoing.store(false, Ordering::Release);
    }
}
