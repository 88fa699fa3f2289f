//! Helpers shared by the integration tests.

use std::time::{Duration, Instant};

use devio_rs_parser::ParserMsg;
use devio_rs_stream::{Stream, StreamState};

/// Poll the stream state until it matches or the timeout expires.
pub fn wait_for_state(stream: &Stream, state: StreamState, timeout: Duration) -> bool {
    wait_until(timeout, || stream.state() == state)
}

pub fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Read with a hard deadline (the stream's own read may return early; see its
/// single-retry semantics).
pub fn read_msg(stream: &Stream, timeout: Duration) -> Option<ParserMsg> {
    let deadline = Instant::now() + timeout;
    let mut msg = ParserMsg::default();
    loop {
        if stream.read(&mut msg, 50) {
            return Some(msg);
        }
        if Instant::now() >= deadline {
            return None;
        }
    }
}
