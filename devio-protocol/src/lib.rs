//! Stream spec grammar, typed options, and protocol logic for devio streams.
//!
//! This crate is the pure (no I/O) layer shared by the stream engine and its
//! consumers: the `<scheme>://<path>[,<option>]*` spec parser with its typed
//! [`StreamOpts`] result, and the NTRIP and Telnet/RFC2217 protocol state
//! machines used by the TCP-family transports.

pub mod credentials;
pub mod ntrip;
pub mod opts;
pub mod path;
pub mod scheme;
pub mod telnet;
pub mod types;

mod error;

pub use error::SpecError;
pub use opts::StreamOpts;
pub use path::{HostPort, StreamPath};
pub use types::{
    AutobaudMode, BAUDRATES, DEFAULT_BAUDRATE, SerialFlow, SerialFraming, StreamError, StreamMode,
    StreamState, StreamType,
};

/// User agent string sent in NTRIP requests and the RFC2217 signature.
pub fn user_agent() -> String {
    format!("devio-rs/{}", env!("CARGO_PKG_VERSION"))
}
