//! Streaming message parser/demultiplexer for GNSS and sensor protocols.
//!
//! Feed raw bytes with [`Parser::add`] and drain recognized messages with
//! [`Parser::process`]. Supported framings: u-blox UBX, Fixposition FP_B,
//! NMEA 0183 and RTCM3. Bytes that belong to no recognized frame are emitted
//! as [`Protocol::Other`] chunks so callers can account for garbage.

pub mod crc;
pub mod fpb;
pub mod nmea;
pub mod parser;
pub mod rtcm3;
pub mod ubx;

mod error;

pub use error::{ParserError, Result};
pub use parser::{Parser, ParserMsg, ParserStats, Protocol};
