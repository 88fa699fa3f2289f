//! The streaming parser: collects bytes, emits framed messages.

use crate::{fpb, nmea, rtcm3, ubx};

/// Protocols recognized by the parser.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// u-blox UBX.
    Ubx,
    /// Fixposition FP_B.
    FpB,
    /// NMEA 0183.
    Nmea,
    /// RTCM3.
    Rtcm3,
    /// Unrecognized bytes (garbage, line noise, wrong baudrate).
    Other,
}

impl Protocol {
    /// Returns the protocol name as a static string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ubx => "UBX",
            Self::FpB => "FP_B",
            Self::Nmea => "NMEA",
            Self::Rtcm3 => "RTCM3",
            Self::Other => "OTHER",
        }
    }
}

/// One framed message produced by [`Parser::process`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParserMsg {
    /// Protocol the frame belongs to.
    pub protocol: Protocol,
    /// Message name (e.g. `"UBX-MON-VER"`, `"NMEA-GN-GGA"`, `"OTHER"`).
    pub name: String,
    /// The raw frame bytes, including framing.
    pub data: Vec<u8>,
}

impl Default for ParserMsg {
    fn default() -> Self {
        Self {
            protocol: Protocol::Other,
            name: String::new(),
            data: Vec::new(),
        }
    }
}

/// Counters maintained by the parser.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParserStats {
    pub n_msgs: u64,
    pub n_bytes: u64,
    pub n_ubx: u64,
    pub n_fpb: u64,
    pub n_nmea: u64,
    pub n_rtcm3: u64,
    pub n_other: u64,
}

/// Result of probing a buffer head for one protocol.
#[derive(Debug)]
pub(crate) enum Detect {
    /// Not a frame of this protocol.
    No,
    /// Could be a frame, need more bytes to decide.
    Need,
    /// A complete, validated frame of `len` bytes.
    Frame { len: usize, name: String },
}

/// Maximum number of bytes [`Parser::add`] accepts before the caller must
/// drain with [`Parser::process`].
pub const MAX_ADD_SIZE: usize = 16 * 1024;

// Internal buffer bound: one full add on top of the largest stuck frame
const MAX_BUF_SIZE: usize = 2 * MAX_ADD_SIZE;

// Garbage is flushed in chunks of at most this size
const MAX_OTHER_LEN: usize = 256;

/// Streaming frame parser/demultiplexer.
///
/// ```
/// use devio_rs_parser::{Parser, Protocol, ubx};
///
/// let mut parser = Parser::new();
/// parser.add(&ubx::mon_ver_poll());
/// let msg = parser.process().unwrap();
/// assert_eq!(msg.protocol, Protocol::Ubx);
/// assert_eq!(msg.name, "UBX-MON-VER");
/// ```
#[derive(Debug, Default)]
pub struct Parser {
    buf: Vec<u8>,
    stats: ParserStats,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add received bytes. Returns false (without adding) if the internal
    /// buffer would overflow, in which case the caller should [`reset`](Self::reset).
    pub fn add(&mut self, data: &[u8]) -> bool {
        if self.buf.len() + data.len() > MAX_BUF_SIZE {
            return false;
        }
        self.buf.extend_from_slice(data);
        true
    }

    /// Discard all buffered bytes and pending partial frames.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Returns a copy of the parser counters.
    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Extract the next message, if any. Call repeatedly until `None`.
    pub fn process(&mut self) -> Option<ParserMsg> {
        let mut offs = 0;
        while offs < self.buf.len() {
            match self.detect_at(offs) {
                Some(Detect::Frame { len, name }) => {
                    // Garbage before the frame goes out first
                    if offs > 0 {
                        return Some(self.take_other(offs));
                    }
                    let protocol = frame_protocol(&self.buf);
                    let data: Vec<u8> = self.buf.drain(..len).collect();
                    self.count(protocol, data.len());
                    return Some(ParserMsg {
                        protocol,
                        name,
                        data,
                    });
                }
                Some(Detect::Need) => {
                    // Incomplete frame candidate: flush any garbage before it
                    // and wait for more data
                    if offs > 0 {
                        return Some(self.take_other(offs));
                    }
                    return None;
                }
                _ => {
                    offs += 1;
                }
            }
        }

        // Everything in the buffer is garbage; emit in bounded chunks but
        // keep a short tail in case it is the start of a frame
        if self.buf.len() >= MAX_OTHER_LEN {
            return Some(self.take_other(MAX_OTHER_LEN));
        }
        None
    }

    fn detect_at(&self, offs: usize) -> Option<Detect> {
        let buf = &self.buf[offs..];
        for detect in [ubx::detect, fpb::detect, nmea::detect, rtcm3::detect] {
            match detect(buf) {
                Detect::No => {}
                other => return Some(other),
            }
        }
        None
    }

    fn take_other(&mut self, len: usize) -> ParserMsg {
        let data: Vec<u8> = self.buf.drain(..len).collect();
        self.count(Protocol::Other, data.len());
        ParserMsg {
            protocol: Protocol::Other,
            name: "OTHER".to_owned(),
            data,
        }
    }

    fn count(&mut self, protocol: Protocol, len: usize) {
        self.stats.n_msgs += 1;
        self.stats.n_bytes += len as u64;
        match protocol {
            Protocol::Ubx => self.stats.n_ubx += 1,
            Protocol::FpB => self.stats.n_fpb += 1,
            Protocol::Nmea => self.stats.n_nmea += 1,
            Protocol::Rtcm3 => self.stats.n_rtcm3 += 1,
            Protocol::Other => self.stats.n_other += 1,
        }
    }
}

fn frame_protocol(buf: &[u8]) -> Protocol {
    match buf.first() {
        Some(&ubx::SYNC_1) => Protocol::Ubx,
        Some(&fpb::SYNC_1) => Protocol::FpB,
        Some(&b'$') => Protocol::Nmea,
        Some(&rtcm3::SYNC) => Protocol::Rtcm3,
        _ => Protocol::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fpb, nmea, rtcm3, ubx};

    #[test]
    fn single_ubx_frame() {
        let mut parser = Parser::new();
        assert!(parser.add(&ubx::mon_ver_poll()));
        let msg = parser.process().unwrap();
        assert_eq!(msg.protocol, Protocol::Ubx);
        assert_eq!(msg.name, "UBX-MON-VER");
        assert!(parser.process().is_none());
    }

    #[test]
    fn split_feed() {
        let frame = ubx::frame(0x01, 0x07, &[0u8; 32]).unwrap();
        let mut parser = Parser::new();
        parser.add(&frame[..5]);
        assert!(parser.process().is_none());
        parser.add(&frame[5..]);
        let msg = parser.process().unwrap();
        assert_eq!(msg.name, "UBX-NAV-PVT");
        assert_eq!(msg.data, frame);
    }

    #[test]
    fn garbage_then_frame() {
        let mut parser = Parser::new();
        parser.add(b"noise!");
        parser.add(&fpb::version_poll());
        let garbage = parser.process().unwrap();
        assert_eq!(garbage.protocol, Protocol::Other);
        assert_eq!(garbage.data, b"noise!");
        let msg = parser.process().unwrap();
        assert_eq!(msg.protocol, Protocol::FpB);
        assert_eq!(msg.name, "FP_B-VERSION");
    }

    #[test]
    fn mixed_protocols_in_order() {
        let mut parser = Parser::new();
        parser.add(&nmea::sentence("GN", "GGA", &[]));
        parser.add(&rtcm3::frame(&[0x3e, 0xd0, 0x00]).unwrap());
        parser.add(&ubx::mon_ver_poll());
        let names: Vec<String> = std::iter::from_fn(|| parser.process())
            .map(|m| m.name)
            .collect();
        assert_eq!(names, ["NMEA-GN-GGA", "RTCM3-TYPE1005", "UBX-MON-VER"]);
    }

    #[test]
    fn long_garbage_flushed_in_chunks() {
        let mut parser = Parser::new();
        parser.add(&[0x00u8; 600]);
        let m1 = parser.process().unwrap();
        assert_eq!(m1.protocol, Protocol::Other);
        assert_eq!(m1.data.len(), 256);
        let m2 = parser.process().unwrap();
        assert_eq!(m2.data.len(), 256);
        // The tail stays buffered in case a frame completes it
        assert!(parser.process().is_none());
    }

    #[test]
    fn overflow_rejected() {
        let mut parser = Parser::new();
        assert!(parser.add(&vec![0u8; MAX_ADD_SIZE]));
        assert!(parser.add(&vec![0u8; MAX_ADD_SIZE]));
        assert!(!parser.add(&[0u8; 1]));
        parser.reset();
        assert!(parser.add(&[0u8; 1]));
    }

    #[test]
    fn known_poll_from_hex_fixture() {
        let bytes = hex::decode("b5620a0400000e34").unwrap();
        let mut parser = Parser::new();
        parser.add(&bytes);
        let msg = parser.process().unwrap();
        assert_eq!(msg.protocol, Protocol::Ubx);
        assert_eq!(msg.name, "UBX-MON-VER");
    }

    #[test]
    fn stats_counted() {
        let mut parser = Parser::new();
        parser.add(&ubx::mon_ver_poll());
        parser.add(&nmea::sentence("GP", "RMC", &[]));
        while parser.process().is_some() {}
        let stats = parser.stats();
        assert_eq!(stats.n_msgs, 2);
        assert_eq!(stats.n_ubx, 1);
        assert_eq!(stats.n_nmea, 1);
        assert_eq!(stats.n_other, 0);
    }
}
