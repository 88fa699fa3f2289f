//! Fixposition FP_B framing: `0x66 0x21 <msg_id u16le> <payload_len u16le>
//! <seq u16le> <payload> <crc32 u32le>`. The CRC covers msg_id through the
//! end of the payload.

use crate::crc::crc32;
use crate::error::{ParserError, Result};
use crate::parser::Detect;

pub const SYNC_1: u8 = 0x66;
pub const SYNC_2: u8 = 0x21;
pub const HEADER_LEN: usize = 8;
pub const TRAILER_LEN: usize = 4;
pub const MAX_PAYLOAD_LEN: usize = 4096;

pub const MSG_ID_VERSION: u16 = 2301;

/// Message name for a FP_B message id.
pub fn message_name(msg_id: u16) -> String {
    match msg_id {
        MSG_ID_VERSION => "FP_B-VERSION".to_owned(),
        1001 => "FP_B-MEASUREMENTS".to_owned(),
        1007 => "FP_B-GNSSSTATUS".to_owned(),
        _ => format!("FP_B-MSG{msg_id}"),
    }
}

/// Build a FP_B frame. An empty payload makes a poll request.
pub fn frame(msg_id: u16, seq: u16, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ParserError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    out.extend_from_slice(&[SYNC_1, SYNC_2]);
    out.extend_from_slice(&msg_id.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(&seq.to_le_bytes());
    out.extend_from_slice(payload);
    let crc = crc32(&out[2..]);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// The autobaud probe: FP_B-VERSION poll (empty payload).
pub fn version_poll() -> Vec<u8> {
    frame(MSG_ID_VERSION, 0, &[]).unwrap_or_default()
}

pub(crate) fn detect(buf: &[u8]) -> Detect {
    if buf[0] != SYNC_1 {
        return Detect::No;
    }
    if buf.len() < 2 {
        return Detect::Need;
    }
    if buf[1] != SYNC_2 {
        return Detect::No;
    }
    if buf.len() < HEADER_LEN {
        return Detect::Need;
    }
    let payload_len = u16::from_le_bytes([buf[4], buf[5]]) as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return Detect::No;
    }
    let total = HEADER_LEN + payload_len + TRAILER_LEN;
    if buf.len() < total {
        return Detect::Need;
    }
    let crc = u32::from_le_bytes([buf[total - 4], buf[total - 3], buf[total - 2], buf[total - 1]]);
    if crc32(&buf[2..total - 4]) != crc {
        return Detect::No;
    }
    let msg_id = u16::from_le_bytes([buf[2], buf[3]]);
    Detect::Frame {
        len: total,
        name: message_name(msg_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_poll_roundtrip() {
        let f = version_poll();
        match detect(&f) {
            Detect::Frame { len, name } => {
                assert_eq!(len, f.len());
                assert_eq!(name, "FP_B-VERSION");
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn detect_bad_crc() {
        let mut f = frame(1001, 42, b"data").unwrap();
        *f.last_mut().unwrap() ^= 0x01;
        assert!(matches!(detect(&f), Detect::No));
    }
}
