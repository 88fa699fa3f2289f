//! u-blox UBX framing: `0xb5 0x62 <class> <id> <len u16le> <payload> <ck_a> <ck_b>`.

use crate::crc::ubx_checksum;
use crate::error::{ParserError, Result};
use crate::parser::Detect;

pub const SYNC_1: u8 = 0xb5;
pub const SYNC_2: u8 = 0x62;
pub const HEADER_LEN: usize = 6;
pub const TRAILER_LEN: usize = 2;
pub const MAX_PAYLOAD_LEN: usize = 4096;

pub const CLS_MON: u8 = 0x0a;
pub const ID_MON_VER: u8 = 0x04;

/// Message name for a class/id pair (`"UBX-MON-VER"`, `"UBX-0x??-0x??"` for
/// unknown pairs).
pub fn message_name(class: u8, id: u8) -> String {
    let known = match (class, id) {
        (0x01, 0x07) => Some("UBX-NAV-PVT"),
        (0x01, 0x35) => Some("UBX-NAV-SAT"),
        (0x02, 0x15) => Some("UBX-RXM-RAWX"),
        (CLS_MON, ID_MON_VER) => Some("UBX-MON-VER"),
        (0x0a, 0x09) => Some("UBX-MON-HW"),
        _ => None,
    };
    match known {
        Some(name) => name.to_owned(),
        None => format!("UBX-0x{class:02x}-0x{id:02x}"),
    }
}

/// Build a UBX frame. An empty payload makes a poll request.
pub fn frame(class: u8, id: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ParserError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    out.extend_from_slice(&[SYNC_1, SYNC_2, class, id]);
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    let (ck_a, ck_b) = ubx_checksum(&out[2..]);
    out.push(ck_a);
    out.push(ck_b);
    Ok(out)
}

/// The autobaud probe: UBX-MON-VER poll (empty payload).
pub fn mon_ver_poll() -> Vec<u8> {
    // Infallible: empty payload
    frame(CLS_MON, ID_MON_VER, &[]).unwrap_or_default()
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
    let (ck_a, ck_b) = ubx_checksum(&buf[2..total - 2]);
    if ck_a != buf[total - 2] || ck_b != buf[total - 1] {
        return Detect::No;
    }
    Detect::Frame {
        len: total,
        name: message_name(buf[2], buf[3]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mon_ver_poll_bytes() {
        assert_eq!(
            mon_ver_poll(),
            vec![0xb5, 0x62, 0x0a, 0x04, 0x00, 0x00, 0x0e, 0x34]
        );
    }

    #[test]
    fn detect_roundtrip() {
        let f = frame(0x01, 0x07, &[1, 2, 3, 4]).unwrap();
        match detect(&f) {
            Detect::Frame { len, name } => {
                assert_eq!(len, f.len());
                assert_eq!(name, "UBX-NAV-PVT");
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn detect_partial_and_bad_checksum() {
        let mut f = frame(0x0a, 0x04, &[]).unwrap();
        assert!(matches!(detect(&f[..4]), Detect::Need));
        *f.last_mut().unwrap() ^= 0xff;
        assert!(matches!(detect(&f), Detect::No));
    }
}
