//! NMEA 0183 framing: `$<address>,<fields>*<hh>\r\n`.

use crate::crc::nmea_checksum;
use crate::parser::Detect;

pub const MAX_SENTENCE_LEN: usize = 120;

/// Message name for an NMEA address field (`"GNGGA"` → `"NMEA-GN-GGA"`).
pub fn message_name(address: &str) -> String {
    if let Some(rest) = address.strip_prefix('P') {
        // Proprietary sentences: $P<mfr><msg>
        return format!("NMEA-P-{rest}");
    }
    if address.len() >= 5 {
        format!("NMEA-{}-{}", &address[..2], &address[2..])
    } else {
        format!("NMEA-{address}")
    }
}

/// Build a NMEA sentence from talker, formatter and fields.
pub fn sentence(talker: &str, formatter: &str, fields: &[String]) -> Vec<u8> {
    let body = if fields.is_empty() {
        format!("{talker}{formatter}")
    } else {
        format!("{talker}{formatter},{}", fields.join(","))
    };
    let ck = nmea_checksum(body.as_bytes());
    format!("${body}*{ck:02X}\r\n").into_bytes()
}

fn is_sentence_char(b: u8) -> bool {
    // Printable ASCII, excluding the framing characters themselves
    (0x20..=0x7e).contains(&b) && b != b'$' && b != b'*'
}

pub(crate) fn detect(buf: &[u8]) -> Detect {
    if buf[0] != b'$' {
        return Detect::No;
    }
    let mut star = None;
    for (ix, &b) in buf.iter().enumerate().skip(1) {
        if ix > MAX_SENTENCE_LEN {
            return Detect::No;
        }
        if b == b'*' {
            star = Some(ix);
            break;
        }
        if !is_sentence_char(b) {
            return Detect::No;
        }
    }
    let Some(star) = star else {
        return if buf.len() > MAX_SENTENCE_LEN {
            Detect::No
        } else {
            Detect::Need
        };
    };
    // "*hh\r\n"
    let total = star + 5;
    if buf.len() < total {
        return Detect::Need;
    }
    if &buf[star + 3..total] != b"\r\n" {
        return Detect::No;
    }
    let Ok(hex) = std::str::from_utf8(&buf[star + 1..star + 3]) else {
        return Detect::No;
    };
    let Ok(ck) = u8::from_str_radix(hex, 16) else {
        return Detect::No;
    };
    if nmea_checksum(&buf[1..star]) != ck {
        return Detect::No;
    }
    let body = String::from_utf8_lossy(&buf[1..star]);
    let address = body.split(',').next().unwrap_or("");
    Detect::Frame {
        len: total,
        name: message_name(address),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentence_roundtrip() {
        let s = sentence("GN", "GGA", &["123456.00".to_owned(), "4716.0000".to_owned()]);
        match detect(&s) {
            Detect::Frame { len, name } => {
                assert_eq!(len, s.len());
                assert_eq!(name, "NMEA-GN-GGA");
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn detect_bad_checksum() {
        let mut s = sentence("GP", "RMC", &[]);
        let star = s.iter().position(|&b| b == b'*').unwrap();
        s[star + 1] = b'0';
        s[star + 2] = b'0';
        assert!(matches!(detect(&s), Detect::No));
    }

    #[test]
    fn detect_incomplete() {
        let s = sentence("GN", "GGA", &[]);
        assert!(matches!(detect(&s[..5]), Detect::Need));
    }
}
