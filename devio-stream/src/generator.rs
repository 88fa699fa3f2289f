//! Synthetic message generators: NMEA GGA sentences (gga) and RTCM3 station
//! reference messages (sta), emitted at a fixed interval.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use devio_rs_parser::{nmea, rtcm3};
use devio_rs_protocol::StreamPath;
use devio_rs_protocol::path::{GgaPath, StaPath};
use tracing::warn;

use crate::base::StreamShared;
use crate::reactor::{ShutdownRx, cancelled};

pub(crate) async fn run(shared: Arc<StreamShared>, mut cancel: ShutdownRx) {
    let opts = shared.opts();
    let (period_ms, describe): (u32, String) = match &opts.path {
        StreamPath::Gga(path) => (path.period_ms, format!("GGA {}", path.talker)),
        StreamPath::Sta(path) => (path.period_ms, format!("RTCM3-TYPE{}", path.msg_type)),
        other => {
            warn!("Stream({}) not a generator path: {other:?}", shared.name);
            return;
        }
    };

    shared.set_state_connected(&describe);
    let period = Duration::from_millis(period_ms as u64);
    loop {
        tokio::select! {
            _ = cancelled(&mut cancel) => break,
            _ = tokio::time::sleep(period) => {
                let message = match &opts.path {
                    StreamPath::Gga(path) => gga_sentence(path),
                    StreamPath::Sta(path) => sta_message(path),
                    _ => Vec::new(),
                };
                if !message.is_empty() {
                    shared.process_read(&message);
                }
            }
        }
    }
    shared.set_state_closed();
}

fn utc_time_of_day() -> (u32, u32, f64) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let day_secs = now.as_secs() % 86400;
    let hours = (day_secs / 3600) as u32;
    let minutes = ((day_secs % 3600) / 60) as u32;
    let seconds = (day_secs % 60) as f64 + f64::from(now.subsec_millis()) / 1e3;
    (hours, minutes, seconds)
}

/// Build one GGA sentence for a fixed position.
fn gga_sentence(path: &GgaPath) -> Vec<u8> {
    let (hours, minutes, seconds) = utc_time_of_day();

    let lat_abs = path.lat.abs();
    let lat_deg = lat_abs.trunc();
    let lat_min = (lat_abs - lat_deg) * 60.0;
    let lon_abs = path.lon.abs();
    let lon_deg = lon_abs.trunc();
    let lon_min = (lon_abs - lon_deg) * 60.0;

    let fields = vec![
        format!("{hours:02}{minutes:02}{seconds:05.2}"),
        format!("{:02.0}{:08.5}", lat_deg, lat_min),
        (if path.lat < 0.0 { "S" } else { "N" }).to_owned(),
        format!("{:03.0}{:08.5}", lon_deg, lon_min),
        (if path.lon < 0.0 { "W" } else { "E" }).to_owned(),
        "1".to_owned(),
        "12".to_owned(),
        "1.0".to_owned(),
        format!("{:.1}", path.height),
        "M".to_owned(),
        "0.0".to_owned(),
        "M".to_owned(),
        String::new(),
        String::new(),
    ];
    nmea::sentence(&path.talker, "GGA", &fields)
}

/// MSB-first bit packer for RTCM3 payloads.
struct BitWriter {
    buf: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            bits: 0,
        }
    }

    fn put(&mut self, width: usize, value: u64) {
        for ix in (0..width).rev() {
            if self.bits % 8 == 0 {
                self.buf.push(0);
            }
            let bit = ((value >> ix) & 1) as u8;
            let byte = self.bits / 8;
            self.buf[byte] |= bit << (7 - (self.bits % 8));
            self.bits += 1;
        }
    }

    fn put_signed(&mut self, width: usize, value: i64) {
        self.put(width, (value as u64) & ((1u64 << width) - 1));
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Build one RTCM3 station reference message (type 1005, 1006 or 1032).
fn sta_message(path: &StaPath) -> Vec<u8> {
    // ECEF coordinates in 0.1 mm units
    let x = (path.ecef_x * 1e4).round() as i64;
    let y = (path.ecef_y * 1e4).round() as i64;
    let z = (path.ecef_z * 1e4).round() as i64;

    let mut writer = BitWriter::new();
    writer.put(12, u64::from(path.msg_type));
    writer.put(12, u64::from(path.sta_id));
    match path.msg_type {
        1032 => {
            // Physical reference station position: no indicator flags
            writer.put(6, 0); // ITRF realization year
            writer.put_signed(38, x);
            writer.put_signed(38, y);
            writer.put_signed(38, z);
        }
        _ => {
            writer.put(6, 0); // ITRF realization year
            writer.put(1, 1); // GPS indicator
            writer.put(1, 1); // GLONASS indicator
            writer.put(1, 1); // Galileo indicator
            writer.put(1, 0); // reference-station indicator
            writer.put_signed(38, x);
            writer.put(1, 1); // single receiver oscillator
            writer.put(1, 0); // reserved
            writer.put_signed(38, y);
            writer.put(2, 0); // quarter cycle indicator
            writer.put_signed(38, z);
            if path.msg_type == 1006 {
                writer.put(16, 0); // antenna height
            }
        }
    }

    rtcm3::frame(&writer.finish()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use devio_rs_parser::{Parser, Protocol};

    #[test]
    fn gga_sentence_parses() {
        let path = GgaPath {
            lat: 47.3,
            lon: 8.5,
            height: 420.0,
            period_ms: 5000,
            talker: "GN".to_owned(),
        };
        let sentence = gga_sentence(&path);
        let mut parser = Parser::new();
        parser.add(&sentence);
        let msg = parser.process().unwrap();
        assert_eq!(msg.protocol, Protocol::Nmea);
        assert_eq!(msg.name, "NMEA-GN-GGA");
        let text = String::from_utf8_lossy(&msg.data).into_owned();
        assert!(text.contains(",N,"), "{text}");
        assert!(text.contains(",E,"), "{text}");
        assert!(text.contains(",420.0,M,"), "{text}");
    }

    #[test]
    fn sta_message_parses_with_type() {
        for msg_type in [1005u16, 1006, 1032] {
            let path = StaPath {
                ecef_x: 4278387.0,
                ecef_y: 635620.0,
                ecef_z: 4672340.0,
                period_ms: 5000,
                sta_id: 42,
                msg_type,
            };
            let message = sta_message(&path);
            let mut parser = Parser::new();
            parser.add(&message);
            let msg = parser.process().unwrap();
            assert_eq!(msg.protocol, Protocol::Rtcm3);
            assert_eq!(msg.name, format!("RTCM3-TYPE{msg_type}"));
        }
    }

    #[test]
    fn bit_writer_packs_msb_first() {
        let mut writer = BitWriter::new();
        writer.put(12, 1005);
        writer.put(4, 0xf);
        let bytes = writer.finish();
        // 1005 = 0b0011_1110_1101
        assert_eq!(bytes, vec![0x3e, 0xdf]);
    }
}
