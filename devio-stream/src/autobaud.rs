//! The autobauder: discovers a device's baudrate by probing the known rates,
//! parametrized over any transport that can switch rates.

use std::sync::Arc;
use std::time::Duration;

use devio_rs_parser::{Parser, Protocol, fpb, ubx};
use devio_rs_protocol::{AutobaudMode, BAUDRATES, StreamError};
use tracing::debug;

use crate::base::StreamShared;

/// What a transport must offer to be autobaudable. Implemented by the serial
/// port and the telnet/RFC2217 session.
pub(crate) trait BaudProbe {
    /// Switch the line rate. A failure here aborts the whole run.
    async fn set_baud(&mut self, baudrate: u32) -> bool;
    /// Send probe bytes.
    async fn send(&mut self, data: &[u8]) -> std::io::Result<()>;
    /// Read raw device bytes (transport framing already stripped).
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// One probing step.
#[derive(Clone, Debug)]
pub(crate) struct AutobaudStep {
    pub baudrate: u32,
    pub probe: Vec<u8>,
    /// Message name that proves the rate; empty = any non-garbage message.
    pub expected: String,
    pub timeout: Duration,
}

const FIRST_PASS_TIMEOUT: Duration = Duration::from_millis(500);
const SECOND_PASS_TIMEOUT: Duration = Duration::from_millis(1500);

// 8x 0x55 wakes up and rate-trains a receiver before the actual poll
const TRAINING_SEQUENCE: [u8; 8] = [0x55; 8];

fn probe_payload(mode: AutobaudMode) -> (Vec<u8>, String) {
    match mode {
        AutobaudMode::None | AutobaudMode::Passive => (Vec::new(), String::new()),
        AutobaudMode::Ubx => {
            let mut probe = TRAINING_SEQUENCE.to_vec();
            probe.extend_from_slice(&ubx::mon_ver_poll());
            (probe, "UBX-MON-VER".to_owned())
        }
        AutobaudMode::Fp => {
            // Fixposition sensors announce themselves; no probe needed
            (Vec::new(), "FP_B-VERSION".to_owned())
        }
        AutobaudMode::Auto => {
            let mut probe = TRAINING_SEQUENCE.to_vec();
            probe.extend_from_slice(&ubx::mon_ver_poll());
            probe.extend_from_slice(&fpb::version_poll());
            (probe, String::new())
        }
    }
}

/// Build the ordered step list: the current rate first, then the remaining
/// rates fastest→slowest, then a full second pass fastest→slowest with a
/// longer wait.
pub(crate) fn build_steps(mode: AutobaudMode, current: u32) -> Vec<AutobaudStep> {
    let (probe, expected) = probe_payload(mode);
    let mut steps = Vec::new();

    steps.push(AutobaudStep {
        baudrate: current,
        probe: probe.clone(),
        expected: expected.clone(),
        timeout: FIRST_PASS_TIMEOUT,
    });
    for &baudrate in BAUDRATES.iter().rev() {
        if baudrate != current {
            steps.push(AutobaudStep {
                baudrate,
                probe: probe.clone(),
                expected: expected.clone(),
                timeout: FIRST_PASS_TIMEOUT,
            });
        }
    }
    for &baudrate in BAUDRATES.iter().rev() {
        steps.push(AutobaudStep {
            baudrate,
            probe: probe.clone(),
            expected: expected.clone(),
            timeout: SECOND_PASS_TIMEOUT,
        });
    }
    steps
}

/// Run the autobaud procedure. On success the discovered rate has been
/// committed into the stream options (each attempted rate is committed as it
/// is tried, so the options always reflect the line). Returns false when all
/// steps are exhausted or the transport failed.
pub(crate) async fn run<P: BaudProbe>(
    shared: &Arc<StreamShared>,
    probe: &mut P,
    mode: AutobaudMode,
) -> bool {
    if mode == AutobaudMode::None {
        return true;
    }

    debug!("autobaud {}", mode.as_str());
    let steps = build_steps(mode, shared.baudrate());
    let total = steps.len();
    let mut parser = Parser::new();
    let mut buf = vec![0u8; 2048];

    for (index, step) in steps.iter().enumerate() {
        if !probe.set_baud(step.baudrate).await {
            return false;
        }
        shared.set_state_connecting(&format!(
            "autobaud {} {}/{} {} ({}ms)",
            mode.as_str(),
            index + 1,
            total,
            step.baudrate,
            step.timeout.as_millis()
        ));
        if !step.probe.is_empty() && probe.send(&step.probe).await.is_err() {
            shared.set_state_error(StreamError::DeviceFail, "send probe failed");
            return false;
        }
        parser.reset();

        let deadline = tokio::time::Instant::now() + step.timeout;
        'step: loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break 'step;
            }
            match tokio::time::timeout(remaining, probe.read(&mut buf)).await {
                Err(_) => break 'step,
                Ok(Ok(0)) => {
                    shared.set_state_error(StreamError::DeviceFail, "read: eof");
                    return false;
                }
                Ok(Ok(n)) => {
                    if !parser.add(&buf[..n]) {
                        parser.reset();
                        parser.add(&buf[..n]);
                    }
                    while let Some(msg) = parser.process() {
                        // Keep real messages for the application
                        if msg.protocol != Protocol::Other {
                            shared.process_read(&msg.data);
                        }
                        let matched = if step.expected.is_empty() {
                            msg.protocol != Protocol::Other
                        } else {
                            msg.name == step.expected
                        };
                        if matched {
                            debug!("autobaud success: {} at {}", msg.name, step.baudrate);
                            return true;
                        }
                    }
                }
                Ok(Err(e)) => {
                    shared.set_state_error(StreamError::DeviceFail, &format!("read: {e}"));
                    return false;
                }
            }
        }
    }

    debug!("autobaud exhausted all rates");
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_list_order_and_timeouts() {
        let steps = build_steps(AutobaudMode::Ubx, 115200);
        // 8 rates: current + 7 others, then a full second pass
        assert_eq!(steps.len(), 16);
        assert_eq!(steps[0].baudrate, 115200);
        assert_eq!(steps[0].timeout, FIRST_PASS_TIMEOUT);
        assert_eq!(steps[1].baudrate, 921600);
        assert_eq!(steps[7].baudrate, 9600);
        assert_eq!(steps[8].baudrate, 921600);
        assert_eq!(steps[8].timeout, SECOND_PASS_TIMEOUT);
        assert_eq!(steps[15].baudrate, 9600);
        assert!(steps.iter().all(|s| s.expected == "UBX-MON-VER"));
    }

    #[test]
    fn probe_payloads_per_mode() {
        let (probe, expected) = probe_payload(AutobaudMode::Ubx);
        assert!(probe.starts_with(&TRAINING_SEQUENCE));
        assert!(probe.ends_with(&ubx::mon_ver_poll()));
        assert_eq!(expected, "UBX-MON-VER");

        let (probe, expected) = probe_payload(AutobaudMode::Fp);
        assert!(probe.is_empty());
        assert_eq!(expected, "FP_B-VERSION");

        let (probe, expected) = probe_payload(AutobaudMode::Auto);
        assert!(probe.ends_with(&fpb::version_poll()));
        assert!(expected.is_empty());

        let (probe, expected) = probe_payload(AutobaudMode::Passive);
        assert!(probe.is_empty());
        assert!(expected.is_empty());
    }

    #[test]
    fn second_pass_covers_every_rate() {
        let steps = build_steps(AutobaudMode::Passive, 9600);
        let second_pass: Vec<u32> = steps[8..].iter().map(|s| s.baudrate).collect();
        let mut expected: Vec<u32> = BAUDRATES.to_vec();
        expected.reverse();
        assert_eq!(second_pass, expected);
    }
}
