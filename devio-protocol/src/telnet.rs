//! Telnet (RFC854) and COM-port-option (RFC2217) protocol logic.
//!
//! Covers the three things the telnet transport needs: the option
//! negotiation table (what we offer/demand and how replies resolve it), the
//! COM-port-option subnegotiation encoder, and the bidirectional in-band
//! filtering of `IAC` control sequences.
//!
//! Relevant specs: RFC854 (telnet), RFC855 (options), RFC856 (binary
//! transmission), RFC858 (suppress go ahead), RFC2217 (com port control).

/// Telnet command codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TelnetCode {
    /// End of subnegotiation parameters.
    Se = 240,
    Nop = 241,
    /// Data mark.
    Dm = 242,
    Brk = 243,
    /// Interrupt process.
    Ip = 244,
    /// Abort output.
    Ao = 245,
    /// Are you there.
    Ayt = 246,
    /// Erase character.
    Ec = 247,
    /// Erase line.
    El = 248,
    /// Go ahead.
    Ga = 249,
    /// Subnegotiation parameters follow.
    Sb = 250,
    /// Sender wants to enable an option on its side.
    Will = 251,
    /// Sender refuses an option on its side.
    Wont = 252,
    /// Sender demands the peer enables an option.
    Do = 253,
    /// Sender demands the peer disables an option.
    Dont = 254,
    /// Interpret as command.
    Iac = 255,
}

pub const IAC: u8 = TelnetCode::Iac as u8;
pub const SB: u8 = TelnetCode::Sb as u8;
pub const SE: u8 = TelnetCode::Se as u8;

impl TelnetCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Se => "SE",
            Self::Nop => "NOP",
            Self::Dm => "DM",
            Self::Brk => "BRK",
            Self::Ip => "IP",
            Self::Ao => "AO",
            Self::Ayt => "AYT",
            Self::Ec => "EC",
            Self::El => "EL",
            Self::Ga => "GA",
            Self::Sb => "SB",
            Self::Will => "WILL",
            Self::Wont => "WONT",
            Self::Do => "DO",
            Self::Dont => "DONT",
            Self::Iac => "IAC",
        }
    }
}

/// Telnet options we know about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TelnetOption {
    TransmitBinary = 0,
    Echo = 1,
    SuppressGoAhead = 3,
    Linemode = 34,
    ComPortOption = 44,
}

impl TelnetOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransmitBinary => "TRANSMIT_BINARY",
            Self::Echo => "ECHO",
            Self::SuppressGoAhead => "SUPPRESS_GO_AHEAD",
            Self::Linemode => "LINEMODE",
            Self::ComPortOption => "COM_PORT_OPTION",
        }
    }
}

/// Name an option byte, known or not.
pub fn option_name(option: u8) -> String {
    match option {
        0 => "TRANSMIT_BINARY".to_owned(),
        1 => "ECHO".to_owned(),
        3 => "SUPPRESS_GO_AHEAD".to_owned(),
        34 => "LINEMODE".to_owned(),
        44 => "COM_PORT_OPTION".to_owned(),
        other => format!("OPTION_{other}"),
    }
}

/// Outcome of one offered/demanded option.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionOutcome {
    /// No reply seen yet.
    Unspecified,
    /// Peer agreed.
    Ack,
    /// Peer refused.
    Nak,
}

/// One entry in the negotiation table: what we sent and how it resolved.
#[derive(Clone, Debug)]
pub struct OptionEntry {
    pub code: TelnetCode,
    pub option: TelnetOption,
    pub outcome: OptionOutcome,
}

/// The pending option table for a client negotiation.
#[derive(Clone, Debug)]
pub struct Negotiation {
    entries: Vec<OptionEntry>,
}

impl Negotiation {
    /// The fixed offer/demand set of the RFC2217 client: DO and WILL for
    /// binary transmission, suppress-go-ahead and com-port-option.
    ///
    /// ECHO and LINEMODE are deliberately not negotiated; several servers
    /// answer them nonsensically.
    pub fn client_offer() -> Self {
        let mut entries = Vec::new();
        for code in [TelnetCode::Do, TelnetCode::Will] {
            for option in [
                TelnetOption::TransmitBinary,
                TelnetOption::SuppressGoAhead,
                TelnetOption::ComPortOption,
            ] {
                entries.push(OptionEntry {
                    code,
                    option,
                    outcome: OptionOutcome::Unspecified,
                });
            }
        }
        Self { entries }
    }

    /// The `IAC <code> <option>` triplets to send.
    pub fn request_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * 3);
        for entry in &self.entries {
            out.push(IAC);
            out.push(entry.code as u8);
            out.push(entry.option as u8);
        }
        out
    }

    /// Resolve one inbound reply against the pending table.
    ///
    /// A reply acknowledges the matching opposite-side entry (we say DO, they
    /// say WILL) or refuses it (we say DO, they say WONT). Replies for
    /// options we never negotiated are ignored.
    pub fn process(&mut self, code: TelnetCode, option: u8) {
        let (ack_code, nak_code) = match code {
            TelnetCode::Do => (TelnetCode::Will, TelnetCode::Wont),
            TelnetCode::Dont => (TelnetCode::Wont, TelnetCode::Will),
            TelnetCode::Will => (TelnetCode::Do, TelnetCode::Dont),
            TelnetCode::Wont => (TelnetCode::Dont, TelnetCode::Do),
            _ => return,
        };
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.code == ack_code && e.option as u8 == option)
        {
            entry.outcome = OptionOutcome::Ack;
        } else if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.code == nak_code && e.option as u8 == option)
        {
            entry.outcome = OptionOutcome::Nak;
        }
    }

    /// True once every entry has an outcome.
    pub fn is_complete(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.outcome != OptionOutcome::Unspecified)
    }

    /// The refused entries, as `"<code> <option>"` strings.
    pub fn refused(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.outcome == OptionOutcome::Nak)
            .map(|e| format!("{} {}", e.code.as_str(), e.option.as_str()))
            .collect()
    }

    pub fn entries(&self) -> &[OptionEntry] {
        &self.entries
    }
}

/// RFC2217 COM-port-option commands (client-to-server values; the server
/// replies with the value + 100).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CpoCommand {
    Signature = 0,
    SetBaudrate = 1,
    SetDatasize = 2,
    SetParity = 3,
    SetStopsize = 4,
    SetControl = 5,
    NotifyLinestate = 6,
    NotifyModemstate = 7,
    FlowcontrolSuspend = 8,
    FlowcontrolResume = 9,
    SetLinestateMask = 10,
    SetModemstateMask = 11,
    PurgeData = 12,
    /// Pseudo-command: an empty SIGNATURE, which asks the server for its
    /// signature.
    PollSignature = 200,
}

impl CpoCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signature => "SIGNATURE",
            Self::SetBaudrate => "SET_BAUDRATE",
            Self::SetDatasize => "SET_DATASIZE",
            Self::SetParity => "SET_PARITY",
            Self::SetStopsize => "SET_STOPSIZE",
            Self::SetControl => "SET_CONTROL",
            Self::NotifyLinestate => "NOTIFY_LINESTATE",
            Self::NotifyModemstate => "NOTIFY_MODEMSTATE",
            Self::FlowcontrolSuspend => "FLOWCONTROL_SUSPEND",
            Self::FlowcontrolResume => "FLOWCONTROL_RESUME",
            Self::SetLinestateMask => "SET_LINESTATE_MASK",
            Self::SetModemstateMask => "SET_MODEMSTATE_MASK",
            Self::PurgeData => "PURGE_DATA",
            Self::PollSignature => "POLL_SIGNATURE",
        }
    }
}

/// SET_DATASIZE values.
pub const CPO_DATASIZE_EIGHT: u32 = 8;
/// SET_PARITY values.
pub const CPO_PARITY_NONE: u32 = 1;
/// SET_STOPSIZE values.
pub const CPO_STOPSIZE_ONE: u32 = 1;
/// SET_CONTROL values.
pub const CPO_CONTROL_NONE: u32 = 1;
pub const CPO_CONTROL_XONOFF: u32 = 2;
pub const CPO_CONTROL_HARDWARE: u32 = 3;
pub const CPO_CONTROL_DTR_OFF: u32 = 9;
pub const CPO_CONTROL_RTS_OFF: u32 = 12;
/// PURGE_DATA values.
pub const CPO_PURGE_BOTH: u32 = 3;

/// Maximum signature length we send.
const MAX_SIGNATURE_LEN: usize = 32;

/// Encode one COM-port-option subnegotiation:
/// `IAC SB COM_PORT_OPTION <command> [<data>] IAC SE`.
///
/// `payload` carries the numeric argument where the command takes one;
/// `signature` is used by [`CpoCommand::Signature`]. Returns `None` for
/// commands a client cannot send.
pub fn encode_cpo(command: CpoCommand, payload: u32, signature: &str) -> Option<Vec<u8>> {
    let mut out = vec![IAC, SB, TelnetOption::ComPortOption as u8];
    match command {
        CpoCommand::PollSignature => {
            out.push(CpoCommand::Signature as u8);
        }
        CpoCommand::Signature => {
            out.push(CpoCommand::Signature as u8);
            let sig = signature.as_bytes();
            out.extend_from_slice(&sig[..sig.len().min(MAX_SIGNATURE_LEN)]);
        }
        CpoCommand::SetBaudrate => {
            out.push(CpoCommand::SetBaudrate as u8);
            out.extend_from_slice(&payload.to_be_bytes());
        }
        CpoCommand::SetDatasize
        | CpoCommand::SetParity
        | CpoCommand::SetStopsize
        | CpoCommand::SetControl
        | CpoCommand::NotifyLinestate
        | CpoCommand::NotifyModemstate
        | CpoCommand::SetLinestateMask
        | CpoCommand::SetModemstateMask
        | CpoCommand::PurgeData => {
            out.push(command as u8);
            out.push((payload & 0xff) as u8);
        }
        CpoCommand::FlowcontrolSuspend | CpoCommand::FlowcontrolResume => {
            out.push(command as u8);
        }
    }
    out.push(IAC);
    out.push(SE);
    Some(out)
}

/// Double literal `0xff` bytes for transmission (RFC854).
pub fn escape_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        if b == IAC {
            out.push(IAC);
        }
        out.push(b);
    }
    out
}

/// Control event extracted from the inbound byte stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TelnetEvent {
    /// `IAC <code> <option>` negotiation reply.
    Negotiate { code: TelnetCode, option: u8 },
    /// `IAC SB <bytes> IAC SE` subnegotiation; the first byte is the option.
    Suboption(Vec<u8>),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum RxState {
    #[default]
    Normal,
    IacSeen,
    Negotiate,
    Subopt,
    SuboptIacSeen,
}

/// Stateful inbound filter: strips telnet control sequences from the byte
/// stream, keeping user data and surfacing control events. Survives
/// sequences split across reads.
#[derive(Clone, Debug, Default)]
pub struct RxFilter {
    state: RxState,
    code: u8,
    subopt: Vec<u8>,
}

impl RxFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter `data` in place. User bytes are compacted to the front; the
    /// returned length says how many are valid. Control sequences become
    /// [`TelnetEvent`]s.
    pub fn filter(&mut self, data: &mut [u8]) -> (usize, Vec<TelnetEvent>) {
        let mut events = Vec::new();
        let mut kept = 0;
        for ix in 0..data.len() {
            let byte = data[ix];
            match self.state {
                RxState::Normal => {
                    if byte == IAC {
                        self.state = RxState::IacSeen;
                    } else {
                        data[kept] = byte;
                        kept += 1;
                    }
                }
                RxState::IacSeen => match byte {
                    IAC => {
                        // Escaped 0xff user byte
                        data[kept] = byte;
                        kept += 1;
                        self.state = RxState::Normal;
                    }
                    b if b == TelnetCode::Do as u8
                        || b == TelnetCode::Dont as u8
                        || b == TelnetCode::Will as u8
                        || b == TelnetCode::Wont as u8 =>
                    {
                        self.code = b;
                        self.state = RxState::Negotiate;
                    }
                    b if b == SB => {
                        self.subopt.clear();
                        self.state = RxState::Subopt;
                    }
                    // All other commands carry no argument
                    _ => {
                        self.state = RxState::Normal;
                    }
                },
                RxState::Negotiate => {
                    let code = match self.code {
                        b if b == TelnetCode::Do as u8 => TelnetCode::Do,
                        b if b == TelnetCode::Dont as u8 => TelnetCode::Dont,
                        b if b == TelnetCode::Will as u8 => TelnetCode::Will,
                        _ => TelnetCode::Wont,
                    };
                    events.push(TelnetEvent::Negotiate { code, option: byte });
                    self.state = RxState::Normal;
                }
                RxState::Subopt => {
                    if byte == IAC {
                        self.state = RxState::SuboptIacSeen;
                    } else {
                        self.subopt.push(byte);
                    }
                }
                RxState::SuboptIacSeen => match byte {
                    IAC => {
                        // Escaped 0xff inside the suboption
                        self.subopt.push(byte);
                        self.state = RxState::Subopt;
                    }
                    b if b == SE => {
                        events.push(TelnetEvent::Suboption(std::mem::take(&mut self.subopt)));
                        self.state = RxState::Normal;
                    }
                    // Only IAC IAC or IAC SE are valid inside a suboption
                    _ => {
                        self.subopt.clear();
                        self.state = RxState::Normal;
                    }
                },
            }
        }
        (kept, events)
    }
}
