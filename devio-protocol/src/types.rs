//! Core enums and constants shared across the workspace.

/// Stream types. One per spec scheme; the set is closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamType {
    /// Serial port or UART (`serial://`).
    Serial,
    /// TCP client (`tcpcli://`).
    TcpCli,
    /// TCP client with TLS (`tcpclis://`).
    TcpCliS,
    /// NTRIP client (`ntripcli://`).
    NtripCli,
    /// NTRIP client with TLS (`ntripclis://`).
    NtripCliS,
    /// Telnet/RFC2217 client (`telnet://`).
    Telnet,
    /// Telnet/RFC2217 client with TLS (`telnets://`).
    TelnetS,
    /// NTRIP server (`ntripsvr://`).
    NtripSvr,
    /// NTRIP server with TLS (`ntripsvrs://`).
    NtripSvrS,
    /// TCP server (`tcpsvr://`).
    TcpSvr,
    /// UDP client (`udpcli://`).
    UdpCli,
    /// UDP server (`udpsvr://`).
    UdpSvr,
    /// Linux spidev master (`spidev://`).
    Spidev,
    /// SocketCAN stream (`canstr://`).
    Canstr,
    /// NMEA GGA generator (`gga://`).
    Gga,
    /// RTCM3 station message generator (`sta://`).
    Sta,
    /// Loopback/echo (`loop://`).
    Loopback,
    /// File writer (`fileout://`).
    FileOut,
    /// File reader (`filein://`).
    FileIn,
    /// External program stdin/stdout (`exec://`).
    Exec,
    /// Interprocess stream server (`ipcsvr://`).
    IpcSvr,
    /// Interprocess stream client (`ipccli://`).
    IpcCli,
}

impl StreamType {
    /// Returns the type name as a static string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Serial => "SERIAL",
            Self::TcpCli => "TCPCLI",
            Self::TcpCliS => "TCPCLIS",
            Self::NtripCli => "NTRIPCLI",
            Self::NtripCliS => "NTRIPCLIS",
            Self::Telnet => "TELNET",
            Self::TelnetS => "TELNETS",
            Self::NtripSvr => "NTRIPSVR",
            Self::NtripSvrS => "NTRIPSVRS",
            Self::TcpSvr => "TCPSVR",
            Self::UdpCli => "UDPCLI",
            Self::UdpSvr => "UDPSVR",
            Self::Spidev => "SPIDEV",
            Self::Canstr => "CANSTR",
            Self::Gga => "GGA",
            Self::Sta => "STA",
            Self::Loopback => "LOOP",
            Self::FileOut => "FILEOUT",
            Self::FileIn => "FILEIN",
            Self::Exec => "EXEC",
            Self::IpcSvr => "IPCSVR",
            Self::IpcCli => "IPCCLI",
        }
    }

    /// True for the TLS variants of the TCP-family schemes.
    pub fn is_tls(&self) -> bool {
        matches!(
            self,
            Self::TcpCliS | Self::NtripCliS | Self::TelnetS | Self::NtripSvrS
        )
    }

    /// True for the NTRIP server roles (which speak the SOURCE/POST side).
    pub fn is_ntrip_server(&self) -> bool {
        matches!(self, Self::NtripSvr | Self::NtripSvrS)
    }
}

/// Stream mode: which directions of the stream are usable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamMode {
    /// Read-write.
    Rw,
    /// Read-only: writes are rejected.
    Ro,
    /// Write-only: reads are rejected.
    Wo,
}

impl StreamMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rw => "RW",
            Self::Ro => "RO",
            Self::Wo => "WO",
        }
    }
}

/// Stream connection state.
///
/// Transitions: `Closed` →(start)→ `Connecting` → `Connected` or `Error`;
/// `Connected` →(failure)→ `Error`; `Error` →(retry)→ `Connecting` or
/// (retry disabled) → `Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Closed,
    Connecting,
    Connected,
    Error,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Error => "ERROR",
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Error => 3,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Error,
            _ => Self::Closed,
        }
    }
}

/// Stream error detail, meaningful while the state is [`StreamState::Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamError {
    None,
    /// Host name resolution failed.
    ResolveFail,
    /// All candidate endpoints refused the connection.
    ConnectFail,
    /// Connect timeout expired before the pipeline completed.
    ConnectTimeout,
    /// Peer sent a response we do not understand.
    BadResponse,
    /// Authentication rejected.
    AuthFail,
    /// Device operation (open, read, write, ...) failed.
    DeviceFail,
    /// Inactivity timeout expired with no data received.
    NoDataRecv,
    /// Connection lost.
    ConnLost,
    /// Caster does not serve the requested mountpoint.
    BadMountpoint,
    /// TLS setup, handshake or verification failed.
    TlsError,
    /// Telnet option negotiation or port configuration failed.
    TelnetError,
}

impl StreamError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::ResolveFail => "RESOLVE_FAIL",
            Self::ConnectFail => "CONNECT_FAIL",
            Self::ConnectTimeout => "CONNECT_TIMEOUT",
            Self::BadResponse => "BAD_RESPONSE",
            Self::AuthFail => "AUTH_FAIL",
            Self::DeviceFail => "DEVICE_FAIL",
            Self::NoDataRecv => "NO_DATA_RECV",
            Self::ConnLost => "CONN_LOST",
            Self::BadMountpoint => "BAD_MOUNTPOINT",
            Self::TlsError => "TLS_ERROR",
            Self::TelnetError => "TELNET_ERROR",
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::ResolveFail => 1,
            Self::ConnectFail => 2,
            Self::ConnectTimeout => 3,
            Self::BadResponse => 4,
            Self::AuthFail => 5,
            Self::DeviceFail => 6,
            Self::NoDataRecv => 7,
            Self::ConnLost => 8,
            Self::BadMountpoint => 9,
            Self::TlsError => 10,
            Self::TelnetError => 11,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::ResolveFail,
            2 => Self::ConnectFail,
            3 => Self::ConnectTimeout,
            4 => Self::BadResponse,
            5 => Self::AuthFail,
            6 => Self::DeviceFail,
            7 => Self::NoDataRecv,
            8 => Self::ConnLost,
            9 => Self::BadMountpoint,
            10 => Self::TlsError,
            11 => Self::TelnetError,
            _ => Self::None,
        }
    }
}

/// Autobauding mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutobaudMode {
    /// No autobauding: use the configured baudrate as-is.
    None,
    /// Accept any non-garbage message from spontaneous device output.
    Passive,
    /// Actively detect u-blox receivers (poll UBX-MON-VER).
    Ubx,
    /// Detect Fixposition sensors (expect spontaneous FP_B-VERSION).
    Fp,
    /// Send both polls, accept any non-garbage message.
    Auto,
}

impl AutobaudMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Passive => "passive",
            Self::Ubx => "ubx",
            Self::Fp => "fp",
            Self::Auto => "auto",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::None),
            "passive" => Some(Self::Passive),
            "ubx" => Some(Self::Ubx),
            "fp" => Some(Self::Fp),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

/// Serial framing (data bits, parity, stop bits). Only 8N1 is supported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SerialFraming {
    Mode8N1,
}

impl SerialFraming {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mode8N1 => "8N1",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "8N1" => Some(Self::Mode8N1),
            _ => None,
        }
    }
}

/// Serial flow control.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SerialFlow {
    Off,
    Sw,
    Hw,
}

impl SerialFlow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Sw => "sw",
            Self::Hw => "hw",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "off" => Some(Self::Off),
            "sw" => Some(Self::Sw),
            "hw" => Some(Self::Hw),
            _ => None,
        }
    }
}

/// Valid baudrates, ordered by increasing speed.
pub const BAUDRATES: [u32; 8] = [
    9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600,
];

/// Default baudrate for serial and telnet streams.
pub const DEFAULT_BAUDRATE: u32 = 115200;

/// Default baudrate for ACM devices, which have no physical line rate.
pub const ACM_BAUDRATE: u32 = 921600;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_u8_roundtrip() {
        for state in [
            StreamState::Closed,
            StreamState::Connecting,
            StreamState::Connected,
            StreamState::Error,
        ] {
            assert_eq!(StreamState::from_u8(state.to_u8()), state);
        }
    }

    #[test]
    fn error_u8_roundtrip() {
        for value in 0..=11 {
            assert_eq!(StreamError::from_u8(value).to_u8(), value);
        }
    }

    #[test]
    fn autobaud_mode_strings() {
        for mode in [
            AutobaudMode::None,
            AutobaudMode::Passive,
            AutobaudMode::Ubx,
            AutobaudMode::Fp,
            AutobaudMode::Auto,
        ] {
            assert_eq!(AutobaudMode::from_str(mode.as_str()), Some(mode));
        }
        assert_eq!(AutobaudMode::from_str("bogus"), None);
    }

    #[test]
    fn tls_types() {
        assert!(StreamType::TcpCliS.is_tls());
        assert!(StreamType::NtripSvrS.is_tls());
        assert!(!StreamType::Telnet.is_tls());
    }
}
