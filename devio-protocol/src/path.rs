//! Per-scheme path grammars and the typed [`StreamPath`] they produce.
//!
//! Each parser collects its problems into the shared error list instead of
//! stopping at the first one, so a caller sees everything wrong with a spec
//! in a single pass.

use crate::credentials::{self, Auth};
use crate::ntrip::NtripVersion;
use crate::types::{
    ACM_BAUDRATE, AutobaudMode, BAUDRATES, DEFAULT_BAUDRATE, SerialFlow, SerialFraming, StreamType,
};

pub const PORT_MIN: u16 = 1;
pub const MAX_PATH_LEN: usize = 2000;

/// `<host>:<port>` endpoint; `ipv6` records whether the host was given in
/// brackets (which restricts resolution to IPv6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
    pub ipv6: bool,
}

impl std::fmt::Display for HostPort {
    /// Canonical `host:port` (with brackets for IPv6 hosts).
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ipv6 {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SerialPath {
    pub device: String,
    pub baudrate: u32,
    pub autobaud: AutobaudMode,
    pub framing: SerialFraming,
    pub flow: SerialFlow,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NtripPath {
    pub endpoint: HostPort,
    /// The credentials exactly as given in the spec (may be empty for
    /// clients). Kept so the canonical spec round-trips.
    pub credentials: String,
    pub auth: Auth,
    pub mountpoint: String,
    pub version: NtripVersion,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TelnetPath {
    pub endpoint: HostPort,
    pub baudrate: u32,
    pub autobaud: AutobaudMode,
    pub framing: SerialFraming,
    pub flow: SerialFlow,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpidevPath {
    pub device: String,
    pub speed: u32,
    pub bits_per_word: u8,
    pub xfer_size: u32,
    pub mode: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CanstrPath {
    pub device: String,
    pub canid_in: u32,
    pub canid_out: u32,
    pub eff: bool,
    pub fd: bool,
    pub brs: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GgaPath {
    pub lat: f64,
    pub lon: f64,
    pub height: f64,
    pub period_ms: u32,
    pub talker: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StaPath {
    pub ecef_x: f64,
    pub ecef_y: f64,
    pub ecef_z: f64,
    pub period_ms: u32,
    pub sta_id: u16,
    pub msg_type: u16,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoopPath {
    pub delay_ms: f64,
    pub rate: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FileOutPath {
    pub file: String,
    pub swap_s: Option<i32>,
    pub sidecar: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FileInPath {
    pub file: String,
    pub speed: f64,
    pub offset_s: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExecPath {
    pub argv: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IpcPath {
    pub name: String,
}

/// The typed, per-scheme path. A closed set of variants selected by the
/// scheme at parse time.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamPath {
    Serial(SerialPath),
    TcpClient(HostPort),
    Ntrip(NtripPath),
    Telnet(TelnetPath),
    TcpServer(HostPort),
    UdpClient(HostPort),
    UdpServer(HostPort),
    Spidev(SpidevPath),
    Canstr(CanstrPath),
    Gga(GgaPath),
    Sta(StaPath),
    Loopback(LoopPath),
    FileOut(FileOutPath),
    FileIn(FileInPath),
    Exec(ExecPath),
    Ipc(IpcPath),
}

impl StreamPath {
    /// Rebuild the canonical path string (all defaults made explicit).
    pub fn canonical(&self) -> String {
        match self {
            Self::Serial(p) => format!(
                "{}:{}:{}:{}:{}",
                p.device,
                p.baudrate,
                p.autobaud.as_str(),
                p.framing.as_str(),
                p.flow.as_str()
            ),
            Self::TcpClient(hp) | Self::TcpServer(hp) | Self::UdpClient(hp) | Self::UdpServer(hp) => {
                hp.to_string()
            }
            Self::Ntrip(p) => format!(
                "{}{}{}/{}:{}",
                p.credentials,
                if p.credentials.is_empty() { "" } else { "@" },
                p.endpoint.to_string(),
                p.mountpoint,
                p.version.as_str()
            ),
            Self::Telnet(p) => format!(
                "{}:{}:{}:{}:{}",
                p.endpoint.to_string(),
                p.baudrate,
                p.autobaud.as_str(),
                p.framing.as_str(),
                p.flow.as_str()
            ),
            Self::Spidev(p) => format!(
                "{}:{}:{}:{}:0x{:08x}",
                p.device, p.speed, p.bits_per_word, p.xfer_size, p.mode
            ),
            Self::Canstr(p) => format!(
                "{}:0x{:x}:0x{:x}:{}:{}:{}",
                p.device,
                p.canid_in,
                p.canid_out,
                if p.eff { "eff" } else { "sff" },
                if p.fd { "fd" } else { "" },
                if p.brs { "brs" } else { "" }
            ),
            Self::Gga(p) => format!(
                "{:.8}/{:.8}/{:.1}:{:.1}:{}",
                p.lat,
                p.lon,
                p.height,
                p.period_ms as f64 * 1e-3,
                p.talker
            ),
            Self::Sta(p) => format!(
                "{:.2}/{:.2}/{:.2}:{:.1}:{}:{}",
                p.ecef_x,
                p.ecef_y,
                p.ecef_z,
                p.period_ms as f64 * 1e-3,
                p.sta_id,
                p.msg_type
            ),
            Self::Loopback(p) => format!("{:.3}:{}", p.delay_ms, p.rate),
            Self::FileOut(p) => format!(
                "{}:{}:{}",
                p.file,
                p.swap_s.map(|s| s.to_string()).unwrap_or_default(),
                if p.sidecar { "ts" } else { "" }
            ),
            Self::FileIn(p) => format!("{}:{}:{}", p.file, p.speed, p.offset_s),
            Self::Exec(p) => p.argv.join(":"),
            Self::Ipc(p) => p.name.clone(),
        }
    }

    /// Display form: like [`canonical`](Self::canonical) but with secrets
    /// stripped.
    pub fn display(&self) -> String {
        match self {
            Self::Ntrip(p) => format!(
                "{}{}/{}",
                if p.credentials.is_empty() { "" } else { "*****@" },
                p.endpoint.to_string(),
                p.mountpoint
            ),
            Self::Exec(p) => p.argv.first().cloned().unwrap_or_default(),
            other => other.canonical(),
        }
    }
}

/// Match `[<host>]:<port>` or `<host>:<port>`; the host may be empty when
/// `require_host` is false (server streams bind all interfaces then).
pub fn match_host_port(path: &str, require_host: bool) -> Option<HostPort> {
    let (host_part, port_part) = path.rsplit_once(':')?;
    if port_part.is_empty() || !port_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let port: u16 = port_part.parse().ok()?;
    if port < PORT_MIN {
        return None;
    }
    let (host, ipv6) = if let Some(inner) = host_part.strip_prefix('[') {
        let inner = inner.strip_suffix(']')?;
        if inner.is_empty() {
            return None;
        }
        (inner.to_owned(), true)
    } else {
        (host_part.to_owned(), false)
    };
    if require_host && host.is_empty() {
        return None;
    }
    Some(HostPort { host, port, ipv6 })
}

/// Parse the `[:<baudrate>[:<autobaud>[:<mode>[:<flow>]]]]` tail shared by
/// serial and telnet paths. `parts` holds the tail fields only.
fn parse_serial_tail(
    parts: &[&str],
    default_baudrate: u32,
    errors: &mut Vec<String>,
) -> (u32, AutobaudMode, SerialFraming, SerialFlow) {
    let mut baudrate = default_baudrate;
    let mut autobaud = AutobaudMode::None;
    let mut framing = SerialFraming::Mode8N1;
    let mut flow = SerialFlow::Off;

    if let Some(field) = parts.first() {
        match field.parse::<u32>() {
            Ok(value) if BAUDRATES.contains(&value) => baudrate = value,
            _ => errors.push("bad <baudrate>".to_owned()),
        }
    }
    if let Some(field) = parts.get(1) {
        match AutobaudMode::from_str(&field.to_lowercase()) {
            Some(mode) => autobaud = mode,
            None => errors.push("bad <autobaud>".to_owned()),
        }
    }
    if let Some(field) = parts.get(2) {
        match SerialFraming::from_str(field) {
            Some(value) => framing = value,
            None => errors.push("bad <mode>".to_owned()),
        }
    }
    if let Some(field) = parts.get(3) {
        match SerialFlow::from_str(field) {
            Some(value) => flow = value,
            None => errors.push("bad <flow>".to_owned()),
        }
    }

    (baudrate, autobaud, framing, flow)
}

/// Parse a scheme-specific path. Problems go to `errors`; a best-effort
/// result is still returned when possible so option parsing can continue and
/// report its own problems too.
pub fn parse(stype: StreamType, path: &str, errors: &mut Vec<String>) -> Option<StreamPath> {
    match stype {
        StreamType::Serial => parse_serial(path, errors),
        StreamType::TcpCli | StreamType::TcpCliS => {
            match match_host_port(path, true) {
                Some(hp) => Some(StreamPath::TcpClient(hp)),
                None => {
                    errors.push("bad <host> or <port>".to_owned());
                    None
                }
            }
        }
        StreamType::NtripCli | StreamType::NtripCliS | StreamType::NtripSvr | StreamType::NtripSvrS => {
            parse_ntrip(stype, path, errors)
        }
        StreamType::Telnet | StreamType::TelnetS => parse_telnet(path, errors),
        StreamType::TcpSvr => match match_host_port(path, false) {
            Some(hp) => Some(StreamPath::TcpServer(hp)),
            None => {
                errors.push("bad <host> or <port>".to_owned());
                None
            }
        },
        StreamType::UdpCli => match match_host_port(path, true) {
            Some(hp) => Some(StreamPath::UdpClient(hp)),
            None => {
                errors.push("bad <host> or <port>".to_owned());
                None
            }
        },
        StreamType::UdpSvr => match match_host_port(path, false) {
            Some(hp) => Some(StreamPath::UdpServer(hp)),
            None => {
                errors.push("bad <host> or <port>".to_owned());
                None
            }
        },
        StreamType::Spidev => parse_spidev(path, errors),
        StreamType::Canstr => parse_canstr(path, errors),
        StreamType::Gga => parse_gga(path, errors),
        StreamType::Sta => parse_sta(path, errors),
        StreamType::Loopback => parse_loop(path, errors),
        StreamType::FileOut => parse_fileout(path, errors),
        StreamType::FileIn => parse_filein(path, errors),
        StreamType::Exec => parse_exec(path, errors),
        StreamType::IpcSvr | StreamType::IpcCli => parse_ipc(path, errors),
    }
}

fn parse_serial(path: &str, errors: &mut Vec<String>) -> Option<StreamPath> {
    // "<device>[:<baudrate>[:<autobaud>[:<mode>[:<flow>]]]]"
    let parts: Vec<&str> = path.split(':').collect();
    if parts.is_empty() || parts.len() > 5 || parts[0].is_empty() {
        errors.push("bad <device> or <baudrate>".to_owned());
        return None;
    }
    let device = parts[0].to_owned();
    // ACM devices have no physical line rate; default to the maximum
    let default_baudrate = if device.contains("ttyACM") || device.contains("usb-u-blox") {
        ACM_BAUDRATE
    } else {
        DEFAULT_BAUDRATE
    };
    let before = errors.len();
    let (baudrate, autobaud, framing, flow) = parse_serial_tail(&parts[1..], default_baudrate, errors);
    if errors.len() > before {
        return None;
    }
    Some(StreamPath::Serial(SerialPath {
        device,
        baudrate,
        autobaud,
        framing,
        flow,
    }))
}

fn parse_telnet(path: &str, errors: &mut Vec<String>) -> Option<StreamPath> {
    // "<host>:<port>[:<baudrate>[:<autobaud>[:<mode>[:<flow>]]]]"
    let parts: Vec<&str> = path.split(':').collect();
    if parts.len() < 2 || parts.len() > 6 || parts[0].is_empty() {
        errors.push("bad <host> or <port>".to_owned());
        return None;
    }
    let before = errors.len();
    let endpoint = match match_host_port(&format!("{}:{}", parts[0], parts[1]), true) {
        Some(hp) => Some(hp),
        None => {
            errors.push("bad <host> or <port>".to_owned());
            None
        }
    };
    let (baudrate, autobaud, framing, flow) =
        parse_serial_tail(&parts[2..], DEFAULT_BAUDRATE, errors);
    if errors.len() > before {
        return None;
    }
    Some(StreamPath::Telnet(TelnetPath {
        endpoint: endpoint?,
        baudrate,
        autobaud,
        framing,
        flow,
    }))
}

fn parse_ntrip(stype: StreamType, path: &str, errors: &mut Vec<String>) -> Option<StreamPath> {
    // client: "[<credentials>@]<host>:<port>/<mountpoint>[:<version>]"
    // server: "<credentials>@<host>:<port>/<mountpoint>[:<version>]"
    let before = errors.len();
    let server = stype.is_ntrip_server();

    let Some((authority, resource)) = path.split_once('/') else {
        errors.push("bad path".to_owned());
        return None;
    };

    let (credentials, host_port) = match authority.rfind('@') {
        Some(ix) => (&authority[..ix], &authority[ix + 1..]),
        None => ("", authority),
    };

    let endpoint = match match_host_port(host_port, true) {
        Some(hp) => Some(hp),
        None => {
            errors.push("bad <host> or <port>".to_owned());
            None
        }
    };

    let (mountpoint, version_str) = match resource.split_once(':') {
        Some((mp, v)) => (mp, Some(v)),
        None => (resource, None),
    };
    if mountpoint.is_empty() {
        errors.push("bad <mountpoint>".to_owned());
    }

    let version = match version_str {
        None => {
            if server {
                NtripVersion::V1
            } else {
                NtripVersion::Auto
            }
        }
        Some("v1") => NtripVersion::V1,
        Some("v2") => NtripVersion::V2,
        Some("auto") if !server => NtripVersion::Auto,
        Some(_) => {
            errors.push("bad <version>".to_owned());
            NtripVersion::Auto
        }
    };

    let auth = if credentials.is_empty() {
        if server {
            errors.push("missing <credentials>".to_owned());
        }
        Auth::default()
    } else {
        match credentials::to_auth(credentials) {
            Some(auth) => auth,
            None => {
                errors.push("bad <credentials>".to_owned());
                Auth::default()
            }
        }
    };

    if errors.len() > before {
        return None;
    }
    Some(StreamPath::Ntrip(NtripPath {
        endpoint: endpoint?,
        credentials: credentials.to_owned(),
        auth,
        mountpoint: mountpoint.to_owned(),
        version,
    }))
}

fn parse_spidev(path: &str, errors: &mut Vec<String>) -> Option<StreamPath> {
    // "<device>[:<speed>[:<bpw>[:<xfersize>[:<mode>]]]]"
    let parts: Vec<&str> = path.split(':').collect();
    if parts.is_empty() || parts.len() > 5 || parts[0].is_empty() {
        errors.push("bad <device>".to_owned());
        return None;
    }
    let before = errors.len();
    let mut spidev = SpidevPath {
        device: parts[0].to_owned(),
        speed: 1_000_000,
        bits_per_word: 32,
        xfer_size: 64,
        mode: 0,
    };
    if let Some(field) = parts.get(1) {
        match field.parse::<u32>() {
            Ok(value) if value > 0 => spidev.speed = value,
            _ => errors.push("bad <speed>".to_owned()),
        }
    }
    if let Some(field) = parts.get(2) {
        match field.parse::<u8>() {
            Ok(value @ (8 | 16 | 32)) => spidev.bits_per_word = value,
            _ => errors.push("bad <bpw>".to_owned()),
        }
    }
    if let Some(field) = parts.get(3) {
        match field.parse::<u32>() {
            Ok(value) if (64..=2048).contains(&value) && value % 4 == 0 => spidev.xfer_size = value,
            _ => errors.push("bad <xfersize>".to_owned()),
        }
    }
    if let Some(field) = parts.get(4) {
        let parsed = field
            .strip_prefix("0x")
            .map_or_else(|| field.parse::<u32>().ok(), |hex| u32::from_str_radix(hex, 16).ok());
        match parsed {
            Some(value) => spidev.mode = value,
            None => errors.push("bad <mode>".to_owned()),
        }
    }
    if errors.len() > before {
        return None;
    }
    Some(StreamPath::Spidev(spidev))
}

fn parse_can_id(field: &str) -> Option<u32> {
    field
        .strip_prefix("0x")
        .map_or_else(|| field.parse::<u32>().ok(), |hex| u32::from_str_radix(hex, 16).ok())
}

fn parse_canstr(path: &str, errors: &mut Vec<String>) -> Option<StreamPath> {
    // "<dev>:<canid_in>:<canid_out>[:<ff>[:<fd>[:<brs>]]]"
    let parts: Vec<&str> = path.split(':').collect();
    if parts.len() < 3 || parts.len() > 6 || parts[0].is_empty() {
        errors.push("bad <dev>".to_owned());
        return None;
    }
    let before = errors.len();
    let mut canstr = CanstrPath {
        device: parts[0].to_owned(),
        canid_in: 0,
        canid_out: 0,
        eff: false,
        fd: false,
        brs: false,
    };
    if let Some(field) = parts.get(4) {
        match *field {
            "fd" => canstr.fd = true,
            "" => {}
            _ => errors.push("bad <fd>".to_owned()),
        }
    }
    if let Some(field) = parts.get(5) {
        match *field {
            "brs" if canstr.fd => canstr.brs = true,
            "" => {}
            _ => errors.push("bad <brs>".to_owned()),
        }
    }
    if let Some(field) = parts.get(3) {
        match *field {
            "eff" => canstr.eff = true,
            "sff" | "" => {}
            _ => errors.push("bad <ff>".to_owned()),
        }
    }
    let id_max = if canstr.eff { 0x1fff_ffff } else { 0x7ff };
    match parse_can_id(parts[1]) {
        Some(id) if (1..=id_max).contains(&id) => canstr.canid_in = id,
        _ => errors.push("bad <canid_in>".to_owned()),
    }
    match parse_can_id(parts[2]) {
        Some(id) if (1..=id_max).contains(&id) => canstr.canid_out = id,
        _ => errors.push("bad <canid_out>".to_owned()),
    }
    if errors.len() > before {
        return None;
    }
    Some(StreamPath::Canstr(canstr))
}

const GGA_PERIOD_MIN: f64 = 1.0;
const GGA_PERIOD_MAX: f64 = 86400.0;

fn parse_gga(path: &str, errors: &mut Vec<String>) -> Option<StreamPath> {
    // "<lat>/<lon>/<height>[[:<interval>]:<talker>]"
    let parts: Vec<&str> = path.split(':').collect();
    if parts.len() > 3 {
        errors.push("bad path".to_owned());
        return None;
    }
    let before = errors.len();
    let mut gga = GgaPath {
        lat: 0.0,
        lon: 0.0,
        height: 0.0,
        period_ms: 5000,
        talker: "GN".to_owned(),
    };
    let llh: Vec<&str> = parts[0].split('/').collect();
    let coords = if llh.len() == 3 {
        match (
            llh[0].parse::<f64>(),
            llh[1].parse::<f64>(),
            llh[2].parse::<f64>(),
        ) {
            (Ok(lat), Ok(lon), Ok(height))
                if (-90.0..=90.0).contains(&lat)
                    && (-180.0..=180.0).contains(&lon)
                    && (-1000.0..=10000.0).contains(&height) =>
            {
                Some((lat, lon, height))
            }
            _ => None,
        }
    } else {
        None
    };
    match coords {
        Some((lat, lon, height)) => {
            gga.lat = lat;
            gga.lon = lon;
            gga.height = height;
        }
        None => errors.push("bad <lat>/<lon>/<height>".to_owned()),
    }
    if let Some(field) = parts.get(1) {
        match field.parse::<f64>() {
            Ok(period) if (GGA_PERIOD_MIN..=GGA_PERIOD_MAX).contains(&period) => {
                gga.period_ms = (period * 1e3).round() as u32;
            }
            _ => errors.push("bad <interval>".to_owned()),
        }
    }
    if let Some(field) = parts.get(2) {
        if field.len() == 2 {
            gga.talker = (*field).to_owned();
        } else {
            errors.push("bad <talker>".to_owned());
        }
    }
    if errors.len() > before {
        return None;
    }
    Some(StreamPath::Gga(gga))
}

fn parse_sta(path: &str, errors: &mut Vec<String>) -> Option<StreamPath> {
    // "<x>/<y>/<z>[[[:<interval>]:<sta>]:<type>]"
    let parts: Vec<&str> = path.split(':').collect();
    if parts.len() > 4 {
        errors.push("bad path".to_owned());
        return None;
    }
    let before = errors.len();
    let mut sta = StaPath {
        ecef_x: 0.0,
        ecef_y: 0.0,
        ecef_z: 0.0,
        period_ms: 5000,
        sta_id: 0,
        msg_type: 1005,
    };
    let xyz: Vec<&str> = parts[0].split('/').collect();
    let coords = if xyz.len() == 3 {
        match (
            xyz[0].parse::<f64>(),
            xyz[1].parse::<f64>(),
            xyz[2].parse::<f64>(),
        ) {
            (Ok(x), Ok(y), Ok(z)) => Some((x, y, z)),
            _ => None,
        }
    } else {
        None
    };
    match coords {
        Some((x, y, z)) => {
            sta.ecef_x = x;
            sta.ecef_y = y;
            sta.ecef_z = z;
        }
        None => errors.push("bad <x>/<y>/<z>".to_owned()),
    }
    if let Some(field) = parts.get(1) {
        match field.parse::<f64>() {
            Ok(period) if (1.0..=86400.0).contains(&period) => {
                sta.period_ms = (period * 1e3).round() as u32;
            }
            _ => errors.push("bad <interval>".to_owned()),
        }
    }
    if let Some(field) = parts.get(2) {
        match field.parse::<u16>() {
            Ok(id) if id < 1024 => sta.sta_id = id,
            _ => errors.push("bad <sta>".to_owned()),
        }
    }
    if let Some(field) = parts.get(3) {
        match field.parse::<u16>() {
            Ok(t @ (1005 | 1006 | 1032)) => sta.msg_type = t,
            _ => errors.push("bad <type>".to_owned()),
        }
    }
    if errors.len() > before {
        return None;
    }
    Some(StreamPath::Sta(sta))
}

fn parse_loop(path: &str, errors: &mut Vec<String>) -> Option<StreamPath> {
    // "[<delay>][:<rate>]"
    let parts: Vec<&str> = path.split(':').collect();
    if parts.len() > 2 {
        errors.push("bad path".to_owned());
        return None;
    }
    let before = errors.len();
    let mut lp = LoopPath {
        delay_ms: 0.0,
        rate: 0,
    };
    if let Some(field) = parts.first() {
        if !field.is_empty() {
            match field.parse::<f64>() {
                Ok(delay) if (0.0..=60000.0).contains(&delay) => lp.delay_ms = delay,
                _ => errors.push("bad <delay>".to_owned()),
            }
        }
    }
    if let Some(field) = parts.get(1) {
        if !field.is_empty() {
            match field.parse::<u32>() {
                Ok(rate) => lp.rate = rate,
                _ => errors.push("bad <rate>".to_owned()),
            }
        }
    }
    if errors.len() > before {
        return None;
    }
    Some(StreamPath::Loopback(lp))
}

fn parse_fileout(path: &str, errors: &mut Vec<String>) -> Option<StreamPath> {
    // "<file>[:<swap>[:<ts>]]"
    let parts: Vec<&str> = path.split(':').collect();
    if parts.len() > 3 || parts[0].is_empty() {
        errors.push("bad <file>".to_owned());
        return None;
    }
    let before = errors.len();
    let mut out = FileOutPath {
        file: parts[0].to_owned(),
        swap_s: None,
        sidecar: false,
    };
    if let Some(field) = parts.get(1) {
        if !field.is_empty() {
            match field.parse::<i32>() {
                Ok(swap) if (60..=86400).contains(&swap.abs()) => out.swap_s = Some(swap),
                _ => errors.push("bad <swap>".to_owned()),
            }
        }
    }
    if let Some(field) = parts.get(2) {
        match *field {
            "ts" => out.sidecar = true,
            "" => {}
            _ => errors.push("bad <ts>".to_owned()),
        }
    }
    if errors.len() > before {
        return None;
    }
    Some(StreamPath::FileOut(out))
}

fn parse_filein(path: &str, errors: &mut Vec<String>) -> Option<StreamPath> {
    // "<file>[:<speed>[:<offset>]]"
    let parts: Vec<&str> = path.split(':').collect();
    if parts.len() > 3 || parts[0].is_empty() {
        errors.push("bad <file>".to_owned());
        return None;
    }
    let before = errors.len();
    let mut fin = FileInPath {
        file: parts[0].to_owned(),
        speed: 0.0,
        offset_s: 0.0,
    };
    if let Some(field) = parts.get(1) {
        match field.parse::<f64>() {
            Ok(speed) if speed >= 0.0 => fin.speed = speed,
            _ => errors.push("bad <speed>".to_owned()),
        }
    }
    if let Some(field) = parts.get(2) {
        match field.parse::<f64>() {
            Ok(offset) if offset >= 0.0 => fin.offset_s = offset,
            _ => errors.push("bad <offset>".to_owned()),
        }
    }
    if errors.len() > before {
        return None;
    }
    Some(StreamPath::FileIn(fin))
}

fn parse_exec(path: &str, errors: &mut Vec<String>) -> Option<StreamPath> {
    // "<path>[[:<arg>]...]"
    let argv: Vec<String> = path.split(':').map(str::to_owned).collect();
    if argv.is_empty() || argv[0].is_empty() {
        errors.push("bad <path>".to_owned());
        return None;
    }
    let executable = std::path::Path::new(&argv[0]);
    if !executable.exists() {
        errors.push("bad <path>, no such file".to_owned());
        return None;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let executable_bit = std::fs::metadata(executable)
            .map(|m| m.permissions().mode() & 0o100 != 0)
            .unwrap_or(false);
        if !executable_bit {
            errors.push("bad <path>, not executable".to_owned());
            return None;
        }
    }
    Some(StreamPath::Exec(ExecPath { argv }))
}

fn parse_ipc(path: &str, errors: &mut Vec<String>) -> Option<StreamPath> {
    // "<name>": 3-30 chars of [-_a-zA-Z0-9]
    let valid = (3..=30).contains(&path.len())
        && path
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if !valid {
        errors.push("bad <name>".to_owned());
        return None;
    }
    Some(StreamPath::Ipc(IpcPath {
        name: path.to_owned(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_forms() {
        let hp = match_host_port("localhost:12345", true).unwrap();
        assert_eq!((hp.host.as_str(), hp.port, hp.ipv6), ("localhost", 12345, false));

        let hp = match_host_port("[::1]:80", true).unwrap();
        assert_eq!((hp.host.as_str(), hp.port, hp.ipv6), ("::1", 80, true));

        assert!(match_host_port(":12345", true).is_none());
        let hp = match_host_port(":12345", false).unwrap();
        assert!(hp.host.is_empty());

        assert!(match_host_port("host:0", true).is_none());
        assert!(match_host_port("host:99999", true).is_none());
        assert!(match_host_port("host:", true).is_none());
        assert!(match_host_port("noport", true).is_none());
    }

    #[test]
    fn serial_full_and_defaults() {
        let mut errors = Vec::new();
        let path = parse(StreamType::Serial, "/dev/ttyUSB0:921600:auto", &mut errors).unwrap();
        assert!(errors.is_empty());
        match path {
            StreamPath::Serial(p) => {
                assert_eq!(p.device, "/dev/ttyUSB0");
                assert_eq!(p.baudrate, 921600);
                assert_eq!(p.autobaud, AutobaudMode::Auto);
                assert_eq!(p.framing, SerialFraming::Mode8N1);
                assert_eq!(p.flow, SerialFlow::Off);
            }
            other => panic!("unexpected path {other:?}"),
        }

        let mut errors = Vec::new();
        let path = parse(StreamType::Serial, "/dev/ttyACM1", &mut errors).unwrap();
        match path {
            StreamPath::Serial(p) => assert_eq!(p.baudrate, ACM_BAUDRATE),
            other => panic!("unexpected path {other:?}"),
        }
    }

    #[test]
    fn serial_bad_fields_collected() {
        let mut errors = Vec::new();
        let path = parse(StreamType::Serial, "/dev/ttyUSB0:1234:bogus", &mut errors);
        assert!(path.is_none());
        assert_eq!(errors, ["bad <baudrate>", "bad <autobaud>"]);
    }

    #[test]
    fn ntrip_client_with_credentials() {
        let mut errors = Vec::new();
        let path = parse(
            StreamType::NtripCli,
            "user:pass@caster.example.com:2101/MOUNT:v2",
            &mut errors,
        )
        .unwrap();
        assert!(errors.is_empty());
        match path {
            StreamPath::Ntrip(p) => {
                assert_eq!(p.endpoint.host, "caster.example.com");
                assert_eq!(p.endpoint.port, 2101);
                assert_eq!(p.mountpoint, "MOUNT");
                assert_eq!(p.version, NtripVersion::V2);
                assert_eq!(p.auth.plain, "user:pass");
                assert!(!p.auth.base64.is_empty());
            }
            other => panic!("unexpected path {other:?}"),
        }
    }

    #[test]
    fn ntrip_server_requires_credentials() {
        let mut errors = Vec::new();
        assert!(parse(StreamType::NtripSvr, "caster:2101/MOUNT", &mut errors).is_none());
        assert!(errors.contains(&"missing <credentials>".to_owned()));

        // Server default version is v1, and "auto" is rejected
        let mut errors = Vec::new();
        let path = parse(StreamType::NtripSvr, "secret@caster:2101/MOUNT", &mut errors).unwrap();
        match path {
            StreamPath::Ntrip(p) => assert_eq!(p.version, NtripVersion::V1),
            other => panic!("unexpected path {other:?}"),
        }
        let mut errors = Vec::new();
        assert!(parse(StreamType::NtripSvr, "secret@caster:2101/MOUNT:auto", &mut errors).is_none());
        assert_eq!(errors, ["bad <version>"]);
    }

    #[test]
    fn telnet_with_tail() {
        let mut errors = Vec::new();
        let path = parse(StreamType::Telnet, "box:4001:230400:ubx", &mut errors).unwrap();
        assert!(errors.is_empty());
        match path {
            StreamPath::Telnet(p) => {
                assert_eq!(p.endpoint.port, 4001);
                assert_eq!(p.baudrate, 230400);
                assert_eq!(p.autobaud, AutobaudMode::Ubx);
            }
            other => panic!("unexpected path {other:?}"),
        }
    }

    #[test]
    fn gga_and_sta() {
        let mut errors = Vec::new();
        let path = parse(StreamType::Gga, "47.3/8.5/420.0:10.0:GP", &mut errors).unwrap();
        assert!(errors.is_empty());
        match path {
            StreamPath::Gga(p) => {
                assert_eq!(p.period_ms, 10000);
                assert_eq!(p.talker, "GP");
            }
            other => panic!("unexpected path {other:?}"),
        }

        let mut errors = Vec::new();
        let path = parse(StreamType::Sta, "4278387.0/635620.0/4672340.0", &mut errors).unwrap();
        match path {
            StreamPath::Sta(p) => {
                assert_eq!(p.msg_type, 1005);
                assert_eq!(p.period_ms, 5000);
            }
            other => panic!("unexpected path {other:?}"),
        }

        let mut errors = Vec::new();
        assert!(parse(StreamType::Gga, "91.0/8.5/420.0", &mut errors).is_none());
        assert_eq!(errors, ["bad <lat>/<lon>/<height>"]);
    }

    #[test]
    fn loopback_forms() {
        let mut errors = Vec::new();
        let path = parse(StreamType::Loopback, "", &mut errors).unwrap();
        match path {
            StreamPath::Loopback(p) => {
                assert_eq!(p.delay_ms, 0.0);
                assert_eq!(p.rate, 0);
            }
            other => panic!("unexpected path {other:?}"),
        }

        let mut errors = Vec::new();
        let path = parse(StreamType::Loopback, "250:1024", &mut errors).unwrap();
        match path {
            StreamPath::Loopback(p) => {
                assert_eq!(p.delay_ms, 250.0);
                assert_eq!(p.rate, 1024);
            }
            other => panic!("unexpected path {other:?}"),
        }
    }

    #[test]
    fn ipc_name_rules() {
        let mut errors = Vec::new();
        assert!(parse(StreamType::IpcSvr, "my-link_1", &mut errors).is_some());
        let mut errors = Vec::new();
        assert!(parse(StreamType::IpcCli, "ab", &mut errors).is_none());
        let mut errors = Vec::new();
        assert!(parse(StreamType::IpcCli, "bad/name", &mut errors).is_none());
    }

    #[test]
    fn canonical_roundtrip_examples() {
        for (stype, path) in [
            (StreamType::Serial, "/dev/ttyUSB0:921600:auto:8N1:off"),
            (StreamType::TcpCli, "localhost:12345"),
            (StreamType::Telnet, "box:4001:115200:none:8N1:off"),
            (StreamType::UdpSvr, ":12345"),
        ] {
            let mut errors = Vec::new();
            let parsed = parse(stype, path, &mut errors).unwrap();
            assert_eq!(parsed.canonical(), path, "{stype:?}");
        }
    }
}
