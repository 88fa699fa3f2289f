//! The static scheme table: one entry per stream type, giving the scheme
//! string, default mode, timeout defaults (or unsupported) and hotplug
//! capability.

use crate::types::{StreamMode, StreamType};

/// Timeout defaults are seconds; `None` means the option is not supported by
/// the scheme at all (using it in a spec is a parse error).
#[derive(Clone, Copy, Debug)]
pub struct SchemeInfo {
    pub stype: StreamType,
    pub scheme: &'static str,
    pub mode: StreamMode,
    /// Connect timeout default [s]; `None` = unsupported.
    pub conn_to: Option<f64>,
    /// Inactivity timeout default [s]; `None` = unsupported, `Some(0.0)` =
    /// supported but disabled by default.
    pub inact_to: Option<f64>,
    /// Retry timeout default [s]; `None` = unsupported, `Some(0.0)` =
    /// supported but no retry by default.
    pub retry_to: Option<f64>,
    /// Hotplug default; `None` = unsupported.
    pub hotplug: Option<bool>,
}

pub const SCHEMES: [SchemeInfo; 22] = [
    SchemeInfo { stype: StreamType::Serial,    scheme: "serial",    mode: StreamMode::Rw, conn_to: None,       inact_to: Some(0.0),  retry_to: Some(5.0), hotplug: Some(false) },
    SchemeInfo { stype: StreamType::TcpCli,    scheme: "tcpcli",    mode: StreamMode::Rw, conn_to: Some(10.0), inact_to: Some(0.0),  retry_to: Some(0.0), hotplug: None },
    SchemeInfo { stype: StreamType::TcpCliS,   scheme: "tcpclis",   mode: StreamMode::Rw, conn_to: Some(10.0), inact_to: Some(0.0),  retry_to: Some(0.0), hotplug: None },
    SchemeInfo { stype: StreamType::NtripCli,  scheme: "ntripcli",  mode: StreamMode::Rw, conn_to: Some(10.0), inact_to: Some(10.0), retry_to: Some(5.0), hotplug: None },
    SchemeInfo { stype: StreamType::NtripCliS, scheme: "ntripclis", mode: StreamMode::Rw, conn_to: Some(10.0), inact_to: Some(10.0), retry_to: Some(5.0), hotplug: None },
    SchemeInfo { stype: StreamType::Telnet,    scheme: "telnet",    mode: StreamMode::Rw, conn_to: Some(10.0), inact_to: Some(10.0), retry_to: Some(5.0), hotplug: None },
    SchemeInfo { stype: StreamType::TelnetS,   scheme: "telnets",   mode: StreamMode::Rw, conn_to: Some(10.0), inact_to: Some(10.0), retry_to: Some(5.0), hotplug: None },
    SchemeInfo { stype: StreamType::NtripSvr,  scheme: "ntripsvr",  mode: StreamMode::Wo, conn_to: Some(10.0), inact_to: None,       retry_to: Some(5.0), hotplug: None },
    SchemeInfo { stype: StreamType::NtripSvrS, scheme: "ntripsvrs", mode: StreamMode::Wo, conn_to: Some(10.0), inact_to: None,       retry_to: Some(5.0), hotplug: None },
    SchemeInfo { stype: StreamType::TcpSvr,    scheme: "tcpsvr",    mode: StreamMode::Rw, conn_to: None,       inact_to: None,       retry_to: None,      hotplug: None },
    SchemeInfo { stype: StreamType::UdpCli,    scheme: "udpcli",    mode: StreamMode::Wo, conn_to: None,       inact_to: None,       retry_to: None,      hotplug: None },
    SchemeInfo { stype: StreamType::UdpSvr,    scheme: "udpsvr",    mode: StreamMode::Ro, conn_to: None,       inact_to: None,       retry_to: None,      hotplug: None },
    SchemeInfo { stype: StreamType::Spidev,    scheme: "spidev",    mode: StreamMode::Rw, conn_to: None,       inact_to: None,       retry_to: None,      hotplug: None },
    SchemeInfo { stype: StreamType::Canstr,    scheme: "canstr",    mode: StreamMode::Rw, conn_to: None,       inact_to: None,       retry_to: None,      hotplug: None },
    SchemeInfo { stype: StreamType::Gga,       scheme: "gga",       mode: StreamMode::Ro, conn_to: None,       inact_to: None,       retry_to: None,      hotplug: None },
    SchemeInfo { stype: StreamType::Sta,       scheme: "sta",       mode: StreamMode::Ro, conn_to: None,       inact_to: None,       retry_to: None,      hotplug: None },
    SchemeInfo { stype: StreamType::Loopback,  scheme: "loop",      mode: StreamMode::Rw, conn_to: None,       inact_to: None,       retry_to: None,      hotplug: None },
    SchemeInfo { stype: StreamType::FileOut,   scheme: "fileout",   mode: StreamMode::Wo, conn_to: None,       inact_to: None,       retry_to: None,      hotplug: None },
    SchemeInfo { stype: StreamType::FileIn,    scheme: "filein",    mode: StreamMode::Ro, conn_to: None,       inact_to: None,       retry_to: None,      hotplug: None },
    SchemeInfo { stype: StreamType::Exec,      scheme: "exec",      mode: StreamMode::Rw, conn_to: None,       inact_to: Some(0.0),  retry_to: Some(0.0), hotplug: None },
    SchemeInfo { stype: StreamType::IpcSvr,    scheme: "ipcsvr",    mode: StreamMode::Rw, conn_to: None,       inact_to: None,       retry_to: None,      hotplug: None },
    SchemeInfo { stype: StreamType::IpcCli,    scheme: "ipccli",    mode: StreamMode::Rw, conn_to: None,       inact_to: None,       retry_to: Some(5.0), hotplug: Some(true) },
];

/// Look up a scheme string (e.g. `"tcpcli"`).
pub fn by_scheme(scheme: &str) -> Option<&'static SchemeInfo> {
    SCHEMES.iter().find(|info| info.scheme == scheme)
}

/// Look up a stream type.
pub fn by_type(stype: StreamType) -> &'static SchemeInfo {
    // The table is total over the closed enum
    SCHEMES
        .iter()
        .find(|info| info.stype == stype)
        .expect("scheme table covers all stream types")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_total_and_unique() {
        for info in &SCHEMES {
            assert_eq!(by_type(info.stype).scheme, info.scheme);
            assert_eq!(by_scheme(info.scheme).unwrap().stype, info.stype);
        }
    }

    #[test]
    fn unknown_scheme() {
        assert!(by_scheme("ftp").is_none());
        assert!(by_scheme("").is_none());
    }

    #[test]
    fn representative_defaults() {
        let serial = by_scheme("serial").unwrap();
        assert!(serial.conn_to.is_none());
        assert_eq!(serial.retry_to, Some(5.0));
        assert_eq!(serial.hotplug, Some(false));

        let ntrip = by_scheme("ntripcli").unwrap();
        assert_eq!(ntrip.conn_to, Some(10.0));
        assert_eq!(ntrip.inact_to, Some(10.0));

        let ipccli = by_scheme("ipccli").unwrap();
        assert_eq!(ipccli.hotplug, Some(true));
    }
}
