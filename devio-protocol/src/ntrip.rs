//! NTRIP v1/v2 handshake: request building and response classification.
//!
//! The wire formats differ by role and version:
//!
//! ```text
//! client (v1)        GET /MOUNT HTTP/1.0          + User-Agent, Accept, Connection
//! client (auto)      GET /MOUNT HTTP/1.0          + Host, Ntrip-Version: Ntrip/1.0, ...
//! client (v2)        GET /MOUNT HTTP/1.1          + Host, Ntrip-Version: Ntrip/2.0, ...
//! server (v1)        SOURCE <password> /MOUNT     + Source-Agent (not HTTP)
//! server (v2)        POST /MOUNT HTTP/1.1         + Host, Ntrip-Version, Authorization, ...
//! ```
//!
//! Responses are judged on the first line only; the various caster
//! implementations disagree on everything after it.

use crate::path::NtripPath;
use crate::types::StreamType;
use crate::user_agent;

/// NTRIP protocol version selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NtripVersion {
    /// v1 request shape with v2-compatible headers; most casters accept it.
    Auto,
    V1,
    V2,
}

impl NtripVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }
}

/// Outcome of classifying the first response line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NtripResponse {
    /// Caster accepted the request; data follows.
    Ok,
    /// Credentials rejected.
    AuthFail,
    /// Mountpoint unknown (includes sourcetable replies).
    BadMountpoint(String),
    /// Anything else, with the offending line.
    BadResponse(String),
}

/// Build the request bytes for a role/version combination.
pub fn build_request(stype: StreamType, path: &NtripPath) -> Vec<u8> {
    let agent = user_agent();

    // The v1 server handshake predates HTTP
    if stype.is_ntrip_server() && path.version == NtripVersion::V1 {
        return format!(
            "SOURCE {} /{}\r\nSource-Agent: NTRIP {agent}\r\n\r\n",
            path.auth.plain, path.mountpoint
        )
        .into_bytes();
    }

    let method = if stype.is_ntrip_server() { "POST" } else { "GET" };
    let http = if path.version == NtripVersion::V2 {
        "HTTP/1.1"
    } else {
        "HTTP/1.0"
    };

    let mut req = format!("{method} /{} {http}\r\n", path.mountpoint);
    if path.version != NtripVersion::V1 {
        req.push_str(&format!("Host: {}:{}\r\n", path.endpoint.host, path.endpoint.port));
        req.push_str(&format!(
            "Ntrip-Version: Ntrip/{}\r\n",
            if path.version == NtripVersion::V2 { "2.0" } else { "1.0" }
        ));
    }
    // Authorization goes before the remaining headers; some casters get
    // confused otherwise
    if !path.auth.base64.is_empty() {
        req.push_str(&format!("Authorization: Basic {}\r\n", path.auth.base64));
    }
    req.push_str(&format!("User-Agent: NTRIP {agent}\r\n"));
    if !stype.is_ntrip_server() {
        req.push_str("Accept: */*\r\n");
    }
    req.push_str("Connection: close\r\n\r\n");
    req.into_bytes()
}

/// Classify the first response line (without trailing CRLF processing; pass
/// the line as read).
pub fn classify_response(line: &str) -> NtripResponse {
    let ok = line.starts_with("ICY 200 OK")
        || line.starts_with("OK")
        || line.starts_with("HTTP/1.0 200 OK")
        || line.starts_with("HTTP/1.1 200 OK");
    if ok {
        // A chunked reply on the status line cannot be streamed raw
        if line.to_lowercase().contains("transfer-encoding") {
            return NtripResponse::BadMountpoint("unsupported transfer-encoding".to_owned());
        }
        return NtripResponse::Ok;
    }

    let first = line.split("\r\n").next().unwrap_or("").to_owned();

    // "... 401 ..." or v1-style "ERROR - Bad Password"
    if line.contains(" 401 ") || (line.starts_with("ERROR") && line.contains("assword")) {
        return NtripResponse::AuthFail;
    }
    // Sourcetable replies and 404s mean the mountpoint does not exist;
    // v1-style "ERROR - Bad Mountpoint" / "ERROR - Mount Point Invalid"
    if line.contains("SOURCETABLE") || line.contains(" 404 ") {
        return NtripResponse::BadMountpoint(String::new());
    }
    if line.starts_with("ERROR") && line.contains("ount") {
        return NtripResponse::BadMountpoint(first);
    }

    NtripResponse::BadResponse(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Auth;
    use crate::path::HostPort;

    fn path(version: NtripVersion, with_auth: bool) -> NtripPath {
        NtripPath {
            endpoint: HostPort {
                host: "caster.example.com".to_owned(),
                port: 2101,
                ipv6: false,
            },
            credentials: if with_auth { "user:pass".to_owned() } else { String::new() },
            auth: if with_auth {
                Auth {
                    plain: "user:pass".to_owned(),
                    base64: "dXNlcjpwYXNz".to_owned(),
                }
            } else {
                Auth::default()
            },
            mountpoint: "MOUNT".to_owned(),
            version,
        }
    }

    #[test]
    fn client_v1_request() {
        let req = String::from_utf8(build_request(StreamType::NtripCli, &path(NtripVersion::V1, true))).unwrap();
        assert!(req.starts_with("GET /MOUNT HTTP/1.0\r\n"));
        assert!(!req.contains("Host:"));
        assert!(!req.contains("Ntrip-Version:"));
        assert!(req.contains("Authorization: Basic dXNlcjpwYXNz\r\n"));
        assert!(req.contains("Accept: */*\r\n"));
        assert!(req.ends_with("Connection: close\r\n\r\n"));
    }

    #[test]
    fn client_auto_request() {
        let req = String::from_utf8(build_request(StreamType::NtripCli, &path(NtripVersion::Auto, false))).unwrap();
        assert!(req.starts_with("GET /MOUNT HTTP/1.0\r\n"));
        assert!(req.contains("Host: caster.example.com:2101\r\n"));
        assert!(req.contains("Ntrip-Version: Ntrip/1.0\r\n"));
        assert!(!req.contains("Authorization:"));
    }

    #[test]
    fn client_v2_request() {
        let req = String::from_utf8(build_request(StreamType::NtripCliS, &path(NtripVersion::V2, true))).unwrap();
        assert!(req.starts_with("GET /MOUNT HTTP/1.1\r\n"));
        assert!(req.contains("Ntrip-Version: Ntrip/2.0\r\n"));
    }

    #[test]
    fn server_v1_request() {
        let mut p = path(NtripVersion::V1, true);
        p.auth.plain = "secret".to_owned();
        let req = String::from_utf8(build_request(StreamType::NtripSvr, &p)).unwrap();
        assert!(req.starts_with("SOURCE secret /MOUNT\r\n"));
        assert!(req.contains("Source-Agent: NTRIP "));
        assert!(req.ends_with("\r\n\r\n"));
    }

    #[test]
    fn server_v2_request() {
        let req = String::from_utf8(build_request(StreamType::NtripSvr, &path(NtripVersion::V2, true))).unwrap();
        assert!(req.starts_with("POST /MOUNT HTTP/1.1\r\n"));
        assert!(req.contains("Authorization: Basic "));
        assert!(!req.contains("Accept:"));
    }

    #[test]
    fn classify_success() {
        assert_eq!(classify_response("ICY 200 OK\r\n"), NtripResponse::Ok);
        assert_eq!(classify_response("OK\r\n"), NtripResponse::Ok);
        assert_eq!(classify_response("HTTP/1.1 200 OK\r\n"), NtripResponse::Ok);
        assert_eq!(classify_response("HTTP/1.0 200 OK\r\n"), NtripResponse::Ok);
    }

    #[test]
    fn classify_chunked_is_failure() {
        assert!(matches!(
            classify_response("HTTP/1.1 200 OK Transfer-Encoding: chunked\r\n"),
            NtripResponse::BadMountpoint(_)
        ));
    }

    #[test]
    fn classify_auth_failures() {
        assert_eq!(
            classify_response("HTTP/1.1 401 Unauthorized\r\n"),
            NtripResponse::AuthFail
        );
        assert_eq!(
            classify_response("ERROR - Bad Password\r\n"),
            NtripResponse::AuthFail
        );
    }

    #[test]
    fn classify_mountpoint_failures() {
        assert!(matches!(
            classify_response("SOURCETABLE 200 OK\r\n"),
            NtripResponse::BadMountpoint(_)
        ));
        assert!(matches!(
            classify_response("HTTP/1.1 404 Not Found\r\n"),
            NtripResponse::BadMountpoint(_)
        ));
        assert!(matches!(
            classify_response("ERROR - Bad Mountpoint\r\n"),
            NtripResponse::BadMountpoint(_)
        ));
    }

    #[test]
    fn classify_other() {
        match classify_response("HTTP/1.1 503 Busy\r\n") {
            NtripResponse::BadResponse(line) => assert_eq!(line, "HTTP/1.1 503 Busy"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
