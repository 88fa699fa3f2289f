//! NTRIP credential handling.
//!
//! Credentials in a spec come in three forms: `<user>:<password>` (plain),
//! `=<base64>` (pre-encoded), or `%<path>` (read either form from a file, so
//! secrets can be kept out of command lines and logs).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Plain and base64 representations of the same credentials.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Auth {
    pub plain: String,
    pub base64: String,
}

/// Maximum size of a `%<path>` credentials file.
const MAX_FILE_LEN: usize = 2000;

/// Derive both representations from a spec credentials string.
///
/// Returns `None` for malformed input (too short, bad base64, unreadable or
/// empty file).
pub fn to_auth(credentials: &str) -> Option<Auth> {
    if credentials.len() < 3 {
        return None;
    }

    let auth = if let Some(b64) = credentials.strip_prefix('=') {
        let decoded = BASE64.decode(b64).ok()?;
        Auth {
            plain: String::from_utf8(decoded).ok()?,
            base64: b64.to_owned(),
        }
    } else if let Some(path) = credentials.strip_prefix('%') {
        let data = std::fs::read_to_string(path).ok()?;
        if data.len() > MAX_FILE_LEN {
            return None;
        }
        let trimmed = data.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Some(b64) = trimmed.strip_prefix('=') {
            let decoded = BASE64.decode(b64).ok()?;
            Auth {
                plain: String::from_utf8(decoded).ok()?,
                base64: b64.to_owned(),
            }
        } else {
            Auth {
                plain: trimmed.to_owned(),
                base64: BASE64.encode(trimmed.as_bytes()),
            }
        }
    } else {
        Auth {
            plain: credentials.to_owned(),
            base64: BASE64.encode(credentials.as_bytes()),
        }
    };

    if auth.plain.is_empty() || auth.base64.is_empty() {
        None
    } else {
        Some(auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_credentials() {
        let auth = to_auth("user:password").unwrap();
        assert_eq!(auth.plain, "user:password");
        assert_eq!(auth.base64, "dXNlcjpwYXNzd29yZA==");
    }

    #[test]
    fn base64_credentials() {
        let auth = to_auth("=dXNlcjpwYXNzd29yZA==").unwrap();
        assert_eq!(auth.plain, "user:password");
        assert_eq!(auth.base64, "dXNlcjpwYXNzd29yZA==");
    }

    #[test]
    fn file_credentials() {
        let path = std::env::temp_dir().join("devio-test-credentials.txt");
        std::fs::write(&path, "user:password\n").unwrap();
        let auth = to_auth(&format!("%{}", path.display())).unwrap();
        assert_eq!(auth.plain, "user:password");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn rejects_short_and_missing() {
        assert!(to_auth("ab").is_none());
        assert!(to_auth("%/nonexistent/credentials").is_none());
        assert!(to_auth("=!!!notbase64!!!").is_none());
    }
}
