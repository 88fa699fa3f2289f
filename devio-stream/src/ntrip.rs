//! NTRIP request/response step of the TCP-family pipeline.

use std::sync::Arc;

use devio_rs_protocol::ntrip::{NtripResponse, build_request, classify_response};
use devio_rs_protocol::{StreamError, StreamOpts, StreamPath};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::base::StreamShared;

// The response is judged on the first line only; don't buffer more than this
const MAX_RESPONSE_LEN: usize = 1000;

/// Perform the NTRIP login on an established (possibly TLS) connection.
/// Returns the mountpoint for the CONNECTED info string.
pub(crate) async fn handshake<S: AsyncRead + AsyncWrite + Unpin>(
    shared: &Arc<StreamShared>,
    io: &mut S,
    opts: &StreamOpts,
) -> Result<String, (StreamError, String)> {
    let StreamPath::Ntrip(path) = &opts.path else {
        return Err((StreamError::DeviceFail, "not an ntrip path".to_owned()));
    };

    shared.set_state_connecting("request");
    let request = build_request(opts.stype, path);
    io.write_all(&request)
        .await
        .map_err(|e| (StreamError::ConnLost, format!("request: {e}")))?;
    io.flush()
        .await
        .map_err(|e| (StreamError::ConnLost, format!("request: {e}")))?;

    shared.set_state_connecting("response");
    let line = read_response_line(io)
        .await
        .map_err(|e| (StreamError::ConnLost, format!("response: {e}")))?;
    debug!("ntrip response: {line:?}");

    match classify_response(&line) {
        NtripResponse::Ok => Ok(path.mountpoint.clone()),
        NtripResponse::AuthFail => Err((StreamError::AuthFail, String::new())),
        NtripResponse::BadMountpoint(detail) => Err((StreamError::BadMountpoint, detail)),
        NtripResponse::BadResponse(detail) => Err((StreamError::BadResponse, detail)),
    }
}

/// Read up to and including the first CRLF. The rest of a multi-line response
/// is left in the socket; it is either stream data (success) or discarded
/// with the connection (failure).
async fn read_response_line<S: AsyncRead + Unpin>(io: &mut S) -> std::io::Result<String> {
    let mut line = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        let n = io.read(&mut byte).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "eof before response line",
            ));
        }
        line.push(byte[0]);
        if line.ends_with(b"\r\n") || line.len() >= MAX_RESPONSE_LEN {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

#[cfg(test)]
mod tests {
    use super::read_response_line;

    #[tokio::test]
    async fn reads_first_line_only() {
        let data = b"ICY 200 OK\r\nbinary data follows".to_vec();
        let mut cursor = std::io::Cursor::new(data);
        let line = read_response_line(&mut cursor).await.unwrap();
        assert_eq!(line, "ICY 200 OK\r\n");
        // Remaining bytes stay readable
        assert_eq!(cursor.position(), 12);
    }

    #[tokio::test]
    async fn eof_is_an_error() {
        let mut cursor = std::io::Cursor::new(b"HTTP/1.1 200".to_vec());
        assert!(read_response_line(&mut cursor).await.is_err());
    }
}
