//! Async adapter over the blocking stream surface.

use futures_core::Stream as FuturesStream;

use devio_rs_parser::ParserMsg;
use devio_rs_protocol::StreamState;

use crate::stream::Stream;

/// Convert a started [`Stream`] into an async stream of messages.
///
/// Yields every received message and ends once the stream is CLOSED with an
/// empty queue (stopped, replay finished or retry disabled). Messages are
/// picked up by polling the queue, so this adapter adds a little latency
/// compared to a dedicated reader thread.
pub fn message_stream(stream: Stream) -> impl FuturesStream<Item = ParserMsg> {
    async_stream::stream! {
        let stream = stream;
        let mut msg = ParserMsg::default();
        loop {
            if stream.read(&mut msg, 0) {
                yield std::mem::take(&mut msg);
                continue;
            }
            if stream.state() == StreamState::Closed {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }
}

impl Stream {
    /// Consume this stream and return an async stream of messages; see
    /// [`message_stream`].
    pub fn into_message_stream(self) -> impl FuturesStream<Item = ParserMsg> {
        message_stream(self)
    }
}

#[cfg(test)]
mod tests {
    use std::pin::pin;
    use std::time::Duration;

    use devio_rs_parser::ubx;
    use devio_rs_protocol::StreamState;
    use tokio_stream::StreamExt;

    use crate::stream::Stream;

    #[tokio::test]
    async fn message_stream_yields_received_messages() {
        let mut stream = Stream::from_spec("loop://").unwrap();
        assert!(stream.start());
        while stream.state() != StreamState::Connected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let frame = ubx::frame(ubx::CLS_MON, ubx::ID_MON_VER, &[]).unwrap();
        assert!(stream.write(&frame, 0));

        let mut messages = pin!(stream.into_message_stream());
        let msg = tokio::time::timeout(Duration::from_secs(5), messages.next())
            .await
            .expect("message within timeout")
            .expect("stream still open");
        assert_eq!(msg.name, "UBX-MON-VER");
    }
}
