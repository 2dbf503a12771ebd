//! Server-sent-events demuxer.
//!
//! Buffers the raw byte stream, splits on `\n\n`, and parses each
//! frame's `event:` and `data:` lines. Frames are delivered in arrival
//! order. When the connection drops after at least one frame, the
//! error carries the text accumulated so far plus the byte count, so
//! the caller can decide whether to restart.

use futures_util::StreamExt;

use casc_domain::error::{Error, Result};
use casc_domain::stream::BoxStream;

use crate::transport::ByteStream;

/// One parsed SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// The `event:` line, when present.
    pub event: Option<String>,
    /// Concatenation of the frame's `data:` lines (joined with `\n`).
    pub data: String,
}

impl SseFrame {
    /// The `data: [DONE]` terminator.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Extract complete frames from an SSE buffer.
///
/// The buffer is drained in place; a trailing partial frame stays for
/// the next call. Frames without any `data:` line (comments,
/// keep-alives) are dropped.
pub(crate) fn drain_frames(buffer: &mut String) -> Vec<SseFrame> {
    let mut frames = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2); // the \n\n delimiter

        let mut event = None;
        let mut data_lines: Vec<&str> = Vec::new();
        for line in block.lines() {
            let line = line.trim_end_matches('\r');
            if let Some(value) = line.strip_prefix("event:") {
                event = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("data:") {
                data_lines.push(value.trim());
            }
        }
        if data_lines.is_empty() {
            continue;
        }
        frames.push(SseFrame {
            event,
            data: data_lines.join("\n"),
        });
    }

    frames
}

/// State threaded through the frame stream so mid-stream failures can
/// report what was already delivered.
#[derive(Default)]
struct StreamProgress {
    bytes_received: u64,
    frames_delivered: u64,
    partial_output: String,
}

/// Turn a raw byte stream into a stream of [`SseFrame`]s.
///
/// `delta_text` extracts the visible text from a frame (used to build
/// `partial_output` for mid-stream failures); return `None` for frames
/// that carry no visible text.
pub fn frame_stream<F>(
    bytes: ByteStream,
    delta_text: F,
) -> BoxStream<'static, Result<SseFrame>>
where
    F: Fn(&SseFrame) -> Option<String> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut bytes = bytes;
        let mut buffer = String::new();
        let mut progress = StreamProgress::default();

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(raw) => {
                    progress.bytes_received += raw.len() as u64;
                    buffer.push_str(&String::from_utf8_lossy(&raw));
                    for frame in drain_frames(&mut buffer) {
                        progress.frames_delivered += 1;
                        if let Some(text) = delta_text(&frame) {
                            progress.partial_output.push_str(&text);
                        }
                        yield Ok(frame);
                    }
                }
                Err(e) => {
                    if progress.frames_delivered > 0 {
                        yield Err(Error::Streaming {
                            message: e.to_string(),
                            partial_output: std::mem::take(&mut progress.partial_output),
                            bytes_received: progress.bytes_received,
                        });
                    } else {
                        // Nothing delivered yet: keep the transport
                        // classification so the caller may retry.
                        yield Err(e);
                    }
                    return;
                }
            }
        }

        // Body closed: flush a trailing frame missing its delimiter.
        if !buffer.trim().is_empty() {
            buffer.push_str("\n\n");
            for frame in drain_frames(&mut buffer) {
                yield Ok(frame);
            }
        }
    };
    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_single_frame_with_event() {
        let mut buf =
            String::from("event: response.output_text.delta\ndata: {\"delta\":\"hi\"}\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("response.output_text.delta"));
        assert_eq!(frames[0].data, "{\"delta\":\"hi\"}");
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_multiple_frames() {
        let mut buf = String::from("data: first\n\ndata: second\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "first");
        assert_eq!(frames[1].data, "second");
    }

    #[test]
    fn drain_partial_frame_stays_buffered() {
        let mut buf = String::from("data: complete\n\ndata: parti");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(buf, "data: parti");
    }

    #[test]
    fn drain_joins_multi_line_data() {
        let mut buf = String::from("data: line1\ndata: line2\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames[0].data, "line1\nline2");
    }

    #[test]
    fn drain_skips_comment_only_frames() {
        let mut buf = String::from(": keep-alive\n\ndata: real\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "real");
    }

    #[test]
    fn drain_handles_crlf() {
        let mut buf = String::from("event: done\r\ndata: x\r\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames[0].event.as_deref(), Some("done"));
        assert_eq!(frames[0].data, "x");
    }

    #[test]
    fn done_sentinel_detected() {
        let frame = SseFrame {
            event: None,
            data: "[DONE]".into(),
        };
        assert!(frame.is_done());
    }

    fn byte_stream(chunks: Vec<Result<Vec<u8>>>) -> ByteStream {
        Box::pin(futures_util::stream::iter(chunks))
    }

    #[tokio::test]
    async fn frames_delivered_in_order_across_chunk_splits() {
        let bytes = byte_stream(vec![
            Ok(b"data: on".to_vec()),
            Ok(b"e\n\ndata: two\n\nda".to_vec()),
            Ok(b"ta: three\n\n".to_vec()),
        ]);
        let mut stream = frame_stream(bytes, |_| None);
        let mut seen = Vec::new();
        while let Some(frame) = stream.next().await {
            seen.push(frame.unwrap().data);
        }
        assert_eq!(seen, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn mid_stream_failure_carries_partial_output() {
        let bytes = byte_stream(vec![
            Ok(b"data: hel\n\ndata: lo\n\n".to_vec()),
            Err(Error::Connection("reset by peer".into())),
        ]);
        let mut stream = frame_stream(bytes, |f| Some(f.data.clone()));

        assert_eq!(stream.next().await.unwrap().unwrap().data, "hel");
        assert_eq!(stream.next().await.unwrap().unwrap().data, "lo");
        let err = stream.next().await.unwrap().unwrap_err();
        match err {
            Error::Streaming {
                partial_output,
                bytes_received,
                ..
            } => {
                assert_eq!(partial_output, "hello");
                assert_eq!(bytes_received, 22);
            }
            other => panic!("expected streaming error, got {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn failure_before_first_frame_keeps_transport_error() {
        let bytes = byte_stream(vec![Err(Error::Connection("refused".into()))]);
        let mut stream = frame_stream(bytes, |_| None);
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.code(), "connection_error");
    }

    #[tokio::test]
    async fn trailing_frame_without_delimiter_is_flushed() {
        let bytes = byte_stream(vec![Ok(b"data: tail".to_vec())]);
        let mut stream = frame_stream(bytes, |_| None);
        assert_eq!(stream.next().await.unwrap().unwrap().data, "tail");
        assert!(stream.next().await.is_none());
    }
}
