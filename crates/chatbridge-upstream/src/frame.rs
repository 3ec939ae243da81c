//! Upstream body framing.
//!
//! The chat endpoint answers with newline separated `type:payload` lines:
//!
//! ```text
//! 0:"Hello"
//! 0:"Hello world"
//! e:{"finishReason":"stop","usage":{"promptTokens":9,"completionTokens":2}}
//! d:{"finishReason":"stop"}
//! ```

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::error::FrameParseError;
use crate::types::FinishReason;

/// Splits a byte stream into lines. Bytes are buffered until a `\n` arrives so
/// multi-byte characters split across chunks decode correctly.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    /// Feed a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(decode_line(&line[..pos]));
        }
        lines
    }

    /// The unterminated remainder, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\r')
        .to_string()
}

/// Turn a response body into a stream of lines. A transport error is yielded
/// once and ends the stream.
pub fn lines<S, E>(body: S) -> impl Stream<Item = Result<String, E>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    async_stream::stream! {
        let mut body = Box::pin(body);
        let mut decoder = LineDecoder::default();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(chunk) => {
                    for line in decoder.push(&chunk) {
                        yield Ok(line);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        if let Some(line) = decoder.finish() {
            yield Ok(line);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamFrame {
    /// `0:` text (the full frame, not yet reconciled)
    Text(String),
    /// `3:` error payload
    Error(String),
    /// `e:` or `d:`
    Finish(FinishReason),
    Other { kind: String, payload: String },
}

/// Parse one line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<UpstreamFrame>, FrameParseError> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    let (kind, payload) = line
        .split_once(':')
        .ok_or(FrameParseError::MissingSeparator)?;
    let kind = kind.trim();
    if kind.is_empty() {
        return Err(FrameParseError::EmptyType);
    }

    let frame = match kind {
        "0" => UpstreamFrame::Text(decode_text(payload)),
        "3" => UpstreamFrame::Error(decode_text(payload)),
        "e" | "d" => UpstreamFrame::Finish(finish_reason(payload)),
        other => UpstreamFrame::Other {
            kind: other.to_string(),
            payload: payload.to_string(),
        },
    };
    Ok(Some(frame))
}

/// Text payloads are JSON string literals. Anything else is taken as loosely
/// quoted text.
fn decode_text(payload: &str) -> String {
    if let Ok(text) = serde_json::from_str::<String>(payload) {
        return text;
    }
    let inner = payload
        .strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(payload);
    inner.replace("\\\"", "\"").replace("\\n", "\n")
}

fn finish_reason(payload: &str) -> FinishReason {
    serde_json::from_str::<Value>(payload)
        .ok()
        .as_ref()
        .and_then(|v| v.get("finishReason"))
        .and_then(Value::as_str)
        .map(FinishReason::from_upstream)
        .unwrap_or(FinishReason::Stop)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_joins_split_chunks() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push(b"0:\"Hel").is_empty());
        assert_eq!(decoder.push(b"lo\"\r\n0:\"x\"\n"), vec!["0:\"Hello\"", "0:\"x\""]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_decoder_keeps_multibyte_chars_intact() {
        let bytes = "0:\"héllo 🎨\"\n".as_bytes();
        let mut decoder = LineDecoder::default();
        let mut out = Vec::new();
        for b in bytes {
            out.extend(decoder.push(std::slice::from_ref(b)));
        }
        assert_eq!(out, vec!["0:\"héllo 🎨\""]);
    }

    #[test]
    fn test_decoder_flushes_unterminated_tail() {
        let mut decoder = LineDecoder::default();
        decoder.push(b"d:{}");
        assert_eq!(decoder.finish().as_deref(), Some("d:{}"));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_parse_text_frames() {
        assert_eq!(
            parse_line(r#"0:"line one\nline \"two\"""#).unwrap(),
            Some(UpstreamFrame::Text("line one\nline \"two\"".to_string()))
        );
        // Not valid JSON: raw control character inside the literal.
        assert_eq!(
            parse_line("0:\"tab\there\\n\"").unwrap(),
            Some(UpstreamFrame::Text("tab\there\n".to_string()))
        );
    }

    #[test]
    fn test_parse_finish_frames() {
        assert_eq!(
            parse_line(r#"e:{"finishReason":"length","usage":{}}"#).unwrap(),
            Some(UpstreamFrame::Finish(FinishReason::Length))
        );
        assert_eq!(
            parse_line("d:").unwrap(),
            Some(UpstreamFrame::Finish(FinishReason::Stop))
        );
    }

    #[test]
    fn test_parse_other_and_invalid_lines() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert_eq!(parse_line("no separator"), Err(FrameParseError::MissingSeparator));
        assert_eq!(parse_line(":\"x\""), Err(FrameParseError::EmptyType));
        assert_eq!(
            parse_line(r#"3:"overloaded""#).unwrap(),
            Some(UpstreamFrame::Error("overloaded".to_string()))
        );
        assert!(matches!(
            parse_line(r#"f:{"messageId":"m1"}"#).unwrap(),
            Some(UpstreamFrame::Other { kind, .. }) if kind == "f"
        ));
    }

    #[tokio::test]
    async fn test_lines_stream_stops_after_error() {
        let chunks: Vec<Result<Bytes, &'static str>> = vec![
            Ok(Bytes::from_static(b"0:\"a\"\n0:")),
            Ok(Bytes::from_static(b"\"b\"\n")),
            Err("reset"),
            Ok(Bytes::from_static(b"0:\"c\"\n")),
        ];
        let out: Vec<_> = lines(futures::stream::iter(chunks)).collect().await;
        assert_eq!(
            out,
            vec![
                Ok("0:\"a\"".to_string()),
                Ok("0:\"b\"".to_string()),
                Err("reset"),
            ]
        );
    }
}
