//! Frame Codec
//!
//! Gateway frames are JSON objects terminated by a NUL byte. Frames from the
//! publish socket may be prefixed with a `<topic>:` multiplexing tag:
//!
//! ```text
//! PING:{"DataType":"PING"}\0
//! {"Reply":"LOGIN","Success":"OK","SessionKey":"...","SubPort":"50994"}\0
//! ```

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::infrastructure::metrics;

/// Topic prefix: word and dot characters, a colon, then the JSON object.
#[allow(clippy::expect_used)] // static pattern, checked by tests
static TOPIC_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.]+:\{").expect("topic prefix pattern is valid"));

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame is not UTF-8.
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Frame body is not JSON.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// JSON codec for gateway frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new frame codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a frame, never failing.
    ///
    /// A malformed frame is logged and decodes to an empty object so the
    /// receive loop keeps running.
    #[must_use]
    pub fn decode(&self, raw: &[u8]) -> Value {
        match self.decode_strict(raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    raw = %String::from_utf8_lossy(raw),
                    "Malformed gateway frame"
                );
                metrics::record_malformed_frame();
                Value::Object(Map::new())
            }
        }
    }

    /// Decode a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not UTF-8 or not JSON.
    pub fn decode_strict(&self, raw: &[u8]) -> Result<Value, CodecError> {
        let text = std::str::from_utf8(raw)?.trim_end_matches('\0');
        let body = TOPIC_PREFIX
            .find(text)
            // The match ends on the opening brace, which belongs to the body.
            .map_or(text, |m| &text[m.end() - 1..]);
        Ok(serde_json::from_str(body)?)
    }

    /// Encode a value as a NUL-terminated frame, optionally topic-prefixed.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    pub fn encode(&self, value: &Value, topic: Option<&str>) -> Result<Vec<u8>, CodecError> {
        let body = serde_json::to_vec(value)?;
        let prefix_len = topic.map_or(0, |t| t.len() + 1);
        let mut frame = Vec::with_capacity(prefix_len + body.len() + 1);
        if let Some(topic) = topic {
            frame.extend_from_slice(topic.as_bytes());
            frame.push(b':');
        }
        frame.extend_from_slice(&body);
        frame.push(0);
        Ok(frame)
    }
}
