//! Upstream Codec
//!
//! JSON encoding of [`ClientMessage`]s and decoding of frames into
//! [`ServerMessage`]s. A frame is either a single envelope object or an
//! array of envelopes; unknown methods are reported, not ignored, so the
//! session can log them.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::messages::{ClientMessage, Envelope, SeriesPoint, ServerMessage};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Method is not part of the protocol.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// Frame is neither an envelope nor an array of envelopes.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the upstream session.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON, not an envelope (array),
    /// names an unknown method or carries malformed parameters.
    pub fn decode(&self, text: &str) -> Result<Vec<ServerMessage>, CodecError> {
        let trimmed = text.trim();

        if trimmed.starts_with('[') {
            let envelopes: Vec<Envelope> = serde_json::from_str(trimmed)?;
            envelopes.into_iter().map(decode_envelope).collect()
        } else if trimmed.starts_with('{') {
            let envelope: Envelope = serde_json::from_str(trimmed)?;
            Ok(vec![decode_envelope(envelope)?])
        } else {
            let preview: String = trimmed.chars().take(50).collect();
            Err(CodecError::InvalidFormat(format!(
                "expected JSON array or object, got: {preview}..."
            )))
        }
    }

    /// Encode a client message.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, message: &ClientMessage) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&message.to_envelope())?)
    }
}

fn params<T: DeserializeOwned>(p: Vec<Value>) -> Result<T, CodecError> {
    Ok(serde_json::from_value(Value::Array(p))?)
}

fn decode_envelope(envelope: Envelope) -> Result<ServerMessage, CodecError> {
    let Envelope { m, p } = envelope;

    let message = match m.as_str() {
        "chart_ready" => {
            let (chart_id,): (String,) = params(p)?;
            ServerMessage::ChartReady { chart_id }
        }
        "series_update" => {
            let (chart_id, point): (String, SeriesPoint) = params(p)?;
            ServerMessage::SeriesUpdate { chart_id, point }
        }
        "study_update" => {
            let (chart_id, study_id, payload): (String, String, Value) = params(p)?;
            ServerMessage::StudyUpdate {
                chart_id,
                study_id,
                payload,
            }
        }
        "study_error" => {
            let (chart_id, study_id, message): (String, String, String) = params(p)?;
            ServerMessage::StudyError {
                chart_id,
                study_id,
                message,
            }
        }
        "chart_error" => {
            let (chart_id, message): (String, String) = params(p)?;
            ServerMessage::ChartError { chart_id, message }
        }
        "protocol_error" => {
            let (message,): (String,) = params(p)?;
            ServerMessage::ProtocolError { message }
        }
        _ => return Err(CodecError::UnknownMethod(m)),
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decode_single_envelope() {
        let codec = JsonCodec::new();
        let messages = codec
            .decode(r#"{"m": "study_update", "p": ["cs_1", "st_1", {"plot_0": [3, 2, 1]}]}"#)
            .unwrap();
        assert_eq!(
            messages,
            vec![ServerMessage::StudyUpdate {
                chart_id: "cs_1".into(),
                study_id: "st_1".into(),
                payload: json!({"plot_0": [3, 2, 1]}),
            }]
        );
    }

    #[test]
    fn decode_batch() {
        let codec = JsonCodec::new();
        let messages = codec
            .decode(
                r#"[{"m": "chart_ready", "p": ["cs_1"]},
                    {"m": "series_update", "p": ["cs_1", {"price": 101.5, "volume": 12.0}]}]"#,
            )
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].chart_id(), Some("cs_1"));
        assert_eq!(
            messages[1],
            ServerMessage::SeriesUpdate {
                chart_id: "cs_1".into(),
                point: SeriesPoint {
                    price: Some(101.5),
                    volume: Some(12.0),
                },
            }
        );
    }

    #[test]
    fn series_point_fields_are_optional() {
        let messages = JsonCodec::new()
            .decode(r#"{"m": "series_update", "p": ["cs_1", {}]}"#)
            .unwrap();
        assert!(matches!(
            &messages[0],
            ServerMessage::SeriesUpdate { point, .. } if point.price.is_none()
        ));
    }

    #[test]
    fn unknown_method_is_an_error() {
        let err = JsonCodec::new()
            .decode(r#"{"m": "quote_data", "p": []}"#)
            .unwrap_err();
        assert!(matches!(err, CodecError::UnknownMethod(m) if m == "quote_data"));
    }

    #[test]
    fn wrong_arity_is_an_error() {
        let err = JsonCodec::new()
            .decode(r#"{"m": "chart_error", "p": ["cs_1"]}"#)
            .unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
    }

    #[test]
    fn non_json_frame_is_invalid() {
        let err = JsonCodec::new().decode("~h~42").unwrap_err();
        assert!(matches!(err, CodecError::InvalidFormat(_)));
    }

    #[test]
    fn encode_auth() {
        let text = JsonCodec::new()
            .encode(&ClientMessage::SetAuthToken {
                token: "abc".into(),
            })
            .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&text).unwrap(),
            json!({"m": "set_auth_token", "p": ["abc"]})
        );
    }
}
