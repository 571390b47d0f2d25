use serde_json::Value;

/// Why an inbound bus message could not yield a code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("payload is not valid JSON: {0}")]
    Json(String),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload has no `code` field")]
    MissingCode,
    #[error("`code` is not an integer: {0}")]
    InvalidCode(String),
}

impl From<serde_json::Error> for EnvelopeError {
    fn from(err: serde_json::Error) -> Self {
        EnvelopeError::Json(err.to_string())
    }
}

/// Extract the `code` integer from a `{"code": ...}` message.
///
/// JSON integers are taken as they are, numeric strings are parsed and finite
/// floats are truncated toward zero. Range checking is left to the decoder.
pub fn parse_envelope(payload: &[u8]) -> Result<i128, EnvelopeError> {
    let value: Value = serde_json::from_slice(payload)?;
    let object = value.as_object().ok_or(EnvelopeError::NotAnObject)?;
    let code = object.get("code").ok_or(EnvelopeError::MissingCode)?;

    match code {
        Value::Number(number) => {
            if let Some(code) = number.as_i64() {
                Ok(code.into())
            } else if let Some(code) = number.as_u64() {
                Ok(code.into())
            } else {
                match number.as_f64() {
                    Some(code) if code.is_finite() => Ok(code.trunc() as i128),
                    _ => Err(EnvelopeError::InvalidCode(number.to_string())),
                }
            }
        }
        Value::String(text) => text
            .trim()
            .parse::<i128>()
            .map_err(|_| EnvelopeError::InvalidCode(text.clone())),
        other => Err(EnvelopeError::InvalidCode(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_codes() {
        assert_eq!(parse_envelope(br#"{"code": 8192}"#), Ok(8192));
        assert_eq!(parse_envelope(br#"{"code": -5}"#), Ok(-5));
        assert_eq!(
            parse_envelope(br#"{"code": 4294967296, "rssi": -70}"#),
            Ok(1 << 32)
        );
        assert_eq!(
            parse_envelope(br#"{"code": 18446744073709551615}"#),
            Ok(u64::MAX as i128)
        );
    }

    #[test]
    fn string_and_float_codes() {
        assert_eq!(parse_envelope(br#"{"code": " 1234 "}"#), Ok(1234));
        assert_eq!(parse_envelope(br#"{"code": 12.9}"#), Ok(12));
        assert_eq!(parse_envelope(br#"{"code": "99999999999999999999999"}"#), Ok(99999999999999999999999));
    }

    #[test]
    fn malformed_envelopes() {
        assert!(matches!(
            parse_envelope(b"not json"),
            Err(EnvelopeError::Json(_))
        ));
        assert_eq!(parse_envelope(b"[1, 2]"), Err(EnvelopeError::NotAnObject));
        assert_eq!(parse_envelope(b"{}"), Err(EnvelopeError::MissingCode));
        assert!(matches!(
            parse_envelope(br#"{"code": "abc"}"#),
            Err(EnvelopeError::InvalidCode(_))
        ));
        assert!(matches!(
            parse_envelope(br#"{"code": null}"#),
            Err(EnvelopeError::InvalidCode(_))
        ));
        assert!(matches!(
            parse_envelope(br#"{"code": true}"#),
            Err(EnvelopeError::InvalidCode(_))
        ));
    }
}
