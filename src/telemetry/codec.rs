use chrono::DateTime;
use chrono_tz::Tz;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::telemetry::{Measurement, Reading};

/// Payloads of this many bytes or fewer are rejected before JSON parsing.
///
/// The length is counted in bytes, not characters. A payload that is long
/// enough in bytes but not in characters holds at most four characters, which
/// can never be a complete reading, so it is rejected as malformed instead.
pub const MIN_PAYLOAD_LEN: usize = 4;

const DEVICE_KEY: &str = "Device";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload too short: expected more than {MIN_PAYLOAD_LEN} bytes, got {0}")]
    TooShort(usize),

    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for {field}: {value}")]
    InvalidType { field: &'static str, value: String },

    #[error("non-finite value for {0}")]
    NonFinite(&'static str),

    #[error("device identifier is empty")]
    EmptyDeviceId,
}

/// Decodes a device payload into a [`Reading`].
///
/// The payload's own notion of time, if any, is ignored: `observed_at` is the
/// caller's receipt time. `source_address` is the connection's peer address,
/// not the address the device claims in its `IP` key.
pub fn decode(
    payload: &[u8],
    source_address: &str,
    observed_at: DateTime<Tz>,
) -> Result<Reading, DecodeError> {
    if payload.len() <= MIN_PAYLOAD_LEN {
        return Err(DecodeError::TooShort(payload.len()));
    }

    let text = std::str::from_utf8(payload)?;
    let object: Map<String, Value> = serde_json::from_str(text)?;

    Ok(Reading {
        device_id: decode_device_id(&object)?,
        source_address: source_address.to_owned(),
        illumination: decode_measurement(&object, Measurement::Illumination)?,
        ammonia: decode_measurement(&object, Measurement::Ammonia)?,
        hydrogen_sulfide: decode_measurement(&object, Measurement::HydrogenSulfide)?,
        humidity: decode_measurement(&object, Measurement::Humidity)?,
        temperature: decode_measurement(&object, Measurement::Temperature)?,
        observed_at,
    })
}

fn decode_device_id(object: &Map<String, Value>) -> Result<String, DecodeError> {
    match object.get(DEVICE_KEY) {
        None | Some(Value::Null) => Err(DecodeError::MissingField(DEVICE_KEY)),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Err(DecodeError::EmptyDeviceId);
            }
            Ok(trimmed.to_owned())
        }
        Some(other) => Err(DecodeError::InvalidType {
            field: DEVICE_KEY,
            value: other.to_string(),
        }),
    }
}

fn decode_measurement(
    object: &Map<String, Value>,
    measurement: Measurement,
) -> Result<f64, DecodeError> {
    let key = measurement.wire_key();

    let value = match object.get(key) {
        None | Some(Value::Null) => return Err(DecodeError::MissingField(key)),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| DecodeError::InvalidType {
            field: key,
            value: n.to_string(),
        })?,
        Some(Value::String(s)) => s.trim().parse().map_err(|_| DecodeError::InvalidType {
            field: key,
            value: s.clone(),
        })?,
        Some(other) => {
            return Err(DecodeError::InvalidType {
                field: key,
                value: other.to_string(),
            });
        }
    };

    if !value.is_finite() {
        return Err(DecodeError::NonFinite(key));
    }

    Ok(value)
}
