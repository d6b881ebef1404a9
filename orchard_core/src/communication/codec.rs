//! Payload codec for registry values and bus messages
//!
//! Values travel as self-describing JSON so any structured value survives
//! a publish/subscribe round-trip without the receiver knowing its type.

use crate::error::OrchardResult;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

pub fn encode<T: Serialize + ?Sized>(value: &T) -> OrchardResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> OrchardResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Decode into a dynamic value, as handed to topic handlers
pub fn decode_value(bytes: &[u8]) -> OrchardResult<Value> {
    decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Pose {
        frame: String,
        xyz: [f64; 3],
        tags: Vec<Option<u32>>,
    }

    #[test]
    fn test_structured_value_roundtrip() {
        let pose = Pose {
            frame: "map".into(),
            xyz: [1.5, -2.0, 0.25],
            tags: vec![Some(1), None],
        };
        let bytes = encode(&pose).unwrap();
        assert_eq!(decode::<Pose>(&bytes).unwrap(), pose);

        let dynamic = decode_value(&bytes).unwrap();
        assert_eq!(dynamic["frame"], json!("map"));
    }

    #[test]
    fn test_garbage_is_serialization_error() {
        let err = decode_value(b"\x00\x01not json").unwrap_err();
        assert!(matches!(err, crate::error::OrchardError::Serialization(_)));
    }
}
