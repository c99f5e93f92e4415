//! Payload codec
//!
//! Values are stored as UTF-8 JSON text in both tiers. JSON object keys are
//! always strings, so integer-keyed maps are written as `{"603": ...}`.
//! Decoding into a type whose map keys are integers parses them back, which
//! keeps `HashMap<i64, V>` and friends stable across the round trip.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Serialize a value to its stored text form
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

/// Deserialize a stored payload
pub fn decode<T: DeserializeOwned>(payload: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(payload)
}

/// CRC32 of a payload, widened for the `checksum INTEGER` column.
///
/// Never returns 0: that value marks rows written without a checksum.
pub fn checksum(payload: &str) -> i64 {
    match crc32fast::hash(payload.as_bytes()) {
        0 => 1,
        crc => i64::from(crc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::{BTreeMap, HashMap};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Season {
        number: u32,
        episodes: BTreeMap<u32, String>,
    }

    #[test]
    fn test_integer_keys_survive_round_trip() {
        let mut by_id: HashMap<i64, String> = HashMap::new();
        by_id.insert(603, "The Matrix".to_string());
        by_id.insert(-1, "unknown".to_string());

        let payload = encode(&by_id).unwrap();
        assert!(payload.contains("\"603\""));

        let decoded: HashMap<i64, String> = decode(&payload).unwrap();
        assert_eq!(decoded, by_id);
    }

    #[test]
    fn test_nested_integer_keys() {
        let mut episodes = BTreeMap::new();
        episodes.insert(1, "Pilot".to_string());
        episodes.insert(2, "Second".to_string());
        let season = Season {
            number: 1,
            episodes,
        };

        let decoded: Season = decode(&encode(&season).unwrap()).unwrap();
        assert_eq!(decoded, season);
    }

    #[test]
    fn test_stored_null_is_a_value() {
        let payload = encode(&Option::<u32>::None).unwrap();
        assert_eq!(payload, "null");

        let decoded: Option<u32> = decode(&payload).unwrap();
        assert_eq!(decoded, None);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode::<serde_json::Value>("{not json").is_err());
    }

    #[test]
    fn test_checksum_is_stable_and_nonzero() {
        let a = checksum("{\"title\":\"The Matrix\"}");
        assert_eq!(a, checksum("{\"title\":\"The Matrix\"}"));
        assert_ne!(a, checksum("{\"title\":\"The Matrix Reloaded\"}"));
        assert_ne!(checksum(""), 0);
    }
}
