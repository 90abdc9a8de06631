use chrono::DateTime;
use serde::{Deserialize, Deserializer};
use std::time::SystemTime;
use tracing::debug;

/// Parses an RFC 3339 timestamp with any UTC offset. A value that does not
/// parse is dropped rather than failing the surrounding document.
pub fn deserialize_optional_rfc3339<'de, D>(deserializer: D) -> Result<Option<SystemTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    match DateTime::parse_from_rfc3339(&raw) {
        Ok(timestamp) => Ok(Some(SystemTime::from(timestamp))),
        Err(e) => {
            debug!(%raw, error = %e, "ignoring unparseable timestamp");
            Ok(None)
        }
    }
}

/// Treats an explicit `null` like a missing field.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::time::{Duration, UNIX_EPOCH};

    #[derive(Deserialize)]
    struct TestStruct {
        #[serde(default, deserialize_with = "deserialize_optional_rfc3339")]
        timestamp: Option<SystemTime>,
        #[serde(default, deserialize_with = "null_as_default")]
        tags: Vec<String>,
    }

    #[test]
    fn test_deserialize_rfc3339() {
        let json = r#"{"timestamp": "2022-01-01T00:00:00Z"}"#;
        let result: TestStruct = serde_json::from_str(json).unwrap();

        let expected_time = UNIX_EPOCH + Duration::from_secs(1640995200);

        assert_eq!(result.timestamp, Some(expected_time));
    }

    #[test]
    fn test_deserialize_rfc3339_with_offset() {
        let json = r#"{"timestamp": "2021-12-31T19:00:00.1234567-05:00"}"#;
        let result: TestStruct = serde_json::from_str(json).unwrap();

        let expected_time = UNIX_EPOCH + Duration::new(1640995200, 123_456_700);

        assert_eq!(result.timestamp, Some(expected_time));
    }

    #[test]
    fn test_missing_or_null_timestamp() {
        let missing: TestStruct = serde_json::from_str("{}").unwrap();
        let null: TestStruct = serde_json::from_str(r#"{"timestamp": null}"#).unwrap();

        assert_eq!(missing.timestamp, None);
        assert_eq!(null.timestamp, None);
    }

    #[test]
    fn test_invalid_timestamp_is_dropped() {
        let result: TestStruct = serde_json::from_str(r#"{"timestamp": "yesterday"}"#).unwrap();
        assert_eq!(result.timestamp, None);
    }

    #[test]
    fn test_null_list_is_empty() {
        let null: TestStruct = serde_json::from_str(r#"{"tags": null}"#).unwrap();
        let missing: TestStruct = serde_json::from_str("{}").unwrap();

        assert!(null.tags.is_empty());
        assert!(missing.tags.is_empty());
    }
}
