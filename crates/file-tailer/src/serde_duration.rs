//! Human readable durations for configuration files ("250ms", "1s", "1m 30s").

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer, de};

/// Deserialize a duration string like "250ms", "1s" or "1h 2m 3s" into a `Duration`.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(s.trim())
        .map_err(|e| de::Error::custom(format!("invalid duration {s:?}: {e}")))
}

/// Serialize a `Duration` in the same format.
pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Deserialize, Serialize)]
    struct Wrapper {
        #[serde(with = "crate::serde_duration")]
        value: Duration,
    }

    fn parse(s: &str) -> Result<Duration, serde_json::Error> {
        serde_json::from_value::<Wrapper>(serde_json::json!({ "value": s })).map(|w| w.value)
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse(" 1m 30s ").unwrap(), Duration::from_secs(90));
        assert_eq!(parse("1d 2h").unwrap(), Duration::from_secs(93_600));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("soon").is_err());
        assert!(parse("10").is_err());
        assert!(parse("5x").is_err());
    }

    #[test]
    fn test_oversized_durations_are_errors() {
        assert!(parse("1e400ms").is_err());
        assert!(parse("999999999999999999999d").is_err());
        assert!(parse("99999999999999999999999d").is_err());
    }

    #[test]
    fn test_serialize() {
        let json = |value| serde_json::to_value(Wrapper { value }).unwrap()["value"].clone();
        assert_eq!(json(Duration::from_millis(250)), "250ms");
        assert_eq!(json(Duration::from_secs(90)), "1m 30s");
        assert_eq!(json(Duration::from_secs(3_600)), "1h");
    }
}
