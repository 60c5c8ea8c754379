use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// 24-character lowercase hex object id.
///
/// Layout follows the document-store convention: four bytes of seconds since
/// the epoch followed by eight random bytes, so ids sort roughly by creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid record id '{0}': expected 24 hexadecimal characters")]
pub struct InvalidRecordId(pub String);

impl RecordId {
    pub fn generate() -> Self {
        let seconds = Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
        let random = Uuid::new_v4();

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..].copy_from_slice(&random.as_bytes()[..8]);

        Self(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn parse(value: &str) -> Result<Self, InvalidRecordId> {
        let trimmed = value.trim();
        if trimmed.len() == 24 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(trimmed.to_ascii_lowercase()))
        } else {
            Err(InvalidRecordId(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecordId {
    type Err = InvalidRecordId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        RecordId::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_24_hex_chars() {
        let id = RecordId::generate();
        assert_eq!(id.as_str().len(), 24);
        assert!(RecordId::parse(id.as_str()).is_ok());
        assert_ne!(id, RecordId::generate());
    }

    #[test]
    fn parse_rejects_malformed_ids() {
        assert!(RecordId::parse("not-an-id").is_err());
        assert!(RecordId::parse("65a1f0c2e4b0a1b2c3d4e5fz").is_err());
        assert_eq!(
            RecordId::parse("65A1F0C2E4B0A1B2C3D4E5F6").unwrap().as_str(),
            "65a1f0c2e4b0a1b2c3d4e5f6"
        );
    }

    #[test]
    fn deserialization_validates() {
        let ok: Result<RecordId, _> = serde_json::from_str("\"65a1f0c2e4b0a1b2c3d4e5f6\"");
        assert!(ok.is_ok());
        let bad: Result<RecordId, _> = serde_json::from_str("\"42\"");
        assert!(bad.is_err());
    }
}
