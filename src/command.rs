//! The on-log `Command` wire format.
//!
//! The JSON shape is part of the persisted log and snapshot contract, so it
//! is pinned exactly: `{"Key": "...", "Value": "..."}`, unknown fields
//! rejected. `Command` is modelled as an enum (a tagged value) with a single
//! variant today; the wire encoding does not carry a variant tag because
//! there is currently only one shape to encode — adding a second variant is
//! a breaking wire change, noted in DESIGN.md.

use serde::{Deserialize, Serialize};

/// A mutation to apply to the [`crate::store::Store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set { key: String, value: String },
}

/// The exact on-wire shape: capitalised field names, no extra fields.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Wire {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: String,
}

impl Serialize for Command {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Command::Set { key, value } = self;
        Wire {
            key: key.clone(),
            value: value.clone(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Command {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = Wire::deserialize(deserializer)?;
        Ok(Command::Set {
            key: wire.key,
            value: wire.value,
        })
    }
}

impl Command {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Command::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Command always serialises")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_is_key_value_json() {
        let cmd = Command::set("a", "1");
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"Key":"a","Value":"1"}"#);
    }

    #[test]
    fn round_trips() {
        let cmd = Command::set("k", "v");
        let decoded = Command::decode(&cmd.encode()).unwrap();
        assert_eq!(cmd, decoded);
    }

    #[test]
    fn empty_value_is_legal() {
        let cmd = Command::set("k", "");
        let decoded = Command::decode(&cmd.encode()).unwrap();
        assert_eq!(decoded, Command::Set { key: "k".into(), value: "".into() });
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let bad = br#"{"Key":"a","Value":"1","Extra":"x"}"#;
        assert!(Command::decode(bad).is_err());
    }

    #[test]
    fn missing_field_is_rejected() {
        let bad = br#"{"Key":"a"}"#;
        assert!(Command::decode(bad).is_err());
    }
}
