//! The data model from the specification: `Schema`, `SubjectVersion`, `Config`
//! and the small enums that govern compatibility and mode.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Globally unique, monotonically assigned schema identifier.
pub type SchemaId = u32;

/// The reserved metadata key used for optimistic-concurrency hints on
/// registration (see `Registry::register`).
pub const RESERVED_VERSION_HINT_KEY: &str = "confluent:version";

/// Prefix reserved for ecosystem-compatibility metadata keys.
pub const RESERVED_KEY_PREFIX: &str = "confluent:";

#[derive(Default, Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaType {
    #[default]
    Avro,
    Protobuf,
    Json,
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaType::Avro => write!(f, "AVRO"),
            SchemaType::Protobuf => write!(f, "PROTOBUF"),
            SchemaType::Json => write!(f, "JSON"),
        }
    }
}

impl FromStr for SchemaType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            s if s.eq_ignore_ascii_case("AVRO") => Ok(SchemaType::Avro),
            s if s.eq_ignore_ascii_case("PROTOBUF") => Ok(SchemaType::Protobuf),
            s if s.eq_ignore_ascii_case("JSON") => Ok(SchemaType::Json),
            other => Err(Error::InvalidSchemaType(other.to_owned())),
        }
    }
}

/// Compatibility policy for a subject (or the global default).
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompatibilityLevel {
    None,
    #[default]
    Backward,
    BackwardTransitive,
    Forward,
    ForwardTransitive,
    Full,
    FullTransitive,
}

impl CompatibilityLevel {
    /// Whether prior versions are checked transitively (all active versions)
    /// or only against the latest active version.
    pub fn is_transitive(&self) -> bool {
        matches!(
            self,
            CompatibilityLevel::BackwardTransitive
                | CompatibilityLevel::ForwardTransitive
                | CompatibilityLevel::FullTransitive
        )
    }

    /// Directions that must hold for this level: `(check_backward, check_forward)`.
    pub fn directions(&self) -> (bool, bool) {
        use CompatibilityLevel::*;
        match self {
            None => (false, false),
            Backward | BackwardTransitive => (true, false),
            Forward | ForwardTransitive => (false, true),
            Full | FullTransitive => (true, true),
        }
    }
}

impl fmt::Display for CompatibilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use CompatibilityLevel::*;
        let s = match self {
            None => "NONE",
            Backward => "BACKWARD",
            BackwardTransitive => "BACKWARD_TRANSITIVE",
            Forward => "FORWARD",
            ForwardTransitive => "FORWARD_TRANSITIVE",
            Full => "FULL",
            FullTransitive => "FULL_TRANSITIVE",
        };
        write!(f, "{s}")
    }
}

impl FromStr for CompatibilityLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use CompatibilityLevel::*;
        Ok(match s {
            "NONE" => None,
            "BACKWARD" => Backward,
            "BACKWARD_TRANSITIVE" => BackwardTransitive,
            "FORWARD" => Forward,
            "FORWARD_TRANSITIVE" => ForwardTransitive,
            "FULL" => Full,
            "FULL_TRANSITIVE" => FullTransitive,
            other => return Err(Error::InvalidCompatibilityLevel(other.to_owned())),
        })
    }
}

/// Operational gate on a subject (or the global default).
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    #[default]
    ReadWrite,
    ReadOnly,
    ReadOnlyOverride,
    Import,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Mode::*;
        let s = match self {
            ReadWrite => "READWRITE",
            ReadOnly => "READONLY",
            ReadOnlyOverride => "READONLY_OVERRIDE",
            Import => "IMPORT",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use Mode::*;
        Ok(match s {
            "READWRITE" => ReadWrite,
            "READONLY" => ReadOnly,
            "READONLY_OVERRIDE" => ReadOnlyOverride,
            "IMPORT" => Import,
            other => return Err(Error::InvalidMode(other.to_owned())),
        })
    }
}

/// A version selector as accepted on the wire: a positive integer, `"latest"`,
/// or `-1` (an alias for latest).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Version {
    Latest,
    Number(i32),
}

impl Version {
    pub const MAX: i32 = i32::MAX;

    pub fn parse(s: &str) -> Result<Self, Error> {
        if s == "latest" {
            return Ok(Version::Latest);
        }
        match s.parse::<i64>() {
            Ok(-1) => Ok(Version::Latest),
            Ok(n) if n >= 1 && n <= Self::MAX as i64 => Ok(Version::Number(n as i32)),
            _ => Err(Error::InvalidVersion(s.to_owned())),
        }
    }

    /// Validate a concrete version number against the `[1, 2^31-1]` bound.
    pub fn validate(n: i32) -> Result<i32, Error> {
        if n >= 1 {
            Ok(n)
        } else {
            Err(Error::InvalidVersion(n.to_string()))
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Latest => write!(f, "latest"),
            Version::Number(n) => write!(f, "{n}"),
        }
    }
}

/// A `(name, subject, version)` pointer to a schema this one depends on.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
    pub subject: String,
    pub version: i32,
}

/// The canonical, immutable unit of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub id: SchemaId,
    pub schema_type: SchemaType,
    /// The schema text as stored: the raw input, or its canonical form when
    /// `normalize=true` was requested at registration.
    pub content: String,
    /// SHA-256 of the canonical form of `content`, regardless of whether
    /// `content` itself was normalized.
    #[serde(with = "hex_bytes")]
    pub fingerprint: [u8; 32],
    pub references: Vec<Reference>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("fingerprint must be 32 bytes"))
    }
}

/// Binds a [`Schema`] to a subject at a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectVersion {
    pub subject: String,
    pub version: i32,
    pub schema_id: SchemaId,
    pub deleted: bool,
    pub metadata: Option<HashMap<String, String>>,
    pub rule_set: Option<serde_json::Value>,
}

/// Per-subject or global compatibility/mode configuration. The empty string
/// is the reserved key for the global record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub compatibility_level: Option<CompatibilityLevel>,
    /// Metadata property key that splits version checking into groups
    /// (see the compatibility orchestration in [`crate::compat`]).
    pub compatibility_group: Option<String>,
    pub default_metadata: Option<HashMap<String, String>>,
    pub override_metadata: Option<HashMap<String, String>>,
    pub default_rule_set: Option<serde_json::Value>,
    pub override_rule_set: Option<serde_json::Value>,
}

/// Strips reserved `confluent:*` keys from caller-supplied metadata before
/// storage, returning the version hint if present.
pub fn extract_version_hint(metadata: &mut HashMap<String, String>) -> Option<i32> {
    let hint = metadata
        .get(RESERVED_VERSION_HINT_KEY)
        .and_then(|v| v.parse::<i32>().ok());
    metadata.remove(RESERVED_VERSION_HINT_KEY);
    hint
}
