//! Compatibility orchestration (component B): resolves which prior versions
//! a candidate schema must be checked against under a compatibility level,
//! invokes the format-specific checker for each required direction, and
//! aggregates the result.

#[cfg(feature = "avro")]
pub mod avro;
#[cfg(feature = "json-schema")]
pub mod json_schema;
#[cfg(feature = "protobuf")]
pub mod protobuf;

use crate::model::CompatibilityLevel;
use crate::parser::ParsedSchema;

/// One prior active version available to check a candidate against.
pub struct PriorVersion {
    pub version: i32,
    pub schema: ParsedSchema,
    /// The value of the subject's configured compatibility-group metadata
    /// key for this version, if any.
    pub group_value: Option<String>,
}

/// Outcome of a compatibility check: whether it passed, plus diagnostic
/// messages naming the failing version and direction (used in verbose mode
/// and in `IncompatibleSchema` errors).
#[derive(Debug, Default)]
pub struct CompatResult {
    pub is_compatible: bool,
    pub messages: Vec<String>,
}

/// Direction of a single reader/writer comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Backward,
    Forward,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Backward => "BACKWARD",
            Direction::Forward => "FORWARD",
        }
    }
}

/// Check `candidate` against `priors` under `level`, optionally restricted to
/// the compatibility group `group_value` shares with each prior version.
pub fn check(
    candidate: &ParsedSchema,
    level: CompatibilityLevel,
    priors: &[PriorVersion],
    group_value: Option<&str>,
) -> CompatResult {
    if level == CompatibilityLevel::None {
        return CompatResult {
            is_compatible: true,
            messages: vec![],
        };
    }

    let grouped: Vec<&PriorVersion> = priors
        .iter()
        .filter(|p| match (group_value, &p.group_value) {
            (Some(g), Some(pg)) => g == pg,
            (None, _) => true,
            (Some(_), None) => false,
        })
        .collect();

    let selected: Vec<&PriorVersion> = if level.is_transitive() {
        grouped
    } else {
        grouped.into_iter().max_by_key(|p| p.version).into_iter().collect()
    };

    let (check_backward, check_forward) = level.directions();
    let mut messages = Vec::new();

    for prior in &selected {
        if check_backward {
            check_one(candidate, &prior.schema, Direction::Backward, prior.version, &mut messages);
        }
        if check_forward {
            check_one(candidate, &prior.schema, Direction::Forward, prior.version, &mut messages);
        }
    }

    CompatResult {
        is_compatible: messages.is_empty(),
        messages,
    }
}

fn check_one(
    candidate: &ParsedSchema,
    prior: &ParsedSchema,
    direction: Direction,
    prior_version: i32,
    messages: &mut Vec<String>,
) {
    // BACKWARD: new is reader, old is writer. FORWARD: old is reader, new is writer.
    let (reader, writer) = match direction {
        Direction::Backward => (candidate, prior),
        Direction::Forward => (prior, candidate),
    };

    let result = match (reader, writer) {
        #[cfg(feature = "avro")]
        (ParsedSchema::Avro(r), ParsedSchema::Avro(w)) => avro::is_compatible(r, w),
        #[cfg(feature = "json-schema")]
        (ParsedSchema::Json(r), ParsedSchema::Json(w)) => json_schema::is_compatible(r, w),
        #[cfg(feature = "protobuf")]
        (ParsedSchema::Protobuf(r), ParsedSchema::Protobuf(w)) => protobuf::is_compatible(r, w),
        _ => (false, vec!["reader and writer are of different schema types".to_string()]),
    };

    if !result.0 {
        for detail in result.1 {
            messages.push(format!(
                "{} compatibility check failed against version {}: {}",
                direction.label(),
                prior_version,
                detail
            ));
        }
    }
}
