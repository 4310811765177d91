//! Schema parsers: one per format, each exposing parse / canonicalize /
//! fingerprint.
//!
//! The three formats are modeled as a tagged variant rather than a trait
//! object hierarchy — [`ParsedSchema`] is matched exhaustively wherever
//! format-specific behavior is needed, which keeps the compiler honest when a
//! fourth format is ever added.

#[cfg(feature = "avro")]
pub mod avro;
#[cfg(feature = "json-schema")]
pub mod json_schema;
#[cfg(feature = "protobuf")]
pub mod protobuf;

use crate::error::Error;
use crate::fingerprint;
use crate::model::SchemaType;

/// A dependency's content made available to a parser resolving `$ref`/import/
/// named-type references. `name` is the format-specific handle the candidate
/// schema uses to refer to it (Avro fully-qualified name, Protobuf import
/// path, JSON Schema `$ref` URI).
#[derive(Debug, Clone)]
pub struct ResolvedReference {
    pub name: String,
    pub subject: String,
    pub version: i32,
    pub schema_type: SchemaType,
    pub content: String,
}

/// The parsed form of a schema, tagged by format.
#[derive(Debug, Clone)]
pub enum ParsedSchema {
    #[cfg(feature = "avro")]
    Avro(avro::AvroSchema),
    #[cfg(feature = "json-schema")]
    Json(json_schema::JsonSchemaDoc),
    #[cfg(feature = "protobuf")]
    Protobuf(protobuf::ProtoSchema),
}

impl ParsedSchema {
    pub fn parse(
        schema_type: SchemaType,
        content: &str,
        references: &[ResolvedReference],
    ) -> Result<Self, Error> {
        match schema_type {
            #[cfg(feature = "avro")]
            SchemaType::Avro => Ok(ParsedSchema::Avro(avro::parse(content, references)?)),
            #[cfg(not(feature = "avro"))]
            SchemaType::Avro => Err(Error::InvalidSchemaType("AVRO (feature disabled)".into())),

            #[cfg(feature = "json-schema")]
            SchemaType::Json => Ok(ParsedSchema::Json(json_schema::parse(content, references)?)),
            #[cfg(not(feature = "json-schema"))]
            SchemaType::Json => Err(Error::InvalidSchemaType("JSON (feature disabled)".into())),

            #[cfg(feature = "protobuf")]
            SchemaType::Protobuf => {
                Ok(ParsedSchema::Protobuf(protobuf::parse(content, references)?))
            }
            #[cfg(not(feature = "protobuf"))]
            SchemaType::Protobuf => {
                Err(Error::InvalidSchemaType("PROTOBUF (feature disabled)".into()))
            }
        }
    }

    pub fn schema_type(&self) -> SchemaType {
        match self {
            #[cfg(feature = "avro")]
            ParsedSchema::Avro(_) => SchemaType::Avro,
            #[cfg(feature = "json-schema")]
            ParsedSchema::Json(_) => SchemaType::Json,
            #[cfg(feature = "protobuf")]
            ParsedSchema::Protobuf(_) => SchemaType::Protobuf,
        }
    }

    /// Deterministic serialization used both as the dedup identity input and,
    /// when `normalize=true`, as the stored content.
    pub fn canonicalize(&self) -> Vec<u8> {
        match self {
            #[cfg(feature = "avro")]
            ParsedSchema::Avro(s) => avro::canonicalize(s),
            #[cfg(feature = "json-schema")]
            ParsedSchema::Json(s) => json_schema::canonicalize(s),
            #[cfg(feature = "protobuf")]
            ParsedSchema::Protobuf(s) => protobuf::canonicalize(s),
        }
    }

    pub fn fingerprint(&self) -> [u8; 32] {
        fingerprint::fingerprint(&self.canonicalize())
    }
}
