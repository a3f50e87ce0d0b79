//! Exact-match schema checking for untrusted JSON records
//!
//! A schema lists every field a record may carry, the primitive type of
//! each, and whether it is optional. A record passes only if it carries
//! every required field with the declared type, every optional field it
//! carries has the declared type, and it carries nothing else.
//!
//! Type tags use the compact form `"string"` / `"?number"`, where a leading
//! `?` marks the field optional.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;

/// Errors building a schema from type tags
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// The tag names no known primitive type
    #[error("Unknown field type tag: {0}")]
    UnknownType(String),

    /// The same field name was declared twice
    #[error("Duplicate schema field: {0}")]
    DuplicateField(String),
}

/// Primitive JSON types a field may be declared with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    /// A JSON object (`null` and arrays do not qualify)
    Object,
}

impl FieldType {
    /// Whether `value` has this type
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
        }
    }

    /// Tag name of this type
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "number" => Ok(Self::Number),
            "boolean" => Ok(Self::Boolean),
            "object" => Ok(Self::Object),
            other => Err(SchemaError::UnknownType(other.to_string())),
        }
    }
}

/// One declared field of a schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub optional: bool,
}

impl FieldSpec {
    /// A field that must be present
    pub const fn required(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            optional: false,
        }
    }

    /// A field that may be absent
    pub const fn optional(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            optional: true,
        }
    }

    /// Parse a compact tag such as `"?number"`
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::UnknownType` if the tag names no known type.
    pub fn from_tag(name: &'static str, tag: &str) -> Result<Self, SchemaError> {
        match tag.strip_prefix('?') {
            Some(rest) => Ok(Self::optional(name, rest.parse()?)),
            None => Ok(Self::required(name, tag.parse()?)),
        }
    }

    /// Compact tag for this field
    pub fn tag(&self) -> String {
        if self.optional {
            format!("?{}", self.ty)
        } else {
            self.ty.to_string()
        }
    }
}

/// Build a schema from `(name, tag)` pairs
///
/// # Errors
///
/// Returns `SchemaError` on an unknown tag or a repeated field name.
pub fn schema_from_tags(tags: &[(&'static str, &str)]) -> Result<Vec<FieldSpec>, SchemaError> {
    let mut fields: Vec<FieldSpec> = Vec::with_capacity(tags.len());
    for (name, tag) in tags {
        if fields.iter().any(|f| f.name == *name) {
            return Err(SchemaError::DuplicateField((*name).to_string()));
        }
        fields.push(FieldSpec::from_tag(name, tag)?);
    }
    Ok(fields)
}

/// Check `record` against `schema` exactly
///
/// Two counters drive the decision: the schema fields still unaccounted
/// for, and the record fields not yet matched to a schema field. Both must
/// reach zero. A present field of the wrong type fails immediately.
///
/// Field names in `schema` must be unique.
pub fn check_schema(record: &Value, schema: &[FieldSpec]) -> bool {
    let Some(object) = record.as_object() else {
        return false;
    };

    let mut remaining_required = schema.len();
    let mut unmatched_record_fields = object.len();

    for field in schema {
        match object.get(field.name) {
            Some(value) => {
                remaining_required -= 1;
                unmatched_record_fields = unmatched_record_fields.saturating_sub(1);
                if !field.ty.matches(value) {
                    return false;
                }
            }
            None if field.optional => remaining_required -= 1,
            None => return false,
        }
    }

    remaining_required == 0 && unmatched_record_fields == 0
}
