//! Field schemas and the JSON-schema validators compiled from them (C10).
//!
//! A table or KV store compiles its `Field[]` into one validator at
//! construction. Per §4.3/§4.4, writes are never validated — only reads
//! decide whether a row or value is `invalid`, so a peer that syncs data
//! written against a newer schema still gets to see it rather than have
//! it silently dropped.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{EpicenterError, Result};

/// The scalar/structured type a field holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FieldKind {
    /// A row identifier. Only valid on table fields, never KV fields.
    Id,
    /// Free-form text.
    Text,
    /// A whole number.
    Integer,
    /// A floating-point number.
    Real,
    /// A boolean.
    Boolean,
    /// An ISO-8601 date string.
    Date,
    /// One of a fixed set of string options.
    Select {
        /// The allowed values.
        options: Vec<String>,
    },
    /// Zero or more tags, optionally restricted to a fixed vocabulary.
    Tags {
        /// The allowed values, or `None` for free-form tags.
        options: Option<Vec<String>>,
    },
    /// An arbitrary value validated against a nested JSON schema.
    Json {
        /// The nested schema.
        schema: Value,
    },
}

/// One column of a table, or one key of the KV store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    /// The field's stable identifier (also its KV storage key, for KV fields).
    pub id: String,
    /// The field's type.
    pub kind: FieldKind,
    /// Whether `null` is an acceptable value in addition to `kind`.
    #[serde(default)]
    pub nullable: bool,
    /// The value used when no entry is present.
    #[serde(default)]
    pub default: Option<Value>,
}

impl Field {
    /// Shorthand constructor for a required, non-nullable field with no default.
    pub fn new(id: impl Into<String>, kind: FieldKind) -> Self {
        Self { id: id.into(), kind, nullable: false, default: None }
    }

    /// Builder method: mark this field nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Builder method: set this field's default value.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    fn json_schema(&self) -> Value {
        let mut schema = match &self.kind {
            FieldKind::Id | FieldKind::Text | FieldKind::Date => json!({ "type": "string" }),
            FieldKind::Integer => json!({ "type": "integer" }),
            FieldKind::Real => json!({ "type": "number" }),
            FieldKind::Boolean => json!({ "type": "boolean" }),
            FieldKind::Select { options } => json!({ "type": "string", "enum": options }),
            FieldKind::Tags { options: Some(options) } => json!({
                "type": "array",
                "items": { "type": "string", "enum": options },
            }),
            FieldKind::Tags { options: None } => json!({
                "type": "array",
                "items": { "type": "string" },
            }),
            FieldKind::Json { schema } => schema.clone(),
        };

        if self.nullable
            && let Some(obj) = schema.as_object_mut()
            && let Some(ty) = obj.remove("type")
        {
            let mut types = match ty {
                Value::Array(values) => values,
                other => vec![other],
            };
            types.push(json!("null"));
            obj.insert("type".to_string(), Value::Array(types));
        }
        schema
    }
}

/// One `{path, message}` validation failure, as reported by the compiled
/// schema validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    /// JSON-pointer-style path to the offending value, e.g. `/count`.
    pub path: String,
    /// Human-readable description of the failure.
    pub message: String,
}

/// A validator compiled once from a set of fields, used to check an
/// object (a row, or a single KV value) against all of them at read time.
pub struct RowValidator {
    fields: Vec<Field>,
    compiled: OnceLock<jsonschema::Validator>,
}

impl RowValidator {
    /// Compiles a validator from `fields`. Compilation of the underlying
    /// `jsonschema::Validator` is deferred to first use (it is not
    /// `Send`-trivial to store eagerly across the async boundaries some
    /// providers need), but the schema shape itself is fixed here.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields, compiled: OnceLock::new() }
    }

    /// The fields this validator was compiled from.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    fn schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            properties.insert(field.id.clone(), field.json_schema());
            if field.default.is_none() && !field.nullable {
                required.push(Value::String(field.id.clone()));
            }
        }
        json!({
            "type": "object",
            "properties": Value::Object(properties),
            "required": required,
        })
    }

    fn validator(&self) -> Result<&jsonschema::Validator> {
        if self.compiled.get().is_none() {
            let schema = self.schema();
            let compiled = jsonschema::validator_for(&schema)
                .map_err(|e| EpicenterError::Crdt(format!("invalid field schema: {e}")))?;
            let _ = self.compiled.set(compiled);
        }
        Ok(self.compiled.get().expect("just initialized"))
    }

    /// Validates `instance` (a row or KV value as a JSON object/value)
    /// against the compiled schema, returning every failure found.
    pub fn validate(&self, instance: &Value) -> Result<Vec<FieldError>> {
        let validator = self.validator()?;
        Ok(validator
            .iter_errors(instance)
            .map(|e| FieldError { path: e.instance_path.to_string(), message: e.to_string() })
            .collect())
    }

    /// Validates a single field's value in isolation (used by the KV
    /// store, which has no enclosing row object).
    pub fn validate_field(field: &Field, value: &Value) -> Result<Vec<FieldError>> {
        let schema = field.json_schema();
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| EpicenterError::Crdt(format!("invalid field schema: {e}")))?;
        Ok(validator
            .iter_errors(value)
            .map(|e| FieldError { path: e.instance_path.to_string(), message: e.to_string() })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_field_missing_is_invalid() {
        let validator = RowValidator::new(vec![Field::new("count", FieldKind::Integer)]);
        let errors = validator.validate(&json!({})).unwrap();
        assert!(!errors.is_empty());
    }

    #[test]
    fn field_with_default_is_not_required() {
        let validator = RowValidator::new(vec![
            Field::new("count", FieldKind::Integer).with_default(json!(0)),
        ]);
        let errors = validator.validate(&json!({})).unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn wrong_type_is_invalid() {
        let validator = RowValidator::new(vec![Field::new("count", FieldKind::Integer)]);
        let errors = validator.validate(&json!({ "count": "not a number" })).unwrap();
        assert!(errors.iter().any(|e| e.path.contains("count")));
    }

    #[test]
    fn nullable_field_accepts_null() {
        let field = Field::new("title", FieldKind::Text).nullable();
        let errors = RowValidator::validate_field(&field, &Value::Null).unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn select_rejects_value_outside_options() {
        let field = Field::new(
            "status",
            FieldKind::Select { options: vec!["open".into(), "closed".into()] },
        );
        let errors = RowValidator::validate_field(&field, &json!("archived")).unwrap();
        assert!(!errors.is_empty());
    }
}
