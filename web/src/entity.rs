//! Declarative entity validation.
//!
//! Each entity's adapter is driven by an [`EntitySpec`]: the set of fields
//! clients may send, their types, and which are required on create. Query
//! parameters arrive as strings and are coerced to their declared types;
//! body fields are type-checked as-is. Undeclared fields are ignored rather
//! than rejected, matching the tolerant posture of the services behind the
//! broker.

use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::fmt;
use switchboard_core::{Reply, ValidationError, Validator};

use crate::error::BadRequest;

/// The wire type a field must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A JSON string.
    String,
    /// A JSON number (query values like `"3"` are coerced).
    Number,
    /// A JSON boolean (query values `"true"`/`"false"` are coerced).
    Boolean,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
        };
        f.write_str(s)
    }
}

/// One declared field of an entity.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Field name as it appears on the wire.
    pub name: String,
    /// Declared type.
    pub kind: FieldKind,
    /// Whether `POST` must include it.
    pub required: bool,
}

impl FieldSpec {
    /// A field `POST` must include.
    #[must_use]
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    /// A field clients may include.
    #[must_use]
    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }
}

/// Response-schema check attached to an entity.
pub type ReplyCheck = fn(&Reply) -> Result<bool, ValidationError>;

/// The declarative description of one entity's REST adapter.
pub struct EntitySpec {
    /// Entity name; doubles as the path segment and the routing-key entity.
    pub name: String,
    /// Declared fields.
    pub fields: Vec<FieldSpec>,
    /// Optional response validator, evaluated by the demultiplexer.
    pub validator: Option<ReplyCheck>,
    /// Whether read replies go through the entity resolver.
    pub resolve_reads: bool,
}

impl EntitySpec {
    /// A spec with no fields yet.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            validator: None,
            resolve_reads: true,
        }
    }

    /// Declare a field.
    #[must_use]
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Attach a response validator.
    #[must_use]
    pub fn with_validator(mut self, validator: ReplyCheck) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Skip the resolver on reads (for entities with no references).
    #[must_use]
    pub fn without_resolution(mut self) -> Self {
        self.resolve_reads = false;
        self
    }

    /// Box the validator for a pending record, if one is declared.
    #[must_use]
    pub fn boxed_validator(&self) -> Option<Validator> {
        self.validator
            .map(|check| Box::new(check) as Validator)
    }

    /// Coerce query parameters onto their declared types.
    ///
    /// Only declared fields pass through; everything else is ignored.
    ///
    /// # Errors
    ///
    /// Returns a 400 rejection naming the first uncoercible field.
    pub fn coerce_query(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<Map<String, Value>, BadRequest> {
        let mut fields = Map::new();
        for spec in &self.fields {
            if let Some(raw) = params.get(&spec.name) {
                let value = coerce_scalar(raw, spec.kind)
                    .ok_or_else(|| BadRequest::invalid(&spec.name, spec.kind))?;
                fields.insert(spec.name.clone(), value);
            }
        }
        Ok(fields)
    }

    /// Validate a create body: required fields present, all typed right.
    ///
    /// # Errors
    ///
    /// Returns a 400 rejection for the first missing required field or
    /// wrongly-typed value; nothing is published in that case.
    pub fn validate_create(&self, body: &Value) -> Result<Map<String, Value>, BadRequest> {
        let object = body.as_object().ok_or_else(BadRequest::not_an_object)?;
        let mut fields = Map::new();
        for spec in &self.fields {
            match object.get(&spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(BadRequest::missing(&spec.name));
                }
                None | Some(Value::Null) => {}
                Some(value) => {
                    if !matches_kind(value, spec.kind) {
                        return Err(BadRequest::invalid(&spec.name, spec.kind));
                    }
                    fields.insert(spec.name.clone(), value.clone());
                }
            }
        }
        Ok(fields)
    }

    /// Validate an update body: every declared field optional, typed right.
    ///
    /// # Errors
    ///
    /// Returns a 400 rejection for the first wrongly-typed value.
    pub fn validate_update(&self, body: &Value) -> Result<Map<String, Value>, BadRequest> {
        let object = body.as_object().ok_or_else(BadRequest::not_an_object)?;
        let mut fields = Map::new();
        for spec in &self.fields {
            match object.get(&spec.name) {
                None | Some(Value::Null) => {}
                Some(value) => {
                    if !matches_kind(value, spec.kind) {
                        return Err(BadRequest::invalid(&spec.name, spec.kind));
                    }
                    fields.insert(spec.name.clone(), value.clone());
                }
            }
        }
        Ok(fields)
    }
}

impl fmt::Debug for EntitySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySpec")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("has_validator", &self.validator.is_some())
            .field("resolve_reads", &self.resolve_reads)
            .finish()
    }
}

fn matches_kind(value: &Value, kind: FieldKind) -> bool {
    match kind {
        FieldKind::String => value.is_string(),
        FieldKind::Number => value.is_number(),
        FieldKind::Boolean => value.is_boolean(),
    }
}

/// Coerce a query-string value onto the declared type.
fn coerce_scalar(raw: &str, kind: FieldKind) -> Option<Value> {
    match kind {
        FieldKind::String => Some(Value::String(raw.to_owned())),
        FieldKind::Number => {
            if let Ok(int) = raw.parse::<i64>() {
                Some(Value::Number(Number::from(int)))
            } else {
                raw.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number)
            }
        }
        FieldKind::Boolean => match raw {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
    }
}

/// A ready-made validator: a successful reply's `result` must be a list.
///
/// Failure replies pass through untouched so their status mapping still
/// reaches the client.
///
/// # Errors
///
/// Never returns `Err`; the signature matches [`ReplyCheck`].
pub fn list_shaped_reply(reply: &Reply) -> Result<bool, ValidationError> {
    Ok(reply.status != 0 || reply.result().is_some_and(Value::is_array))
}
