//! Minimal typed-props validation: the Engine checks `node.data` against a
//! handler's declared [`PropsSchema`] before invocation, per `SPEC_FULL.md`
//! §4.6. This is intentionally not a general JSON Schema implementation —
//! built-in handlers only need "field X must be present and of kind Y".

use serde_json::Value;

use crate::error::HandlerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Bool,
    Object,
    Array,
    Any,
}

impl FieldKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
            FieldKind::Any => true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PropsField {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

/// A flat list of expected `node.data` fields. Unknown extra fields are
/// ignored; this validates presence and kind, not an exhaustive shape.
#[derive(Debug, Clone, Default)]
pub struct PropsSchema {
    pub fields: Vec<PropsField>,
}

impl PropsSchema {
    pub const fn new(fields: Vec<PropsField>) -> Self {
        Self { fields }
    }

    pub fn validate(&self, node_id: &str, data: &serde_json::Map<String, Value>) -> Result<(), HandlerError> {
        for field in &self.fields {
            match data.get(field.name) {
                Some(value) if field.kind.matches(value) => {}
                Some(value) => {
                    return Err(HandlerError::SchemaValidation {
                        node_id: node_id.to_string(),
                        reason: format!(
                            "field '{}' has the wrong type (got {})",
                            field.name,
                            kind_name(value)
                        ),
                    })
                }
                None if field.required => {
                    return Err(HandlerError::SchemaValidation {
                        node_id: node_id.to_string(),
                        reason: format!("missing required field '{}'", field.name),
                    })
                }
                None => {}
            }
        }
        Ok(())
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> PropsSchema {
        PropsSchema::new(vec![
            PropsField { name: "code", kind: FieldKind::String, required: true },
            PropsField { name: "timeout", kind: FieldKind::Number, required: false },
        ])
    }

    #[test]
    fn accepts_well_formed_data() {
        let data = serde_json::json!({"code": "1+1"}).as_object().unwrap().clone();
        assert!(schema().validate("n", &data).is_ok());
    }

    #[test]
    fn rejects_missing_required_field() {
        let data = serde_json::json!({}).as_object().unwrap().clone();
        assert!(schema().validate("n", &data).is_err());
    }

    #[test]
    fn rejects_wrong_type() {
        let data = serde_json::json!({"code": 5}).as_object().unwrap().clone();
        assert!(schema().validate("n", &data).is_err());
    }

    #[test]
    fn ignores_unknown_extra_fields() {
        let data = serde_json::json!({"code": "x", "extra": true}).as_object().unwrap().clone();
        assert!(schema().validate("n", &data).is_ok());
    }
}
