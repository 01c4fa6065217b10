use jsonschema::JSONSchema;
use serde_json::Value;

use stepwise_core::error::{Result, StepwiseError};

/// Validate `instance` against a JSON Schema. `what` names the payload in errors.
pub fn validate(schema: &Value, instance: &Value, what: &str) -> Result<()> {
    let compiled = JSONSchema::compile(schema)
        .map_err(|e| StepwiseError::Validation(format!("invalid schema for {what}: {e}")))?;

    let outcome = compiled.validate(instance).map_err(|errors| {
        errors
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{path}: {e}")
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    });

    outcome.map_err(|message| StepwiseError::Validation(format!("{what}: {message}")))
}

/// Validate when a schema is declared.
pub fn validate_optional(schema: Option<&Value>, instance: &Value, what: &str) -> Result<()> {
    match schema {
        Some(schema) => validate(schema, instance, what),
        None => Ok(()),
    }
}
