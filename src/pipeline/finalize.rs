//! Authoritative parse of the complete response text.

use crate::{Error, ErrorContext, Result};
use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

// Tried in order after a direct parse fails: fenced blocks, then the widest object.
static CANDIDATES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"```json\s*([\s\S]*?)\s*```",
        r"```\s*([\s\S]*?)\s*```",
        r"\{[\s\S]*\}",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Parse the full response into a JSON object.
///
/// Models often wrap the object in a markdown fence or a sentence of prose;
/// both are tolerated. Anything that does not yield an object is a
/// `ParseFailure`.
pub fn parse_authoritative(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::parse("upstream returned an empty response"));
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return expect_object(value);
    }

    for re in CANDIDATES.iter() {
        let Some(caps) = re.captures(trimmed) else {
            continue;
        };
        let candidate = caps
            .get(1)
            .or_else(|| caps.get(0))
            .map(|m| m.as_str().trim())
            .unwrap_or_default();
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return expect_object(value);
        }
    }

    Err(Error::parse(format!(
        "response is not valid JSON ({} bytes)",
        trimmed.len()
    )))
}

fn expect_object(value: Value) -> Result<Value> {
    if value.is_object() {
        Ok(value)
    } else {
        Err(Error::parse("expected a JSON object at the top level"))
    }
}

/// Optional JSON Schema check applied to the final result.
pub struct ResultValidator {
    schema: JSONSchema,
}

impl ResultValidator {
    pub fn new(schema: &Value) -> Result<Self> {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema)
            .map_err(|e| {
                Error::configuration_with_context(
                    "invalid result schema",
                    ErrorContext::new()
                        .with_details(e.to_string())
                        .with_source("result_validator"),
                )
            })?;
        Ok(Self { schema: compiled })
    }

    /// A result that violates the schema is a `ParseFailure`: the upstream
    /// answered, but not with a usable artifact.
    pub fn validate(&self, value: &Value) -> Result<()> {
        if let Err(errors) = self.schema.validate(value) {
            let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
            return Err(Error::parse(format!(
                "result failed schema validation: {}",
                messages.join("; ")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::ErrorClass;
    use serde_json::json;

    #[test]
    fn test_plain_and_fenced_json() {
        assert_eq!(
            parse_authoritative(r#"{"name":"Mojito"}"#).unwrap(),
            json!({"name": "Mojito"})
        );
        let fenced = "Here you go:\n```json\n{\"name\": \"Mojito\"}\n```\nEnjoy!";
        assert_eq!(parse_authoritative(fenced).unwrap()["name"], "Mojito");
        let prose = "Sure! {\"name\": \"Negroni\"} is a classic.";
        assert_eq!(parse_authoritative(prose).unwrap()["name"], "Negroni");
    }

    #[test]
    fn test_unparseable_is_parse_failure() {
        let err = parse_authoritative(r#"{"name": "Mojito", "tip": "#).unwrap_err();
        assert_eq!(err.class(), ErrorClass::ParseFailure);
        assert_eq!(
            parse_authoritative("   ").unwrap_err().class(),
            ErrorClass::ParseFailure
        );
        assert!(parse_authoritative("[1, 2]").is_err());
    }

    #[test]
    fn test_schema_validation() {
        let validator = ResultValidator::new(&json!({
            "type": "object",
            "required": ["name"],
            "properties": {"name": {"type": "string"}}
        }))
        .unwrap();
        assert!(validator.validate(&json!({"name": "Mojito"})).is_ok());
        let err = validator.validate(&json!({"name": 3})).unwrap_err();
        assert_eq!(err.class(), ErrorClass::ParseFailure);
        assert!(validator.validate(&json!({})).is_err());
    }

    #[test]
    fn test_invalid_schema_is_configuration_error() {
        let err = ResultValidator::new(&json!({"type": 12})).err().unwrap();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
