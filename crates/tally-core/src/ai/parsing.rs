//! JSON parsing helpers for AI backend responses
//!
//! Models often wrap the JSON payload in prose or code fences, so the
//! outermost `{...}` is extracted before deserializing.

use crate::error::{Error, Result};

use super::types::AiClassification;

/// Parse a category classification from an AI response
pub fn parse_classification(response: &str) -> Result<AiClassification> {
    let json_str = extract_json(response)?;
    serde_json::from_str(json_str).map_err(|e| {
        Error::InvalidData(format!(
            "Invalid JSON from AI: {} | Raw: {}",
            e,
            truncate(json_str)
        ))
    })
}

fn extract_json(response: &str) -> Result<&str> {
    let response = response.trim();
    let start = response.find('{');
    let end = response.rfind('}');

    match (start, end) {
        (Some(s), Some(e)) if s < e => Ok(&response[s..=e]),
        _ => Err(Error::InvalidData(format!(
            "No JSON found in AI response | Raw: {}",
            truncate(response)
        ))),
    }
}

/// Truncate long responses for error messages (char-boundary safe)
fn truncate(s: &str) -> String {
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let c = parse_classification(r#"{"category": "Travel", "confidence": 0.82}"#).unwrap();
        assert_eq!(c.category, "Travel");
        assert_eq!(c.confidence, 0.82);
    }

    #[test]
    fn test_parse_json_in_prose() {
        let response = "Sure! Here is the answer:\n```json\n{\"category\": \"Meals & Entertainment\", \"confidence\": 0.55}\n```\nLet me know.";
        let c = parse_classification(response).unwrap();
        assert_eq!(c.category, "Meals & Entertainment");
        assert_eq!(c.confidence, 0.55);
    }

    #[test]
    fn test_parse_aliases() {
        let c = parse_classification(r#"{"label": "Rent", "score": 0.9}"#).unwrap();
        assert_eq!(c.category, "Rent");
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_classification("I think it's travel").is_err());
        assert!(parse_classification(r#"{"category": "Travel"}"#).is_err());
        assert!(parse_classification("} backwards {").is_err());
        assert!(parse_classification(&"é".repeat(500)).is_err());
    }
}
