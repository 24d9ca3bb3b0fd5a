//! Response schemas: turning free-form model output into typed values.
//!
//! Models rarely answer with bare JSON. [`extract_json`] pulls the first balanced JSON object
//! out of the surrounding prose, then each [`ResponseSchema`] checks the fields it needs.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Describes and validates the expected shape of an agent reply.
pub trait ResponseSchema: Sync {
    /// Typed value produced by a valid reply.
    type Output: Clone + Send;

    /// Instructions appended to the prompt so the model knows what to answer.
    fn describe(&self) -> String;

    /// Parses and validates one raw reply.
    ///
    /// # Errors
    /// Any [`ValidationError`]; the proxy counts it as a failed attempt.
    fn parse(&self, raw: &str) -> Result<Self::Output, ValidationError>;
}

/// Finds the first balanced `{...}` object in `raw` that parses as JSON.
///
/// Braces inside JSON strings are ignored while balancing. Candidates start at every `{` in
/// turn, so stray braces in the prose before the object are skipped. When none parses, the
/// error of the first candidate is returned.
pub fn extract_json(raw: &str) -> Result<Map<String, Value>, ValidationError> {
    let mut first_error = None;
    for (start, _) in raw.match_indices('{') {
        let candidate = balanced_object(&raw[start..])
            .ok_or_else(|| ValidationError::Malformed("unbalanced braces".to_owned()))
            .and_then(|object| match serde_json::from_str::<Value>(object) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err(ValidationError::NoJson),
                Err(e) => Err(ValidationError::Malformed(e.to_string())),
            });
        match candidate {
            Ok(map) => return Ok(map),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    Err(first_error.unwrap_or(ValidationError::NoJson))
}

/// Prefix of `text` (which starts with `{`) up to the brace closing it.
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Reads a string field, accepting a few aliases.
pub(crate) fn string_field<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| map.get(*k))
        .and_then(Value::as_str)
}

/// Any non-empty text, either raw or as `{"statement": "..."}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreeText;

impl ResponseSchema for FreeText {
    type Output = String;

    fn describe(&self) -> String {
        "Answer with a short statement, or as JSON: {\"statement\": \"...\"}".to_owned()
    }

    fn parse(&self, raw: &str) -> Result<String, ValidationError> {
        let text = match extract_json(raw) {
            Ok(map) => string_field(&map, &["statement", "text", "message"])
                .map(str::to_owned)
                .unwrap_or_else(|| raw.to_owned()),
            Err(_) => raw.to_owned(),
        };
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::Empty);
        }
        Ok(text.to_owned())
    }
}

/// Updated opinions about a fixed set of other seats: `{"<name>": "<opinion>", ...}`.
///
/// Unknown names are ignored; at least one known name must be present.
#[derive(Debug, Clone)]
pub struct OpinionSchema {
    names: Vec<String>,
}

impl OpinionSchema {
    /// Opinions about the seats named `names`.
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }
}

impl ResponseSchema for OpinionSchema {
    type Output = BTreeMap<String, String>;

    fn describe(&self) -> String {
        format!(
            "Answer with JSON only, one short impression per player: {{{}}}",
            self.names
                .iter()
                .map(|n| format!("\"{n}\": \"...\""))
                .collect::<Vec<_>>()
                .join(", ")
        )
    }

    fn parse(&self, raw: &str) -> Result<Self::Output, ValidationError> {
        let map = extract_json(raw)?;
        let opinions = self
            .names
            .iter()
            .filter_map(|name| {
                let text = map.get(name)?.as_str()?.trim();
                (!text.is_empty()).then(|| (name.clone(), text.to_owned()))
            })
            .collect::<BTreeMap<_, _>>();
        if opinions.is_empty() {
            return Err(ValidationError::OutOfRange("no known player named".to_owned()));
        }
        Ok(opinions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_inside_prose() {
        let map = extract_json("Sure! Here you go: {\"choice\": \"JA\"} hope it helps").unwrap();
        assert_eq!(map["choice"], "JA");
    }

    #[test]
    fn braces_inside_strings() {
        let map = extract_json(r#"{"reason": "a } b { c", "n": {"x": 1}} trailing }"#).unwrap();
        assert_eq!(map["reason"], "a } b { c");
        assert_eq!(map["n"]["x"], 1);
    }

    #[test]
    fn stray_braces_before_the_answer() {
        let map = extract_json("My plan {vote with the table}: {\"choice\": \"ja\"}").unwrap();
        assert_eq!(map["choice"], "ja");
        let map = extract_json("{ hmm {\"choice\": \"nein\"}").unwrap();
        assert_eq!(map["choice"], "nein");
    }

    #[test]
    fn no_json_and_malformed() {
        assert_eq!(extract_json("no object here"), Err(ValidationError::NoJson));
        assert!(matches!(extract_json("{\"a\": }"), Err(ValidationError::Malformed(_))));
        assert!(matches!(extract_json("{\"a\": 1"), Err(ValidationError::Malformed(_))));
    }

    #[test]
    fn free_text() {
        assert_eq!(FreeText.parse("  I trust Bob. ").unwrap(), "I trust Bob.");
        assert_eq!(FreeText.parse("{\"statement\": \"hi\"}").unwrap(), "hi");
        assert_eq!(FreeText.parse("   "), Err(ValidationError::Empty));
    }

    #[test]
    fn opinions_keep_known_names() {
        let schema = OpinionSchema::new(vec!["Ann".into(), "Bob".into()]);
        let parsed = schema
            .parse("{\"Ann\": \"quiet\", \"Zed\": \"who?\"}")
            .unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["Ann"], "quiet");
        assert!(schema.parse("{\"Zed\": \"x\"}").is_err());
    }
}
