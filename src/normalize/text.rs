//! String-shaped normalizers: composite splitting, pattern extraction, templates.

use crate::error::{PipelineError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{([A-Za-z0-9_ >?.-]+)\}").unwrap();
}

/// Split `"92.5 B+"` into exactly two whitespace-separated parts.
pub fn split_composite(input: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    match parts.as_slice() {
        [first, second] => Ok((first.to_string(), second.to_string())),
        _ => Err(PipelineError::MalformedComposite {
            value: input.to_string(),
            parts: parts.len(),
        }),
    }
}

/// First capture group of `pattern`, or `None` when the text does not match.
pub fn extract(pattern: &Regex, input: &str) -> Option<String> {
    pattern
        .captures(input)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Placeholder names referenced by a template, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Substitute `{name}` placeholders. Returns `None` if any placeholder has no value.
pub fn render_template(template: &str, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let whole = caps.get(0)?;
        let name = caps.get(1)?.as_str();
        out.push_str(&template[last..whole.start()]);
        out.push_str(&lookup(name)?);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Some(out)
}

/// Maps the character at `position` to a value when it equals `equals`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharRule {
    pub position: usize,
    pub equals: char,
    pub value: String,
}

/// First matching rule wins; codes too short for a rule's position never match it.
pub fn char_code(input: &str, rules: &[CharRule]) -> Option<String> {
    rules
        .iter()
        .find(|rule| input.chars().nth(rule.position) == Some(rule.equals))
        .map(|rule| rule.value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_composite() {
        assert_eq!(
            split_composite("92.5 B+").unwrap(),
            ("92.5".to_string(), "B+".to_string())
        );
        assert_eq!(
            split_composite("  88   A-  ").unwrap(),
            ("88".to_string(), "A-".to_string())
        );
        assert!(matches!(
            split_composite("92.5"),
            Err(PipelineError::MalformedComposite { parts: 1, .. })
        ));
        assert!(matches!(
            split_composite("92.5 B+ extra"),
            Err(PipelineError::MalformedComposite { parts: 3, .. })
        ));
    }

    #[test]
    fn test_extract() {
        let id = Regex::new(r"Student # (\d+)").unwrap();
        assert_eq!(
            extract(&id, "Student # 40123 is non-compliant for MMR").as_deref(),
            Some("40123")
        );
        assert_eq!(extract(&id, "no id here"), None);
    }

    #[test]
    fn test_render_template() {
        let rendered = render_template("{lastName}, {firstName}", |k| match k {
            "lastName" => Some("Lovelace".into()),
            "firstName" => Some("Ada".into()),
            _ => None,
        });
        assert_eq!(rendered.as_deref(), Some("Lovelace, Ada"));
        assert_eq!(render_template("{missing}", |_| None), None);
        assert_eq!(placeholders("SY24: {checkpoint}"), vec!["checkpoint".to_string()]);
    }

    #[test]
    fn test_char_code_first_match_wins() {
        let rules = vec![
            CharRule { position: 6, equals: 'N', value: "Other".into() },
            CharRule { position: 5, equals: '1', value: "S1".into() },
            CharRule { position: 5, equals: '2', value: "S2".into() },
        ];
        assert_eq!(char_code("ENG101A", &rules).as_deref(), Some("S1"));
        assert_eq!(char_code("ENG102N", &rules).as_deref(), Some("Other"));
        assert_eq!(char_code("ENG103A", &rules), None);
        assert_eq!(char_code("EN", &rules), None);
    }
}
