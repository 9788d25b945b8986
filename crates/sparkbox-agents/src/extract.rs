//! Robust JSON extraction for model replies that wrap their object in
//! Markdown fences or prose.

use regex::Regex;
use std::sync::OnceLock;

fn fence_open() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)```json\s*").unwrap())
}

/// Strip Markdown code-fence markers and surrounding whitespace.
pub fn strip_fences(text: &str) -> String {
    let without_open = fence_open().replace_all(text, "");
    without_open.replace("```", "").trim().to_string()
}

/// Extract the first balanced `{…}` object from the body, fence markers
/// removed. String literals and escapes inside the object are respected
/// so braces in values do not end the scan early.
pub fn extract_object(text: &str) -> Option<String> {
    let cleaned = strip_fences(text);

    let start = cleaned.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in cleaned[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(cleaned[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract and parse in one go.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let object = extract_object(text)?;
    serde_json::from_str(&object).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fences_case_insensitively() {
        let body = "```JSON\n{\"a\": 1}\n```";
        assert_eq!(strip_fences(body), "{\"a\": 1}");
    }

    #[test]
    fn extracts_object_from_prose() {
        let body = "Here is your plan:\n{\"project_title\": \"小车\"}\nEnjoy!";
        let object = extract_object(body).unwrap();
        assert_eq!(object, "{\"project_title\": \"小车\"}");
    }

    #[test]
    fn nested_objects_stay_balanced() {
        let body = "{\"outer\": {\"inner\": {\"x\": 1}}, \"y\": 2} trailing";
        let object = extract_object(body).unwrap();
        assert_eq!(object, "{\"outer\": {\"inner\": {\"x\": 1}}, \"y\": 2}");
    }

    #[test]
    fn braces_inside_strings_do_not_terminate() {
        let body = r#"{"text": "a } inside", "n": 1}"#;
        let object = extract_object(body).unwrap();
        assert_eq!(object, body);
    }

    #[test]
    fn escaped_quotes_inside_strings_are_handled() {
        let body = r#"{"text": "she said \"}\"", "n": 1}"#;
        let object = extract_object(body).unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(&object).is_ok());
    }

    #[test]
    fn extraction_is_idempotent() {
        let body = "```json\n{ \"a\": [1, 2], \"b\": \"文本\" }\n```";
        let first = extract_object(body).unwrap();
        let second = extract_object(&first).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn body_without_object_yields_none() {
        assert!(extract_object("no json here").is_none());
        assert!(extract_object("{\"unterminated\": ").is_none());
    }
}
