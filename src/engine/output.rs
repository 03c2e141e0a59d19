use serde_json::Value;

/// Removes a surrounding markdown code fence (```json ... ```), if any.
pub(crate) fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// First well-formed JSON array in free text. Trailing prose after the array
/// is ignored.
pub(crate) fn first_json_array(text: &str) -> Option<Vec<Value>> {
    let text = strip_code_fences(text);
    for (start, _) in text.match_indices('[') {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        if let Some(Ok(Value::Array(items))) = stream.next() {
            return Some(items);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_fences_with_language_tag() {
        assert_eq!(strip_code_fences("```json\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fences("  [1]  "), "[1]");
    }

    #[test]
    fn finds_array_surrounded_by_prose() {
        let text = "Sure! Here you go: [\"a\", \"b\"] Hope this [helps].";
        assert_eq!(first_json_array(text), Some(vec![json!("a"), json!("b")]));
        assert_eq!(first_json_array("no list here"), None);
        assert_eq!(first_json_array("[broken, ]"), None);
    }
}
