//! Recovery of JavaScript object literals embedded in catalog HTML
//!
//! The catalog inlines its page data as a JS assignment
//! (`window.productDetailData = {...}`). The object is almost-JSON: it can
//! carry `undefined` values and trailing commas, and its string values can
//! contain braces, quotes, and escapes. Extraction therefore tracks string
//! state instead of counting raw braces.

use regex::Regex;

use crate::error::ParseError;

/// How far past an anchor the opening brace may sit. Anything further means
/// the anchor matched unrelated text (a minified re-assignment, a comment).
const MAX_ANCHOR_GAP: usize = 20;

/// Locate the opening brace of the object following the first matching anchor.
///
/// Anchors are tried in order; the first whose match is followed by a `{`
/// within [`MAX_ANCHOR_GAP`] bytes wins.
pub fn find_object_start(html: &str, anchors: &[Regex]) -> Option<usize> {
    for anchor in anchors {
        if let Some(m) = anchor.find(html) {
            let tail = &html[m.end()..];
            if let Some(rel) = tail.find('{') {
                if rel < MAX_ANCHOR_GAP {
                    return Some(m.end() + rel);
                }
            }
        }
    }
    None
}

/// Extract the balanced object beginning at `start` (which must index a `{`).
///
/// Brace depth is only counted outside string literals; backslash escapes
/// inside strings are honored, so `"}"` and `"\""` never corrupt the scan.
///
/// # Errors
///
/// Returns `ParseError::Syntax` if the braces never balance.
pub fn extract_balanced_object(text: &str, start: usize) -> Result<&str, ParseError> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return Err(ParseError::Syntax(
            "object extraction did not start at a brace".to_string(),
        ));
    }

    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    Err(ParseError::Syntax(
        "embedded object has unbalanced braces".to_string(),
    ))
}

/// Repair a JS object literal into strict JSON.
///
/// Two fixes, both applied only outside string literals:
/// - `undefined` in value position becomes `null`
/// - trailing commas before `}` / `]` are dropped
pub fn repair_to_json(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut in_string = false;
    let mut escaped = false;
    // Last significant (non-whitespace) byte emitted outside strings; used to
    // decide whether `undefined` sits in value position.
    let mut last_sig: u8 = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if in_string {
            out.push(b);
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match b {
            b'"' => {
                in_string = true;
                out.push(b);
                last_sig = b;
                i += 1;
            }
            b',' => {
                let mut j = i + 1;
                while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                    j += 1;
                }
                if j < bytes.len() && (bytes[j] == b'}' || bytes[j] == b']') {
                    // trailing comma
                    i += 1;
                } else {
                    out.push(b);
                    last_sig = b;
                    i += 1;
                }
            }
            b'u' if bytes[i..].starts_with(b"undefined")
                && matches!(last_sig, b':' | b',' | b'[')
                && bytes
                    .get(i + 9)
                    .map_or(true, |n| !n.is_ascii_alphanumeric() && *n != b'_') =>
            {
                out.extend_from_slice(b"null");
                last_sig = b'l';
                i += 9;
            }
            _ => {
                out.push(b);
                if !b.is_ascii_whitespace() {
                    last_sig = b;
                }
                i += 1;
            }
        }
    }

    // Only whole bytes were copied and ASCII inserted, so this cannot fail;
    // fall back to the input rather than panic if it ever does.
    String::from_utf8(out).unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor() -> Vec<Regex> {
        vec![Regex::new(r"data\s*=\s*").unwrap()]
    }

    #[test]
    fn test_find_object_start() {
        let html = "var data = {\"a\": 1};";
        let start = find_object_start(html, &anchor()).unwrap();
        assert_eq!(&html[start..start + 1], "{");
    }

    #[test]
    fn test_anchor_gap_limit() {
        // The brace sits past the gap limit, separated by non-whitespace
        let html = "var data = loadDeferredPayloadFromCache(); {}";
        assert!(find_object_start(html, &anchor()).is_none());
    }

    #[test]
    fn test_extract_nested() {
        let text = r#"{"a": {"b": [1, {"c": 2}]}, "d": 3} trailing"#;
        let extracted = extract_balanced_object(text, 0).unwrap();
        assert_eq!(extracted, r#"{"a": {"b": [1, {"c": 2}]}, "d": 3}"#);
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        let text = r#"{"name": "curly } brace {", "n": 1}!"#;
        let extracted = extract_balanced_object(text, 0).unwrap();
        assert_eq!(extracted, r#"{"name": "curly } brace {", "n": 1}"#);
    }

    #[test]
    fn test_escaped_quote_inside_string() {
        let text = r#"{"name": "quote \" and } brace", "n": 1} rest"#;
        let extracted = extract_balanced_object(text, 0).unwrap();
        assert!(extracted.ends_with(r#""n": 1}"#));
    }

    #[test]
    fn test_unbalanced_is_syntax_error() {
        let text = r#"{"a": {"b": 1}"#;
        assert!(matches!(
            extract_balanced_object(text, 0),
            Err(ParseError::Syntax(_))
        ));
    }

    #[test]
    fn test_repair_undefined_value() {
        let raw = r#"{"a": undefined, "b": [undefined], "c": 1}"#;
        let fixed = repair_to_json(raw);
        assert_eq!(fixed, r#"{"a": null, "b": [null], "c": 1}"#);
        serde_json::from_str::<serde_json::Value>(&fixed).unwrap();
    }

    #[test]
    fn test_undefined_inside_string_untouched() {
        let raw = r#"{"a": "undefined behavior", "b": undefined}"#;
        let fixed = repair_to_json(raw);
        assert_eq!(fixed, r#"{"a": "undefined behavior", "b": null}"#);
    }

    #[test]
    fn test_identifier_prefix_not_replaced() {
        let raw = r#"{"a": undefinedFoo}"#;
        // Not a bare undefined token; left alone (and still invalid JSON)
        assert_eq!(repair_to_json(raw), raw);
    }

    #[test]
    fn test_trailing_commas_removed() {
        let raw = r#"{"a": [1, 2, ], "b": {"c": 3,},}"#;
        let fixed = repair_to_json(raw);
        serde_json::from_str::<serde_json::Value>(&fixed).unwrap();
    }

    #[test]
    fn test_comma_inside_string_kept() {
        let raw = r#"{"a": "x, }", "b": 1}"#;
        assert_eq!(repair_to_json(raw), raw);
    }

    #[test]
    fn test_unicode_passthrough() {
        let raw = r#"{"name": "花园工具", "v": undefined}"#;
        let fixed = repair_to_json(raw);
        assert_eq!(fixed, r#"{"name": "花园工具", "v": null}"#);
    }
}
