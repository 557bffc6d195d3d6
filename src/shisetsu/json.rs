//! JSON decoding with readable diagnostics for search responses.

use anyhow::Result;

/// Decode `body`, reporting the serde path, the type mismatch and a short
/// excerpt of the offending line when decoding fails.
pub fn parse_json_with_context<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    let mut de = serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(&mut de).map_err(|err| {
        let inner = err.inner();
        let (line, column) = (inner.line(), inner.column());
        let path = err.path().to_string();

        let raw = inner.to_string();
        let location = format!(" at line {line} column {column}");
        let reason = describe_mismatch(raw.strip_suffix(&location).unwrap_or(&raw));
        let excerpt = excerpt(body, line, column, 24);

        let at = if path.is_empty() || path == "." {
            String::new()
        } else {
            format!("at path '{path}': ")
        };
        anyhow::anyhow!("{at}{reason} (line {line} col {column})\n{excerpt}")
    })
}

/// Turn "invalid type: X, expected Y" into "expected Y, got X".
fn describe_mismatch(msg: &str) -> String {
    if let Some(rest) = msg.strip_prefix("invalid type: ")
        && let Some((actual, expected)) = rest.split_once(", expected ")
    {
        return format!("expected {}, got {}", expected.trim(), actual);
    }
    msg.to_string()
}

fn excerpt(body: &str, line: usize, column: usize, width: usize) -> String {
    let Some(text) = body.lines().nth(line.saturating_sub(1)).filter(|l| !l.is_empty()) else {
        return "(empty line)".to_string();
    };

    // Work in chars: response bodies routinely contain Japanese text.
    let chars: Vec<char> = text.chars().collect();
    let at = column.saturating_sub(1).min(chars.len());
    let start = at.saturating_sub(width / 2);
    let end = (at + width / 2).min(chars.len());

    let slice: String = chars[start..end].iter().collect();
    let marker = " ".repeat(at - start) + "^";
    format!("...{slice}...\n   {marker}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::{Map, Value};

    #[test]
    fn test_describe_mismatch_reorders() {
        assert_eq!(
            describe_mismatch("invalid type: sequence, expected a map"),
            "expected a map, got sequence"
        );
    }

    #[test]
    fn test_describe_mismatch_passthrough() {
        assert_eq!(describe_mismatch("expected value"), "expected value");
    }

    #[test]
    fn test_search_response_must_be_object() {
        let result: Result<Map<String, Value>> = parse_json_with_context(r#"["./Home"]"#);
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("expected a map"), "{msg}");
        assert!(msg.contains("got sequence"), "{msg}");
    }

    #[test]
    fn test_html_body_is_reported_with_excerpt() {
        let result: Result<Map<String, Value>> =
            parse_json_with_context("<!DOCTYPE html><html><body>エラー</body></html>");
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("line 1"), "{msg}");
        assert!(msg.contains('^'), "{msg}");
    }

    #[test]
    fn test_nested_path_in_error() {
        #[derive(Debug, Deserialize)]
        struct Interval {
            #[allow(dead_code)]
            #[serde(rename = "SessionInterval")]
            session_interval: u64,
        }
        #[derive(Debug, Deserialize)]
        struct Header {
            #[allow(dead_code)]
            #[serde(rename = "Data")]
            data: Interval,
        }

        let result: Result<Header> = parse_json_with_context(r#"{"Data": {"SessionInterval": null}}"#);
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("Data.SessionInterval"), "{msg}");
        assert!(msg.contains("got null"), "{msg}");
    }

    #[test]
    fn test_object_parses() {
        let map: Map<String, Value> =
            parse_json_with_context(r#"{"Information": "./VacantFrameFacilityStatus"}"#).unwrap();
        assert_eq!(map["Information"], "./VacantFrameFacilityStatus");
    }
}
