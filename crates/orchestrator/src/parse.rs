//! Engine-response parsing.
//!
//! The reasoning engine requests capability invocations with tagged
//! blocks inside its text output:
//!
//! ```text
//! <invoke name="file_read">
//! <param name="path">src/main.rs</param>
//! </invoke>
//! ```
//!
//! The scanner is hand-rolled rather than regex-based: tags are matched
//! structurally, unterminated blocks are ignored, and everything outside
//! the tags is preserved as answer text.

use serde_json::{Map, Value};

/// One invocation block parsed out of engine output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedInvocation {
    /// Capability name from the tag attribute.
    pub name: String,
    /// Parameters as a JSON object of string values.
    pub params: Value,
    /// The full raw tag text, for repetition signatures and logging.
    pub raw: String,
}

const INVOKE_OPEN: &str = "<invoke";
const INVOKE_CLOSE: &str = "</invoke>";
const PARAM_OPEN: &str = "<param";
const PARAM_CLOSE: &str = "</param>";

/// Extract every well-formed invocation block, in order of appearance.
/// Malformed or unterminated blocks are skipped silently.
pub fn parse_invocations(text: &str) -> Vec<ParsedInvocation> {
    let mut invocations = Vec::new();
    let mut cursor = 0;

    while let Some(start) = text[cursor..].find(INVOKE_OPEN) {
        let open_at = cursor + start;
        let Some((name, body_start)) = parse_tag_header(&text[open_at..]) else {
            cursor = open_at + INVOKE_OPEN.len();
            continue;
        };

        let body_at = open_at + body_start;
        let Some(close_rel) = text[body_at..].find(INVOKE_CLOSE) else {
            // Unterminated block; nothing after it can be well-formed.
            break;
        };
        let close_at = body_at + close_rel;

        let body = &text[body_at..close_at];
        let params = parse_params(body);
        let end = close_at + INVOKE_CLOSE.len();

        invocations.push(ParsedInvocation {
            name,
            params: Value::Object(params),
            raw: text[open_at..end].to_string(),
        });

        cursor = end;
    }

    invocations
}

/// Remove invocation blocks from engine output, leaving the answer text.
pub fn strip_invocations(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    while let Some(start) = text[cursor..].find(INVOKE_OPEN) {
        let open_at = cursor + start;
        let after_open = &text[open_at..];

        let span_end = match parse_tag_header(after_open) {
            Some((_, body_start)) => {
                let body_at = open_at + body_start;
                match text[body_at..].find(INVOKE_CLOSE) {
                    Some(rel) => body_at + rel + INVOKE_CLOSE.len(),
                    None => text.len(),
                }
            }
            None => open_at + INVOKE_OPEN.len(),
        };

        out.push_str(&text[cursor..open_at]);
        cursor = span_end;
    }

    out.push_str(&text[cursor..]);
    out.trim().to_string()
}

/// Parse `name="…"` out of a tag that starts at the beginning of `text`,
/// returning the name and the offset just past the closing `>`.
fn parse_tag_header(text: &str) -> Option<(String, usize)> {
    let gt = text.find('>')?;
    let header = &text[..gt];

    let attr_at = header.find("name=\"")?;
    let name_start = attr_at + "name=\"".len();
    let name_len = header[name_start..].find('"')?;
    let name = header[name_start..name_start + name_len].to_string();

    if name.is_empty() {
        return None;
    }

    Some((name, gt + 1))
}

/// Parse all `<param name="…">value</param>` pairs in a block body.
fn parse_params(body: &str) -> Map<String, Value> {
    let mut params = Map::new();
    let mut cursor = 0;

    while let Some(start) = body[cursor..].find(PARAM_OPEN) {
        let open_at = cursor + start;
        let Some((name, value_start)) = parse_tag_header(&body[open_at..]) else {
            cursor = open_at + PARAM_OPEN.len();
            continue;
        };

        let value_at = open_at + value_start;
        let Some(close_rel) = body[value_at..].find(PARAM_CLOSE) else {
            break;
        };
        let close_at = value_at + close_rel;

        let value = body[value_at..close_at].trim().to_string();
        params.insert(name, Value::String(value));

        cursor = close_at + PARAM_CLOSE.len();
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_invocation_parses() {
        let text = r#"Let me read that file.
<invoke name="file_read">
<param name="path">src/main.rs</param>
</invoke>"#;

        let parsed = parse_invocations(text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "file_read");
        assert_eq!(parsed[0].params["path"], "src/main.rs");
    }

    #[test]
    fn multiple_invocations_preserve_order() {
        let text = r#"
<invoke name="file_read"><param name="path">a.rs</param></invoke>
<invoke name="file_read"><param name="path">b.rs</param></invoke>
<invoke name="dir_list"><param name="path">src</param></invoke>
"#;

        let parsed = parse_invocations(text);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].params["path"], "a.rs");
        assert_eq!(parsed[1].params["path"], "b.rs");
        assert_eq!(parsed[2].name, "dir_list");
    }

    #[test]
    fn multiple_params_collected() {
        let text = r#"<invoke name="file_edit">
<param name="path">src/lib.rs</param>
<param name="find">old_name</param>
<param name="replace">new_name</param>
</invoke>"#;

        let parsed = parse_invocations(text);
        assert_eq!(parsed.len(), 1);
        let params = &parsed[0].params;
        assert_eq!(params["path"], "src/lib.rs");
        assert_eq!(params["find"], "old_name");
        assert_eq!(params["replace"], "new_name");
    }

    #[test]
    fn multiline_param_values_survive() {
        let text = "<invoke name=\"file_write\">\n<param name=\"path\">out.txt</param>\n<param name=\"content\">line one\nline two</param>\n</invoke>";

        let parsed = parse_invocations(text);
        assert_eq!(parsed[0].params["content"], "line one\nline two");
    }

    #[test]
    fn plain_text_yields_nothing() {
        assert!(parse_invocations("The answer is 42.").is_empty());
    }

    #[test]
    fn unterminated_block_is_ignored() {
        let text = r#"<invoke name="file_read"><param name="path">a.rs</param>"#;
        assert!(parse_invocations(text).is_empty());
    }

    #[test]
    fn missing_name_attribute_is_skipped() {
        let text = r#"<invoke foo="bar">body</invoke>
<invoke name="dir_list"><param name="path">.</param></invoke>"#;

        let parsed = parse_invocations(text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "dir_list");
    }

    #[test]
    fn strip_leaves_surrounding_text() {
        let text = r#"I'll check the file first.
<invoke name="file_read"><param name="path">a.rs</param></invoke>
Then I'll summarize."#;

        let stripped = strip_invocations(text);
        assert!(stripped.contains("check the file first"));
        assert!(stripped.contains("Then I'll summarize"));
        assert!(!stripped.contains("<invoke"));
    }

    #[test]
    fn strip_on_plain_text_is_identity() {
        assert_eq!(strip_invocations("Just an answer."), "Just an answer.");
    }

    #[test]
    fn raw_span_covers_whole_block() {
        let text = r#"<invoke name="shell"><param name="command">ls</param></invoke>"#;
        let parsed = parse_invocations(text);
        assert_eq!(parsed[0].raw, text);
    }
}
