//! Recovery of tool calls hallucinated into plain assistant text.
//!
//! Some models write tool-call syntax into their text output instead of
//! using the provider's native tool-call fields. This module extracts those
//! inline pseudo-XML/JSON invocations, maps the hallucinated names onto real
//! registered tools, and strips the markup from the text shown to the user —
//! including any invented tool *output*, which must never be presented as a
//! real answer.
//!
//! `parse` is pure: no side effects, and a no-op on ordinary prose.

use regex::Regex;
use std::sync::LazyLock;

use overture_core::message::ChatToolCall;

/// Prefix marking a synthetic call id as text-recovered.
pub const SYNTHETIC_ID_PREFIX: &str = "text-tc-";

static TOOL_CALL_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<tool_call>(.*?)</tool_call>").unwrap());

static FUNCTION_CALLS_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<function_calls>(.*?)</function_calls>").unwrap());

static INVOKE_NAMED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<invoke\s+name="([^"]+)"\s*>(.*?)</invoke>"#).unwrap());

static PARAMETER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<parameter\s+name="([^"]+)"\s*>(.*?)</parameter>"#).unwrap());

static INVOKE_NESTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<invoke>\s*<tool_name>(.*?)</tool_name>\s*<parameters>(.*?)</parameters>\s*</invoke>")
        .unwrap()
});

static NESTED_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<([A-Za-z0-9_]+)>(.*?)</([A-Za-z0-9_]+)>").unwrap());

static TOOL_RESPONSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<tool_response>.*?(?:</tool_response>|\z)").unwrap());

static FUNCTION_RESULT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<function_result>.*?(?:</function_result>|\z)").unwrap());

/// Verb prefixes ignored when matching a hallucinated name against the
/// registry.
const VERB_PREFIXES: [&str; 18] = [
    "get_", "list_", "search_", "find_", "fetch_", "query_", "retrieve_", "show_", "read_",
    "lookup_", "create_", "update_", "delete_", "add_", "remove_", "set_", "put_", "post_",
];

/// Extract hallucinated tool calls from `text`.
///
/// Returns the recovered calls in document order (ids `text-tc-<i>`) and the
/// cleaned user-visible text. When nothing is recovered, the original text
/// comes back unchanged.
pub fn parse(text: &str, known_names: &[String]) -> (Vec<ChatToolCall>, String) {
    let mut candidates: Vec<(usize, String, String)> = Vec::new();

    collect_json_blocks(text, &mut candidates);
    collect_xml_blocks(text, &mut candidates);

    if candidates.is_empty() {
        return (Vec::new(), text.to_string());
    }

    candidates.sort_by_key(|(pos, _, _)| *pos);

    let calls = candidates
        .into_iter()
        .enumerate()
        .map(|(i, (_, name, arguments))| ChatToolCall {
            id: format!("{SYNTHETIC_ID_PREFIX}{i}"),
            name: resolve_name(&name, known_names),
            arguments,
        })
        .collect();

    (calls, clean_text(text))
}

/// Shape 1: `<tool_call>{ "name": ..., "arguments": {...} }</tool_call>`.
/// Malformed JSON or a missing name drops the candidate, never the parse.
fn collect_json_blocks(text: &str, out: &mut Vec<(usize, String, String)>) {
    for caps in TOOL_CALL_BLOCK.captures_iter(text) {
        let pos = caps.get(0).unwrap().start();
        let body = caps.get(1).unwrap().as_str().trim();

        let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
            continue;
        };
        let Some(name) = value.get("name").and_then(|n| n.as_str()) else {
            continue;
        };
        let arguments = value
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));

        out.push((
            pos,
            name.to_string(),
            serde_json::to_string(&arguments).unwrap_or_else(|_| "{}".into()),
        ));
    }
}

/// Shapes 2 and 3, inside a `<function_calls>` block. The nested-tag variant
/// is only consulted when the block has no `<invoke name="...">` entries.
fn collect_xml_blocks(text: &str, out: &mut Vec<(usize, String, String)>) {
    for block in FUNCTION_CALLS_BLOCK.captures_iter(text) {
        let block_start = block.get(0).unwrap().start();
        let body = block.get(1).unwrap().as_str();

        let mut found_named = false;
        for caps in INVOKE_NAMED.captures_iter(body) {
            found_named = true;
            let pos = block_start + caps.get(0).unwrap().start();
            let name = caps.get(1).unwrap().as_str().trim().to_string();
            let params = collect_parameters(caps.get(2).unwrap().as_str());
            out.push((pos, name, params));
        }

        if found_named {
            continue;
        }

        for caps in INVOKE_NESTED.captures_iter(body) {
            let pos = block_start + caps.get(0).unwrap().start();
            let name = caps.get(1).unwrap().as_str().trim().to_string();
            let params = collect_nested_parameters(caps.get(2).unwrap().as_str());
            out.push((pos, name, params));
        }
    }
}

fn collect_parameters(body: &str) -> String {
    let mut params = serde_json::Map::new();
    for caps in PARAMETER.captures_iter(body) {
        let key = caps.get(1).unwrap().as_str().to_string();
        let value = caps.get(2).unwrap().as_str().trim().to_string();
        params.insert(key, serde_json::Value::String(value));
    }
    serde_json::to_string(&serde_json::Value::Object(params)).unwrap_or_else(|_| "{}".into())
}

fn collect_nested_parameters(body: &str) -> String {
    let mut params = serde_json::Map::new();
    for caps in NESTED_PAIR.captures_iter(body) {
        let open = caps.get(1).unwrap().as_str();
        let close = caps.get(3).unwrap().as_str();
        if open != close || open == "parameters" {
            continue;
        }
        let value = caps.get(2).unwrap().as_str().trim().to_string();
        params.insert(open.to_string(), serde_json::Value::String(value));
    }
    serde_json::to_string(&serde_json::Value::Object(params)).unwrap_or_else(|_| "{}".into())
}

/// Map a hallucinated name onto a registered one.
///
/// Priority: exact match, then equality after stripping a verb prefix from
/// both sides, then substring containment on the stripped forms. An
/// unresolvable name passes through unchanged so the execution stage reports
/// a proper tool error instead of silently succeeding.
fn resolve_name(candidate: &str, known_names: &[String]) -> String {
    if known_names.iter().any(|k| k == candidate) {
        return candidate.to_string();
    }

    let stripped = strip_verb_prefix(candidate);

    for known in known_names {
        if strip_verb_prefix(known) == stripped {
            return known.clone();
        }
    }

    if !stripped.is_empty() {
        for known in known_names {
            let known_stripped = strip_verb_prefix(known);
            if !known_stripped.is_empty()
                && (known_stripped.contains(stripped) || stripped.contains(known_stripped))
            {
                return known.clone();
            }
        }
    }

    candidate.to_string()
}

fn strip_verb_prefix(name: &str) -> &str {
    for prefix in VERB_PREFIXES {
        if let Some(rest) = name.strip_prefix(prefix) {
            return rest;
        }
    }
    name
}

/// Everything from the first recognized start tag onward is discarded, and
/// any invented tool output in the remaining preamble is stripped.
fn clean_text(text: &str) -> String {
    let cut = [text.find("<tool_call>"), text.find("<function_calls>")]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(text.len());

    let preamble = &text[..cut];
    let without_responses = TOOL_RESPONSE.replace_all(preamble, "");
    let without_results = FUNCTION_RESULT.replace_all(&without_responses, "");
    without_results.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known() -> Vec<String> {
        vec![
            "list_applications".to_string(),
            "update_record".to_string(),
            "delete_account".to_string(),
        ]
    }

    #[test]
    fn plain_prose_is_untouched() {
        let text = "The capital of France is Paris. Let me know if you need anything else.";
        let (calls, cleaned) = parse(text, &known());
        assert!(calls.is_empty());
        assert_eq!(cleaned, text);
    }

    #[test]
    fn prose_with_angle_brackets_is_untouched() {
        let text = "In HTML, <b>bold</b> text uses the b tag.";
        let (calls, cleaned) = parse(text, &known());
        assert!(calls.is_empty());
        assert_eq!(cleaned, text);
    }

    #[test]
    fn json_shape_is_recovered() {
        let text = r#"Sure, let me look that up.
<tool_call> {"name": "list_applications", "arguments": {"status": "active"}} </tool_call>"#;
        let (calls, cleaned) = parse(text, &known());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "text-tc-0");
        assert_eq!(calls[0].name, "list_applications");
        let args: serde_json::Value = serde_json::from_str(&calls[0].arguments).unwrap();
        assert_eq!(args["status"], "active");
        assert_eq!(cleaned, "Sure, let me look that up.");
    }

    #[test]
    fn json_shape_without_name_is_discarded() {
        let text = r#"<tool_call>{"arguments": {"x": 1}}</tool_call>"#;
        let (calls, cleaned) = parse(text, &known());
        assert!(calls.is_empty());
        assert_eq!(cleaned, text);
    }

    #[test]
    fn malformed_json_is_dropped_not_fatal() {
        let text = r#"<tool_call>{not json}</tool_call>
<tool_call>{"name": "update_record", "arguments": {}}</tool_call>"#;
        let (calls, _) = parse(text, &known());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "update_record");
        assert_eq!(calls[0].id, "text-tc-0");
    }

    #[test]
    fn invoke_named_shape_is_recovered() {
        let text = r#"I'll check the records.
<function_calls>
<invoke name="update_record">
<parameter name="id">42</parameter>
<parameter name="status">closed</parameter>
</invoke>
</function_calls>"#;
        let (calls, cleaned) = parse(text, &known());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "text-tc-0");
        assert_eq!(calls[0].name, "update_record");
        let args: serde_json::Value = serde_json::from_str(&calls[0].arguments).unwrap();
        assert_eq!(args["id"], "42");
        assert_eq!(args["status"], "closed");
        assert_eq!(cleaned, "I'll check the records.");
    }

    #[test]
    fn nested_tag_shape_is_recovered() {
        let text = r#"One moment.
<function_calls>
<invoke>
<tool_name>list_applications</tool_name>
<parameters>
<status>pending</status>
<limit>10</limit>
</parameters>
</invoke>
</function_calls>"#;
        let (calls, cleaned) = parse(text, &known());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "list_applications");
        let args: serde_json::Value = serde_json::from_str(&calls[0].arguments).unwrap();
        assert_eq!(args["status"], "pending");
        assert_eq!(args["limit"], "10");
        assert_eq!(cleaned, "One moment.");
    }

    #[test]
    fn mismatched_nested_tags_are_ignored() {
        let text = r#"<function_calls>
<invoke>
<tool_name>update_record</tool_name>
<parameters>
<id>42</id>
<open>mismatch</close>
</parameters>
</invoke>
</function_calls>"#;
        let (calls, _) = parse(text, &known());
        assert_eq!(calls.len(), 1);
        let args: serde_json::Value = serde_json::from_str(&calls[0].arguments).unwrap();
        assert_eq!(args["id"], "42");
        assert!(args.get("open").is_none());
    }

    #[test]
    fn multiple_calls_get_document_order_ids() {
        let text = r#"<tool_call>{"name": "list_applications", "arguments": {}}</tool_call>
<tool_call>{"name": "update_record", "arguments": {}}</tool_call>"#;
        let (calls, _) = parse(text, &known());
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "text-tc-0");
        assert_eq!(calls[0].name, "list_applications");
        assert_eq!(calls[1].id, "text-tc-1");
        assert_eq!(calls[1].name, "update_record");
    }

    #[test]
    fn fuzzy_resolution_strips_verb_prefixes() {
        let text = r#"<tool_call>{"name": "get_applications", "arguments": {}}</tool_call>"#;
        let (calls, _) = parse(text, &["list_applications".to_string()]);
        assert_eq!(calls[0].name, "list_applications");
    }

    #[test]
    fn fuzzy_resolution_by_containment() {
        let text = r#"<tool_call>{"name": "fetch_record", "arguments": {}}</tool_call>"#;
        let (calls, _) = parse(text, &["update_record_status".to_string()]);
        assert_eq!(calls[0].name, "update_record_status");
    }

    #[test]
    fn exact_match_wins_over_fuzzy() {
        let text = r#"<tool_call>{"name": "get_applications", "arguments": {}}</tool_call>"#;
        let names = vec!["get_applications".to_string(), "list_applications".to_string()];
        let (calls, _) = parse(text, &names);
        assert_eq!(calls[0].name, "get_applications");
    }

    #[test]
    fn unresolvable_name_passes_through() {
        let text = r#"<tool_call>{"name": "teleport_user", "arguments": {}}</tool_call>"#;
        let (calls, _) = parse(text, &known());
        assert_eq!(calls[0].name, "teleport_user");
    }

    #[test]
    fn fake_tool_response_in_preamble_is_stripped() {
        let text = r#"Checking now.
<tool_response>{"fake": "output"}</tool_response>
Based on the data:
<tool_call>{"name": "list_applications", "arguments": {}}</tool_call>"#;
        let (calls, cleaned) = parse(text, &known());
        assert_eq!(calls.len(), 1);
        assert!(!cleaned.contains("tool_response"));
        assert!(!cleaned.contains("fake"));
        assert!(!cleaned.contains("tool_call"));
        assert!(cleaned.contains("Checking now."));
    }

    #[test]
    fn unterminated_function_result_is_stripped() {
        let text = "Answer below.\n<function_result>invented output\n<tool_call>{\"name\": \"update_record\", \"arguments\": {}}</tool_call>";
        let (calls, cleaned) = parse(text, &known());
        assert_eq!(calls.len(), 1);
        assert!(!cleaned.contains("function_result"));
        assert!(!cleaned.contains("invented"));
        assert_eq!(cleaned, "Answer below.");
    }

    #[test]
    fn markup_after_start_tag_never_survives_cleaning() {
        let text = r#"Intro text.
<function_calls>
<invoke name="delete_account">
<parameter name="id">9</parameter>
</invoke>
</function_calls>
Trailing hallucination."#;
        let (calls, cleaned) = parse(text, &known());
        assert_eq!(calls.len(), 1);
        assert_eq!(cleaned, "Intro text.");
    }
}
