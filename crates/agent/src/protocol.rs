//! Response protocol parser.
//!
//! Splits a model reply into a "thinking" segment and a single action
//! command. Replies arrive in one of two shapes:
//!
//! - tagged: `<think_text>…</think_text><tool_call>…</tool_call>`, where token
//!   boundaries may leave stray whitespace inside the tag delimiters;
//! - legacy: free text followed by `finish(message=…)` or `do(action=…)`.
//!
//! [`StreamParser`] consumes the reply fragment by fragment, producing a
//! markup-free thinking preview while the stream is live, and hands the
//! full text to [`parse_response`] once the stream is exhausted.

use droidpilot_telemetry::{InferenceTimings, StreamClock};
use serde::{Deserialize, Serialize};

pub const FINISH_MARKER: &str = "finish(message=";
pub const DO_MARKER: &str = "do(action=";
const ACTION_MARKERS: [&str; 2] = [FINISH_MARKER, DO_MARKER];

const THINK_OPEN: &str = "<think_text>";
const THINK_CLOSE: &str = "</think_text>";
const TOOL_OPEN: &str = "<tool_call>";
const TOOL_CLOSE: &str = "</tool_call>";

/// The result of one model exchange. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub thinking: String,
    pub action: String,
    /// Concatenation of every fragment received.
    pub raw: String,
    pub timings: InferenceTimings,
}

/// Remove whitespace strictly inside `<…>` delimiters.
///
/// `"< tool_call >"` becomes `"<tool_call>"`. Text outside tags is untouched,
/// and normalizing twice gives the same result as normalizing once.
pub fn normalize_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('>') {
            Some(close) if close > 0 => {
                out.push('<');
                out.extend(after[..close].chars().filter(|c| !c.is_whitespace()));
                out.push('>');
                rest = &after[close + 1..];
            }
            _ => {
                out.push('<');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Text between `open` and `close`.
///
/// A missing closing tag yields everything after `open`; a missing opening
/// tag yields `None`.
pub fn extract_between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let tail = &text[start..];
    Some(match tail.find(close) {
        Some(end) => &tail[..end],
        None => tail,
    })
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop everything between `<` and `>`, inclusive.
fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match (in_tag, c) {
            (true, '>') => in_tag = false,
            (true, _) => {}
            (false, '<') => in_tag = true,
            (false, c) => out.push(c),
        }
    }
    out
}

/// Byte offset of the earliest action marker in `text`.
fn find_marker(text: &str) -> Option<usize> {
    ACTION_MARKERS.iter().filter_map(|m| text.find(m)).min()
}

/// Length of the longest suffix of `text` that is a strict prefix of a marker.
fn held_suffix_len(text: &str) -> usize {
    let longest = ACTION_MARKERS.iter().map(|m| m.len()).max().unwrap_or(0);
    let limit = text.len().min(longest.saturating_sub(1));

    (1..=limit)
        .rev()
        .find(|&k| {
            let cut = text.len() - k;
            text.is_char_boundary(cut)
                && ACTION_MARKERS
                    .iter()
                    .any(|m| k < m.len() && m.as_bytes()[..k] == text.as_bytes()[cut..])
        })
        .unwrap_or(0)
}

/// Split a complete reply into `(thinking, action)`. Never fails.
///
/// The tagged form wins whenever a `<tool_call>` tag is present. Without it,
/// the earliest legacy marker splits the unnormalized text; without either,
/// the whole reply is the action.
pub fn parse_response(raw: &str) -> (String, String) {
    let normalized = normalize_tags(raw);

    if let Some(tool_pos) = normalized.find(TOOL_OPEN) {
        let action = extract_between(&normalized, TOOL_OPEN, TOOL_CLOSE)
            .unwrap_or_default()
            .trim()
            .to_string();
        let thinking = match extract_between(&normalized, THINK_OPEN, THINK_CLOSE) {
            Some(thinking) => thinking.trim().to_string(),
            None => collapse_whitespace(&strip_markup(&normalized[..tool_pos])),
        };
        return (thinking, action);
    }

    if let Some(pos) = find_marker(raw) {
        let thinking = collapse_whitespace(&strip_markup(&raw[..pos]));
        let action = raw[pos..].trim().to_string();
        return (thinking, action);
    }

    (String::new(), raw.trim().to_string())
}

/// What a single [`StreamParser::push`] produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviewUpdate {
    /// Newly releasable thinking text, if any.
    pub delta: Option<String>,
    /// This fragment completed the first action marker.
    pub thinking_ended: bool,
}

/// Incremental parser for one streamed reply.
///
/// One instance per exchange; state never carries across requests.
#[derive(Debug)]
pub struct StreamParser {
    raw: String,
    /// Raw text not yet released to the preview.
    pending: String,
    in_tag: bool,
    last_was_space: bool,
    in_action: bool,
    clock: StreamClock,
}

impl StreamParser {
    /// Start a parser; its clock starts now.
    pub fn new() -> Self {
        Self::with_clock(StreamClock::start())
    }

    pub fn with_clock(clock: StreamClock) -> Self {
        Self {
            raw: String::new(),
            pending: String::new(),
            in_tag: false,
            last_was_space: true,
            in_action: false,
            clock,
        }
    }

    /// Whether an action marker has been seen.
    pub fn in_action(&self) -> bool {
        self.in_action
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Feed one fragment.
    pub fn push(&mut self, fragment: &str) -> PreviewUpdate {
        if fragment.is_empty() {
            return PreviewUpdate::default();
        }

        self.clock.mark_first_token();
        self.raw.push_str(fragment);

        if self.in_action {
            return PreviewUpdate::default();
        }

        self.pending.push_str(fragment);

        if let Some(pos) = find_marker(&self.pending) {
            self.pending.truncate(pos);
            let head = std::mem::take(&mut self.pending);
            self.in_action = true;
            self.clock.mark_thinking_end();
            return PreviewUpdate {
                delta: self.clean(&head),
                thinking_ended: true,
            };
        }

        let emit = self.pending.len() - held_suffix_len(&self.pending);
        let released: String = self.pending.drain(..emit).collect();
        PreviewUpdate {
            delta: self.clean(&released),
            thinking_ended: false,
        }
    }

    /// Strip markup and collapse whitespace in text about to be released.
    ///
    /// Tag and spacing state carry over between calls, so a tag split across
    /// releases is still dropped whole.
    fn clean(&mut self, text: &str) -> Option<String> {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            if self.in_tag {
                if c == '>' {
                    self.in_tag = false;
                }
                continue;
            }
            if c == '<' {
                self.in_tag = true;
            } else if c.is_whitespace() {
                if !self.last_was_space {
                    out.push(' ');
                    self.last_was_space = true;
                }
            } else {
                out.push(c);
                self.last_was_space = false;
            }
        }
        non_empty(out)
    }

    /// Release any held text once the stream has ended without a marker.
    pub fn flush(&mut self) -> Option<String> {
        if self.in_action {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        self.clean(&rest)
    }

    /// Stop the clock and parse the full reply.
    pub fn finish(self) -> ModelResponse {
        let timings = self.clock.finish();
        let (thinking, action) = parse_response(&self.raw);
        ModelResponse {
            thinking,
            action,
            raw: self.raw,
            timings,
        }
    }
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive a parser over `fragments`, returning the joined preview and response.
    fn run(fragments: &[&str]) -> (String, ModelResponse) {
        let mut parser = StreamParser::new();
        let mut preview = String::new();
        for fragment in fragments {
            if let Some(delta) = parser.push(fragment).delta {
                preview.push_str(&delta);
            }
        }
        if let Some(rest) = parser.flush() {
            preview.push_str(&rest);
        }
        (preview, parser.finish())
    }

    #[test]
    fn normalize_strips_whitespace_inside_tags() {
        assert_eq!(
            normalize_tags("< think_text >hi there</ think_text\n>"),
            "<think_text>hi there</think_text>"
        );
        assert_eq!(normalize_tags("a < b"), "a < b");
        assert_eq!(normalize_tags("<>x"), "<>x");
    }

    #[test]
    fn normalize_is_idempotent() {
        let inputs = [
            "< tool_call >do(action=\"Back\")</tool_call >",
            "x <a <b > c> y",
            "no tags at all",
            "<",
        ];
        for input in inputs {
            let once = normalize_tags(input);
            assert_eq!(normalize_tags(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn extract_between_tolerates_missing_close() {
        assert_eq!(extract_between("<a>1</a>", "<a>", "</a>"), Some("1"));
        assert_eq!(extract_between("<a>tail", "<a>", "</a>"), Some("tail"));
        assert_eq!(extract_between("none", "<a>", "</a>"), None);
    }

    #[test]
    fn tagged_reply() {
        let raw = "<think_text>Open the app</think_text><tool_call>do(action=\"Launch\", app=\"Settings\")</tool_call>";
        let (thinking, action) = parse_response(raw);
        assert_eq!(thinking, "Open the app");
        assert_eq!(action, "do(action=\"Launch\", app=\"Settings\")");
    }

    #[test]
    fn tagged_reply_with_split_tags() {
        let raw = "< think_text>a b</think_text >\n<tool_ call>finish(message=\"ok\")</tool_call>";
        let (thinking, action) = parse_response(raw);
        assert_eq!(thinking, "a b");
        assert_eq!(action, "finish(message=\"ok\")");
    }

    #[test]
    fn truncated_tool_call_takes_rest() {
        let (_, action) = parse_response("<think_text>t</think_text><tool_call>do(action=\"Back\")");
        assert_eq!(action, "do(action=\"Back\")");
    }

    #[test]
    fn tool_call_without_think_tag() {
        let (thinking, action) =
            parse_response("thinking here<tool_call>finish(message=done)</tool_call>");
        assert_eq!(thinking, "thinking here");
        assert_eq!(action, "finish(message=done)");
    }

    #[test]
    fn legacy_markers() {
        let (thinking, action) = parse_response("Go back.\ndo(action=\"Back\")");
        assert_eq!(thinking, "Go back.");
        assert_eq!(action, "do(action=\"Back\")");

        let (thinking, action) = parse_response("Done. finish(message=\"bye\")");
        assert_eq!(thinking, "Done.");
        assert_eq!(action, "finish(message=\"bye\")");
    }

    #[test]
    fn legacy_earliest_marker_wins() {
        let (thinking, action) =
            parse_response("x do(action=\"Note\", message=\"finish(message=\")");
        assert_eq!(thinking, "x");
        assert!(action.starts_with(DO_MARKER));
    }

    #[test]
    fn legacy_action_keeps_angle_brackets() {
        let (thinking, action) =
            parse_response("Type it. do(action=\"Type\", text=\"x < y and z > w\")");
        assert_eq!(thinking, "Type it.");
        assert_eq!(action, "do(action=\"Type\", text=\"x < y and z > w\")");
    }

    #[test]
    fn total_fallback() {
        let (thinking, action) = parse_response("  just some words  ");
        assert_eq!(thinking, "");
        assert_eq!(action, "just some words");
        assert_eq!(parse_response(""), (String::new(), String::new()));
    }

    #[test]
    fn held_suffix_detection() {
        assert_eq!(held_suffix_len("hello do(acti"), "do(acti".len());
        assert_eq!(held_suffix_len("thinking fin"), "fin".len());
        assert_eq!(held_suffix_len("nothing here"), 0);
        assert_eq!(held_suffix_len("ends with d"), 1);
        assert_eq!(held_suffix_len("中文"), 0);
    }

    #[test]
    fn preview_strips_tags_and_collapses_whitespace() {
        let (preview, _) = run(&["<think_text>Look", "  at\n\nthe", " screen</think_text>"]);
        assert_eq!(preview, "Look at the screen");
    }

    #[test]
    fn tag_split_across_fragments() {
        let (preview, response) = run(&["<thi", "nk_text>abc</th", "ink_text>"]);
        assert_eq!(preview, "abc");
        assert_eq!(response.action, "<think_text>abc</think_text>");
    }

    #[test]
    fn marker_split_across_fragments_is_held_back() {
        let mut parser = StreamParser::new();
        let first = parser.push("I should go back. do(acti");
        assert_eq!(first.delta.as_deref(), Some("I should go back. "));
        assert!(!first.thinking_ended);

        let second = parser.push("on=\"Back\")");
        assert!(second.delta.is_none());
        assert!(second.thinking_ended);
        assert!(parser.in_action());

        let response = parser.finish();
        assert_eq!(response.thinking, "I should go back.");
        assert_eq!(response.action, "do(action=\"Back\")");
        assert!(response.timings.time_to_thinking_end.is_some());
    }

    #[test]
    fn false_marker_prefix_is_released() {
        let (preview, response) = run(&["Let me do", " some thinking"]);
        assert_eq!(preview, "Let me do some thinking");
        assert_eq!(response.thinking, "");
        assert!(response.timings.time_to_thinking_end.is_none());
    }

    #[test]
    fn preview_stops_after_marker() {
        let mut parser = StreamParser::new();
        parser.push("think finish(message=");
        let update = parser.push("\"more text\")");
        assert_eq!(update, PreviewUpdate::default());
        assert!(parser.flush().is_none());
    }

    #[test]
    fn stray_angle_bracket_does_not_hide_marker() {
        let mut parser = StreamParser::new();
        let mut preview = String::new();
        let mut ended = false;
        for fragment in ["If count < 3 I tap. ", "do(action=\"Type\", text=\"a>b\")"] {
            let update = parser.push(fragment);
            preview.push_str(update.delta.as_deref().unwrap_or_default());
            ended |= update.thinking_ended;
        }
        assert!(ended);
        assert!(parser.in_action());
        assert!(parser.flush().is_none());
        assert!(!preview.contains("b\")"));
        assert_eq!(preview, "If count ");

        let response = parser.finish();
        assert!(response.timings.time_to_thinking_end.is_some());
        assert_eq!(response.thinking, "If count");
        assert_eq!(response.action, "do(action=\"Type\", text=\"a>b\")");
    }

    #[test]
    fn marker_inside_unclosed_tag_is_detected() {
        let (preview, response) = run(&["<note", " do(action=\"Back\")"]);
        assert_eq!(preview, "");
        assert_eq!(response.action, "do(action=\"Back\")");
        assert!(response.timings.time_to_thinking_end.is_some());
    }

    #[test]
    fn chunk_invariance() {
        let raw = "<think_text>Tap the search box</think_text><tool_call>do(action=\"Tap\", element=[500,100])</tool_call>";
        let (expected_preview, expected) = run(&[raw]);
        assert_eq!(expected.thinking, "Tap the search box");
        assert_eq!(expected.action, "do(action=\"Tap\", element=[500,100])");

        // Every two-way split.
        for cut in 1..raw.len() {
            let (preview, response) = run(&[&raw[..cut], &raw[cut..]]);
            assert_eq!(preview, expected_preview, "cut at {cut}");
            assert_eq!(response.thinking, expected.thinking, "cut at {cut}");
            assert_eq!(response.action, expected.action, "cut at {cut}");
        }

        // One character at a time.
        let chars: Vec<String> = raw.chars().map(String::from).collect();
        let fragments: Vec<&str> = chars.iter().map(String::as_str).collect();
        let (preview, response) = run(&fragments);
        assert_eq!(preview, expected_preview);
        assert_eq!(response.raw, raw);
    }

    #[test]
    fn first_token_timing_recorded() {
        let mut parser = StreamParser::new();
        parser.push("");
        parser.push("x");
        let response = parser.finish();
        assert!(response.timings.time_to_first_token.is_some());
    }
}
