//! Incremental parser for artifact/action markers in a streamed response.
//!
//! The parser is fed the *cumulative* text of a stream on every call and keeps
//! one offset per stream id, so repeated calls with growing input only emit the
//! events that became decidable since the previous call. A marker is consumed
//! only once its terminating delimiter is present in the buffer.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::types::{ActionData, ActionEvent, ActionKind, ArtifactData, ParserEvent};

pub const ARTIFACT_TAG_OPEN: &str = "<stageArtifact";
pub const ARTIFACT_TAG_CLOSE: &str = "</stageArtifact>";
pub const ACTION_TAG_OPEN: &str = "<stageAction";
pub const ACTION_TAG_CLOSE: &str = "</stageAction>";

static ATTRIBUTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([A-Za-z_][A-Za-z0-9_-]*)\s*=\s*"([^"]*)""#).unwrap());

#[derive(Debug, Default)]
struct StreamState {
    position: usize,
    inside_artifact: bool,
    inside_action: bool,
    current_artifact: Option<ArtifactData>,
    /// `None` while inside an action whose type was not recognized.
    current_action: Option<ActionData>,
    current_action_id: String,
    last_streamed: Option<String>,
    action_count: usize,
    artifact_count: usize,
}

/// Per-stream incremental marker parser.
#[derive(Debug, Default)]
pub struct StreamParser {
    streams: HashMap<String, StreamState>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the full text received so far for `message_id`.
    ///
    /// Returns the lifecycle events that became decidable since the previous
    /// call for the same stream, in arrival order.
    pub fn parse(&mut self, message_id: &str, input: &str) -> Vec<ParserEvent> {
        let state = self.streams.entry(message_id.to_string()).or_default();
        let mut events = Vec::new();

        let Some(_) = input.get(state.position..) else {
            warn!(
                message_id,
                position = state.position,
                len = input.len(),
                "stream input shrank below parsed offset; ignoring"
            );
            return events;
        };

        let mut i = state.position;
        loop {
            if state.inside_artifact {
                let rest = &input[i..];
                if state.inside_action {
                    match rest.find(ACTION_TAG_CLOSE) {
                        Some(close) => {
                            if let Some(mut action) = state.current_action.take() {
                                action.content = finalize_content(action.kind, &rest[..close]);
                                events.push(ParserEvent::ActionClose(action_event(
                                    message_id,
                                    state.current_artifact.as_ref(),
                                    &state.current_action_id,
                                    action,
                                )));
                            }
                            state.inside_action = false;
                            state.last_streamed = None;
                            i += close + ACTION_TAG_CLOSE.len();
                        }
                        None => {
                            if let Some(action) = state.current_action.as_ref() {
                                if action.is_file() {
                                    let partial =
                                        strip_partial_marker(rest, ACTION_TAG_CLOSE).trim_start();
                                    if state.last_streamed.as_deref() != Some(partial) {
                                        state.last_streamed = Some(partial.to_string());
                                        let mut streamed = action.clone();
                                        streamed.content = partial.to_string();
                                        events.push(ParserEvent::ActionStream(action_event(
                                            message_id,
                                            state.current_artifact.as_ref(),
                                            &state.current_action_id,
                                            streamed,
                                        )));
                                    }
                                }
                            }
                            break;
                        }
                    }
                } else {
                    let next_action = rest.find(ACTION_TAG_OPEN);
                    let artifact_close = rest.find(ARTIFACT_TAG_CLOSE);
                    match (next_action, artifact_close) {
                        (Some(open), close) if close.is_none_or(|close| open < close) => {
                            let tag_start = i + open;
                            let Some(tag_len) = input[tag_start..].find('>') else {
                                break;
                            };
                            let tag = &input[tag_start..tag_start + tag_len + 1];
                            state.action_count += 1;
                            state.current_action_id = state.action_count.to_string();
                            state.current_action = parse_action_tag(tag);
                            state.inside_action = true;
                            state.last_streamed = None;
                            if let Some(action) = state.current_action.clone() {
                                events.push(ParserEvent::ActionOpen(action_event(
                                    message_id,
                                    state.current_artifact.as_ref(),
                                    &state.current_action_id,
                                    action,
                                )));
                            }
                            i = tag_start + tag_len + 1;
                        }
                        (_, Some(close)) => {
                            if let Some(artifact) = state.current_artifact.take() {
                                debug!(message_id, artifact_id = %artifact.id, "artifact closed");
                                events.push(ParserEvent::ArtifactClose(artifact));
                            }
                            state.inside_artifact = false;
                            i += close + ARTIFACT_TAG_CLOSE.len();
                        }
                        _ => break,
                    }
                }
            } else {
                let rest = &input[i..];
                let Some(lt) = rest.find('<') else {
                    push_text(&mut events, message_id, rest);
                    i = input.len();
                    break;
                };
                let candidate = &rest[lt..];
                if candidate.starts_with(ARTIFACT_TAG_OPEN) {
                    push_text(&mut events, message_id, &rest[..lt]);
                    let Some(tag_len) = candidate.find('>') else {
                        i += lt;
                        break;
                    };
                    let tag = &candidate[..tag_len + 1];
                    state.artifact_count += 1;
                    let artifact = parse_artifact_tag(message_id, tag, state.artifact_count);
                    debug!(message_id, artifact_id = %artifact.id, "artifact opened");
                    state.current_artifact = Some(artifact.clone());
                    state.inside_artifact = true;
                    events.push(ParserEvent::ArtifactOpen(artifact));
                    i += lt + tag_len + 1;
                } else if ARTIFACT_TAG_OPEN.starts_with(candidate) {
                    // Possibly the beginning of a marker split across chunks.
                    push_text(&mut events, message_id, &rest[..lt]);
                    i += lt;
                    break;
                } else {
                    push_text(&mut events, message_id, &rest[..lt + 1]);
                    i += lt + 1;
                }
            }
        }

        state.position = i;
        events
    }

    /// Drop all per-stream offsets (new session or conversation).
    pub fn reset(&mut self) {
        self.streams.clear();
    }

    /// Whether the stream currently sits inside an unfinished artifact.
    pub fn is_inside_artifact(&self, message_id: &str) -> bool {
        self.streams
            .get(message_id)
            .is_some_and(|state| state.inside_artifact)
    }
}

fn action_event(
    message_id: &str,
    artifact: Option<&ArtifactData>,
    action_id: &str,
    action: ActionData,
) -> ActionEvent {
    ActionEvent {
        message_id: message_id.to_string(),
        artifact_id: artifact.map(|a| a.id.clone()).unwrap_or_default(),
        action_id: action_id.to_string(),
        action,
    }
}

fn push_text(events: &mut Vec<ParserEvent>, message_id: &str, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(ParserEvent::Text { text: last, .. }) = events.last_mut() {
        last.push_str(text);
        return;
    }
    events.push(ParserEvent::Text {
        message_id: message_id.to_string(),
        text: text.to_string(),
    });
}

fn attributes(tag: &str) -> HashMap<String, String> {
    ATTRIBUTE_RE
        .captures_iter(tag)
        .map(|cap| (cap[1].to_string(), cap[2].to_string()))
        .collect()
}

fn parse_artifact_tag(message_id: &str, tag: &str, ordinal: usize) -> ArtifactData {
    let mut attrs = attributes(tag);
    let id = attrs
        .remove("id")
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("{message_id}-artifact-{ordinal}"));
    ArtifactData {
        message_id: message_id.to_string(),
        id,
        title: attrs.remove("title").unwrap_or_default(),
        kind: attrs.remove("type"),
    }
}

fn parse_action_tag(tag: &str) -> Option<ActionData> {
    let mut attrs = attributes(tag);
    let raw_kind = attrs.remove("type").unwrap_or_default();
    let kind = match raw_kind.parse::<ActionKind>() {
        Ok(kind) => kind,
        Err(err) => {
            warn!(tag, "skipping action: {err}");
            return None;
        }
    };
    let file_path = attrs.remove("filePath");
    if kind == ActionKind::File && file_path.as_deref().is_none_or(|p| p.trim().is_empty()) {
        warn!(tag, "skipping file action without filePath");
        return None;
    }
    Some(ActionData {
        kind,
        file_path,
        content: String::new(),
    })
}

/// Remove a trailing fragment that could be the start of `marker`.
fn strip_partial_marker<'a>(text: &'a str, marker: &str) -> &'a str {
    let max = marker.len().min(text.len());
    for len in (1..=max).rev() {
        let start = text.len() - len;
        if text.is_char_boundary(start) && marker.starts_with(&text[start..]) {
            return &text[..start];
        }
    }
    text
}

fn finalize_content(kind: ActionKind, raw: &str) -> String {
    match kind {
        ActionKind::Shell | ActionKind::Start => raw.trim().to_string(),
        ActionKind::File => {
            let body = strip_code_fence(raw.trim());
            if body.is_empty() {
                String::new()
            } else {
                format!("{body}\n")
            }
        }
    }
}

/// Unwrap a payload that is entirely one markdown code block.
fn strip_code_fence(body: &str) -> &str {
    let Some(after_open) = body.strip_prefix("```") else {
        return body;
    };
    let Some(inner) = after_open.strip_suffix("```") else {
        return body;
    };
    // Skip the info string (language tag) on the opening line.
    match inner.find('\n') {
        Some(newline) => inner[newline + 1..].trim_end(),
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = concat!(
        "Setting up the project.\n",
        "<stageArtifact id=\"todo\" title=\"Todo app\" type=\"bundled\">",
        "<stageAction type=\"file\" filePath=\"package.json\">\n",
        "{\"name\":\"x\",\"dependencies\":{}}\n",
        "</stageAction>",
        "<stageAction type=\"shell\">\nnpm install\n</stageAction>",
        "</stageArtifact>\n",
        "Done."
    );

    fn structural(events: &[ParserEvent]) -> Vec<ParserEvent> {
        events
            .iter()
            .filter(|event| {
                !matches!(event, ParserEvent::Text { .. } | ParserEvent::ActionStream(_))
            })
            .cloned()
            .collect()
    }

    #[test]
    fn parses_complete_message_in_one_call() {
        let mut parser = StreamParser::new();
        let events = parser.parse("m1", SAMPLE);

        let kinds: Vec<&str> = events
            .iter()
            .map(|event| match event {
                ParserEvent::Text { .. } => "text",
                ParserEvent::ArtifactOpen(_) => "artifact_open",
                ParserEvent::ArtifactClose(_) => "artifact_close",
                ParserEvent::ActionOpen(_) => "action_open",
                ParserEvent::ActionStream(_) => "action_stream",
                ParserEvent::ActionClose(_) => "action_close",
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "text",
                "artifact_open",
                "action_open",
                "action_close",
                "action_open",
                "action_close",
                "artifact_close",
                "text"
            ]
        );

        let ParserEvent::ActionClose(file) = &events[3] else {
            panic!("expected file close, got {:?}", events[3]);
        };
        assert_eq!(file.artifact_id, "todo");
        assert_eq!(file.action_id, "1");
        assert_eq!(file.action.file_path.as_deref(), Some("package.json"));
        assert_eq!(file.action.content, "{\"name\":\"x\",\"dependencies\":{}}\n");

        let ParserEvent::ActionClose(shell) = &events[5] else {
            panic!("expected shell close");
        };
        assert_eq!(shell.action.kind, ActionKind::Shell);
        assert_eq!(shell.action.content, "npm install");
    }

    #[test]
    fn split_markers_match_single_delivery() {
        let mut whole = StreamParser::new();
        let expected = structural(&whole.parse("m", SAMPLE));

        for split in 1..SAMPLE.len() {
            if !SAMPLE.is_char_boundary(split) {
                continue;
            }
            let mut parser = StreamParser::new();
            let mut events = parser.parse("m", &SAMPLE[..split]);
            events.extend(parser.parse("m", SAMPLE));
            assert_eq!(structural(&events), expected, "split at {split}");
        }
    }

    #[test]
    fn byte_by_byte_delivery_never_closes_an_action_twice() {
        let mut parser = StreamParser::new();
        let mut closes = HashMap::new();
        for end in 1..=SAMPLE.len() {
            for event in parser.parse("m", &SAMPLE[..end]) {
                if let ParserEvent::ActionClose(action) = event {
                    *closes.entry(action.action_id).or_insert(0) += 1;
                }
            }
        }
        assert_eq!(closes.len(), 2);
        assert!(closes.values().all(|count| *count == 1));
    }

    #[test]
    fn partial_open_marker_is_not_fired() {
        let mut parser = StreamParser::new();
        let events = parser.parse("m", "hello <stageArt");
        assert_eq!(
            events,
            vec![ParserEvent::Text {
                message_id: "m".into(),
                text: "hello ".into()
            }]
        );

        let events = parser.parse("m", "hello <stageArtifact id=\"a\" title=\"A\"");
        assert!(events.is_empty());

        let events = parser.parse("m", "hello <stageArtifact id=\"a\" title=\"A\">");
        assert!(matches!(&events[..], [ParserEvent::ArtifactOpen(a)] if a.id == "a"));
    }

    #[test]
    fn streaming_delivers_accumulated_payload() {
        let mut parser = StreamParser::new();
        let head = "<stageArtifact id=\"a\" title=\"A\"><stageAction type=\"file\" filePath=\"src/a.txt\">\nline one\n";
        let events = parser.parse("m", head);
        let streamed: Vec<String> = events
            .iter()
            .filter_map(|event| match event {
                ParserEvent::ActionStream(action) => Some(action.action.content.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(streamed, vec!["line one\n".to_string()]);

        // A trailing fragment of the close marker is withheld from the payload.
        let more = format!("{head}line two\n</stageAc");
        let events = parser.parse("m", &more);
        let ParserEvent::ActionStream(action) = &events[0] else {
            panic!("expected stream event, got {events:?}");
        };
        assert_eq!(action.action.content, "line one\nline two\n");

        // Same input again: nothing new to report.
        assert!(parser.parse("m", &more).is_empty());
    }

    #[test]
    fn unknown_action_type_is_consumed_silently() {
        let mut parser = StreamParser::new();
        let events = parser.parse(
            "m",
            "<stageArtifact id=\"a\" title=\"A\"><stageAction type=\"deploy\">go</stageAction></stageArtifact>",
        );
        assert!(matches!(
            &events[..],
            [ParserEvent::ArtifactOpen(_), ParserEvent::ArtifactClose(_)]
        ));
    }

    #[test]
    fn streams_are_tracked_independently_and_reset_clears_offsets() {
        let mut parser = StreamParser::new();
        let text = "<stageArtifact id=\"a\" title=\"A\"></stageArtifact>";
        assert_eq!(parser.parse("one", text).len(), 2);
        assert_eq!(parser.parse("two", text).len(), 2);
        assert!(parser.parse("one", text).is_empty());

        parser.reset();
        assert_eq!(parser.parse("one", text).len(), 2);
    }

    #[test]
    fn artifact_without_id_gets_generated_id() {
        let mut parser = StreamParser::new();
        let events = parser.parse("msg", "<stageArtifact title=\"T\">");
        let [ParserEvent::ArtifactOpen(artifact)] = &events[..] else {
            panic!("expected artifact open");
        };
        assert_eq!(artifact.id, "msg-artifact-1");
        assert!(parser.is_inside_artifact("msg"));
    }

    #[test]
    fn fenced_file_payload_is_unwrapped() {
        assert_eq!(
            finalize_content(ActionKind::File, "\n```tsx\nexport {}\n```\n"),
            "export {}\n"
        );
        assert_eq!(finalize_content(ActionKind::File, "plain"), "plain\n");
        assert_eq!(finalize_content(ActionKind::File, "  \n"), "");
    }

    #[test]
    fn lone_angle_brackets_are_text() {
        let mut parser = StreamParser::new();
        let events = parser.parse("m", "a < b and <div>");
        assert_eq!(
            events,
            vec![ParserEvent::Text {
                message_id: "m".into(),
                text: "a < b and <div>".into()
            }]
        );
    }
}
