use stagehand_protocol::{
    ActionKind, CommandIntent, ParserEvent, StreamParser, classify, is_dependency_manifest,
    normalize_project_path,
};

const RESPONSE: &str = r#"I'll scaffold a Vite app.

<stageArtifact id="vite-app" title="Vite starter" type="bundled">
<stageAction type="file" filePath="/home/project/package.json">
{
  "name": "vite-app",
  "scripts": { "dev": "vite" },
  "devDependencies": { "vite": "^5.0.0" }
}
</stageAction>
<stageAction type="file" filePath="src/main.ts">
document.body.textContent = "hi";
</stageAction>
<stageAction type="shell">
npm install
</stageAction>
<stageAction type="start">
npm run dev
</stageAction>
</stageArtifact>

Open the preview to see it running."#;

fn feed_in_chunks(chunk: usize) -> Vec<ParserEvent> {
    let mut parser = StreamParser::new();
    let mut events = Vec::new();
    let mut end = 0;
    while end < RESPONSE.len() {
        end = (end + chunk).min(RESPONSE.len());
        while !RESPONSE.is_char_boundary(end) {
            end += 1;
        }
        events.extend(parser.parse("assistant-1", &RESPONSE[..end]));
    }
    events
}

fn closes(events: &[ParserEvent]) -> Vec<(String, ActionKind, String)> {
    events
        .iter()
        .filter_map(|event| match event {
            ParserEvent::ActionClose(action) => Some((
                action.action_id.clone(),
                action.action.kind,
                action.action.content.clone(),
            )),
            _ => None,
        })
        .collect()
}

#[test]
fn chunk_size_does_not_change_final_actions() {
    let reference = closes(&feed_in_chunks(RESPONSE.len()));
    assert_eq!(reference.len(), 4);
    for chunk in [1, 2, 3, 7, 16, 61] {
        assert_eq!(closes(&feed_in_chunks(chunk)), reference, "chunk {chunk}");
    }
}

#[test]
fn streamed_payloads_grow_monotonically_until_close() {
    let events = feed_in_chunks(5);
    let mut last_len = 0;
    let mut saw_stream = false;
    for event in &events {
        match event {
            ParserEvent::ActionOpen(_) => last_len = 0,
            ParserEvent::ActionStream(action) => {
                saw_stream = true;
                assert!(action.action.content.len() >= last_len);
                assert!(!action.action.content.contains("</stage"));
                last_len = action.action.content.len();
            }
            _ => {}
        }
    }
    assert!(saw_stream);
}

#[test]
fn closed_actions_feed_auto_setup_rules() {
    let events = feed_in_chunks(RESPONSE.len());
    let actions = closes(&events);

    let (_, kind, _) = &actions[0];
    assert_eq!(*kind, ActionKind::File);
    let manifest_path = events
        .iter()
        .find_map(|event| match event {
            ParserEvent::ActionClose(action) if action.action_id == "1" => {
                action.action.file_path.clone()
            }
            _ => None,
        })
        .unwrap();
    let normalized = normalize_project_path(&manifest_path, "/home/project");
    assert_eq!(normalized, "/home/project/package.json");
    assert!(is_dependency_manifest(&normalized));

    assert_eq!(classify(&actions[2].2), CommandIntent::Install);
    assert_eq!(actions[3].1, ActionKind::Start);
    assert_eq!(classify(&actions[3].2), CommandIntent::Start);
}
