use std::sync::Arc;
use std::time::Duration;

use stagehand_core::{ActionStatus, Orchestrator, OrchestratorConfig};
use stagehand_sandbox::LocalSandbox;
use tempfile::TempDir;

async fn wait_for_status(orchestrator: &Orchestrator, artifact: &str, action: &str) -> ActionStatus {
    for _ in 0..200 {
        if let Some(status) = orchestrator.action_status(artifact, action) {
            if status.is_final() {
                return status;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("action {artifact}/{action} never finished");
}

#[tokio::test]
async fn file_actions_land_on_disk_and_saves_round_trip() {
    let tmp = TempDir::new().expect("tmpdir");
    let sandbox = Arc::new(LocalSandbox::new(tmp.path()).expect("sandbox"));
    let orchestrator = Orchestrator::new(sandbox.clone(), OrchestratorConfig::default());

    orchestrator.parse_message(
        "m1",
        r#"<stageArtifact id="docs" title="Docs">
<stageAction type="file" filePath="docs/guide/intro.md"># Intro</stageAction>
</stageArtifact>"#,
    );
    assert_eq!(
        wait_for_status(&orchestrator, "docs", "1").await,
        ActionStatus::Complete
    );
    let on_disk = tmp.path().join("docs/guide/intro.md");
    assert_eq!(std::fs::read_to_string(&on_disk).unwrap(), "# Intro\n");

    let path = "/home/project/docs/guide/intro.md";
    orchestrator.open_file(path).unwrap();
    orchestrator.update_document(path, "# Edited\n").unwrap();
    orchestrator.save_file(path).await.unwrap();
    assert_eq!(std::fs::read_to_string(&on_disk).unwrap(), "# Edited\n");
    assert!(orchestrator.unsaved_files().is_empty());

    orchestrator.delete_file("/home/project/docs").await.unwrap();
    assert!(!tmp.path().join("docs").exists());
    assert!(orchestrator.file_content(path).is_none());
}
