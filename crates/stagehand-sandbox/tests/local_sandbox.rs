use std::path::Path;
use std::time::Duration;

use stagehand_sandbox::{LocalSandbox, PortEventKind, Sandbox, SandboxError};

fn shell_available() -> bool {
    Path::new("/bin/sh").exists()
}

#[tokio::test]
async fn filesystem_roundtrip_under_root() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = LocalSandbox::new(dir.path()).unwrap();

    sandbox.mkdir("src/components", true).await.unwrap();
    sandbox
        .write_file("src/components/App.tsx", b"export default 1;\n")
        .await
        .unwrap();
    sandbox.write_file("package.json", b"{}").await.unwrap();

    let bytes = sandbox.read_file("src/components/App.tsx").await.unwrap();
    assert_eq!(bytes, b"export default 1;\n");
    assert!(dir.path().join("src/components/App.tsx").exists());

    let root = sandbox.readdir("").await.unwrap();
    let names: Vec<_> = root.iter().map(|entry| (entry.name.as_str(), entry.is_dir)).collect();
    assert_eq!(names, vec![("package.json", false), ("src", true)]);

    assert_eq!(
        sandbox.list_files(),
        vec!["package.json".to_string(), "src/components/App.tsx".to_string()]
    );

    sandbox.rm("src", true).await.unwrap();
    assert!(matches!(
        sandbox.read_file("src/components/App.tsx").await,
        Err(SandboxError::NotFound(_))
    ));
}

#[tokio::test]
async fn rejects_paths_outside_root() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = LocalSandbox::new(dir.path().join("work")).unwrap();

    let err = sandbox.write_file("../escape.txt", b"x").await.unwrap_err();
    assert!(matches!(err, SandboxError::InvalidPath { .. }));
    assert!(!dir.path().join("escape.txt").exists());

    assert!(sandbox.rm("", true).await.is_err());
}

#[tokio::test]
async fn spawn_streams_output_and_exit_code() {
    if !shell_available() {
        eprintln!("skipping spawn_streams_output_and_exit_code: /bin/sh not available");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let sandbox = LocalSandbox::new(dir.path())
        .unwrap()
        .with_env("GREETING", "hello");

    let mut process = sandbox
        .spawn("echo \"$GREETING\"; echo oops 1>&2; exit 3")
        .await
        .unwrap();
    let mut lines = Vec::new();
    while let Some(line) = process.next_output().await {
        lines.push(line);
    }
    lines.sort();
    assert_eq!(lines, vec!["hello".to_string(), "oops".to_string()]);
    assert_eq!(process.wait().await, 3);
}

#[tokio::test]
async fn killed_server_reports_port_lifecycle() {
    if !shell_available() {
        eprintln!("skipping killed_server_reports_port_lifecycle: /bin/sh not available");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let sandbox = LocalSandbox::new(dir.path()).unwrap();
    let mut ports = sandbox.port_events();

    let mut process = sandbox
        .spawn("echo 'Local: http://localhost:4173/'; exec sleep 30")
        .await
        .unwrap();
    let opened = tokio::time::timeout(Duration::from_secs(5), ports.recv())
        .await
        .expect("port open event")
        .unwrap();
    assert_eq!((opened.port, opened.kind), (4173, PortEventKind::Open));
    assert_eq!(opened.url, "http://localhost:4173");

    assert!(process.take_killer().unwrap().kill());
    let code = tokio::time::timeout(Duration::from_secs(5), process.wait())
        .await
        .expect("process exits after kill");
    assert_ne!(code, 0);

    let closed = tokio::time::timeout(Duration::from_secs(5), ports.recv())
        .await
        .expect("port close event")
        .unwrap();
    assert_eq!((closed.port, closed.kind), (4173, PortEventKind::Close));
}
