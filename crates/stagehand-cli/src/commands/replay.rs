//! `stagehand replay` command: run a recorded response against a local sandbox.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;
use stagehand_core::Orchestrator;
use stagehand_sandbox::LocalSandbox;
use tracing::info;

use crate::commands::MESSAGE_ID;
use crate::opts::GlobalOpts;
use crate::util::{cumulative_chunks, read_response};

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Recorded assistant response
    pub file: PathBuf,

    /// Deliver the response in growing prefixes of this many bytes (0 = all at once)
    #[arg(long, default_value_t = 0)]
    pub chunk_bytes: usize,

    /// Pause between chunks (milliseconds)
    #[arg(long, default_value_t = 0)]
    pub delay_ms: u64,

    /// Time to let commands and auto-setup run before the summary (seconds)
    #[arg(long, default_value_t = 0)]
    pub settle_secs: u64,

    /// Treat the response as restored history: apply files, do not re-run commands
    #[arg(long)]
    pub restore: bool,
}

pub async fn cmd_replay(opts: &GlobalOpts, args: &ReplayArgs) -> Result<()> {
    let text = read_response(&args.file)?;
    let sandbox = Arc::new(
        LocalSandbox::new(&opts.workdir)
            .with_context(|| format!("open sandbox at {}", opts.workdir.display()))?,
    );
    let config = opts.orchestrator_config();
    info!(
        workdir = %sandbox.root().display(),
        project_root = %config.project_root,
        "replaying response"
    );
    let orchestrator = Orchestrator::new(sandbox.clone(), config);

    if args.restore {
        orchestrator.restore_history([(MESSAGE_ID, text.as_str())]);
    } else {
        orchestrator.start_generation();
        for prefix in cumulative_chunks(&text, args.chunk_bytes) {
            orchestrator.parse_message(MESSAGE_ID, prefix);
            if args.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
            }
        }
    }
    // lets the runner queues drain even without a settle window
    tokio::time::sleep(Duration::from_millis(50)).await;
    if args.settle_secs > 0 {
        tokio::time::sleep(Duration::from_secs(args.settle_secs)).await;
    }

    let summary = json!({
        "files": sandbox.list_files(),
        "artifacts": orchestrator.artifacts(),
        "auto_actions": orchestrator.auto_actions(),
        "alerts": orchestrator.alerts(),
        "previews": orchestrator.previews(),
        "setup": orchestrator.setup_state(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    orchestrator.reset_session();
    Ok(())
}
