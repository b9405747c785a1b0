//! Global CLI options.

use std::path::PathBuf;

use stagehand_core::OrchestratorConfig;

/// Options shared by every command; each can also be set via env vars.
#[derive(clap::Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Sandbox working directory; its `.env` is loaded without overriding (env: STAGEHAND_WORKDIR)
    #[arg(short = 'w', long, global = true, env = "STAGEHAND_WORKDIR", default_value = ".")]
    pub workdir: PathBuf,

    /// Absolute project root used for display paths (env: STAGEHAND_PROJECT_ROOT)
    #[arg(long, global = true, env = "STAGEHAND_PROJECT_ROOT")]
    pub project_root: Option<String>,

    /// Override the synthetic install command (env: STAGEHAND_INSTALL_COMMAND)
    #[arg(long, global = true, env = "STAGEHAND_INSTALL_COMMAND", hide = true)]
    pub install_command: Option<String>,
}

impl GlobalOpts {
    /// Orchestrator config from `STAGEHAND_*` variables with flags layered on top.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::from_env();
        if let Some(root) = &self.project_root {
            config.project_root = root.clone();
        }
        if let Some(command) = &self.install_command {
            config.install_command = command.clone();
        }
        config
    }
}
