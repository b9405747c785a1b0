mod commands;
mod opts;
mod util;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::parse::ParseArgs;
use commands::replay::ReplayArgs;
use opts::GlobalOpts;

#[derive(Parser, Debug)]
#[command(name = "stagehand", version, about = "Drive a sandbox from streamed assistant responses")]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the parser events of a recorded response as JSON lines
    Parse(ParseArgs),

    /// Apply a recorded response to a local sandbox and print a summary
    Replay(ReplayArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let opts = &cli.opts;
    let applied = util::load_workdir_env(&opts.workdir)?;
    util::setup_logging();
    if !applied.is_empty() {
        tracing::debug!(workdir = %opts.workdir.display(), vars = ?applied, "loaded workdir .env");
    }

    match cli.command {
        Command::Parse(args) => commands::parse::cmd_parse(opts, &args),
        Command::Replay(args) => commands::replay::cmd_replay(opts, &args).await,
    }
}
