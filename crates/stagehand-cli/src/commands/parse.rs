//! `stagehand parse` command.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use stagehand_protocol::StreamParser;

use crate::commands::MESSAGE_ID;
use crate::opts::GlobalOpts;
use crate::util::{cumulative_chunks, read_response};

#[derive(Args, Debug)]
pub struct ParseArgs {
    /// Recorded assistant response
    pub file: PathBuf,

    /// Deliver the response in growing prefixes of this many bytes (0 = all at once)
    #[arg(long, default_value_t = 0)]
    pub chunk_bytes: usize,
}

pub fn cmd_parse(_opts: &GlobalOpts, args: &ParseArgs) -> Result<()> {
    let text = read_response(&args.file)?;
    let mut parser = StreamParser::new();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut emitted = 0usize;
    for prefix in cumulative_chunks(&text, args.chunk_bytes) {
        for event in parser.parse(MESSAGE_ID, prefix) {
            writeln!(out, "{}", serde_json::to_string(&event)?)?;
            emitted += 1;
        }
    }
    tracing::debug!(emitted, "parse finished");
    Ok(())
}
