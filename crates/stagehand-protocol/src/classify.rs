//! Intent inference for shell command lines.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// What a command line is trying to do, as far as auto-setup is concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandIntent {
    /// Installs dependencies from the manifest.
    Install,
    /// Starts a long-running dev server.
    Start,
    Other,
}

struct Rule {
    intent: CommandIntent,
    pattern: Regex,
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    let rule = |intent, pattern: &str| Rule {
        intent,
        pattern: Regex::new(pattern).unwrap(),
    };
    vec![
        rule(
            CommandIntent::Install,
            r"^(?:npm|pnpm|cnpm)\s+(?:install|i|ci|add)(?:\s|$)",
        ),
        rule(CommandIntent::Install, r"^yarn(?:\s+(?:install|add)(?:\s|$)|\s*$)"),
        rule(CommandIntent::Install, r"^bun\s+(?:install|i|add)(?:\s|$)"),
        rule(
            CommandIntent::Start,
            r"^(?:npm|pnpm|yarn|bun)\s+(?:run\s+)?(?:dev|start|serve|preview)(?:\s|$)",
        ),
        rule(
            CommandIntent::Start,
            r"^(?:npx\s+|bunx\s+)?(?:vite|next\s+dev|next\s+start|nuxt\s+dev|nuxi\s+dev|astro\s+dev|remix\s+dev|serve)(?:\s|$)",
        ),
    ]
});

/// Classify a command line against the fixed rule table.
///
/// Chained commands (`&&`, `||`, `;`) are classified per segment; an install
/// anywhere in the chain wins over a start.
pub fn classify(command: &str) -> CommandIntent {
    let mut intent = CommandIntent::Other;
    for segment in split_chain(command) {
        match classify_segment(segment) {
            CommandIntent::Install => return CommandIntent::Install,
            CommandIntent::Start => intent = CommandIntent::Start,
            CommandIntent::Other => {}
        }
    }
    intent
}

fn classify_segment(segment: &str) -> CommandIntent {
    let segment = segment.trim();
    RULES
        .iter()
        .find(|rule| rule.pattern.is_match(segment))
        .map(|rule| rule.intent)
        .unwrap_or(CommandIntent::Other)
}

fn split_chain(command: &str) -> impl Iterator<Item = &str> {
    command
        .split("&&")
        .flat_map(|part| part.split("||"))
        .flat_map(|part| part.split([';', '\n']))
        .filter(|part| !part.trim().is_empty())
}
