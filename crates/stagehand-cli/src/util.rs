use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Seed the process environment from `<workdir>/.env`.
///
/// The work dir is also the sandbox root, so a project can carry its own
/// `STAGEHAND_*` settings next to its files. Variables already set in the
/// environment win. Returns the names that were applied; a missing file is
/// not an error.
pub fn load_workdir_env(workdir: &Path) -> Result<Vec<String>> {
    let env_path = workdir.join(".env");
    if !env_path.is_file() {
        return Ok(Vec::new());
    }
    let entries = dotenvy::from_path_iter(&env_path)
        .with_context(|| format!("load {}", env_path.display()))?;
    let mut applied = Vec::new();
    for entry in entries {
        let (key, value) = entry.with_context(|| format!("parse {}", env_path.display()))?;
        if std::env::var_os(&key).is_some() {
            continue;
        }
        unsafe {
            std::env::set_var(&key, &value);
        }
        applied.push(key);
    }
    Ok(applied)
}

/// Logs go to stderr so stdout stays machine readable. `RUST_LOG` overrides
/// the default `info` filter.
pub fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();
}

/// Cumulative prefixes of `text`, growing by roughly `chunk_bytes` each step,
/// always split on char boundaries. A zero chunk size yields the whole text.
pub fn cumulative_chunks(text: &str, chunk_bytes: usize) -> Vec<&str> {
    if chunk_bytes == 0 || text.is_empty() {
        return vec![text];
    }
    let mut prefixes = Vec::new();
    let mut end = 0;
    while end < text.len() {
        end = (end + chunk_bytes).min(text.len());
        while !text.is_char_boundary(end) {
            end += 1;
        }
        prefixes.push(&text[..end]);
    }
    prefixes
}

pub fn read_response(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("read response {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_respect_char_boundaries() {
        let text = "aé<b>ü";
        let chunks = cumulative_chunks(text, 1);
        assert_eq!(chunks.last(), Some(&text));
        for chunk in &chunks {
            assert!(text.starts_with(chunk));
        }
        assert_eq!(chunks[1], "aé");
    }

    #[test]
    fn workdir_env_never_overrides_existing_variables() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_workdir_env(dir.path()).unwrap().is_empty());

        std::fs::write(
            dir.path().join(".env"),
            "STAGEHAND_UTIL_TEST_FRESH=from-file\nPATH=/nowhere\n",
        )
        .unwrap();
        let applied = load_workdir_env(dir.path()).unwrap();
        assert_eq!(applied, vec!["STAGEHAND_UTIL_TEST_FRESH".to_string()]);
        assert_eq!(std::env::var("STAGEHAND_UTIL_TEST_FRESH").unwrap(), "from-file");
        assert_ne!(std::env::var("PATH").unwrap(), "/nowhere");
    }

    #[test]
    fn zero_chunk_size_yields_whole_text() {
        assert_eq!(cumulative_chunks("abc", 0), vec!["abc"]);
        assert_eq!(cumulative_chunks("", 4), vec![""]);
    }
}
