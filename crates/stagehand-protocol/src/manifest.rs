//! Dependency manifest detection and parsing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::paths::file_name;

/// File name of the dependency manifest.
pub const MANIFEST_FILE: &str = "package.json";

/// Lockfiles whose rewrite also means the dependency set changed.
pub const LOCKFILE_NAMES: &[&str] = &[
    "package-lock.json",
    "pnpm-lock.yaml",
    "yarn.lock",
    "bun.lockb",
];

/// Whether a write to `path` changes declared dependencies.
pub fn is_dependency_manifest(path: &str) -> bool {
    let name = file_name(path);
    name == MANIFEST_FILE || LOCKFILE_NAMES.contains(&name)
}

/// The subset of `package.json` auto-setup cares about.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,
}

impl PackageManifest {
    /// Parse manifest text. A failure usually means the file is still streaming.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Preferred script to launch a dev server, in `npm` invocation form.
    pub fn start_command(&self) -> Option<String> {
        if self.scripts.contains_key("dev") {
            Some("npm run dev".to_string())
        } else if self.scripts.contains_key("start") {
            Some("npm start".to_string())
        } else if self.scripts.contains_key("preview") {
            Some("npm run preview".to_string())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_manifest_and_lockfiles() {
        assert!(is_dependency_manifest("/home/project/package.json"));
        assert!(is_dependency_manifest("/home/project/yarn.lock"));
        assert!(is_dependency_manifest("/home/project/web/pnpm-lock.yaml"));
        assert!(!is_dependency_manifest("/home/project/package.json.bak"));
        assert!(!is_dependency_manifest("/home/project/src/package.ts"));
    }

    #[test]
    fn parses_scripts_and_picks_start_command() {
        let manifest = PackageManifest::parse(
            r#"{"name":"x","scripts":{"start":"node server.js","dev":"vite"},"devDependencies":{"vite":"^5"}}"#,
        )
        .unwrap();
        assert_eq!(manifest.name.as_deref(), Some("x"));
        assert_eq!(manifest.dev_dependencies.get("vite").map(String::as_str), Some("^5"));
        assert_eq!(manifest.start_command().as_deref(), Some("npm run dev"));

        let bare = PackageManifest::parse(r#"{"name":"x","dependencies":{}}"#).unwrap();
        assert_eq!(bare.start_command(), None);
    }

    #[test]
    fn truncated_manifest_fails_to_parse() {
        assert!(PackageManifest::parse(r#"{"name":"x","depend"#).is_err());
    }
}
