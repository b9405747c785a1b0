//! Project path normalization.
//!
//! Generated file paths arrive in inconsistent conventions (relative, absolute,
//! prefixed with a placeholder root). Everything is folded into one absolute
//! form under the canonical project root before it reaches the catalog or the
//! sandbox.

use crate::error::ProtocolError;

/// Canonical absolute root of the generated project.
pub const DEFAULT_PROJECT_ROOT: &str = "/home/project";

/// Placeholder roots the generator is known to emit in place of the real one.
const ALIAS_ROOTS: &[&str] = &["${WORK_DIR}", "$WORK_DIR", "~/project", "~"];

/// Normalize `raw` to an absolute path under `root`.
///
/// Idempotent: `normalize_project_path(&normalize_project_path(p, r), r)`
/// equals `normalize_project_path(p, r)`.
pub fn normalize_project_path(raw: &str, root: &str) -> String {
    let root = canonical_root(root);
    let root_token = root.trim_start_matches('/');

    let mut rest = raw.trim().replace('\\', "/");
    loop {
        let before = rest.len();
        rest = rest.trim_start_matches('/').to_string();
        while let Some(stripped) = rest.strip_prefix("./") {
            rest = stripped.to_string();
        }
        if let Some(stripped) = strip_root_token(&rest, root_token) {
            rest = stripped.to_string();
        }
        for alias in ALIAS_ROOTS {
            if let Some(stripped) = strip_root_token(&rest, alias) {
                rest = stripped.to_string();
            }
        }
        if rest.len() == before {
            break;
        }
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                // Clamped at the project root.
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        root
    } else if root == "/" {
        format!("/{}", segments.join("/"))
    } else {
        format!("{root}/{}", segments.join("/"))
    }
}

/// Translate a normalized absolute path to the sandbox's root-relative form.
///
/// The root itself maps to `""`.
pub fn to_sandbox_path(absolute: &str, root: &str) -> Result<String, ProtocolError> {
    let root = canonical_root(root);
    if absolute == root {
        return Ok(String::new());
    }
    let prefix = if root == "/" {
        "/".to_string()
    } else {
        format!("{root}/")
    };
    absolute
        .strip_prefix(&prefix)
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::OutsideRoot {
            path: absolute.to_string(),
            root,
        })
}

/// Every ancestor folder of `path` strictly below `root`, outermost first.
pub fn ancestor_folders(path: &str, root: &str) -> Vec<String> {
    let root = canonical_root(root);
    let mut folders = Vec::new();
    let mut current = path;
    while let Some(idx) = current.rfind('/') {
        current = &current[..idx];
        if current.len() <= root.len() || !current.starts_with(root.as_str()) {
            break;
        }
        folders.push(current.to_string());
    }
    folders.reverse();
    folders
}

/// Final path segment.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn canonical_root(root: &str) -> String {
    let trimmed = root.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn strip_root_token<'a>(path: &'a str, token: &str) -> Option<&'a str> {
    if token.is_empty() {
        return None;
    }
    let rest = path.strip_prefix(token)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = DEFAULT_PROJECT_ROOT;

    #[test]
    fn equivalent_inputs_normalize_to_one_path() {
        let inputs = [
            "src/App.tsx",
            "/home/project/src/App.tsx",
            "${WORK_DIR}/src/App.tsx",
            "  ./src/App.tsx ",
            "home/project/home/project/src/App.tsx",
            "~/project/src//App.tsx",
        ];
        for input in inputs {
            assert_eq!(
                normalize_project_path(input, ROOT),
                "/home/project/src/App.tsx",
                "input {input:?}"
            );
        }
    }

    #[test]
    fn normalization_is_a_fixed_point() {
        for input in [
            "a/b/c.txt",
            "/home/project",
            "",
            "..\\..\\etc\\passwd",
            "$WORK_DIR/x",
            "/home/project/src/../lib/./mod.rs",
        ] {
            let once = normalize_project_path(input, ROOT);
            assert_eq!(normalize_project_path(&once, ROOT), once, "input {input:?}");
            assert!(once.starts_with(ROOT));
        }
    }

    #[test]
    fn parent_segments_are_clamped_at_root() {
        assert_eq!(
            normalize_project_path("../../etc/passwd", ROOT),
            "/home/project/etc/passwd"
        );
        assert_eq!(normalize_project_path("a/../../b", ROOT), "/home/project/b");
    }

    #[test]
    fn sandbox_paths_are_root_relative() {
        assert_eq!(
            to_sandbox_path("/home/project/src/a.ts", ROOT).unwrap(),
            "src/a.ts"
        );
        assert_eq!(to_sandbox_path("/home/project", ROOT).unwrap(), "");
        assert!(to_sandbox_path("/home/projectx/a", ROOT).is_err());
        assert!(to_sandbox_path("/etc/passwd", ROOT).is_err());
    }

    #[test]
    fn ancestors_stop_at_root() {
        assert_eq!(
            ancestor_folders("/root/a/b/c.txt", "/root"),
            vec!["/root/a".to_string(), "/root/a/b".to_string()]
        );
        assert!(ancestor_folders("/root/top.txt", "/root").is_empty());
    }

    #[test]
    fn custom_root_is_respected() {
        assert_eq!(normalize_project_path("/root/a/b", "/root/"), "/root/a/b");
        assert_eq!(normalize_project_path("a/b", "workspace"), "/workspace/a/b");
    }
}
