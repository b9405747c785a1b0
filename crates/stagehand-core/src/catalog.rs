//! Display-side view of the project tree.
//!
//! The catalog may run ahead of the sandbox while actions stream; it never
//! performs I/O itself.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use stagehand_protocol::paths::ancestor_folders;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CatalogEntry {
    File { content: String, is_binary: bool },
    Folder,
}

impl CatalogEntry {
    pub fn is_folder(&self) -> bool {
        matches!(self, CatalogEntry::Folder)
    }
}

/// Absolute path → entry map with folder materialization and expansion state.
#[derive(Clone, Debug)]
pub struct FileCatalog {
    root: String,
    entries: BTreeMap<String, CatalogEntry>,
    expanded: BTreeSet<String>,
    selected: Option<String>,
}

/// Result of writing a file into the catalog.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CatalogWrite {
    /// Folders materialized by this write, outermost first.
    pub created_folders: Vec<String>,
    /// Display content before the write, if the file existed.
    pub previous: Option<String>,
}

impl FileCatalog {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            entries: BTreeMap::new(),
            expanded: BTreeSet::new(),
            selected: None,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Insert or replace a file, materializing every ancestor folder first.
    ///
    /// Binary files keep empty display content.
    pub fn write_file(&mut self, path: &str, content: &str, is_binary: bool) -> CatalogWrite {
        let created_folders = self.ensure_ancestors(path);
        let content = if is_binary { String::new() } else { content.to_string() };
        let previous = match self.entries.insert(
            path.to_string(),
            CatalogEntry::File { content, is_binary },
        ) {
            Some(CatalogEntry::File { content, .. }) => Some(content),
            _ => None,
        };
        CatalogWrite {
            created_folders,
            previous,
        }
    }

    /// Make sure `path` and its ancestors exist as folders. Returns the new ones.
    pub fn ensure_folder(&mut self, path: &str) -> Vec<String> {
        let mut created = self.ensure_ancestors(path);
        if !self.entries.contains_key(path) {
            self.entries.insert(path.to_string(), CatalogEntry::Folder);
            self.expanded.insert(path.to_string());
            created.push(path.to_string());
        }
        created
    }

    fn ensure_ancestors(&mut self, path: &str) -> Vec<String> {
        let mut created = Vec::new();
        for folder in ancestor_folders(path, &self.root) {
            if !self.entries.contains_key(&folder) {
                self.entries.insert(folder.clone(), CatalogEntry::Folder);
                created.push(folder.clone());
            }
            // New content should be visible without manual navigation.
            self.expanded.insert(folder);
        }
        created
    }

    /// Remove `path` and, for folders, everything beneath it.
    ///
    /// Returns the removed paths; clears the selection if it was among them.
    pub fn remove(&mut self, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let removed: Vec<String> = self
            .entries
            .keys()
            .filter(|key| key.as_str() == path || key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in &removed {
            self.entries.remove(key);
            self.expanded.remove(key);
        }
        if self
            .selected
            .as_ref()
            .is_some_and(|selected| removed.contains(selected))
        {
            self.selected = None;
        }
        removed
    }

    pub fn get(&self, path: &str) -> Option<&CatalogEntry> {
        self.entries.get(path)
    }

    /// Display content of a text or binary file.
    pub fn content(&self, path: &str) -> Option<&str> {
        match self.entries.get(path) {
            Some(CatalogEntry::File { content, .. }) => Some(content),
            _ => None,
        }
    }

    pub fn is_file(&self, path: &str) -> bool {
        matches!(self.entries.get(path), Some(CatalogEntry::File { .. }))
    }

    pub fn is_binary(&self, path: &str) -> bool {
        matches!(
            self.entries.get(path),
            Some(CatalogEntry::File { is_binary: true, .. })
        )
    }

    pub fn entries(&self) -> &BTreeMap<String, CatalogEntry> {
        &self.entries
    }

    /// Flip a folder's expansion; returns the new state.
    pub fn toggle_folder(&mut self, path: &str) -> bool {
        if self.expanded.remove(path) {
            false
        } else {
            self.expanded.insert(path.to_string());
            true
        }
    }

    pub fn is_expanded(&self, path: &str) -> bool {
        self.expanded.contains(path)
    }

    pub fn expanded(&self) -> &BTreeSet<String> {
        &self.expanded
    }

    pub fn select(&mut self, path: Option<String>) {
        self.selected = path;
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.expanded.clear();
        self.selected = None;
    }
}

/// Whether raw bytes should be shown as a binary file.
pub fn looks_binary(bytes: &[u8]) -> bool {
    bytes.contains(&0) || std::str::from_utf8(bytes).is_err()
}
