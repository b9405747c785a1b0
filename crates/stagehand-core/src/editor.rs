use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::catalog::FileCatalog;

/// An open editor buffer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub value: String,
    pub is_binary: bool,
}

/// Open documents keyed by absolute path.
///
/// A document is unsaved while its value differs from the catalog's content.
#[derive(Clone, Debug, Default)]
pub struct EditorState {
    documents: BTreeMap<String, Document>,
}

impl EditorState {
    /// Open (or return the already open) document for a catalog file.
    pub fn open(&mut self, path: &str, catalog: &FileCatalog) -> Option<&Document> {
        if !self.documents.contains_key(path) {
            let value = catalog.content(path)?.to_string();
            self.documents.insert(
                path.to_string(),
                Document {
                    value,
                    is_binary: catalog.is_binary(path),
                },
            );
        }
        self.documents.get(path)
    }

    pub fn get(&self, path: &str) -> Option<&Document> {
        self.documents.get(path)
    }

    /// Replace a document's value. Returns false if it is not open.
    pub fn update(&mut self, path: &str, value: impl Into<String>) -> bool {
        match self.documents.get_mut(path) {
            Some(document) if !document.is_binary => {
                document.value = value.into();
                true
            }
            _ => false,
        }
    }

    /// Revert a document to the catalog's content.
    pub fn reset(&mut self, path: &str, catalog: &FileCatalog) -> bool {
        match (self.documents.get_mut(path), catalog.content(path)) {
            (Some(document), Some(content)) => {
                document.value = content.to_string();
                true
            }
            _ => false,
        }
    }

    /// Follow an external write to `path` unless the user has unsaved edits.
    ///
    /// `previous` is the catalog content before the write.
    pub fn follow_write(&mut self, path: &str, previous: Option<&str>, current: &str) {
        if let Some(document) = self.documents.get_mut(path) {
            if document.value == previous.unwrap_or_default() {
                document.value = current.to_string();
            }
        }
    }

    pub fn is_unsaved(&self, path: &str, catalog: &FileCatalog) -> bool {
        self.documents
            .get(path)
            .is_some_and(|document| Some(document.value.as_str()) != catalog.content(path))
    }

    pub fn unsaved(&self, catalog: &FileCatalog) -> BTreeSet<String> {
        self.documents
            .keys()
            .filter(|path| self.is_unsaved(path, catalog))
            .cloned()
            .collect()
    }

    pub fn close(&mut self, path: &str) {
        self.documents.remove(path);
    }

    pub fn clear(&mut self) {
        self.documents.clear();
    }
}
