use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stagehand_sandbox::{PortEvent, PortEventKind};

/// A preview endpoint exposed by the sandbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preview {
    pub port: u16,
    pub base_url: String,
    pub ready: bool,
}

/// Known previews, ordered by port.
#[derive(Clone, Debug, Default)]
pub struct PreviewState {
    previews: BTreeMap<u16, Preview>,
}

impl PreviewState {
    /// Apply a port event. Returns true if the preview list changed.
    pub fn apply(&mut self, event: &PortEvent) -> bool {
        match event.kind {
            PortEventKind::Open => {
                let preview = Preview {
                    port: event.port,
                    base_url: event.url.clone(),
                    ready: true,
                };
                self.previews.insert(event.port, preview.clone()) != Some(preview)
            }
            PortEventKind::Close => self.previews.remove(&event.port).is_some(),
        }
    }

    pub fn list(&self) -> Vec<Preview> {
        self.previews.values().cloned().collect()
    }

    pub fn has_active(&self) -> bool {
        self.previews.values().any(|preview| preview.ready)
    }

    pub fn clear(&mut self) {
        self.previews.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(port: u16, kind: PortEventKind) -> PortEvent {
        PortEvent {
            port,
            kind,
            url: format!("http://localhost:{port}"),
        }
    }

    #[test]
    fn open_and_close_track_active_previews() {
        let mut previews = PreviewState::default();
        assert!(!previews.has_active());

        assert!(previews.apply(&event(5173, PortEventKind::Open)));
        assert!(!previews.apply(&event(5173, PortEventKind::Open)));
        assert!(previews.apply(&event(3000, PortEventKind::Open)));
        assert!(previews.has_active());
        assert_eq!(
            previews.list().iter().map(|p| p.port).collect::<Vec<_>>(),
            vec![3000, 5173]
        );

        assert!(previews.apply(&event(3000, PortEventKind::Close)));
        assert!(!previews.apply(&event(3000, PortEventKind::Close)));
        assert!(previews.apply(&event(5173, PortEventKind::Close)));
        assert!(!previews.has_active());
    }
}
