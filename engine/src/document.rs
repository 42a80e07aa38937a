//! Document types for the synchronized style index.

use crate::{DocId, Revision};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier that follows a document across devices.
///
/// Local ids may be renumbered by the local store; sync ids never are.
/// A document that has ever been synced has exactly one sync id, created
/// once and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncId(Uuid);

impl SyncId {
    /// Mint a fresh sync id for a document that has never synced.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SyncId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SyncId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::fmt::Display for SyncId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Who initiated a local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveSource {
    /// Direct user action in the editor or manager UI
    User,
    /// Applied by the sync engine
    Sync,
}

/// A locally stored style document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleDoc {
    /// Local numeric key; `None` until the local store assigns one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<DocId>,
    /// Stable cross-device identifier
    pub sync_id: SyncId,
    /// Last-write-wins version marker
    pub revision: Revision,
    /// The style content, opaque to the sync engine
    pub payload: serde_json::Value,
}

impl StyleDoc {
    /// Create a document with a fresh sync id and no local id yet.
    pub fn new(payload: serde_json::Value, revision: Revision) -> Self {
        Self {
            id: None,
            sync_id: SyncId::new(),
            revision,
            payload,
        }
    }

    /// Strip the local-only identity so a remote copy can be re-keyed.
    pub fn without_local_id(mut self) -> Self {
        self.id = None;
        self
    }
}

/// A document as returned by a drive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDoc {
    pub sync_id: SyncId,
    pub revision: Revision,
    pub payload: serde_json::Value,
}

/// A listing entry: identity and revision only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub sync_id: SyncId,
    pub revision: Revision,
}

/// One page of a remote listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocPage {
    pub entries: Vec<RemoteEntry>,
    /// Opaque token for the next page, `None` on the last page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fresh_doc_has_no_local_id() {
        let doc = StyleDoc::new(json!({"name": "Dark Reader"}), 1000);
        assert!(doc.id.is_none());
        assert_eq!(doc.revision, 1000);
    }

    #[test]
    fn sync_ids_are_unique() {
        assert_ne!(SyncId::new(), SyncId::new());
    }

    #[test]
    fn without_local_id_strips_identity() {
        let mut doc = StyleDoc::new(json!({}), 1);
        doc.id = Some(42);
        let stripped = doc.without_local_id();
        assert!(stripped.id.is_none());
    }

    #[test]
    fn serialization_roundtrip() {
        let mut doc = StyleDoc::new(json!({"name": "Solarized", "enabled": true}), 1706745600000);
        doc.id = Some(7);
        let json = serde_json::to_string(&doc).unwrap();
        assert!(json.contains("syncId")); // camelCase
        let parsed: StyleDoc = serde_json::from_str(&json).unwrap();
        assert_eq!(doc, parsed);
    }

    #[test]
    fn local_id_omitted_from_wire_form() {
        let doc = StyleDoc::new(json!({}), 1);
        let json = serde_json::to_string(&doc).unwrap();
        assert!(!json.contains("\"id\""));
    }
}
