use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::{DocumentId, UserId};

/// Opaque reference to stored document content.
///
/// Produced by the file storage when an upload is persisted; the registry
/// never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageLocator(String);

impl StorageLocator {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An uploaded document and the subscribers it has been assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub storage_locator: StorageLocator,
    /// Publisher that uploaded the document. Never changes.
    pub owner_id: UserId,
    /// Subscribers allowed to see the document. Only grows.
    pub assigned_to: BTreeSet<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn is_assigned_to(&self, user_id: UserId) -> bool {
        self.assigned_to.contains(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_json_shape() {
        let doc = Document {
            id: DocumentId::new(1),
            title: "Spec.pdf".to_string(),
            storage_locator: StorageLocator::new("uploads/abc.pdf"),
            owner_id: UserId::new(5),
            assigned_to: [UserId::new(9), UserId::new(2)].into_iter().collect(),
            created_at: Utc::now(),
        };

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["id"], 1);
        assert_eq!(value["storageLocator"], "uploads/abc.pdf");
        assert_eq!(value["ownerId"], 5);
        assert_eq!(value["assignedTo"], serde_json::json!([2, 9]));
    }
}
