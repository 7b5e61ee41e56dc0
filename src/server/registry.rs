//! Assignment registry.
//!
//! Owns the document table and the document-to-subscriber assignment
//! relation. Every mutation (`create`, `assign`) runs under a single write
//! lock, so the check-then-insert in `assign` can never lose an update.
//! Reads clone records out from under the read lock, which gives each call a
//! consistent snapshot. No lock is ever held across I/O.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use super::users::UserStore;
use crate::models::{Document, DocumentId, Role, StorageLocator, UserId};

/// Errors returned by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Document {0} not found")]
    DocumentNotFound(DocumentId),
    #[error("User {0} not found")]
    UserNotFound(UserId),
    #[error("User {user} cannot be assigned: {reason}")]
    InvalidTarget { user: UserId, reason: &'static str },
    #[error("User {0} is not a publisher")]
    InvalidOwner(UserId),
}

/// Result of a successful `assign`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// The subscriber was added.
    Added,
    /// The subscriber was already assigned; nothing changed.
    AlreadyAssigned,
}

#[derive(Debug, Default)]
struct Table {
    documents: BTreeMap<DocumentId, Document>,
    next_id: Option<DocumentId>,
}

/// The document table and its assignment relation.
#[derive(Debug)]
pub struct DocumentRegistry {
    users: Arc<UserStore>,
    table: RwLock<Table>,
}

impl DocumentRegistry {
    /// Creates an empty registry that resolves users through `users`.
    pub fn new(users: Arc<UserStore>) -> Self {
        Self {
            users,
            table: RwLock::new(Table::default()),
        }
    }

    /// Creates a registry from previously persisted documents.
    pub fn restore(users: Arc<UserStore>, documents: Vec<Document>) -> Self {
        let documents: BTreeMap<_, _> = documents.into_iter().map(|d| (d.id, d)).collect();
        let next_id = documents.keys().next_back().map(DocumentId::next);
        tracing::info!("Restored {} document(s)", documents.len());

        Self {
            users,
            table: RwLock::new(Table { documents, next_id }),
        }
    }

    /// Records a new document owned by `owner_id`.
    ///
    /// The owner must be an existing publisher.
    pub fn create(
        &self,
        owner_id: UserId,
        title: &str,
        storage_locator: StorageLocator,
    ) -> Result<Document, RegistryError> {
        match self.users.get(owner_id).map(|u| u.role) {
            Some(Role::Publisher) => {}
            Some(Role::Subscriber) | None => return Err(RegistryError::InvalidOwner(owner_id)),
        }

        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let id = table.next_id.unwrap_or(DocumentId::FIRST);
        table.next_id = Some(id.next());

        let document = Document {
            id,
            title: title.to_string(),
            storage_locator,
            owner_id,
            assigned_to: BTreeSet::new(),
            created_at: Utc::now(),
        };
        table.documents.insert(id, document.clone());

        tracing::info!("Created document {} '{}' for owner {}", id, document.title, owner_id);
        Ok(document)
    }

    /// Documents visible to `subject_id` acting as `role`, in id order.
    ///
    /// Publishers see what they own; subscribers see what they are assigned.
    pub fn list_visible(&self, subject_id: UserId, role: Role) -> Vec<Document> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table
            .documents
            .values()
            .filter(|doc| is_visible(doc, subject_id, role))
            .cloned()
            .collect()
    }

    /// Get a document by id.
    pub fn get(&self, id: DocumentId) -> Option<Document> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table.documents.get(&id).cloned()
    }

    /// Returns the document if `subject_id` acting as `role` may see it.
    pub fn get_visible(&self, id: DocumentId, subject_id: UserId, role: Role) -> Option<Document> {
        self.get(id).filter(|doc| is_visible(doc, subject_id, role))
    }

    /// Grants `target_id` visibility of `document_id`.
    ///
    /// The target must be an existing subscriber distinct from the owner.
    /// Assigning an already assigned subscriber is a no-op.
    pub fn assign(
        &self,
        document_id: DocumentId,
        target_id: UserId,
    ) -> Result<Assignment, RegistryError> {
        // Accounts are immutable, so the target can be resolved before the
        // table lock is taken.
        let target = self.users.get(target_id);

        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let document = table
            .documents
            .get_mut(&document_id)
            .ok_or(RegistryError::DocumentNotFound(document_id))?;

        let target = target.ok_or(RegistryError::UserNotFound(target_id))?;
        if target.id == document.owner_id {
            return Err(RegistryError::InvalidTarget {
                user: target_id,
                reason: "owner cannot be assigned to their own document",
            });
        }
        match target.role {
            Role::Subscriber => {}
            Role::Publisher => {
                return Err(RegistryError::InvalidTarget {
                    user: target_id,
                    reason: "only subscribers can be assigned",
                })
            }
        }

        if document.assigned_to.insert(target_id) {
            tracing::info!("Assigned document {} to user {}", document_id, target_id);
            Ok(Assignment::Added)
        } else {
            Ok(Assignment::AlreadyAssigned)
        }
    }

    /// Copies every document, ordered by id, for persistence.
    pub fn snapshot(&self) -> Vec<Document> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table.documents.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .documents
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_visible(doc: &Document, subject_id: UserId, role: Role) -> bool {
    match role {
        Role::Publisher => doc.owner_id == subject_id,
        Role::Subscriber => doc.is_assigned_to(subject_id),
    }
}
