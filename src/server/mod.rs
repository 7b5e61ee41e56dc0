//! Server-side modules for the pdfshare document server.

pub mod error;
pub mod guard;
pub mod registry;
pub mod routes;
pub mod storage;
pub mod tokens;
pub mod users;

pub use error::ApiError;
pub use guard::{AuthUser, RequiredRole};
pub use registry::{Assignment, DocumentRegistry, RegistryError};
pub use routes::{router, AppState};
pub use storage::{PersistedState, ServerStorage, StorageError};
pub use tokens::{Claims, TokenError, TokenService};
pub use users::{UserRecord, UserStore, UserStoreError};
