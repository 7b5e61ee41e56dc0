//! Domain types shared by the server components.

mod document;
mod ids;
mod role;
mod user;

pub use document::{Document, StorageLocator};
pub use ids::{DocumentId, UserId};
pub use role::Role;
pub use user::User;
