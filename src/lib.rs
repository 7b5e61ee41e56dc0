//! Document sharing between publishers and subscribers.
//!
//! Publishers upload documents and assign them to subscriber accounts;
//! subscribers list and fetch only what has been assigned to them.

pub mod config;
pub mod models;
pub mod server;
