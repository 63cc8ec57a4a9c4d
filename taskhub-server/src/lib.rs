//! `TaskHub` development service library.
//!
//! Exposes the service for use in client integration tests. Tasks are
//! scoped per account, and every accepted mutation is announced on the
//! `/events` push channel.

pub mod config;
pub mod server;
pub mod store;
