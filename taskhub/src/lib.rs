//! `TaskHub`: collaborative task tracker client library.
//!
//! The [`sync::Synchronizer`] keeps a local copy of the caller's tasks equal
//! to the service's, refetching after every local mutation and every push
//! notification. [`view`] derives filtered subsets of that copy, and
//! [`session::SessionController`] ties all of it to a login.

pub mod config;
pub mod credential;
pub mod push;
pub mod repo;
pub mod session;
pub mod sync;
pub mod view;

#[cfg(test)]
mod testing;
