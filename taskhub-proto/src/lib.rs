//! Shared wire model for `TaskHub` clients and services.

pub mod api;
pub mod event;
pub mod task;
