//! Feature request board: submissions, upvotes, comments, labels and admin
//! triage over an embedded SQLite store.
//!
//! Layers, top down: [`commands`] (query cache, optimistic updates, notices),
//! [`services`] (permissions, validation, multi-row writes) and [`db`].

pub mod auth;
pub mod commands;
pub mod db;
pub mod error;
mod migrations;
pub mod notification;
pub mod query_cache;
pub mod services;
pub mod state;
pub mod types;
pub mod util;
pub mod validation;
