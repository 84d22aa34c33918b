//! proxyslot - backend for a proxy-switching browser extension
//!
//! This library provides:
//! - An append-only log of client status pings
//! - A single-slot registry of the currently active proxy target, backed by
//!   atomic upsert/delete on a document store
//! - A health probe that degrades to an "unhealthy" payload instead of failing
//! - An HTTP API exposing the above under `/api`
//!
//! No traffic is proxied; connecting only records which proxy the extension
//! should use.

pub mod api;
pub mod config;
pub mod context;
pub mod cors;
pub mod db;
pub mod error;
pub mod health;
pub mod registry;
pub mod status;
pub mod store;
