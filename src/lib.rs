//! Payments orchestration service
//!
//! Mediates between internal caller services and external payment providers:
//! idempotent payment creation, a monotonic status state machine fed by
//! provider callbacks, reconciliation, and pending-timeout sweeping, and an
//! at-least-once outbound notification pipeline back to callers.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod payments;
