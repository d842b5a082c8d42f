//! Noti rate limiting core.
//!
//! A Redis-backed sliding-window rate limiter for the Noti notification
//! platform: per-actor and per-scope key derivation, atomic window updates,
//! HTTP rendering of decisions and a shared API error taxonomy.

pub mod config;
pub mod error;
pub mod protocol;
pub mod ratelimit;
pub mod service;
