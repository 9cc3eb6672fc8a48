//! Sluice - Sliding-Window Request Rate Limiting
//!
//! This crate implements a per-client request rate limiter for HTTP services.
//! The core is a sliding-window decider over a pluggable window store; the
//! `http` module adapts it into axum middleware that annotates every response
//! and rejects clients that exceed their allowance.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
