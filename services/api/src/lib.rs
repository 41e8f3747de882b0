//! services/api/src/lib.rs
//!
//! The FeelEd HTTP service: OpenAI-backed adapters behind the core ports,
//! plus the axum web layer that exposes lesson generation, history, shares
//! and auth.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
