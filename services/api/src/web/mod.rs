//! services/api/src/web/mod.rs

pub mod auth;
pub mod middleware;
pub mod rest;
pub mod state;
