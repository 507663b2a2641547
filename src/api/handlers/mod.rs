//! Route handlers for the HTTP surface.

pub mod auth;
pub mod health;
