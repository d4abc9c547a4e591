//! Token lifecycle and session security for the auth service: ES256 access
//! tokens, rotating refresh tokens with replay detection, session listing
//! and revocation.

pub mod app;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
