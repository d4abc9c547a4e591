//! # auth-sessions-api
//!
//! Shared API types for the auth-sessions service.
//! This crate is designed to be WASM-compatible and can be used in both
//! backend (Rust) and frontend (WASM/TypeScript via wasm-bindgen) applications.
//!
//! ## Features
//!
//! - Request DTOs (`RegisterRequest`, `LoginRequest`, `ChangePasswordRequest`)
//! - Response DTOs (`AuthResponse`, `TokenResponse`, `SessionResponse`, ...)
//! - Public key material for independent verification (`JwkSet`)
//! - Error response format (`ErrorResponse`)
//!
//! ## Example
//!
//! ```rust
//! use auth_sessions_api::{DeviceContext, LoginRequest};
//!
//! let request = LoginRequest {
//!     email: "user@example.com".to_string(),
//!     password: "password123".to_string(),
//! };
//! let device = DeviceContext::new(Some("curl/8.5".to_string()), None);
//! ```

pub mod error;
pub mod keys;
pub mod requests;
pub mod responses;

// Re-exports for convenient access
pub use error::ErrorResponse;
pub use keys::{Jwk, JwkSet};
pub use requests::*;
pub use responses::*;
