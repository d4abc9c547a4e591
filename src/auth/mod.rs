pub mod guard;
pub mod jwt;
pub mod password;
pub mod retention;
pub mod secret;
pub mod services;
pub mod sessions;
