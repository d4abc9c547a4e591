//! Postgres persistence for refresh tokens and the user directory, plus the
//! in-memory stand-ins the service tests run against.

use diesel::PgConnection;
use diesel::r2d2::{self, ConnectionManager};

pub mod connection;
pub mod error;
pub mod memory;
pub mod models;
pub mod repositories;
pub mod schema;

pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;
