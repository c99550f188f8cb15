// Photospec Infrastructure - SQLite Adapter
// Implements: JobRepository, SpecRegistry

mod connection;
mod error;
mod job_repository;
mod migration;
mod spec_registry;

pub use connection::create_pool;
pub use job_repository::SqliteJobRepository;
pub use migration::{current_version, run_migrations};
pub use spec_registry::SqliteSpecRegistry;
