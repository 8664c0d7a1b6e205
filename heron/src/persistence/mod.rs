/// In-memory store implementations used as engine defaults and in tests.
pub mod memory;

/// PostgreSQL-backed store implementations, behind the `postgres` feature.
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{InMemoryIncidentStore, InMemoryJobStore, InMemoryMeterLogStore};

#[cfg(feature = "postgres")]
pub use postgres::{PostgresIncidentStore, PostgresJobStore, PostgresMeterLogStore};
