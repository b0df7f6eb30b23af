mod postgres;
pub(crate) use postgres::AddChunkOutcome;
pub use postgres::{PostgresConfig, PostgresMetadataPool};

mod types;
