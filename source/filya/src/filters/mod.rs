//! Built-in filters shipped with the chain core.

pub mod header_upsert;
pub mod payload_limit;

pub use header_upsert::HeaderUpsert;
pub use payload_limit::PayloadLimit;
