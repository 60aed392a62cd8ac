//! Command implementations

pub mod checkpoint;
pub mod delete;
pub mod migrate;
pub mod replay;
pub mod rollback;
pub mod schema;
pub mod snapshot;
pub mod status;
