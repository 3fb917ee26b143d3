pub mod file;
pub mod query;
pub mod rule;
pub mod snapshot;
pub mod value;
pub mod version;
