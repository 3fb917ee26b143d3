pub mod audit;
pub mod snapshot;
pub mod wal;
