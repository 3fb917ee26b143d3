pub mod classifier;
pub mod hasher;
pub mod index;
pub mod naming;
pub mod routing_rules;
pub mod sniff;
pub mod storage;
pub mod versions;

pub use storage::StorageManager;
