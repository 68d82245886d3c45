pub mod dedup;
pub mod job;
pub mod pool;
pub mod worker;
