pub mod queue;
pub mod sink;
