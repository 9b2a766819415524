//! Queue data structures backing the task queue.

pub mod memory;

pub use memory::PriorityQueue;
