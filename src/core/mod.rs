// Trigger plumbing shared by the dispatch layer

pub mod scheduler;

pub use scheduler::*;
