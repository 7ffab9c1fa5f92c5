//! The decision bridge: versioned key/value exchange between the evaluation
//! tasks and the data-path callbacks.

mod memory;
mod store;

pub use memory::MemoryStore;
pub use store::{DecisionStore, SharedEntry, StoreError};
