//! Persistence Layer
//!
//! Abstract keyed storage for agent state (behavior profiles, user
//! profiles, allocations). Only the in-memory backend ships.

pub mod store;

pub use store::{MemoryStore, SharedStore, Store};
