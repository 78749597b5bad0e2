// src/services/mod.rs

//! Stateful services: the harvest client, the reconciler and its observers.

pub mod change_memory;
pub mod harvest;
pub mod observer;
pub mod repository;

pub use change_memory::ChangeMemory;
pub use harvest::{HarvestClient, ListChanges};
pub use observer::{Observer, ObserverBus};
pub use repository::{CheckSummary, IdentifierIndex, Repository, SharedSnapshot};
