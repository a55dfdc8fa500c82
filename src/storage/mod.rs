//! Storage layer: relational repository and volatile key-value state.

mod kv;
mod models;
mod repository;

pub use kv::{KvStore, MemoryKv};
pub use models::*;
pub use repository::{AgentRecord, GatewayRepository, SkillVerdict};
