mod dashmap_store;
mod redis_store;

pub use dashmap_store::DashMapStore;
pub use redis_store::{RedisConfig, RedisStore};
