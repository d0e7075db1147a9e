//! Domain Layer
//!
//! Session affinity types, the store port and the mapping manager.
//! Nothing here depends on a concrete store.

pub mod entities;
pub mod ports;
pub mod services;
pub mod value_objects;
