//! Configuration models for admission budgets and credential lifetimes.

pub mod gateway;

pub use gateway::{
    GatewayConfig, DEFAULT_CONNECTION_CAPACITY, DEFAULT_SLOT_CAPACITY, DEFAULT_TOKEN_TTL_SECS,
};
