//! rollcall-engine — Runs recognition requests for the attendance handlers.
//!
//! A dedicated thread owns the identity store; async callers talk to it
//! through a cloneable [`EngineHandle`].

pub mod config;
pub mod encoder_client;
pub mod engine;

pub use config::{Config, ConfigError};
pub use encoder_client::{HttpEncoder, ImageCheck};
pub use engine::{
    encoder_for, spawn_engine, spawn_engine_with_store, EngineError, EngineHandle, EngineStatus,
};
