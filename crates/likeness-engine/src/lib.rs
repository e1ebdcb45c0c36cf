//! likeness-engine — Enrollment and authentication over a reference store.
//!
//! All image and storage work runs on one dedicated thread; callers talk to
//! it through an async [`EngineHandle`].

pub mod config;
pub mod engine;

pub use config::{Config, ConfigError};
pub use engine::{
    spawn_engine, AuthOutcome, EngineError, EngineHandle, EngineStatus, EnrollReceipt,
};
