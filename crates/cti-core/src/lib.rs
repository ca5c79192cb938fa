//! CTI Bridge Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! shared by the switch client, the tunnel, the call state services and the
//! HTTP layer. It includes:
//!
//! - Domain models (CallSession, ParkOrbit, ConferenceEvent)
//! - The storage collaborator trait used to persist call transitions
//! - Unified error handling with HTTP response mapping
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
