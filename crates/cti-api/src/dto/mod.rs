//! Data Transfer Objects (DTOs) for the API layer

pub mod call;
pub mod common;

pub use call::*;
pub use common::*;
