//! Smart-city device gateway library
//!
//! Exposes modules for integration testing and binary reuse.

pub mod device;
pub mod domain;
pub mod error;
pub mod infra;
pub mod io;
pub mod services;
