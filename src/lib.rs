//! Tracky Library
//!
//! Unit-of-work persistence for a music and book library. This library
//! exposes modules for the binary and for integration testing.

pub mod config;
pub mod db;
pub mod error;
pub mod session;
pub mod test_utils;
pub mod uow;
