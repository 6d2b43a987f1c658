//! Outer adapters that feed the application layer.

pub mod csv;
