//! Built-in connectors

pub mod gmail;
