//! Evidence Intake Library
//!
//! Chunked upload engine with integrity verification and chain-of-custody
//! sidecars. The server binary is in main.rs; modules are exposed here for
//! integration tests.
//!
//! # Modules
//!
//! - `upload`: session registry, chunk writer, finalize pipeline
//! - `routes`: HTTP surface over the upload engine
//! - `config`: environment-driven configuration

pub mod config;
pub mod routes;
pub mod state;
pub mod upload;
