//! sandbox-supervisor — core library
//!
//! Boots a fresh user-mode VM per submitted archive, enforces a wall-clock
//! timeout via a three-process supervision model, classifies the result,
//! and notifies a caller-supplied URL.
pub mod archive;
pub mod config;
pub mod gate;
pub mod notifier;
pub mod paths;
pub mod process;
pub mod runner;
pub mod schema;
pub mod server;
