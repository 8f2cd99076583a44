//! The `bottler` command line.
//!
//! - `bottler bottle <descriptor.toml>...` bottles installed packages and
//!   prints their bottle blocks
//! - `bottler bottle --merge [--write] <bottle.json>...` combines bottle JSON
//!   from several machines and optionally patches the definitions
//! - `bottler upload <bottle.json>...` publishes bottles as OCI images
//!
//! Results go to stdout, logs to stderr.

pub mod cli;
pub mod commands;
pub mod tracing;
