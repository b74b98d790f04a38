//! Straylight — transparent HTTP request interception.
//!
//! Wrap a transport once, then observe and reshape every request through
//! hook channels: rewrite URLs, transform response bodies, react to errors,
//! and record exchanges, all without touching call sites. A startup
//! coordinator runs one-time setup before the first request and a scheduler
//! drives recurring background loops.
//!
//! See `DESIGN.md` for full architecture documentation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod types;

pub mod hooks;
pub mod startup;
pub mod store;
pub mod transport;

pub mod pipeline;
pub mod presets;
pub mod scheduler;

pub mod interceptor;
