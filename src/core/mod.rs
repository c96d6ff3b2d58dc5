//! Core primitives shared by every hovel subsystem.
//!
//! Errors, configuration, timestamps, the Environment Store, port allocation and
//! the external tool seam live here. Nothing in `core` shells out on its own
//! except through [`runner::CommandRunner`].

pub mod advisory;
pub mod config;
pub mod error;
pub mod output;
pub mod ports;
pub mod runner;
pub mod store;
pub mod time;
pub mod tree;
