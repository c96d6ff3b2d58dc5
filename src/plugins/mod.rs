//! Branch environment subsystems built on the core primitives.

pub mod branch;
pub mod container;
pub mod credential;
pub mod descriptor;
pub mod git;
pub mod lifecycle;
pub mod tasks;
