//! Process wiring for the `homeflow` binary.

pub mod app;
pub mod patterns;
