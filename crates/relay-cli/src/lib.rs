//! Relay CLI library surface, shared by the `relay` binary and its tests.

pub mod commands;
