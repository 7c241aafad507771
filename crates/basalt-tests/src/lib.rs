//! # basalt-tests
//!
//! Integration tests for the basalt p2p node.
//!
//! This crate provides end-to-end testing across the workspace:
//! - Two real nodes talking over loopback sockets
//! - A scripted raw peer for wire-level protocol assertions

pub mod harness;


#[cfg(test)]
mod wire_tests;

pub use harness::*;
