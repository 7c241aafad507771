//! # basalt-node
//!
//! The node coordinator: wires the framed transport to per-peer sessions,
//! feeds chain events into the caches, and fans broadcasts out to every
//! session. The binary in `main.rs` layers configuration and logging on top.

pub mod config;
pub mod node;

pub use config::NodeConfig;
pub use node::{Node, NodeCommand, NodeHandle, NodeStatus, SessionStatus};
