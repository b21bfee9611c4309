//! Deterministic bring-up of a regtest payment-channel network.
//!
//! A run takes one blockchain backend and N channel daemons from whatever
//! state they are in to a funded network whose channels match a topology
//! policy.  See [`pipeline::Orchestrator`] for the entry point.

#![forbid(unsafe_code)]

/// Wallet, mining and reachability of the shared backend
pub mod backend;
/// Per-link state machines and the channel stage
pub mod channel;
/// Run configuration
pub mod config;
/// Error taxonomy and exit codes
pub mod error;
/// Node funding
pub mod funding;
/// Read-only health snapshot
pub mod health;
/// Domain types
pub mod model;
/// Readiness and identity of one node
pub mod node;
/// The staged bring-up run
pub mod pipeline;
/// Timeouts, intervals and amounts
pub mod policy;
/// Bounded readiness polling
pub mod poller;
/// Topology policies
pub mod topology;
/// Post bring-up verification
pub mod verify;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use config::NetworkConfig;
pub use error::{exit_code, Error, Stage, StageError};
pub use pipeline::{Orchestrator, RunReport};
pub use policy::{Policy, PolicyOverrides};
pub use topology::{Topology, TopologyPolicy};

pub use bitcoind_client;
pub use cln_client;
