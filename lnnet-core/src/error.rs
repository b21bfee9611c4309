use core::fmt;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::model::{LinkState, NodeId, PeerLink};
use crate::verify::Violation;

/// Process exit codes, one per failure class
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const USAGE: i32 = 2;
    pub const BACKEND_UNAVAILABLE: i32 = 10;
    pub const WALLET: i32 = 11;
    pub const NODE_NOT_READY: i32 = 20;
    pub const INVALID_IDENTITY: i32 = 21;
    pub const FUNDING_NOT_CONFIRMED: i32 = 22;
    pub const PEER_CONNECT_TIMEOUT: i32 = 30;
    pub const CHANNEL_OPEN_REJECTED: i32 = 31;
    pub const CHANNEL_CONFIRM_TIMEOUT: i32 = 32;
    pub const VERIFICATION_FAILED: i32 = 40;
    pub const RPC: i32 = 50;
    pub const CANCELLED: i32 = 130;
}

/// The barrier stages of a bring-up run, in order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    BackendReady,
    NodesReady,
    Funded,
    TopologyComputed,
    ChannelsNormal,
    Verified,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::BackendReady => "backend-ready",
            Stage::NodesReady => "nodes-ready",
            Stage::Funded => "funded",
            Stage::TopologyComputed => "topology-computed",
            Stage::ChannelsNormal => "channels-normal",
            Stage::Verified => "verified",
        })
    }
}

/// What a failed call was about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Backend,
    Node(NodeId),
    Link(PeerLink),
}

impl Display for Subject {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Backend => f.write_str("backend"),
            Subject::Node(id) => write!(f, "{}", id),
            Subject::Link(link) => write!(f, "{}", link),
        }
    }
}

/// Bring-up failures.  `last` is always the last raw response or error seen
/// from the external service.
#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "backend unavailable: {call} failing after {attempts} attempts in {elapsed:?}, last: {last}"
    )]
    BackendUnavailable { call: &'static str, attempts: u32, elapsed: Duration, last: String },
    #[error("wallet {wallet}: {call} failed: {last}")]
    WalletError { wallet: String, call: &'static str, last: String },
    #[error("{node} not ready: {call} after {attempts} attempts in {elapsed:?}, last: {last}")]
    NodeNotReady {
        node: NodeId,
        call: &'static str,
        attempts: u32,
        elapsed: Duration,
        last: String,
    },
    #[error("{node} reported an invalid identity via {call}: {raw:?}")]
    InvalidIdentity { node: NodeId, call: &'static str, raw: String },
    #[error("{node} funding not confirmed: {call} after {elapsed:?}, last: {last}")]
    FundingNotConfirmed { node: NodeId, call: &'static str, elapsed: Duration, last: String },
    #[error(
        "{link} peer connect timed out in state {state} after {elapsed:?} ({call}), last: {last}"
    )]
    PeerConnectTimeout {
        link: PeerLink,
        state: LinkState,
        call: &'static str,
        elapsed: Duration,
        last: String,
    },
    #[error("{link} channel open rejected in state {state} ({call}): {last}")]
    ChannelOpenRejected { link: PeerLink, state: LinkState, call: &'static str, last: String },
    #[error("{link} channel not normal in state {state} after {elapsed:?} ({call}), last: {last}")]
    ChannelConfirmTimeout {
        link: PeerLink,
        state: LinkState,
        call: &'static str,
        elapsed: Duration,
        last: String,
    },
    #[error("verification failed with {} violation(s): {}", .0.len(), list(.0))]
    VerificationFailed(Vec<Violation>),
    #[error("{subject}: {call} failed: {last}")]
    Rpc { subject: Subject, call: &'static str, last: String },
    #[error("cancelled before stage {stage}")]
    Cancelled { stage: Stage },
}

fn list(violations: &[Violation]) -> String {
    violations.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("; ")
}

impl Error {
    /// The process exit code for this failure class
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::BackendUnavailable { .. } => exit_code::BACKEND_UNAVAILABLE,
            Error::WalletError { .. } => exit_code::WALLET,
            Error::NodeNotReady { .. } => exit_code::NODE_NOT_READY,
            Error::InvalidIdentity { .. } => exit_code::INVALID_IDENTITY,
            Error::FundingNotConfirmed { .. } => exit_code::FUNDING_NOT_CONFIRMED,
            Error::PeerConnectTimeout { .. } => exit_code::PEER_CONNECT_TIMEOUT,
            Error::ChannelOpenRejected { .. } => exit_code::CHANNEL_OPEN_REJECTED,
            Error::ChannelConfirmTimeout { .. } => exit_code::CHANNEL_CONFIRM_TIMEOUT,
            Error::VerificationFailed(_) => exit_code::VERIFICATION_FAILED,
            Error::Rpc { .. } => exit_code::RPC,
            Error::Cancelled { .. } => exit_code::CANCELLED,
        }
    }

    /// Shorthand for mapping a failed client call
    pub(crate) fn rpc(subject: Subject, call: &'static str, e: impl Display) -> Error {
        Error::Rpc { subject, call, last: e.to_string() }
    }
}

/// A failure, tagged with the barrier stage it happened in
#[derive(Debug, Error)]
#[error("stage {stage} failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl StageError {
    pub fn exit_code(&self) -> i32 {
        self.source.exit_code()
    }
}

pub(crate) trait StageContext<T> {
    fn in_stage(self, stage: Stage) -> Result<T, StageError>;
}

impl<T> StageContext<T> for Result<T, Error> {
    fn in_stage(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|source| StageError { stage, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_test() {
        let link = PeerLink::new(NodeId(1), NodeId(2)).unwrap();
        let d = Duration::from_secs(1);
        let errors = vec![
            Error::BackendUnavailable {
                call: "getblockchaininfo",
                attempts: 1,
                elapsed: d,
                last: "".into(),
            },
            Error::WalletError { wallet: "w".into(), call: "createwallet", last: "".into() },
            Error::NodeNotReady {
                node: NodeId(1),
                call: "getinfo",
                attempts: 1,
                elapsed: d,
                last: "".into(),
            },
            Error::InvalidIdentity { node: NodeId(1), call: "getinfo", raw: "".into() },
            Error::FundingNotConfirmed {
                node: NodeId(1),
                call: "listfunds",
                elapsed: d,
                last: "".into(),
            },
            Error::PeerConnectTimeout {
                link,
                state: LinkState::Connecting,
                call: "listpeers",
                elapsed: d,
                last: "".into(),
            },
            Error::ChannelOpenRejected {
                link,
                state: LinkState::ChannelRequested,
                call: "fundchannel",
                last: "".into(),
            },
            Error::ChannelConfirmTimeout {
                link,
                state: LinkState::ChannelPendingConfirm,
                call: "listpeerchannels",
                elapsed: d,
                last: "".into(),
            },
            Error::VerificationFailed(vec![]),
            Error::Rpc { subject: Subject::Backend, call: "getblockcount", last: "".into() },
            Error::Cancelled { stage: Stage::Funded },
        ];
        let mut codes: Vec<i32> = errors.iter().map(Error::exit_code).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&exit_code::SUCCESS) && !codes.contains(&exit_code::USAGE));
    }

    #[test]
    fn stage_error_display_test() {
        let err = Error::Rpc {
            subject: Subject::Node(NodeId(2)),
            call: "newaddr",
            last: "rpc error -1: boom".into(),
        };
        let err: Result<(), _> = Err(err);
        let staged = err.in_stage(Stage::Funded).unwrap_err();
        assert_eq!(
            staged.to_string(),
            "stage funded failed: node-2: newaddr failed: rpc error -1: boom"
        );
        assert_eq!(staged.exit_code(), exit_code::RPC);
        assert!(Stage::BackendReady < Stage::Verified);
    }
}
