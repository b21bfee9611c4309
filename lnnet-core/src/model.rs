use core::fmt;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use bitcoin::secp256k1::PublicKey;
use serde::{Deserialize, Serialize};

/// Stable node number, 1-based.  Displays as the node's directory name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("node-")
            .unwrap_or(s)
            .parse()
            .map(NodeId)
            .map_err(|_| format!("not a node id: {:?}", s))
    }
}

/// Where a node can be reached
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeEndpoint {
    /// The node's lightning directory
    pub lightning_dir: PathBuf,
    /// Its RPC socket
    pub rpc_socket: PathBuf,
    /// Peer-to-peer listening host
    pub p2p_host: String,
    /// Peer-to-peer listening port
    pub p2p_port: u16,
}

/// How far a node's on-chain funding has progressed.  Only ever advances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingState {
    Unfunded,
    FundingSent,
    Confirmed,
}

impl Display for FundingState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FundingState::Unfunded => "unfunded",
            FundingState::FundingSent => "funding-sent",
            FundingState::Confirmed => "confirmed",
        })
    }
}

/// A logical participant in the network
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub endpoint: NodeEndpoint,
    identity_key: Option<PublicKey>,
    funding_state: FundingState,
}

impl Node {
    pub fn new(id: NodeId, endpoint: NodeEndpoint) -> Self {
        Node { id, endpoint, identity_key: None, funding_state: FundingState::Unfunded }
    }

    /// The node identity, once the service has reported it
    pub fn identity_key(&self) -> Option<&PublicKey> {
        self.identity_key.as_ref()
    }

    pub fn funding_state(&self) -> FundingState {
        self.funding_state
    }

    /// Record the identity.  Once set it cannot change, a different key is
    /// returned as the error.
    pub(crate) fn set_identity(&mut self, key: PublicKey) -> Result<(), PublicKey> {
        match self.identity_key {
            Some(existing) if existing != key => Err(existing),
            _ => {
                self.identity_key = Some(key);
                Ok(())
            }
        }
    }

    /// Move the funding state forward.  Returns false and leaves the state
    /// alone if `to` is not ahead of the current state.
    pub(crate) fn advance_funding(&mut self, to: FundingState) -> bool {
        if to > self.funding_state {
            self.funding_state = to;
            true
        } else {
            false
        }
    }
}

/// The shared blockchain backend, as last observed
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChainBackend {
    /// RPC endpoint, without credentials
    pub endpoint: String,
    pub wallet_name: String,
    pub wallet_loaded: bool,
    height: u64,
}

impl ChainBackend {
    pub fn new(endpoint: String, wallet_name: String) -> Self {
        ChainBackend { endpoint, wallet_name, wallet_loaded: false, height: 0 }
    }

    /// Highest chain height observed during this run
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Record an observed height.  Returns false if it is below what was
    /// already seen, in which case the recorded height is kept.
    pub(crate) fn observe_height(&mut self, height: u64) -> bool {
        if height < self.height {
            return false;
        }
        self.height = height;
        true
    }
}

/// An undirected intent edge between two distinct nodes.  `a` is the side
/// that connects and opens the channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct PeerLink {
    pub a: NodeId,
    pub b: NodeId,
}

impl PeerLink {
    /// None for a self-loop
    pub fn new(a: NodeId, b: NodeId) -> Option<Self> {
        if a == b {
            None
        } else {
            Some(PeerLink { a, b })
        }
    }

    /// The unordered pair, for duplicate detection
    pub fn key(&self) -> (NodeId, NodeId) {
        if self.a < self.b {
            (self.a, self.b)
        } else {
            (self.b, self.a)
        }
    }

    pub fn involves(&self, id: NodeId) -> bool {
        self.a == id || self.b == id
    }
}

impl Display for PeerLink {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.a, self.b)
    }
}

/// Per-link bring-up state.  Forward-only, `ChannelNormal` and `Failed` are
/// terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Init,
    Connecting,
    Connected,
    ChannelRequested,
    ChannelPendingConfirm,
    ChannelNormal,
    Failed,
}

impl LinkState {
    fn rank(self) -> u8 {
        match self {
            LinkState::Init => 0,
            LinkState::Connecting => 1,
            LinkState::Connected => 2,
            LinkState::ChannelRequested => 3,
            LinkState::ChannelPendingConfirm => 4,
            LinkState::ChannelNormal => 5,
            LinkState::Failed => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LinkState::ChannelNormal | LinkState::Failed)
    }

    /// Whether moving from `self` to `next` keeps the machine going forward
    pub fn can_advance_to(self, next: LinkState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl Display for LinkState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkState::Init => "init",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::ChannelRequested => "channel-requested",
            LinkState::ChannelPendingConfirm => "channel-pending-confirm",
            LinkState::ChannelNormal => "channel-normal",
            LinkState::Failed => "failed",
        })
    }
}

/// The funded counterpart of a link, from the opener's point of view
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub link: PeerLink,
    pub capacity_sat: u64,
    pub state: LinkState,
    pub confirmations: u64,
    /// The daemon's own state tag, as last observed
    pub remote_state: Option<String>,
    pub short_channel_id: Option<String>,
    pub funding_txid: Option<String>,
    /// Whether this run opened the channel, as opposed to finding it
    pub opened_now: bool,
}

impl Channel {
    /// Confirmations of a channel funded at `funding_height`, seen at `tip`
    pub fn confirmations_at(funding_height: Option<u64>, tip: u64) -> u64 {
        match funding_height {
            Some(h) if tip >= h => tip - h + 1,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};

    fn key(b: u8) -> PublicKey {
        PublicKey::from_secret_key(&Secp256k1::new(), &SecretKey::from_slice(&[b; 32]).unwrap())
    }

    fn node() -> Node {
        Node::new(
            NodeId(1),
            NodeEndpoint {
                lightning_dir: PathBuf::from("/rt/lightning/node-1"),
                rpc_socket: PathBuf::from("/rt/lightning/node-1/regtest/lightning-rpc"),
                p2p_host: "127.0.0.1".to_string(),
                p2p_port: 9736,
            },
        )
    }

    #[test]
    fn node_id_test() {
        assert_eq!(NodeId(3).to_string(), "node-3");
        assert_eq!("node-12".parse::<NodeId>(), Ok(NodeId(12)));
        assert_eq!("7".parse::<NodeId>(), Ok(NodeId(7)));
        assert!("node-x".parse::<NodeId>().is_err());
        let mut ids = vec![NodeId(10), NodeId(2), NodeId(1)];
        ids.sort();
        assert_eq!(ids, vec![NodeId(1), NodeId(2), NodeId(10)]);
    }

    #[test]
    fn identity_is_immutable_test() {
        let mut node = node();
        assert!(node.identity_key().is_none());
        node.set_identity(key(1)).unwrap();
        node.set_identity(key(1)).unwrap();
        assert_eq!(node.set_identity(key(2)), Err(key(1)));
        assert_eq!(node.identity_key(), Some(&key(1)));
    }

    #[test]
    fn funding_never_regresses_test() {
        let mut node = node();
        assert!(node.advance_funding(FundingState::FundingSent));
        assert!(!node.advance_funding(FundingState::Unfunded));
        assert!(!node.advance_funding(FundingState::FundingSent));
        assert!(node.advance_funding(FundingState::Confirmed));
        assert!(!node.advance_funding(FundingState::FundingSent));
        assert_eq!(node.funding_state(), FundingState::Confirmed);
    }

    #[test]
    fn backend_height_test() {
        let mut backend = ChainBackend::new("http://127.0.0.1:18443/".into(), "lnnet".into());
        assert!(backend.observe_height(150));
        assert!(!backend.observe_height(149));
        assert_eq!(backend.height(), 150);
    }

    #[test]
    fn link_test() {
        assert!(PeerLink::new(NodeId(1), NodeId(1)).is_none());
        let l = PeerLink::new(NodeId(3), NodeId(1)).unwrap();
        assert_eq!(l.key(), (NodeId(1), NodeId(3)));
        assert_eq!(l.to_string(), "node-3->node-1");
        assert!(l.involves(NodeId(1)) && !l.involves(NodeId(2)));
    }

    #[test]
    fn link_state_order_test() {
        use LinkState::*;
        assert!(Init.can_advance_to(Connecting));
        assert!(Init.can_advance_to(Connected));
        assert!(Connected.can_advance_to(ChannelPendingConfirm));
        assert!(Connecting.can_advance_to(Failed));
        assert!(!Connected.can_advance_to(Connecting));
        assert!(!Failed.can_advance_to(ChannelNormal));
        assert!(!ChannelNormal.can_advance_to(Failed));
    }

    #[test]
    fn confirmations_test() {
        assert_eq!(Channel::confirmations_at(Some(157), 162), 6);
        assert_eq!(Channel::confirmations_at(Some(157), 157), 1);
        assert_eq!(Channel::confirmations_at(Some(170), 162), 0);
        assert_eq!(Channel::confirmations_at(None, 162), 0);
    }
}
