use std::str::FromStr;
use std::sync::Arc;

use bitcoin::secp256k1::PublicKey;
use bitcoind_client::{BackendService, BlockchainInfo};
use cln_client::{Balances, GetInfo, NodeService, Peer, PeerChannel};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::error::{Error, Subject};
use crate::model::{FundingState, Node, NodeId};
use crate::poller::{wait_until, PollSpec};

/// Which of the two sync conditions a node met
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPath {
    /// No sync warnings
    NoWarnings,
    /// Same height as a backend that is not in initial block download
    HeightMatch,
}

/// Decide whether a node is synchronized with the backend.  The error is a
/// description of why not.
pub fn sync_verdict(info: &GetInfo, backend: &BlockchainInfo) -> Result<SyncPath, String> {
    if info.fully_synced() {
        return Ok(SyncPath::NoWarnings);
    }
    if info.blockheight == backend.blocks && !backend.initial_block_download {
        return Ok(SyncPath::HeightMatch);
    }
    Err(format!(
        "node height {} vs backend {} (ibd {}), warnings: {}",
        info.blockheight,
        backend.blocks,
        backend.initial_block_download,
        [&info.warning_bitcoind_sync, &info.warning_lightningd_sync]
            .iter()
            .filter_map(|w| w.as_deref())
            .collect::<Vec<_>>()
            .join("; ")
    ))
}

/// Parse a reported identity.  Empty and malformed identities are errors.
pub fn parse_identity(raw: &str) -> Option<PublicKey> {
    if raw.is_empty() {
        return None;
    }
    PublicKey::from_str(raw).ok()
}

/// Owns one node's state and talks to its daemon
pub struct NodeController {
    node: Node,
    service: Arc<dyn NodeService>,
    advertised: Option<(String, u16)>,
}

impl NodeController {
    pub fn new(node: Node, service: Arc<dyn NodeService>) -> Self {
        NodeController { node, service, advertised: None }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn id(&self) -> NodeId {
        self.node.id
    }

    pub fn service(&self) -> &Arc<dyn NodeService> {
        &self.service
    }

    fn subject(&self) -> Subject {
        Subject::Node(self.node.id)
    }

    /// Poll until the node reports being in sync with the backend, then
    /// record its identity from the same answer.
    #[instrument(skip_all, fields(node = %self.node.id))]
    pub async fn wait_ready(
        &mut self,
        backend: &dyn BackendService,
        spec: PollSpec,
    ) -> Result<GetInfo, Error> {
        let service = &self.service;
        let (info, path) = wait_until("node sync", spec, move || async move {
            let info = service.status().await.map_err(|e| e.to_string())?;
            let chain = backend.status().await.map_err(|e| format!("backend: {}", e))?;
            match sync_verdict(&info, &chain) {
                Ok(path) => Ok((info, path)),
                Err(why) => Err(format!(
                    "{}; getinfo: {}",
                    why,
                    serde_json::to_string(&info).unwrap_or_default()
                )),
            }
        })
        .await
        .map_err(|t| Error::NodeNotReady {
            node: self.node.id,
            call: "getinfo",
            attempts: t.attempts,
            elapsed: t.elapsed,
            last: t.last(),
        })?;
        self.accept_identity(&info)?;
        self.advertised = info.tcp_binding();
        info!("{} ready at height {} ({:?})", self.node.id, info.blockheight, path);
        Ok(info)
    }

    /// The node's identity, fetched once and then served from the cache
    pub async fn identity(&mut self) -> Result<PublicKey, Error> {
        if let Some(key) = self.node.identity_key() {
            return Ok(*key);
        }
        let info =
            self.service.status().await.map_err(|e| Error::rpc(self.subject(), "getinfo", e))?;
        self.accept_identity(&info)
    }

    fn accept_identity(&mut self, info: &GetInfo) -> Result<PublicKey, Error> {
        let node = self.node.id;
        let invalid = move |raw: String| Error::InvalidIdentity { node, call: "getinfo", raw };
        let key = parse_identity(&info.id).ok_or_else(|| invalid(info.id.clone()))?;
        self.node
            .set_identity(key)
            .map_err(|old| invalid(format!("changed from {} to {}", old, key)))?;
        debug!("{} identity {}", self.node.id, key);
        Ok(key)
    }

    /// Where peers should connect: the address the node advertised, else the
    /// configured one
    pub fn p2p_address(&self) -> (String, u16) {
        self.advertised
            .clone()
            .unwrap_or_else(|| (self.node.endpoint.p2p_host.clone(), self.node.endpoint.p2p_port))
    }

    pub async fn balances(&self) -> Result<Balances, Error> {
        let funds = self
            .service
            .list_funds()
            .await
            .map_err(|e| Error::rpc(self.subject(), "listfunds", e))?;
        Ok(funds.balances())
    }

    pub async fn peers(&self) -> Result<Vec<Peer>, Error> {
        self.service.list_peers().await.map_err(|e| Error::rpc(self.subject(), "listpeers", e))
    }

    pub async fn channels(&self) -> Result<Vec<PeerChannel>, Error> {
        self.service
            .list_peer_channels()
            .await
            .map_err(|e| Error::rpc(self.subject(), "listpeerchannels", e))
    }

    pub async fn new_address(&self) -> Result<String, Error> {
        self.service.new_address().await.map_err(|e| Error::rpc(self.subject(), "newaddr", e))
    }

    pub(crate) fn advance_funding(&mut self, to: FundingState) {
        let from = self.node.funding_state();
        if self.node.advance_funding(to) {
            info!("{} funding {} -> {}", self.node.id, from, to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::config;
    use crate::policy::Policy;
    use crate::test_utils::{sim_identity, SimNet};
    use crate::topology::TopologyPolicy;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::Instant;

    fn controller(net: &SimNet, id: NodeId) -> NodeController {
        let node = config(2, TopologyPolicy::Linear).roster().remove(id.0 as usize - 1);
        NodeController::new(node, net.node(id))
    }

    fn chain(blocks: u64, ibd: bool) -> BlockchainInfo {
        serde_json::from_value(json!({
            "chain": "regtest",
            "blocks": blocks,
            "bestblockhash": "00",
            "initialblockdownload": ibd
        }))
        .unwrap()
    }

    fn getinfo(height: u64, warning: bool) -> GetInfo {
        let mut v = json!({ "id": sim_identity(NodeId(1)), "blockheight": height });
        if warning {
            v["warning_lightningd_sync"] = json!("Still loading latest blocks from bitcoind.");
        }
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn sync_verdict_test() {
        assert_eq!(sync_verdict(&getinfo(10, false), &chain(12, true)), Ok(SyncPath::NoWarnings));
        assert_eq!(sync_verdict(&getinfo(12, true), &chain(12, false)), Ok(SyncPath::HeightMatch));
        let why = sync_verdict(&getinfo(12, true), &chain(12, true)).unwrap_err();
        assert!(why.contains("ibd true"));
        assert!(sync_verdict(&getinfo(11, true), &chain(12, false)).is_err());
    }

    #[test]
    fn parse_identity_test() {
        assert!(parse_identity(&sim_identity(NodeId(1))).is_some());
        assert!(parse_identity("").is_none());
        assert!(parse_identity("02aa").is_none());
        assert!(parse_identity(&"zz".repeat(33)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_ready_test() {
        let net = SimNet::new(2);
        net.state().height = 150;
        net.state().nodes[0].sync_warning_for = 3;
        let mut c = controller(&net, NodeId(1));
        let backend = net.backend();
        let start = Instant::now();
        let poll = Policy::default().node_ready_poll();
        let info = c.wait_ready(backend.as_ref(), poll).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(info.blockheight, 150);
        assert_eq!(c.node().identity_key().unwrap().to_string(), sim_identity(NodeId(1)));
        assert_eq!(c.p2p_address(), ("127.0.0.1".to_string(), 9736));
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_test() {
        let net = SimNet::new(2);
        net.state().nodes[1].sync_warning_for = u32::MAX;
        let mut c = controller(&net, NodeId(2));
        let backend = net.backend();
        let spec = Policy::default().node_ready_poll();
        let start = Instant::now();
        let err = c.wait_ready(backend.as_ref(), spec).await.unwrap_err();
        assert!(start.elapsed() <= spec.timeout + spec.interval);
        match err {
            Error::NodeNotReady { node, call, last, .. } => {
                assert_eq!(node, NodeId(2));
                assert_eq!(call, "getinfo");
                assert!(last.contains("Still loading"));
            }
            e => panic!("unexpected {:?}", e),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn down_node_test() {
        let net = SimNet::new(2);
        net.state().nodes[0].down = true;
        let mut c = controller(&net, NodeId(1));
        let backend = net.backend();
        let spec = PollSpec::new(Duration::from_secs(1), Duration::from_secs(5));
        match c.wait_ready(backend.as_ref(), spec).await.unwrap_err() {
            Error::NodeNotReady { last, attempts, .. } => {
                assert!(last.contains("No such file"));
                assert_eq!(attempts, 6);
            }
            e => panic!("unexpected {:?}", e),
        }
    }

    #[tokio::test]
    async fn invalid_identity_test() {
        let net = SimNet::new(2);
        net.state().nodes[0].identity_override = Some(String::new());
        let mut c = controller(&net, NodeId(1));
        let backend = net.backend();
        let spec = Policy::default().node_ready_poll();
        match c.wait_ready(backend.as_ref(), spec).await.unwrap_err() {
            Error::InvalidIdentity { node, raw, .. } => {
                assert_eq!(node, NodeId(1));
                assert_eq!(raw, "");
            }
            e => panic!("unexpected {:?}", e),
        }
        assert!(c.node().identity_key().is_none());

        net.state().nodes[0].identity_override = Some("not-a-key".into());
        assert!(matches!(c.identity().await, Err(Error::InvalidIdentity { .. })));
    }

    #[tokio::test]
    async fn identity_cached_test() {
        let net = SimNet::new(2);
        let mut c = controller(&net, NodeId(2));
        let key = c.identity().await.unwrap();
        net.state().nodes[1].identity_override = Some(sim_identity(NodeId(1)));
        assert_eq!(c.identity().await.unwrap(), key);
    }
}
