//! The bring-up run: every stage in order, each one a barrier for the next.

use std::collections::BTreeMap;
use std::sync::Arc;

use bitcoind_client::BackendService;
use cln_client::NodeService;
use futures::future::try_join_all;
use serde::Serialize;
use tracing::{info, info_span, Instrument};

use crate::backend::{ChainBackendController, WalletAction};
use crate::channel::{ChannelOrchestrator, ChannelReport, LinkPeer};
use crate::config::NetworkConfig;
use crate::error::{Error, Stage, StageContext, StageError, Subject};
use crate::funding::{FundingCoordinator, FundingReport};
use crate::health::{network_health, NetworkHealth};
use crate::model::{FundingState, Node, NodeId};
use crate::node::NodeController;
use crate::topology::Topology;
use crate::verify::{NetworkVerifier, VerificationReport};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeSummary {
    pub id: NodeId,
    pub identity: Option<String>,
    pub funding_state: FundingState,
    pub p2p_host: String,
    pub p2p_port: u16,
}

/// What a successful run did and found
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub network: String,
    pub wallet: WalletAction,
    /// Height when the backend first answered
    pub start_height: u64,
    /// Blocks mined to reach the minimum height
    pub height_blocks_mined: u64,
    pub funding: FundingReport,
    pub topology: Topology,
    pub channels: ChannelReport,
    pub verification: VerificationReport,
    pub nodes: Vec<NodeSummary>,
    pub final_height: u64,
}

/// Owns the controllers of one run.  Stages are run strictly in order and
/// cancellation is checked before each of them.
pub struct Orchestrator {
    config: NetworkConfig,
    backend: ChainBackendController,
    nodes: Vec<NodeController>,
    cancel: Option<triggered::Listener>,
}

impl Orchestrator {
    /// An orchestrator over the configured roster.  `connect` builds the
    /// service handle of each node.
    pub fn new<C>(config: NetworkConfig, backend: Arc<dyn BackendService>, connect: C) -> Self
    where
        C: Fn(&Node) -> Arc<dyn NodeService>,
    {
        let ids = config.node_ids();
        Self::for_nodes(config, backend, &ids, connect)
    }

    /// An orchestrator over an explicit set of node ids
    pub fn for_nodes<C>(
        config: NetworkConfig,
        backend: Arc<dyn BackendService>,
        ids: &[NodeId],
        connect: C,
    ) -> Self
    where
        C: Fn(&Node) -> Arc<dyn NodeService>,
    {
        let backend = ChainBackendController::new(
            backend,
            config.backend_endpoint.clone(),
            config.wallet_name.clone(),
            &config.policy,
        );
        let nodes = ids
            .iter()
            .map(|id| {
                let node = Node::new(*id, config.node_endpoint(*id));
                let service = connect(&node);
                NodeController::new(node, service)
            })
            .collect();
        Orchestrator { config, backend, nodes, cancel: None }
    }

    /// Stop before the next stage once `listener` is triggered
    pub fn with_cancellation(mut self, listener: triggered::Listener) -> Self {
        self.cancel = Some(listener);
        self
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn nodes(&self) -> &[NodeController] {
        &self.nodes
    }

    pub fn backend(&self) -> &ChainBackendController {
        &self.backend
    }

    fn checkpoint(&self, stage: Stage) -> Result<(), StageError> {
        match &self.cancel {
            Some(listener) if listener.is_triggered() => {
                info!("cancelled before {}", stage);
                Err(StageError { stage, source: Error::Cancelled { stage } })
            }
            _ => Ok(()),
        }
    }

    /// Bring the whole network up, or stop at the first failed stage
    pub async fn run(&mut self) -> Result<RunReport, StageError> {
        self.checkpoint(Stage::BackendReady)?;
        let (start_height, wallet, height_blocks_mined) = self
            .backend_ready()
            .instrument(info_span!("stage", stage = %Stage::BackendReady))
            .await?;

        self.checkpoint(Stage::NodesReady)?;
        self.nodes_ready().instrument(info_span!("stage", stage = %Stage::NodesReady)).await?;

        self.checkpoint(Stage::Funded)?;
        let funding = FundingCoordinator::new(&mut self.backend, &self.config.policy)
            .fund_all(&mut self.nodes)
            .instrument(info_span!("stage", stage = %Stage::Funded))
            .await
            .in_stage(Stage::Funded)?;

        self.checkpoint(Stage::TopologyComputed)?;
        let topology = self.topology();
        info!("{} topology: {} link(s)", topology.policy, topology.len());

        self.checkpoint(Stage::ChannelsNormal)?;
        let peers = self.link_peers().in_stage(Stage::ChannelsNormal)?;
        let channels = ChannelOrchestrator::new(&mut self.backend, &self.config.policy)
            .run(&topology, &peers)
            .instrument(info_span!("stage", stage = %Stage::ChannelsNormal))
            .await
            .in_stage(Stage::ChannelsNormal)?;

        self.checkpoint(Stage::Verified)?;
        let verification = self
            .verifier()
            .verify(&topology)
            .instrument(info_span!("stage", stage = %Stage::Verified))
            .await
            .into_result()
            .in_stage(Stage::Verified)?;

        let final_height = self.backend.height().await.in_stage(Stage::Verified)?;
        info!("network of {} node(s) up at height {}", self.nodes.len(), final_height);
        Ok(RunReport {
            network: self.config.network.clone(),
            wallet,
            start_height,
            height_blocks_mined,
            funding,
            topology,
            channels,
            verification,
            nodes: self.summaries(),
            final_height,
        })
    }

    /// Check an already brought-up network without changing it, after the
    /// backend and node readiness gates
    pub async fn verify_only(&mut self) -> Result<VerificationReport, StageError> {
        self.checkpoint(Stage::BackendReady)?;
        self.backend.ensure_reachable().await.in_stage(Stage::BackendReady)?;
        self.checkpoint(Stage::NodesReady)?;
        self.nodes_ready().await?;
        self.checkpoint(Stage::Verified)?;
        let topology = self.topology();
        self.verifier().verify(&topology).await.into_result().in_stage(Stage::Verified)
    }

    /// One read-only look at the backend and every node
    pub async fn health(&self) -> NetworkHealth {
        network_health(&self.config, self.backend.service().as_ref(), &self.nodes).await
    }

    async fn backend_ready(&mut self) -> Result<(u64, WalletAction, u64), StageError> {
        let stage = Stage::BackendReady;
        let info = self.backend.ensure_reachable().await.in_stage(stage)?;
        let wallet = self.backend.ensure_wallet(&self.config.wallet_name).await.in_stage(stage)?;
        let min_height = self.config.policy.min_chain_height;
        let mined = self.backend.ensure_min_height(min_height).await.in_stage(stage)?;
        Ok((info.blocks, wallet, mined))
    }

    async fn nodes_ready(&mut self) -> Result<(), StageError> {
        let spec = self.config.policy.node_ready_poll();
        let backend = self.backend.service().as_ref();
        try_join_all(self.nodes.iter_mut().map(|n| n.wait_ready(backend, spec)))
            .await
            .in_stage(Stage::NodesReady)?;
        info!("{} node(s) ready", self.nodes.len());
        Ok(())
    }

    fn topology(&self) -> Topology {
        let ids: Vec<NodeId> = self.nodes.iter().map(NodeController::id).collect();
        Topology::build(&ids, self.config.topology)
    }

    fn link_peers(&self) -> Result<BTreeMap<NodeId, LinkPeer>, Error> {
        self.nodes
            .iter()
            .map(|n| {
                let peer = LinkPeer::from_controller(n).ok_or_else(|| Error::Rpc {
                    subject: Subject::Node(n.id()),
                    call: "getinfo",
                    last: "identity not known".to_string(),
                })?;
                Ok((n.id(), peer))
            })
            .collect()
    }

    fn verifier(&self) -> NetworkVerifier<'_> {
        NetworkVerifier::new(self.backend.service().as_ref(), &self.nodes, &self.config.policy)
    }

    fn summaries(&self) -> Vec<NodeSummary> {
        self.nodes
            .iter()
            .map(|n| {
                let (p2p_host, p2p_port) = n.p2p_address();
                NodeSummary {
                    id: n.id(),
                    identity: n.node().identity_key().map(|k| k.to_string()),
                    funding_state: n.node().funding_state(),
                    p2p_host,
                    p2p_port,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::exit_code;
    use crate::test_utils::SimNet;
    use crate::topology::TopologyPolicy;

    #[test_log::test(tokio::test(start_paused = true))]
    async fn run_report_test() {
        let net = SimNet::new(3);
        let mut orchestrator = net.orchestrator(TopologyPolicy::Star);
        let report = orchestrator.run().await.unwrap();
        assert_eq!(report.wallet, WalletAction::Created);
        assert_eq!(report.start_height, 0);
        assert_eq!(report.height_blocks_mined, 150);
        assert_eq!(report.funding.deposits.len(), 3);
        assert_eq!(report.channels.opened(), 2);
        assert_eq!(report.final_height, 162);
        assert!(report.nodes.iter().all(|n| n.funding_state == FundingState::Confirmed));
        assert!(report.verification.is_clean());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["wallet"], "created");
        assert_eq!(json["topology"]["policy"], "star");
        assert_eq!(json["nodes"][2]["p2p_port"], 9738);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_test() {
        let net = SimNet::new(2);
        let (trigger, listener) = triggered::trigger();
        trigger.trigger();
        let mut orchestrator = net.orchestrator(TopologyPolicy::Linear).with_cancellation(listener);
        let err = orchestrator.run().await.unwrap_err();
        assert_eq!(err.stage, Stage::BackendReady);
        assert_eq!(err.exit_code(), exit_code::CANCELLED);
        assert!(net.mutations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn verify_only_test() {
        let net = SimNet::new(2);
        net.orchestrator(TopologyPolicy::Linear).run().await.unwrap();
        let before = net.mutations().len();

        let report = net.orchestrator(TopologyPolicy::Linear).verify_only().await.unwrap();
        assert_eq!(report.links_checked, 1);
        assert_eq!(net.mutations().len(), before);

        // two node ring is the same single link
        net.orchestrator(TopologyPolicy::Ring).verify_only().await.unwrap();

        // a three node ring needs the wrap-around link nobody opened
        let net = SimNet::new(3);
        net.orchestrator(TopologyPolicy::Linear).run().await.unwrap();
        let err = net.orchestrator(TopologyPolicy::Ring).verify_only().await.unwrap_err();
        assert_eq!(err.stage, Stage::Verified);
        assert_eq!(err.exit_code(), exit_code::VERIFICATION_FAILED);
    }
}
