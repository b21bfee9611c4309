//! A read-only snapshot of the backend and every node, for `--health`.

use std::path::PathBuf;

use bitcoind_client::{BackendService, BlockchainInfo};
use cln_client::{Balances, GetInfo};
use futures::future::join_all;
use serde::{Serialize, Serializer};

use crate::config::NetworkConfig;
use crate::model::NodeId;
use crate::node::NodeController;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Backend and every node respond
    Ok,
    /// Backend responds, not every node does
    Degraded,
    /// Backend does not respond
    Down,
}

#[derive(Clone, Debug, Serialize)]
pub struct BackendHealth {
    pub ok: bool,
    pub endpoint: String,
    pub info: Option<BlockchainInfo>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct NodeHealth {
    /// Reported as the directory name, `node-N`
    #[serde(serialize_with = "display_name")]
    pub name: NodeId,
    pub lightning_dir: PathBuf,
    pub ok: bool,
    pub getinfo: Option<GetInfo>,
    pub peers_total: Option<usize>,
    pub peers_connected: Option<usize>,
    pub funds: Option<Balances>,
    pub error: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub bitcoin_ok: bool,
    pub nodes_total: usize,
    pub nodes_ok: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct NetworkHealth {
    pub status: HealthStatus,
    pub network: String,
    pub lightning_base: PathBuf,
    pub bitcoin: BackendHealth,
    pub nodes: Vec<NodeHealth>,
    pub summary: HealthSummary,
    pub warnings: Vec<String>,
}

fn display_name<S: Serializer>(id: &NodeId, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(id)
}

/// Overall status and warnings from the counts alone
pub fn classify(summary: &HealthSummary) -> (HealthStatus, Vec<String>) {
    let HealthSummary { bitcoin_ok, nodes_total, nodes_ok } = *summary;
    if !bitcoin_ok {
        return (
            HealthStatus::Down,
            vec!["backend not responding to getblockchaininfo".to_string()],
        );
    }
    if nodes_total == 0 {
        return (HealthStatus::Degraded, vec!["no node directories found".to_string()]);
    }
    if nodes_ok < nodes_total {
        return (
            HealthStatus::Degraded,
            vec![format!(
                "{} of {} nodes not responding to getinfo",
                nodes_total - nodes_ok,
                nodes_total
            )],
        );
    }
    (HealthStatus::Ok, Vec::new())
}

async fn node_health(node: &NodeController) -> NodeHealth {
    let mut health = NodeHealth {
        name: node.id(),
        lightning_dir: node.node().endpoint.lightning_dir.clone(),
        ok: false,
        getinfo: None,
        peers_total: None,
        peers_connected: None,
        funds: None,
        error: None,
    };
    match node.service().status().await {
        Ok(info) => {
            health.ok = true;
            health.getinfo = Some(info);
        }
        Err(e) => {
            health.error = Some(e.to_string());
            return health;
        }
    }
    if let Ok(peers) = node.peers().await {
        health.peers_total = Some(peers.len());
        health.peers_connected = Some(peers.iter().filter(|p| p.connected).count());
    }
    health.funds = node.balances().await.ok();
    health
}

/// Probe the backend and every node once
pub async fn network_health(
    config: &NetworkConfig,
    backend: &dyn BackendService,
    nodes: &[NodeController],
) -> NetworkHealth {
    let (chain, node_health) =
        futures::join!(backend.status(), join_all(nodes.iter().map(node_health)));
    let bitcoin = match chain {
        Ok(info) => BackendHealth {
            ok: true,
            endpoint: config.backend_endpoint.clone(),
            info: Some(info),
            error: None,
        },
        Err(e) => BackendHealth {
            ok: false,
            endpoint: config.backend_endpoint.clone(),
            info: None,
            error: Some(e.to_string()),
        },
    };
    let summary = HealthSummary {
        bitcoin_ok: bitcoin.ok,
        nodes_total: node_health.len(),
        nodes_ok: node_health.iter().filter(|n| n.ok).count(),
    };
    let (status, warnings) = classify(&summary);
    NetworkHealth {
        status,
        network: config.network.clone(),
        lightning_base: config.lightning_base.clone(),
        bitcoin,
        nodes: node_health,
        summary,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::SimNet;
    use crate::topology::TopologyPolicy;

    fn summary(bitcoin_ok: bool, nodes_total: usize, nodes_ok: usize) -> HealthSummary {
        HealthSummary { bitcoin_ok, nodes_total, nodes_ok }
    }

    #[test]
    fn classify_test() {
        assert_eq!(classify(&summary(true, 3, 3)), (HealthStatus::Ok, vec![]));
        assert_eq!(classify(&summary(true, 3, 1)).0, HealthStatus::Degraded);
        assert_eq!(classify(&summary(true, 3, 0)).0, HealthStatus::Degraded);
        assert_eq!(classify(&summary(true, 0, 0)).1, vec!["no node directories found".to_string()]);
        assert_eq!(classify(&summary(false, 3, 3)).0, HealthStatus::Down);
    }

    #[tokio::test]
    async fn health_report_test() {
        let net = SimNet::new(2);
        net.state().nodes[1].down = true;
        let config = net.config(TopologyPolicy::Linear);
        let nodes: Vec<NodeController> = config
            .roster()
            .into_iter()
            .map(|n| {
                let id = n.id;
                NodeController::new(n, net.node(id))
            })
            .collect();
        let health = network_health(&config, net.backend().as_ref(), &nodes).await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.summary, summary(true, 2, 1));
        assert!(health.nodes[0].ok && health.nodes[0].funds.is_some());
        assert!(health.nodes[1].error.as_deref().unwrap().contains("No such file"));

        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["summary"]["nodes_ok"], 1);
        assert_eq!(json["nodes"][0]["name"], "node-1");
        assert_eq!(json["nodes"][1]["name"], "node-2");
        assert!(net.mutations().is_empty());
    }
}
