use std::io;
use std::path::{Path, PathBuf};

use crate::model::{Node, NodeEndpoint, NodeId};
use crate::policy::Policy;
use crate::topology::TopologyPolicy;

/// Everything a run needs to know about its environment.  Built once and
/// shared read-only by every component.
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkConfig {
    /// Chain name, also the per-node RPC subdirectory
    pub network: String,
    /// Backend RPC endpoint, without credentials
    pub backend_endpoint: String,
    pub wallet_name: String,
    /// Parent of the `node-<i>` directories
    pub lightning_base: PathBuf,
    pub node_host: String,
    /// Node `i` listens on `node_base_port + i`
    pub node_base_port: u16,
    pub node_count: u32,
    pub topology: TopologyPolicy,
    pub policy: Policy,
}

impl NetworkConfig {
    /// The roster ids, `node-1` to `node-<count>`
    pub fn node_ids(&self) -> Vec<NodeId> {
        (1..=self.node_count).map(NodeId).collect()
    }

    /// Directory, socket and default listening address of a node
    pub fn node_endpoint(&self, id: NodeId) -> NodeEndpoint {
        let lightning_dir = self.lightning_base.join(id.to_string());
        let rpc_socket = lightning_dir.join(&self.network).join("lightning-rpc");
        let port = u32::from(self.node_base_port) + id.0;
        NodeEndpoint {
            lightning_dir,
            rpc_socket,
            p2p_host: self.node_host.clone(),
            p2p_port: u16::try_from(port).unwrap_or(u16::MAX),
        }
    }

    pub fn roster(&self) -> Vec<Node> {
        self.node_ids().into_iter().map(|id| Node::new(id, self.node_endpoint(id))).collect()
    }

    /// Reject values that cannot describe a network
    pub fn validate(&self) -> Result<(), String> {
        if self.node_count == 0 {
            return Err("node count must be at least 1".to_string());
        }
        if u32::from(self.node_base_port) + self.node_count > u32::from(u16::MAX) {
            return Err(format!(
                "node port {} is out of range",
                u32::from(self.node_base_port) + self.node_count
            ));
        }
        if self.wallet_name.is_empty() {
            return Err("wallet name must not be empty".to_string());
        }
        self.policy.validate()
    }
}

/// The `node-<i>` directories under `base`, in id order.  A missing base is
/// an empty roster.
pub fn discover_nodes(base: &Path) -> io::Result<Vec<NodeId>> {
    let entries = match std::fs::read_dir(base) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let id = name.to_str().and_then(|n| n.strip_prefix("node-")).and_then(|n| n.parse().ok());
        if let Some(id) = id {
            ids.push(NodeId(id));
        }
    }
    ids.sort();
    Ok(ids)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn config(n: u32, topology: TopologyPolicy) -> NetworkConfig {
        NetworkConfig {
            network: "regtest".to_string(),
            backend_endpoint: "http://127.0.0.1:18443/".to_string(),
            wallet_name: "lnnet".to_string(),
            lightning_base: PathBuf::from("/rt/lightning"),
            node_host: "127.0.0.1".to_string(),
            node_base_port: 9735,
            node_count: n,
            topology,
            policy: Policy::default(),
        }
    }

    #[test]
    fn endpoint_test() {
        let c = config(3, TopologyPolicy::Linear);
        let e = c.node_endpoint(NodeId(2));
        assert_eq!(e.lightning_dir, Path::new("/rt/lightning/node-2"));
        assert_eq!(e.rpc_socket, Path::new("/rt/lightning/node-2/regtest/lightning-rpc"));
        assert_eq!(e.p2p_port, 9737);
        assert_eq!(c.node_ids(), vec![NodeId(1), NodeId(2), NodeId(3)]);
        assert_eq!(c.roster().len(), 3);
    }

    #[test]
    fn validate_test() {
        assert!(config(0, TopologyPolicy::Linear).validate().is_err());
        let mut c = config(2, TopologyPolicy::Linear);
        c.node_base_port = 65534;
        assert!(c.validate().is_err());
        config(2, TopologyPolicy::Mesh).validate().unwrap();
    }

    #[test]
    fn discover_nodes_test() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["node-10", "node-2", "node-x", "bitcoin"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("node-3"), b"").unwrap();
        assert_eq!(discover_nodes(dir.path()).unwrap(), vec![NodeId(2), NodeId(10)]);
        assert!(discover_nodes(&dir.path().join("missing")).unwrap().is_empty());
    }
}
