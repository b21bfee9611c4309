use core::fmt;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};

use bitcoind_client::BackendService;
use cln_client::{GetInfo, PaymentStatus, Peer, PeerChannel};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::Error;
use crate::model::{NodeId, PeerLink};
use crate::node::{sync_verdict, NodeController};
use crate::poller::wait_until;
use crate::policy::Policy;
use crate::topology::Topology;

/// One thing found wrong with the network
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    BackendUnreachable { last: String },
    NodeUnreachable { node: NodeId, call: &'static str, last: String },
    NodeNotSynced { node: NodeId, reason: String },
    IdentityChanged { node: NodeId, expected: String, observed: String },
    PeerNotConnected { link: PeerLink },
    ChannelMissing { link: PeerLink },
    ChannelNotNormal { link: PeerLink, state: String },
    ProbeFailed { from: NodeId, to: NodeId, call: &'static str, last: String },
}

impl Display for Violation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Violation::BackendUnreachable { last } => write!(f, "backend unreachable: {}", last),
            Violation::NodeUnreachable { node, call, last } =>
                write!(f, "{} unreachable ({}): {}", node, call, last),
            Violation::NodeNotSynced { node, reason } =>
                write!(f, "{} not synced: {}", node, reason),
            Violation::IdentityChanged { node, expected, observed } =>
                write!(f, "{} identity changed from {} to {:?}", node, expected, observed),
            Violation::PeerNotConnected { link } => write!(f, "{} peers not connected", link),
            Violation::ChannelMissing { link } => write!(f, "{} has no channel", link),
            Violation::ChannelNotNormal { link, state } =>
                write!(f, "{} channel in {}", link, state),
            Violation::ProbeFailed { from, to, call, last } =>
                write!(f, "probe payment {} -> {} failed ({}): {}", from, to, call, last),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    pub from: NodeId,
    pub to: NodeId,
    pub amount_msat: u64,
    pub payment_hash: String,
    pub status: PaymentStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub nodes_checked: usize,
    pub links_checked: usize,
    pub violations: Vec<Violation>,
    pub probe: Option<ProbeOutcome>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// The report, or every violation as one error
    pub fn into_result(self) -> Result<Self, Error> {
        if self.is_clean() {
            Ok(self)
        } else {
            Err(Error::VerificationFailed(self.violations))
        }
    }
}

struct OpenerView {
    peers: Result<Vec<Peer>, String>,
    channels: Result<Vec<PeerChannel>, String>,
}

/// Re-checks a brought-up network without changing it, apart from the
/// optional probe payment
pub struct NetworkVerifier<'a> {
    backend: &'a dyn BackendService,
    nodes: &'a [NodeController],
    policy: &'a Policy,
}

impl<'a> NetworkVerifier<'a> {
    pub fn new(
        backend: &'a dyn BackendService,
        nodes: &'a [NodeController],
        policy: &'a Policy,
    ) -> Self {
        NetworkVerifier { backend, nodes, policy }
    }

    #[instrument(skip_all)]
    pub async fn verify(&self, topology: &Topology) -> VerificationReport {
        let mut report = VerificationReport {
            nodes_checked: self.nodes.len(),
            links_checked: topology.len(),
            ..Default::default()
        };
        let violations = &mut report.violations;

        let chain = match self.backend.status().await {
            Ok(chain) => Some(chain),
            Err(e) => {
                violations.push(Violation::BackendUnreachable { last: e.to_string() });
                None
            }
        };

        let infos = join_all(self.nodes.iter().map(|n| n.service().status())).await;
        let mut identities: BTreeMap<NodeId, String> = BTreeMap::new();
        for (node, info) in self.nodes.iter().zip(infos) {
            match info {
                Ok(info) => {
                    self.check_node(node, &info, chain.as_ref(), violations);
                    identities.insert(node.id(), info.id);
                }
                Err(e) => violations.push(Violation::NodeUnreachable {
                    node: node.id(),
                    call: "getinfo",
                    last: e.to_string(),
                }),
            }
        }
        // prefer what the node said at bring-up
        for node in self.nodes {
            if let Some(key) = node.node().identity_key() {
                identities.insert(node.id(), key.to_string());
            }
        }

        let openers: Vec<&NodeController> = self
            .nodes
            .iter()
            .filter(|n| topology.links().iter().any(|l| l.a == n.id()))
            .collect();
        let views = join_all(openers.iter().map(|n| async move {
            let (peers, channels) = futures::join!(n.peers(), n.channels());
            (
                n.id(),
                OpenerView {
                    peers: peers.map_err(|e| e.to_string()),
                    channels: channels.map_err(|e| e.to_string()),
                },
            )
        }))
        .await
        .into_iter()
        .collect::<BTreeMap<_, _>>();

        for view in views.iter() {
            if let (id, OpenerView { peers: Err(e), .. }) = view {
                violations.push(Violation::NodeUnreachable {
                    node: *id,
                    call: "listpeers",
                    last: e.clone(),
                });
            }
        }
        for link in topology.links() {
            let (Some(view), Some(identity)) = (views.get(&link.a), identities.get(&link.b)) else {
                debug!("{}: skipped, an end is unknown", link);
                continue;
            };
            if let Ok(peers) = &view.peers {
                if !peers.iter().any(|p| &p.id == identity && p.connected) {
                    violations.push(Violation::PeerNotConnected { link: *link });
                }
            }
            match &view.channels {
                Ok(channels) => {
                    let to_peer: Vec<&PeerChannel> =
                        channels.iter().filter(|c| &c.peer_id == identity).collect();
                    if to_peer.iter().any(|c| c.state.is_normal()) {
                        continue;
                    }
                    let opening = to_peer.iter().find(|c| c.state.is_open_or_opening());
                    match opening.or(to_peer.first()) {
                        Some(c) => violations.push(Violation::ChannelNotNormal {
                            link: *link,
                            state: c.state.to_string(),
                        }),
                        None => violations.push(Violation::ChannelMissing { link: *link }),
                    }
                }
                Err(e) => violations.push(Violation::NodeUnreachable {
                    node: link.a,
                    call: "listpeerchannels",
                    last: e.clone(),
                }),
            }
        }

        if self.policy.probe_payment {
            match (self.nodes.first(), self.nodes.last()) {
                (Some(from), Some(to)) if from.id() != to.id() => {
                    if report.violations.is_empty() {
                        match self.probe(from, to).await {
                            Ok(outcome) => report.probe = Some(outcome),
                            Err(v) => report.violations.push(v),
                        }
                    } else {
                        warn!("probe payment skipped, the network has violations");
                    }
                }
                _ => debug!("probe payment needs two nodes"),
            }
        }

        if report.is_clean() {
            info!(
                "network verified: {} nodes, {} links",
                report.nodes_checked, report.links_checked
            );
        } else {
            for v in report.violations.iter() {
                warn!("violation: {}", v);
            }
        }
        report
    }

    fn check_node(
        &self,
        node: &NodeController,
        info: &GetInfo,
        chain: Option<&bitcoind_client::BlockchainInfo>,
        violations: &mut Vec<Violation>,
    ) {
        if let Some(chain) = chain {
            if let Err(reason) = sync_verdict(info, chain) {
                violations.push(Violation::NodeNotSynced { node: node.id(), reason });
            }
        }
        if let Some(key) = node.node().identity_key() {
            if key.to_string() != info.id {
                violations.push(Violation::IdentityChanged {
                    node: node.id(),
                    expected: key.to_string(),
                    observed: info.id.clone(),
                });
            }
        }
    }

    /// Pay the smallest amount from `from` to `to` and wait for completion
    #[instrument(skip_all, fields(from = %from.id(), to = %to.id()))]
    async fn probe(
        &self,
        from: &NodeController,
        to: &NodeController,
    ) -> Result<ProbeOutcome, Violation> {
        let failed = |call: &'static str, last: String| Violation::ProbeFailed {
            from: from.id(),
            to: to.id(),
            call,
            last,
        };
        let amount_msat = self.policy.probe_amount_msat;
        let stamp = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
        let label = format!("lnnet-probe-{}-{}", from.id(), stamp);
        let invoice = to
            .service()
            .create_invoice(amount_msat, &label, "lnnet probe")
            .await
            .map_err(|e| failed("invoice", e.to_string()))?;
        info!("probe paying {} msat from {} to {}", amount_msat, from.id(), to.id());

        let outcome = |payment_hash: String| ProbeOutcome {
            from: from.id(),
            to: to.id(),
            amount_msat,
            payment_hash,
            status: PaymentStatus::Complete,
        };
        let bolt11 = invoice.bolt11.as_str();
        let payer = from.service();
        // pay exactly once, then only ask how it went
        match payer.pay(bolt11).await {
            Ok(payment) => match payment.status {
                PaymentStatus::Complete => return Ok(outcome(payment.payment_hash)),
                PaymentStatus::Failed =>
                    return Err(failed("pay", format!("payment {} failed", payment.payment_hash))),
                PaymentStatus::Pending => info!("payment {} pending", payment.payment_hash),
            },
            Err(e @ cln_client::Error::Timeout(_)) => warn!("pay: {}, checking listpays", e),
            Err(e) => return Err(failed("pay", e.to_string())),
        }

        let hash = invoice.payment_hash.as_str();
        let settled = wait_until("probe payment", self.policy.probe_poll(), move || async move {
            let pays = payer.list_pays(bolt11).await.map_err(|e| e.to_string())?;
            match pays.iter().find(|p| p.status == PaymentStatus::Complete) {
                Some(p) => Ok(p.payment_hash.clone()),
                None => Err(match pays.last() {
                    Some(p) => format!("payment {} {:?}", hash, p.status),
                    None => format!("no payment of {} recorded", hash),
                }),
            }
        })
        .await
        .map_err(|t| failed("listpays", t.last()))?;
        Ok(outcome(settled))
    }
}
