use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cln_client::{NodeService, Peer, PeerChannel};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

use crate::backend::ChainBackendController;
use crate::error::{Error, Subject};
use crate::model::{Channel, LinkState, NodeId, PeerLink};
use crate::node::NodeController;
use crate::poller::wait_until;
use crate::policy::Policy;
use crate::topology::Topology;

/// What a link machine needs to know about one of its ends
#[derive(Clone)]
pub struct LinkPeer {
    pub id: NodeId,
    pub identity: String,
    pub host: String,
    pub port: u16,
    pub service: Arc<dyn NodeService>,
}

impl LinkPeer {
    /// None until the controller has learned the node identity
    pub fn from_controller(c: &NodeController) -> Option<Self> {
        let identity = c.node().identity_key()?.to_string();
        let (host, port) = c.p2p_address();
        Some(LinkPeer { id: c.id(), identity, host, port, service: Arc::clone(c.service()) })
    }
}

/// The bring-up state machine of one link
pub struct LinkMachine {
    pub link: PeerLink,
    index: usize,
    state: LinkState,
    history: Vec<LinkState>,
    channel: Option<Channel>,
    connected_now: bool,
    error: Option<Error>,
}

impl LinkMachine {
    fn new(index: usize, link: PeerLink) -> Self {
        LinkMachine {
            link,
            index,
            state: LinkState::Init,
            history: vec![LinkState::Init],
            channel: None,
            connected_now: false,
            error: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Every state this machine has been in, in order
    pub fn history(&self) -> &[LinkState] {
        &self.history
    }

    pub fn channel(&self) -> Option<&Channel> {
        self.channel.as_ref()
    }

    fn advance(&mut self, next: LinkState) -> bool {
        if !self.state.can_advance_to(next) {
            warn!("{}: refusing {} -> {}", self.link, self.state, next);
            return false;
        }
        debug!("{}: {} -> {}", self.link, self.state, next);
        self.state = next;
        self.history.push(next);
        if let Some(c) = self.channel.as_mut() {
            c.state = next;
        }
        true
    }

    fn fail(&mut self, err: Error) {
        warn!("{} failed in {}: {}", self.link, self.state, err);
        self.advance(LinkState::Failed);
        self.error = Some(err);
    }

    fn outcome(&self) -> LinkOutcome {
        LinkOutcome {
            link: self.link,
            state: self.state,
            history: self.history.clone(),
            connected_now: self.connected_now,
            channel: self.channel.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LinkOutcome {
    pub link: PeerLink,
    pub state: LinkState,
    pub history: Vec<LinkState>,
    pub connected_now: bool,
    pub channel: Option<Channel>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChannelReport {
    pub links: Vec<LinkOutcome>,
    /// Blocks mined in the shared confirmation batch
    pub blocks_mined: u64,
}

impl ChannelReport {
    /// Channels opened by this run
    pub fn opened(&self) -> usize {
        self.links.iter().filter(|l| l.channel.as_ref().map_or(false, |c| c.opened_now)).count()
    }
}

fn is_connected(peers: &[Peer], identity: &str) -> bool {
    peers.iter().any(|p| p.id == identity && p.connected)
}

// a normal channel wins over one still opening
fn find_channel<'c>(channels: &'c [PeerChannel], identity: &str) -> Option<&'c PeerChannel> {
    let mut to_peer =
        channels.iter().filter(|c| c.peer_id == identity && c.state.is_open_or_opening());
    let first = to_peer.clone().next();
    to_peer.find(|c| c.state.is_normal()).or(first)
}

fn ends<'p>(
    peers: &'p BTreeMap<NodeId, LinkPeer>,
    link: PeerLink,
) -> Result<(&'p LinkPeer, &'p LinkPeer), Error> {
    let get = |id: NodeId| {
        peers.get(&id).ok_or_else(|| Error::Rpc {
            subject: Subject::Link(link),
            call: "getinfo",
            last: format!("identity of {} unknown", id),
        })
    };
    Ok((get(link.a)?, get(link.b)?))
}

/// Drives every link of a topology to a normal channel.
///
/// Links with the same opener run one after another, since they spend the
/// same wallet.  Opener groups run concurrently.  All links reach
/// `ChannelPendingConfirm` before the one shared confirmation batch is
/// mined.
pub struct ChannelOrchestrator<'a> {
    backend: &'a mut ChainBackendController,
    policy: &'a Policy,
    machines: Vec<LinkMachine>,
}

impl<'a> ChannelOrchestrator<'a> {
    pub fn new(backend: &'a mut ChainBackendController, policy: &'a Policy) -> Self {
        ChannelOrchestrator { backend, policy, machines: Vec::new() }
    }

    /// The link machines of the last run, in topology order
    pub fn machines(&self) -> &[LinkMachine] {
        &self.machines
    }

    #[instrument(skip_all, fields(links = topology.len()))]
    pub async fn run(
        &mut self,
        topology: &Topology,
        peers: &BTreeMap<NodeId, LinkPeer>,
    ) -> Result<ChannelReport, Error> {
        let policy = self.policy;
        let mut groups: BTreeMap<NodeId, Vec<LinkMachine>> = BTreeMap::new();
        for (index, link) in topology.links().iter().enumerate() {
            groups.entry(link.a).or_default().push(LinkMachine::new(index, *link));
        }

        let establishing = groups.into_values().map(move |mut group| async move {
            for m in group.iter_mut() {
                let span = info_span!("link", link = %m.link);
                if let Err(e) = establish(m, peers, policy).instrument(span).await {
                    m.fail(e);
                    break;
                }
            }
            group
        });
        let done: Vec<Vec<LinkMachine>> =
            stream::iter(establishing).buffer_unordered(policy.max_parallel_links).collect().await;
        self.machines = done.into_iter().flatten().collect();
        self.machines.sort_by_key(|m| m.index);
        self.first_failure()?;

        let mut report = ChannelReport::default();
        let unconfirmed = self
            .machines
            .iter()
            .filter(|m| {
                m.channel.as_ref().and_then(|c| c.remote_state.as_deref())
                    != Some(cln_client::CHANNELD_NORMAL)
            })
            .count();
        if unconfirmed > 0 {
            info!("{} channel(s) awaiting confirmation", unconfirmed);
            report.blocks_mined = self.backend.mine(policy.channel_confirmations).await?;
        }
        let tip = self.backend.height().await?;

        let confirming = self.machines.iter_mut().map(move |m| async move {
            let span = info_span!("link", link = %m.link);
            let result = match ends(peers, m.link) {
                Ok((a, b)) => confirm(m, a, b, policy, tip).instrument(span).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                m.fail(e);
            }
        });
        stream::iter(confirming)
            .buffer_unordered(policy.max_parallel_links)
            .collect::<Vec<()>>()
            .await;
        self.first_failure()?;

        report.links = self.machines.iter().map(LinkMachine::outcome).collect();
        info!("{} link(s) normal, {} channel(s) opened", report.links.len(), report.opened());
        Ok(report)
    }

    fn first_failure(&mut self) -> Result<(), Error> {
        match self.machines.iter_mut().find_map(|m| m.error.take()) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn establish(
    m: &mut LinkMachine,
    peers: &BTreeMap<NodeId, LinkPeer>,
    policy: &Policy,
) -> Result<(), Error> {
    let link = m.link;
    let subject = Subject::Link(link);
    let (a, b) = ends(peers, link)?;

    let listed = a.service.list_peers().await.map_err(|e| Error::rpc(subject, "listpeers", e))?;
    if is_connected(&listed, &b.identity) {
        debug!("{} already connected", link);
    } else {
        m.advance(LinkState::Connecting);
        m.connected_now = true;
        info!("{} connecting to {}@{}:{}", link, b.identity, b.host, b.port);
        let retry = &AtomicBool::new(false);
        if let Err(e) = a.service.connect(&b.identity, &b.host, b.port).await {
            warn!("{} connect: {}", link, e);
            retry.store(true, Ordering::Relaxed);
        }
        wait_until("peer connected", policy.peer_connect_poll(), move || async move {
            let listed = a.service.list_peers().await.map_err(|e| e.to_string())?;
            if is_connected(&listed, &b.identity) {
                return Ok(());
            }
            if retry.load(Ordering::Relaxed) {
                a.service
                    .connect(&b.identity, &b.host, b.port)
                    .await
                    .map_err(|e| format!("connect {}:{}: {}", b.host, b.port, e))?;
                retry.store(false, Ordering::Relaxed);
            }
            Err(format!(
                "{} not connected; listpeers: {}",
                b.id,
                serde_json::to_string(&listed).unwrap_or_default()
            ))
        })
        .await
        .map_err(|t| Error::PeerConnectTimeout {
            link,
            state: m.state(),
            call: "listpeers",
            elapsed: t.elapsed,
            last: t.last(),
        })?;
    }
    m.advance(LinkState::Connected);

    let channels = a
        .service
        .list_peer_channels()
        .await
        .map_err(|e| Error::rpc(subject, "listpeerchannels", e))?;
    if let Some(existing) = find_channel(&channels, &b.identity) {
        info!("{} already has a channel in {}", link, existing.state);
        m.channel = Some(Channel {
            link,
            capacity_sat: existing.total_msat.to_sat(),
            state: m.state(),
            confirmations: 0,
            remote_state: Some(existing.state.to_string()),
            short_channel_id: existing.short_channel_id.clone(),
            funding_txid: None,
            opened_now: false,
        });
        m.advance(LinkState::ChannelPendingConfirm);
        return Ok(());
    }

    m.advance(LinkState::ChannelRequested);
    let capacity = policy.channel_capacity_sat;
    info!("{} opening a {} sat channel", link, capacity);
    let funded = a
        .service
        .open_channel(&b.identity, capacity, policy.channel_open_minconf)
        .await
        .map_err(|e| Error::ChannelOpenRejected {
            link,
            state: m.state(),
            call: "fundchannel",
            last: e.to_string(),
        })?;
    info!("{} funding tx {}", link, funded.txid);
    m.channel = Some(Channel {
        link,
        capacity_sat: capacity,
        state: m.state(),
        confirmations: 0,
        remote_state: None,
        short_channel_id: None,
        funding_txid: Some(funded.txid),
        opened_now: true,
    });
    m.advance(LinkState::ChannelPendingConfirm);
    Ok(())
}

async fn confirm(
    m: &mut LinkMachine,
    a: &LinkPeer,
    b: &LinkPeer,
    policy: &Policy,
    tip: u64,
) -> Result<(), Error> {
    let observed = wait_until("channel normal", policy.channel_confirm_poll(), move || async move {
        let channels = a.service.list_peer_channels().await.map_err(|e| e.to_string())?;
        match find_channel(&channels, &b.identity) {
            Some(c) if c.state.is_normal() => Ok(c.clone()),
            Some(c) => Err(format!(
                "channel with {} in {}; listpeerchannels: {}",
                b.id,
                c.state,
                serde_json::to_string(c).unwrap_or_default()
            )),
            None => Err(format!("no channel with {}", b.id)),
        }
    })
    .await
    .map_err(|t| Error::ChannelConfirmTimeout {
        link: m.link,
        state: m.state(),
        call: "listpeerchannels",
        elapsed: t.elapsed,
        last: t.last(),
    })?;

    if let Some(c) = m.channel.as_mut() {
        c.remote_state = Some(observed.state.to_string());
        c.short_channel_id = observed.short_channel_id.clone();
        c.confirmations = Channel::confirmations_at(observed.funding_height(), tip);
    }
    m.advance(LinkState::ChannelNormal);
    info!("{} normal, scid {:?}", m.link, observed.short_channel_id);
    Ok(())
}
