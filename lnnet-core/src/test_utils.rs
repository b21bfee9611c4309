//! A simulated regtest network: one backend and N channel daemons sharing a
//! chain, with a log of every mutating call.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoind_client::{BackendService, BlockchainInfo, WalletState};
use cln_client::{
    Binding, ChannelState, FundChannel, FundChannelEntry, FundOutput, GetInfo, Invoice, ListFunds,
    Msat, NodeService, OutputStatus, PayAttempt, Payment, PaymentStatus, Peer, PeerChannel,
};

use crate::config::NetworkConfig;
use crate::model::NodeId;
use crate::pipeline::Orchestrator;
use crate::policy::Policy;
use crate::topology::TopologyPolicy;

/// Fee taken from every simulated channel funding transaction
pub const SIM_FUNDING_FEE_SAT: u64 = 200;

/// The identity of simulated node `id`
pub fn sim_identity(id: NodeId) -> String {
    let secret = SecretKey::from_slice(&[id.0 as u8; 32]).expect("valid secret");
    PublicKey::from_secret_key(&Secp256k1::new(), &secret).to_string()
}

#[derive(Clone, Debug)]
pub struct SimOutput {
    pub txid: String,
    pub amount_sat: u64,
    pub confirmed_at: Option<u64>,
    pub spent: bool,
}

#[derive(Clone, Debug)]
pub struct SimInvoice {
    pub label: String,
    pub bolt11: String,
    pub payment_hash: String,
    pub amount_msat: u64,
    pub paid: bool,
}

/// A payment made by a node, as `listpays` reports it
#[derive(Clone, Debug)]
pub struct SimPay {
    pub bolt11: String,
    pub payment_hash: String,
    pub amount_msat: u64,
    /// `listpays` reports it pending this many more times
    pub pending_for: u32,
}

#[derive(Clone, Debug)]
pub struct SimNodeState {
    pub identity: String,
    pub port: u16,
    pub outputs: Vec<SimOutput>,
    pub connected: BTreeSet<String>,
    /// getinfo reports a sync warning this many more times
    pub sync_warning_for: u32,
    /// the RPC socket is gone
    pub down: bool,
    /// nobody can connect to this node
    pub unreachable: bool,
    /// channel opens from this node are refused by the peer
    pub reject_opens: bool,
    /// getinfo returns this instead of the real identity
    pub identity_override: Option<String>,
    pub invoices: Vec<SimInvoice>,
    pub pays: Vec<SimPay>,
    /// payments from this node stay pending for this many `listpays` calls
    pub pay_pending_for: u32,
    /// `pay` goes through but the call itself times out
    pub pay_times_out: bool,
}

#[derive(Clone, Debug)]
pub struct SimChannel {
    pub opener: usize,
    pub peer: usize,
    pub capacity_sat: u64,
    pub txid: String,
    pub funding_height: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Owner {
    Wallet,
    Node(usize),
}

#[derive(Debug)]
pub struct SimState {
    pub height: u64,
    pub initial_block_download: bool,
    /// the backend status probe fails this many more times
    pub backend_down_for: u32,
    /// every backend call fails
    pub backend_down: bool,
    /// wallet name to loaded flag
    pub wallets: BTreeMap<String, bool>,
    pub nodes: Vec<SimNodeState>,
    pub channels: Vec<SimChannel>,
    /// confirmations a channel needs before it is normal
    pub min_depth: u64,
    /// channels never lock in
    pub stall_lockin: bool,
    /// generatetoaddress mines at most this many blocks per call
    pub mine_cap: Option<u64>,
    /// mutating calls, in the order they were made
    pub mutations: Vec<String>,
    seq: u64,
    addresses: HashMap<String, Owner>,
}

impl SimState {
    fn next(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn node_by_identity(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.identity == id)
    }

    fn channel_state(&self, c: &SimChannel) -> ChannelState {
        match c.funding_height {
            Some(h) if !self.stall_lockin && self.height + 1 >= h + self.min_depth =>
                ChannelState::ChanneldNormal,
            _ => ChannelState::ChanneldAwaitingLockin,
        }
    }

    fn channels_of(&self, index: usize) -> impl Iterator<Item = (&SimChannel, usize)> {
        self.channels.iter().filter_map(move |c| {
            if c.opener == index {
                Some((c, c.peer))
            } else if c.peer == index {
                Some((c, c.opener))
            } else {
                None
            }
        })
    }

    // any path over normal channels, liquidity is not modelled
    fn has_route(&self, from: usize, to: usize) -> bool {
        let mut seen = BTreeSet::from([from]);
        let mut queue = VecDeque::from([from]);
        while let Some(at) = queue.pop_front() {
            if at == to {
                return true;
            }
            for (c, other) in self.channels_of(at) {
                if self.channel_state(c).is_normal() && seen.insert(other) {
                    queue.push_back(other);
                }
            }
        }
        false
    }

    fn log(&mut self, entry: String) {
        self.mutations.push(entry);
    }
}

/// Shared handle on the simulated network
#[derive(Clone)]
pub struct SimNet {
    state: Arc<Mutex<SimState>>,
}

impl SimNet {
    /// A network of `n` fresh nodes and an empty chain without wallets
    pub fn new(n: u32) -> Self {
        let nodes = (1..=n)
            .map(|i| SimNodeState {
                identity: sim_identity(NodeId(i)),
                port: 9735 + i as u16,
                outputs: Vec::new(),
                connected: BTreeSet::new(),
                sync_warning_for: 0,
                down: false,
                unreachable: false,
                reject_opens: false,
                identity_override: None,
                invoices: Vec::new(),
                pays: Vec::new(),
                pay_pending_for: 0,
                pay_times_out: false,
            })
            .collect();
        let state = SimState {
            height: 0,
            initial_block_download: false,
            backend_down_for: 0,
            backend_down: false,
            wallets: BTreeMap::new(),
            nodes,
            channels: Vec::new(),
            min_depth: 3,
            stall_lockin: false,
            mine_cap: None,
            mutations: Vec::new(),
            seq: 0,
            addresses: HashMap::new(),
        };
        SimNet { state: Arc::new(Mutex::new(state)) }
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    pub fn backend(&self) -> Arc<dyn BackendService> {
        Arc::new(SimBackend { net: self.clone() })
    }

    pub fn node(&self, id: NodeId) -> Arc<dyn NodeService> {
        Arc::new(SimNode { net: self.clone(), index: id.0 as usize - 1 })
    }

    pub fn mutations(&self) -> Vec<String> {
        self.state().mutations.clone()
    }

    /// Logged mutations starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.state().mutations.iter().filter(|m| m.starts_with(prefix)).count()
    }

    /// A configuration matching this network, with default policy
    pub fn config(&self, topology: TopologyPolicy) -> NetworkConfig {
        NetworkConfig {
            network: "regtest".to_string(),
            backend_endpoint: "http://127.0.0.1:18443/".to_string(),
            wallet_name: "lnnet".to_string(),
            lightning_base: "/sim/lightning".into(),
            node_host: "127.0.0.1".to_string(),
            node_base_port: 9735,
            node_count: self.state().nodes.len() as u32,
            topology,
            policy: Policy::default(),
        }
    }

    /// An orchestrator wired to this network, with default policy
    pub fn orchestrator(&self, topology: TopologyPolicy) -> Orchestrator {
        self.orchestrator_with(self.config(topology))
    }

    pub fn orchestrator_with(&self, config: NetworkConfig) -> Orchestrator {
        let net = self.clone();
        Orchestrator::new(config, self.backend(), move |node| net.node(node.id))
    }
}

fn transport_down() -> bitcoind_client::Error {
    bitcoind_client::Error::Transport("connection refused".to_string())
}

fn backend_rpc(code: i32, message: &str) -> bitcoind_client::Error {
    bitcoind_client::Error::Rpc { code, message: message.to_string() }
}

fn node_rpc(code: i32, message: &str) -> cln_client::Error {
    cln_client::Error::Rpc { code, message: message.to_string() }
}

pub struct SimBackend {
    net: SimNet,
}

impl SimBackend {
    fn up(&self) -> Result<MutexGuard<'_, SimState>, bitcoind_client::Error> {
        let s = self.net.state();
        if s.backend_down {
            return Err(transport_down());
        }
        Ok(s)
    }

    fn loaded(s: &SimState, wallet: &str) -> Result<(), bitcoind_client::Error> {
        match s.wallets.get(wallet) {
            Some(true) => Ok(()),
            _ => Err(backend_rpc(-18, "Requested wallet does not exist or is not loaded")),
        }
    }
}

#[async_trait]
impl BackendService for SimBackend {
    async fn status(&self) -> Result<BlockchainInfo, bitcoind_client::Error> {
        let mut s = self.up()?;
        if s.backend_down_for > 0 {
            s.backend_down_for -= 1;
            return Err(backend_rpc(-28, "Loading block index..."));
        }
        Ok(BlockchainInfo {
            chain: "regtest".to_string(),
            blocks: s.height,
            headers: s.height,
            best_block_hash: format!("{:064x}", s.height),
            initial_block_download: s.initial_block_download,
            verification_progress: 1.0,
        })
    }

    async fn wallet_state(&self, name: &str) -> Result<WalletState, bitcoind_client::Error> {
        let s = self.up()?;
        Ok(match s.wallets.get(name) {
            Some(true) => WalletState::Loaded,
            Some(false) => WalletState::Unloaded,
            None => WalletState::Missing,
        })
    }

    async fn create_wallet(&self, name: &str) -> Result<(), bitcoind_client::Error> {
        let mut s = self.up()?;
        if s.wallets.contains_key(name) {
            return Err(backend_rpc(
                -4,
                "Wallet file verification failed. Database already exists.",
            ));
        }
        s.wallets.insert(name.to_string(), true);
        s.log(format!("backend createwallet {}", name));
        Ok(())
    }

    async fn load_wallet(&self, name: &str) -> Result<(), bitcoind_client::Error> {
        let mut s = self.up()?;
        match s.wallets.get(name) {
            None => Err(backend_rpc(-18, "Wallet file verification failed. Path does not exist.")),
            Some(true) => Err(backend_rpc(-35, "Wallet is already loaded.")),
            Some(false) => {
                s.wallets.insert(name.to_string(), true);
                s.log(format!("backend loadwallet {}", name));
                Ok(())
            }
        }
    }

    async fn height(&self) -> Result<u64, bitcoind_client::Error> {
        Ok(self.up()?.height)
    }

    async fn new_address(&self, wallet: &str) -> Result<String, bitcoind_client::Error> {
        let mut s = self.up()?;
        Self::loaded(&s, wallet)?;
        let address = format!("bcrt1qwallet{}", s.next());
        s.addresses.insert(address.clone(), Owner::Wallet);
        s.log("backend getnewaddress".to_string());
        Ok(address)
    }

    async fn send_to_address(
        &self,
        wallet: &str,
        address: &str,
        amount_sat: u64,
    ) -> Result<String, bitcoind_client::Error> {
        let mut s = self.up()?;
        Self::loaded(&s, wallet)?;
        let index = match s.addresses.get(address) {
            Some(Owner::Node(i)) => *i,
            Some(Owner::Wallet) => return Err(backend_rpc(-4, "Sending to self is not simulated")),
            None => return Err(backend_rpc(-5, "Invalid address")),
        };
        let txid = format!("{:064x}", s.next());
        s.nodes[index].outputs.push(SimOutput {
            txid: txid.clone(),
            amount_sat,
            confirmed_at: None,
            spent: false,
        });
        s.log(format!("backend sendtoaddress {} {}", NodeId(index as u32 + 1), amount_sat));
        Ok(txid)
    }

    async fn generate_blocks(
        &self,
        count: u64,
        address: &str,
    ) -> Result<Vec<String>, bitcoind_client::Error> {
        let mut s = self.up()?;
        if !s.addresses.contains_key(address) {
            return Err(backend_rpc(-5, "Invalid address"));
        }
        let count = s.mine_cap.map_or(count, |cap| count.min(cap));
        let first = s.height + 1;
        for node in s.nodes.iter_mut() {
            for output in node.outputs.iter_mut().filter(|o| o.confirmed_at.is_none()) {
                output.confirmed_at = Some(first);
            }
        }
        for channel in s.channels.iter_mut().filter(|c| c.funding_height.is_none()) {
            channel.funding_height = Some(first);
        }
        s.height += count;
        s.log(format!("backend generatetoaddress {}", count));
        Ok((first..first + count).map(|h| format!("{:064x}", h)).collect())
    }
}

pub struct SimNode {
    net: SimNet,
    index: usize,
}

impl SimNode {
    fn up(&self) -> Result<MutexGuard<'_, SimState>, cln_client::Error> {
        let s = self.net.state();
        if s.nodes[self.index].down {
            return Err(cln_client::Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "lightning-rpc: No such file or directory",
            )));
        }
        Ok(s)
    }

    fn name(&self) -> NodeId {
        NodeId(self.index as u32 + 1)
    }
}

#[async_trait]
impl NodeService for SimNode {
    async fn status(&self) -> Result<GetInfo, cln_client::Error> {
        let mut s = self.up()?;
        let height = s.height;
        let bitcoind_syncing = s.initial_block_download;
        let active =
            s.channels_of(self.index).filter(|(c, _)| s.channel_state(c).is_normal()).count();
        let total = s.channels_of(self.index).count();
        let node = &mut s.nodes[self.index];
        let lagging = node.sync_warning_for > 0;
        if lagging {
            node.sync_warning_for -= 1;
        }
        Ok(GetInfo {
            id: node.identity_override.clone().unwrap_or_else(|| node.identity.clone()),
            alias: Some(self.name().to_string()),
            blockheight: if lagging { height.saturating_sub(1) } else { height },
            network: Some("regtest".to_string()),
            num_peers: node.connected.len() as u32,
            num_active_channels: active as u32,
            num_pending_channels: (total - active) as u32,
            warning_bitcoind_sync: bitcoind_syncing
                .then(|| "Bitcoind is not up-to-date with network.".to_string()),
            warning_lightningd_sync: lagging
                .then(|| "Still loading latest blocks from bitcoind.".to_string()),
            binding: vec![Binding {
                kind: "ipv4".to_string(),
                address: Some("127.0.0.1".to_string()),
                port: Some(node.port),
            }],
        })
    }

    async fn new_address(&self) -> Result<String, cln_client::Error> {
        let mut s = self.up()?;
        let address = format!("bcrt1qnode{}x{}", self.index + 1, s.next());
        s.addresses.insert(address.clone(), Owner::Node(self.index));
        s.log(format!("{} newaddr", self.name()));
        Ok(address)
    }

    async fn list_funds(&self) -> Result<ListFunds, cln_client::Error> {
        let s = self.up()?;
        let outputs = s.nodes[self.index]
            .outputs
            .iter()
            .map(|o| FundOutput {
                txid: o.txid.clone(),
                output: 0,
                amount_msat: Msat(o.amount_sat * 1000),
                status: match (o.spent, o.confirmed_at) {
                    (true, _) => OutputStatus::Spent,
                    (false, Some(_)) => OutputStatus::Confirmed,
                    (false, None) => OutputStatus::Unconfirmed,
                },
                reserved: false,
            })
            .collect();
        let channels = s
            .channels_of(self.index)
            .map(|(c, other)| FundChannelEntry {
                peer_id: s.nodes[other].identity.clone(),
                our_amount_msat: Msat(if c.opener == self.index {
                    c.capacity_sat * 1000
                } else {
                    0
                }),
                amount_msat: Msat(c.capacity_sat * 1000),
                state: s.channel_state(c),
            })
            .collect();
        Ok(ListFunds { outputs, channels })
    }

    async fn list_peers(&self) -> Result<Vec<Peer>, cln_client::Error> {
        let s = self.up()?;
        Ok(s.nodes[self.index]
            .connected
            .iter()
            .map(|id| Peer { id: id.clone(), connected: true, netaddr: vec![], channels: vec![] })
            .collect())
    }

    async fn connect(&self, id: &str, host: &str, port: u16) -> Result<(), cln_client::Error> {
        let mut s = self.up()?;
        let target = s
            .node_by_identity(id)
            .ok_or_else(|| node_rpc(401, "Connection establishment: Connection refused"))?;
        let peer = &s.nodes[target];
        if peer.down || peer.unreachable || host != "127.0.0.1" || port != peer.port {
            return Err(node_rpc(401, "Connection establishment: Connection refused"));
        }
        let ours = s.nodes[self.index].identity.clone();
        s.nodes[self.index].connected.insert(id.to_string());
        s.nodes[target].connected.insert(ours);
        s.log(format!("{} connect {}", self.name(), NodeId(target as u32 + 1)));
        Ok(())
    }

    async fn list_peer_channels(&self) -> Result<Vec<PeerChannel>, cln_client::Error> {
        let s = self.up()?;
        let connected = &s.nodes[self.index].connected;
        Ok(s.channels_of(self.index)
            .map(|(c, other)| {
                let peer_id = s.nodes[other].identity.clone();
                PeerChannel {
                    peer_connected: connected.contains(&peer_id),
                    peer_id,
                    state: s.channel_state(c),
                    short_channel_id: c.funding_height.map(|h| format!("{}x1x0", h)),
                    channel_id: Some(c.txid.clone()),
                    total_msat: Msat(c.capacity_sat * 1000),
                }
            })
            .collect())
    }

    async fn open_channel(
        &self,
        id: &str,
        amount_sat: u64,
        minconf: u32,
    ) -> Result<FundChannel, cln_client::Error> {
        let mut s = self.up()?;
        let peer = match s.node_by_identity(id) {
            Some(p) if s.nodes[self.index].connected.contains(id) => p,
            _ => return Err(node_rpc(-1, "Unknown peer")),
        };
        if s.nodes[self.index].reject_opens {
            return Err(node_rpc(-1, "They sent error channel: Rejecting channel open"));
        }
        let eligible: u64 = s.nodes[self.index]
            .outputs
            .iter()
            .filter(|o| !o.spent && (o.confirmed_at.is_some() || minconf == 0))
            .map(|o| o.amount_sat)
            .sum();
        if eligible < amount_sat + SIM_FUNDING_FEE_SAT {
            return Err(node_rpc(301, &format!("Could not afford {}sat", amount_sat)));
        }
        let txid = format!("{:064x}", s.next());
        let node = &mut s.nodes[self.index];
        let outputs = node.outputs.iter_mut();
        for o in outputs.filter(|o| !o.spent && (o.confirmed_at.is_some() || minconf == 0)) {
            o.spent = true;
        }
        let change = eligible - amount_sat - SIM_FUNDING_FEE_SAT;
        if change > 0 {
            node.outputs.push(SimOutput {
                txid: txid.clone(),
                amount_sat: change,
                confirmed_at: None,
                spent: false,
            });
        }
        s.channels.push(SimChannel {
            opener: self.index,
            peer,
            capacity_sat: amount_sat,
            txid: txid.clone(),
            funding_height: None,
        });
        s.log(format!("{} fundchannel {} {}", self.name(), NodeId(peer as u32 + 1), amount_sat));
        Ok(FundChannel { txid: txid.clone(), channel_id: Some(txid), outnum: Some(0) })
    }

    async fn create_invoice(
        &self,
        amount_msat: u64,
        label: &str,
        _description: &str,
    ) -> Result<Invoice, cln_client::Error> {
        let mut s = self.up()?;
        if s.nodes[self.index].invoices.iter().any(|i| i.label == label) {
            return Err(node_rpc(900, "Duplicate label"));
        }
        let seq = s.next();
        let invoice = SimInvoice {
            label: label.to_string(),
            bolt11: format!("lnbcrt{}n1sim{}x{}", amount_msat, self.index + 1, seq),
            payment_hash: format!("{:064x}", seq),
            amount_msat,
            paid: false,
        };
        s.nodes[self.index].invoices.push(invoice.clone());
        s.log(format!("{} invoice {}", self.name(), amount_msat));
        Ok(Invoice { bolt11: invoice.bolt11, payment_hash: invoice.payment_hash, expires_at: 0 })
    }

    async fn pay(&self, bolt11: &str) -> Result<Payment, cln_client::Error> {
        let mut s = self.up()?;
        let (payee, pos) = s
            .nodes
            .iter()
            .enumerate()
            .find_map(|(n, node)| {
                Some((n, node.invoices.iter().position(|i| i.bolt11 == bolt11)?))
            })
            .ok_or_else(|| node_rpc(-32602, "Invalid bolt11"))?;
        if payee == self.index {
            return Err(node_rpc(-1, "This payment is destined for ourselves"));
        }
        if !s.has_route(self.index, payee) {
            return Err(node_rpc(210, "Ran out of routes to try"));
        }
        let invoice = &mut s.nodes[payee].invoices[pos];
        invoice.paid = true;
        let pay = SimPay {
            bolt11: invoice.bolt11.clone(),
            payment_hash: invoice.payment_hash.clone(),
            amount_msat: invoice.amount_msat,
            pending_for: 0,
        };
        s.log(format!("{} pay {}", self.name(), NodeId(payee as u32 + 1)));
        let payer = &mut s.nodes[self.index];
        let pending_for = payer.pay_pending_for;
        let times_out = payer.pay_times_out;
        payer.pays.push(SimPay { pending_for, ..pay.clone() });
        if times_out {
            return Err(cln_client::Error::Timeout(Duration::from_secs(8)));
        }
        let status = if pending_for > 0 { PaymentStatus::Pending } else { PaymentStatus::Complete };
        Ok(Payment {
            payment_hash: pay.payment_hash,
            status,
            amount_msat: Msat(pay.amount_msat),
            parts: 1,
        })
    }

    async fn list_pays(&self, bolt11: &str) -> Result<Vec<PayAttempt>, cln_client::Error> {
        let mut s = self.up()?;
        let pays = s.nodes[self.index]
            .pays
            .iter_mut()
            .filter(|p| p.bolt11 == bolt11)
            .map(|p| {
                let status = if p.pending_for > 0 {
                    p.pending_for -= 1;
                    PaymentStatus::Pending
                } else {
                    PaymentStatus::Complete
                };
                let amount_msat =
                    (status == PaymentStatus::Complete).then_some(Msat(p.amount_msat));
                PayAttempt { payment_hash: p.payment_hash.clone(), status, amount_msat }
            })
            .collect();
        Ok(pays)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sim_chain_test() {
        let net = SimNet::new(2);
        let backend = net.backend();
        let n1 = net.node(NodeId(1));
        let n2 = net.node(NodeId(2));

        assert_eq!(backend.wallet_state("lnnet").await.unwrap(), WalletState::Missing);
        backend.create_wallet("lnnet").await.unwrap();
        assert_eq!(backend.create_wallet("lnnet").await.unwrap_err().rpc_code(), Some(-4));

        let addr = n1.new_address().await.unwrap();
        backend.send_to_address("lnnet", &addr, 1_000_000).await.unwrap();
        assert_eq!(n1.list_funds().await.unwrap().balances().unconfirmed_sat, 1_000_000);
        let mine_to = backend.new_address("lnnet").await.unwrap();
        backend.generate_blocks(6, &mine_to).await.unwrap();
        assert_eq!(n1.list_funds().await.unwrap().balances().confirmed_sat, 1_000_000);

        let info2 = n2.status().await.unwrap();
        assert_eq!(info2.id, sim_identity(NodeId(2)));
        n1.connect(&info2.id, "127.0.0.1", 9737).await.unwrap();
        n1.open_channel(&info2.id, 100_000, 0).await.unwrap();
        let chans = n2.list_peer_channels().await.unwrap();
        assert_eq!(chans.len(), 1);
        assert!(!chans[0].state.is_normal());
        backend.generate_blocks(3, &mine_to).await.unwrap();
        assert!(n1.list_peer_channels().await.unwrap()[0].state.is_normal());

        let inv = n2.create_invoice(1, "probe", "probe").await.unwrap();
        assert_eq!(n1.pay(&inv.bolt11).await.unwrap().status, PaymentStatus::Complete);
        let pays = n1.list_pays(&inv.bolt11).await.unwrap();
        assert_eq!(pays.len(), 1);
        assert_eq!(pays[0].amount_msat, Some(Msat(1)));
        assert_eq!(net.count("backend generatetoaddress"), 2);
        assert_eq!(net.count("node-1 fundchannel node-2"), 1);
    }
}
