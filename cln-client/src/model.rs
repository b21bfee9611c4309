use core::fmt;
use serde::{Deserialize, Deserializer, Serialize};

/// A millisatoshi amount.
///
/// Older daemons render amounts as `"1000msat"` strings, newer ones as plain
/// integers; both are accepted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Msat(pub u64);

impl Msat {
    /// Whole satoshis, rounded down
    pub fn to_sat(self) -> u64 {
        self.0 / 1000
    }
}

impl<'de> Deserialize<'de> for Msat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Str(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Int(v) => Ok(Msat(v)),
            Raw::Str(s) => s
                .trim_end_matches("msat")
                .parse()
                .map(Msat)
                .map_err(|_| serde::de::Error::custom(format!("bad msat amount {:?}", s))),
        }
    }
}

/// A listening address advertised in `getinfo`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Binding {
    /// "ipv4", "ipv6", "local socket", ...
    #[serde(rename = "type")]
    pub kind: String,
    /// Host part
    pub address: Option<String>,
    /// Port
    pub port: Option<u16>,
}

/// Response data from `getinfo`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct GetInfo {
    /// Node identity public key, hex
    #[serde(default)]
    pub id: String,
    /// Node alias
    #[serde(default)]
    pub alias: Option<String>,
    /// Height of the chain as seen by the node
    #[serde(default)]
    pub blockheight: u64,
    /// Network name
    #[serde(default)]
    pub network: Option<String>,
    /// Number of known peers
    #[serde(default)]
    pub num_peers: u32,
    /// Number of channels in normal operation
    #[serde(default)]
    pub num_active_channels: u32,
    /// Number of channels awaiting lock-in
    #[serde(default)]
    pub num_pending_channels: u32,
    /// Present while the backend is still syncing
    #[serde(default)]
    pub warning_bitcoind_sync: Option<String>,
    /// Present while the node is catching up with the backend
    #[serde(default)]
    pub warning_lightningd_sync: Option<String>,
    /// Addresses the node listens on
    #[serde(default)]
    pub binding: Vec<Binding>,
}

impl GetInfo {
    /// Neither sync warning is present
    pub fn fully_synced(&self) -> bool {
        self.warning_bitcoind_sync.is_none() && self.warning_lightningd_sync.is_none()
    }

    /// First advertised TCP listening address
    pub fn tcp_binding(&self) -> Option<(String, u16)> {
        self.binding
            .iter()
            .filter(|b| b.kind == "ipv4" || b.kind == "ipv6")
            .find_map(|b| Some((b.address.clone()?, b.port?)))
    }
}

/// Status of an on-chain output owned by the node
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputStatus {
    /// In the mempool
    Unconfirmed,
    /// Mined
    Confirmed,
    /// Already spent
    Spent,
    /// Locked in an immature coinbase
    Immature,
}

/// One on-chain output from `listfunds`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct FundOutput {
    /// Funding transaction id
    pub txid: String,
    /// Output index
    pub output: u32,
    /// Value
    pub amount_msat: Msat,
    /// Confirmation status
    pub status: OutputStatus,
    /// Whether the output is reserved by an in-progress transaction
    #[serde(default)]
    pub reserved: bool,
}

/// One channel balance from `listfunds`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct FundChannelEntry {
    /// Counterparty identity
    pub peer_id: String,
    /// Our side of the channel
    #[serde(default)]
    pub our_amount_msat: Msat,
    /// Total channel capacity
    #[serde(default)]
    pub amount_msat: Msat,
    /// Channel state
    pub state: ChannelState,
}

/// Response data from `listfunds`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ListFunds {
    /// On-chain outputs
    #[serde(default)]
    pub outputs: Vec<FundOutput>,
    /// Channel balances
    #[serde(default)]
    pub channels: Vec<FundChannelEntry>,
}

/// On-chain balance split by confirmation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Balances {
    /// Confirmed, unreserved
    pub confirmed_sat: u64,
    /// In the mempool, unreserved
    pub unconfirmed_sat: u64,
}

impl Balances {
    /// Everything that is spendable now or will be once mined
    pub fn total_sat(&self) -> u64 {
        self.confirmed_sat + self.unconfirmed_sat
    }
}

impl ListFunds {
    /// Sum unspent, unreserved outputs by confirmation status
    pub fn balances(&self) -> Balances {
        let mut balances = Balances::default();
        for output in self.outputs.iter().filter(|o| !o.reserved) {
            match output.status {
                OutputStatus::Confirmed => balances.confirmed_sat += output.amount_msat.to_sat(),
                OutputStatus::Unconfirmed =>
                    balances.unconfirmed_sat += output.amount_msat.to_sat(),
                OutputStatus::Spent | OutputStatus::Immature => {}
            }
        }
        balances
    }
}

/// Channel state as named by the daemon
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum ChannelState {
    /// Negotiating the funding transaction
    Openingd,
    /// Dual-funded open in progress
    DualopendOpenInit,
    /// Dual-funded channel awaiting lock-in
    DualopendAwaitingLockin,
    /// Funding broadcast, waiting for confirmations
    ChanneldAwaitingLockin,
    /// Fully operational
    ChanneldNormal,
    /// Cooperative close started
    ChanneldShuttingDown,
    /// Any closing or closed state
    Closing(String),
    /// A state this client does not know
    Other(String),
}

/// The operating-normal tag
pub const CHANNELD_NORMAL: &str = "CHANNELD_NORMAL";

impl ChannelState {
    /// In normal operation
    pub fn is_normal(&self) -> bool {
        *self == ChannelState::ChanneldNormal
    }

    /// Open, or on its way to being open
    pub fn is_open_or_opening(&self) -> bool {
        matches!(
            self,
            ChannelState::Openingd
                | ChannelState::DualopendOpenInit
                | ChannelState::DualopendAwaitingLockin
                | ChannelState::ChanneldAwaitingLockin
                | ChannelState::ChanneldNormal
        )
    }
}

impl From<String> for ChannelState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "OPENINGD" => ChannelState::Openingd,
            "DUALOPEND_OPEN_INIT" => ChannelState::DualopendOpenInit,
            "DUALOPEND_AWAITING_LOCKIN" => ChannelState::DualopendAwaitingLockin,
            "CHANNELD_AWAITING_LOCKIN" => ChannelState::ChanneldAwaitingLockin,
            CHANNELD_NORMAL => ChannelState::ChanneldNormal,
            "CHANNELD_SHUTTING_DOWN" => ChannelState::ChanneldShuttingDown,
            "CLOSINGD_SIGEXCHANGE" | "CLOSINGD_COMPLETE" | "AWAITING_UNILATERAL"
            | "FUNDING_SPEND_SEEN" | "ONCHAIN" | "CLOSED" => ChannelState::Closing(s),
            _ => ChannelState::Other(s),
        }
    }
}

impl From<ChannelState> for String {
    fn from(state: ChannelState) -> String {
        state.to_string()
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelState::Openingd => "OPENINGD",
            ChannelState::DualopendOpenInit => "DUALOPEND_OPEN_INIT",
            ChannelState::DualopendAwaitingLockin => "DUALOPEND_AWAITING_LOCKIN",
            ChannelState::ChanneldAwaitingLockin => "CHANNELD_AWAITING_LOCKIN",
            ChannelState::ChanneldNormal => CHANNELD_NORMAL,
            ChannelState::ChanneldShuttingDown => "CHANNELD_SHUTTING_DOWN",
            ChannelState::Closing(s) | ChannelState::Other(s) => s.as_str(),
        };
        f.write_str(s)
    }
}

/// A channel as embedded in legacy `listpeers` output
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LegacyPeerChannel {
    /// Channel state
    pub state: ChannelState,
    /// Set once the funding transaction is mined
    #[serde(default)]
    pub short_channel_id: Option<String>,
    /// Channel id
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Capacity
    #[serde(default)]
    pub total_msat: Msat,
}

/// One entry of `listpeers`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Peer {
    /// Peer identity
    pub id: String,
    /// Whether a transport connection is up
    pub connected: bool,
    /// Addresses used for the connection
    #[serde(default)]
    pub netaddr: Vec<String>,
    /// Only populated by daemons predating `listpeerchannels`
    #[serde(default, skip_serializing)]
    pub channels: Vec<LegacyPeerChannel>,
}

#[derive(Deserialize)]
pub(crate) struct ListPeers {
    pub peers: Vec<Peer>,
}

/// One entry of `listpeerchannels`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PeerChannel {
    /// Counterparty identity
    pub peer_id: String,
    /// Whether the counterparty is connected
    #[serde(default)]
    pub peer_connected: bool,
    /// Channel state
    pub state: ChannelState,
    /// Set once the funding transaction is mined, `<block>x<tx>x<out>`
    #[serde(default)]
    pub short_channel_id: Option<String>,
    /// Channel id
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Capacity
    #[serde(default)]
    pub total_msat: Msat,
}

impl PeerChannel {
    /// Block height of the funding transaction, parsed from the short channel id
    pub fn funding_height(&self) -> Option<u64> {
        self.short_channel_id.as_deref()?.split('x').next()?.parse().ok()
    }

    pub(crate) fn from_legacy(peer_id: &str, connected: bool, c: LegacyPeerChannel) -> Self {
        PeerChannel {
            peer_id: peer_id.to_string(),
            peer_connected: connected,
            state: c.state,
            short_channel_id: c.short_channel_id,
            channel_id: c.channel_id,
            total_msat: c.total_msat,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct ListPeerChannels {
    pub channels: Vec<PeerChannel>,
}

#[derive(Deserialize)]
pub(crate) struct NewAddr {
    pub bech32: Option<String>,
    pub p2tr: Option<String>,
}

/// Response data from `fundchannel`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct FundChannel {
    /// Funding transaction id
    pub txid: String,
    /// Channel id
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Funding output index
    #[serde(default)]
    pub outnum: Option<u32>,
}

/// Response data from `invoice`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Invoice {
    /// Encoded invoice
    pub bolt11: String,
    /// Payment hash
    pub payment_hash: String,
    /// Expiry, unix seconds
    #[serde(default)]
    pub expires_at: u64,
}

/// Outcome of a payment attempt
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Settled
    Complete,
    /// Still in flight
    Pending,
    /// Gave up
    Failed,
}

/// Response data from `pay`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Payment {
    /// Payment hash
    pub payment_hash: String,
    /// Outcome
    pub status: PaymentStatus,
    /// Amount delivered
    #[serde(default)]
    pub amount_msat: Msat,
    /// Number of parts the payment was split into
    #[serde(default)]
    pub parts: u32,
}

/// One entry of `listpays`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PayAttempt {
    /// Payment hash
    pub payment_hash: String,
    /// Outcome so far
    pub status: PaymentStatus,
    /// Amount delivered, once complete
    #[serde(default)]
    pub amount_msat: Option<Msat>,
}

#[derive(Deserialize)]
pub(crate) struct ListPays {
    pub pays: Vec<PayAttempt>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn msat_forms_test() {
        let a: Msat = serde_json::from_value(json!(1000)).unwrap();
        let b: Msat = serde_json::from_value(json!("1000msat")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_sat(), 1);
        assert!(serde_json::from_value::<Msat>(json!("lots")).is_err());
    }

    #[test]
    fn getinfo_sync_test() {
        let info: GetInfo = serde_json::from_value(json!({
            "id": "02a1633cafcc01ebfb6d78e39f687a1f0995c62fc95f51ead10a02ee0be551b5dc",
            "alias": "node-1",
            "blockheight": 120,
            "network": "regtest",
            "num_peers": 0,
            "warning_lightningd_sync": "Still loading latest blocks from bitcoind.",
            "binding": [{ "type": "ipv4", "address": "127.0.0.1", "port": 9736 }]
        }))
        .unwrap();
        assert!(!info.fully_synced());
        assert_eq!(info.tcp_binding(), Some(("127.0.0.1".to_string(), 9736)));
    }

    #[test]
    fn balances_test() {
        let funds: ListFunds = serde_json::from_value(json!({
            "outputs": [
                {
                    "txid": "aa",
                    "output": 0,
                    "amount_msat": 100_000_000_000u64,
                    "status": "confirmed"
                },
                {
                    "txid": "bb",
                    "output": 1,
                    "amount_msat": "5000000msat",
                    "status": "unconfirmed"
                },
                {
                    "txid": "cc",
                    "output": 0,
                    "amount_msat": 7_000_000,
                    "status": "confirmed",
                    "reserved": true
                },
                { "txid": "dd", "output": 0, "amount_msat": 9_000_000, "status": "spent" }
            ],
            "channels": []
        }))
        .unwrap();
        let balances = funds.balances();
        assert_eq!(balances.confirmed_sat, 100_000_000);
        assert_eq!(balances.unconfirmed_sat, 5_000);
        assert_eq!(balances.total_sat(), 100_005_000);
    }

    #[test]
    fn channel_state_test() {
        let c: PeerChannel = serde_json::from_value(json!({
            "peer_id": "03ab",
            "peer_connected": true,
            "state": "CHANNELD_NORMAL",
            "short_channel_id": "157x1x0",
            "total_msat": 100_000_000
        }))
        .unwrap();
        assert!(c.state.is_normal());
        assert_eq!(c.funding_height(), Some(157));

        let closing = ChannelState::from("ONCHAIN".to_string());
        assert!(!closing.is_open_or_opening());
        assert_eq!(closing.to_string(), "ONCHAIN");
        assert!(ChannelState::from("CHANNELD_AWAITING_LOCKIN".to_string()).is_open_or_opening());
    }
}
