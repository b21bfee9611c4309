use serde::{Deserialize, Serialize};

/// Response data from `getblockchaininfo`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct BlockchainInfo {
    /// Network name as reported by bitcoind ("regtest", "main", ...)
    pub chain: String,
    /// Height of the best validated block
    pub blocks: u64,
    /// Height of the best known header
    #[serde(default)]
    pub headers: u64,
    /// Best block hash
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: String,
    /// Whether the daemon is still doing its initial historical sync
    #[serde(rename = "initialblockdownload", default)]
    pub initial_block_download: bool,
    /// Estimated verification progress in [0, 1]
    #[serde(rename = "verificationprogress", default)]
    pub verification_progress: f64,
}

/// Where a named wallet stands relative to the backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletState {
    /// No wallet of that name, loaded or on disk
    Missing,
    /// Present in the wallet directory but not loaded
    Unloaded,
    /// Loaded and usable
    Loaded,
}

/// Response data from `listwalletdir`
#[derive(Debug, Deserialize)]
pub(crate) struct WalletDir {
    pub wallets: Vec<WalletDirEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WalletDirEntry {
    pub name: String,
}

impl WalletState {
    pub(crate) fn from_listings(name: &str, loaded: &[String], on_disk: &WalletDir) -> Self {
        if loaded.iter().any(|w| w == name) {
            WalletState::Loaded
        } else if on_disk.wallets.iter().any(|w| w.name == name) {
            WalletState::Unloaded
        } else {
            WalletState::Missing
        }
    }
}

/// bitcoind takes amounts in BTC
pub(crate) fn sat_to_btc(amount_sat: u64) -> f64 {
    bitcoin::Amount::from_sat(amount_sat).to_btc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blockchain_info_test() {
        let raw = json!({
            "chain": "regtest",
            "blocks": 150,
            "headers": 150,
            "bestblockhash": "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206",
            "difficulty": 4.656542373906925e-10,
            "initialblockdownload": false,
            "verificationprogress": 1,
            "warnings": ""
        });
        let info: BlockchainInfo = serde_json::from_value(raw).unwrap();
        assert_eq!(info.chain, "regtest");
        assert_eq!(info.blocks, 150);
        assert!(!info.initial_block_download);
        assert_eq!(info.verification_progress, 1.0);
    }

    #[test]
    fn wallet_state_test() {
        let dir: WalletDir = serde_json::from_value(json!({
            "wallets": [{ "name": "lnnet" }, { "name": "other" }]
        }))
        .unwrap();
        let loaded = vec!["other".to_string()];
        assert_eq!(WalletState::from_listings("lnnet", &loaded, &dir), WalletState::Unloaded);
        assert_eq!(WalletState::from_listings("other", &loaded, &dir), WalletState::Loaded);
        assert_eq!(WalletState::from_listings("nope", &loaded, &dir), WalletState::Missing);
    }

    #[test]
    fn sat_to_btc_test() {
        assert_eq!(sat_to_btc(100_000_000), 1.0);
        assert_eq!(sat_to_btc(50_000), 0.0005);
    }
}
