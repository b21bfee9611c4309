use std::sync::Arc;

use bitcoind_client::{BackendService, BlockchainInfo, WalletState, RPC_WALLET_ALREADY_LOADED};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::{Error, Subject};
use crate::model::ChainBackend;
use crate::poller::wait_until;
use crate::policy::Policy;

/// What `ensure_wallet` had to do
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletAction {
    AlreadyLoaded,
    Loaded,
    Created,
}

/// Sole owner of the backend's mutable state.  Every wallet and mining call
/// of a run goes through one of these.
pub struct ChainBackendController {
    service: Arc<dyn BackendService>,
    backend: ChainBackend,
    policy: Policy,
}

impl ChainBackendController {
    pub fn new(
        service: Arc<dyn BackendService>,
        endpoint: String,
        wallet_name: String,
        policy: &Policy,
    ) -> Self {
        ChainBackendController {
            service,
            backend: ChainBackend::new(endpoint, wallet_name),
            policy: policy.clone(),
        }
    }

    pub fn backend(&self) -> &ChainBackend {
        &self.backend
    }

    pub fn service(&self) -> &Arc<dyn BackendService> {
        &self.service
    }

    /// Wait for the backend status probe to answer
    #[instrument(skip(self), fields(endpoint = %self.backend.endpoint))]
    pub async fn ensure_reachable(&mut self) -> Result<BlockchainInfo, Error> {
        let service = &self.service;
        let poll = self.policy.backend_poll();
        let info = wait_until("backend status", poll, move || service.status())
            .await
            .map_err(|t| Error::BackendUnavailable {
                call: "getblockchaininfo",
                attempts: t.attempts,
                elapsed: t.elapsed,
                last: t.last(),
            })?;
        self.observe(info.blocks);
        info!("backend reachable: chain {} at height {}", info.chain, info.blocks);
        Ok(info)
    }

    /// Make sure wallet `name` exists and is loaded
    #[instrument(skip(self))]
    pub async fn ensure_wallet(&mut self, name: &str) -> Result<WalletAction, Error> {
        let action = match self.wallet_state(name, "listwallets").await? {
            WalletState::Loaded => WalletAction::AlreadyLoaded,
            WalletState::Unloaded => self.load(name).await?,
            WalletState::Missing => {
                info!("creating wallet {}", name);
                match self.service.create_wallet(name).await {
                    Ok(()) => WalletAction::Created,
                    Err(e) => {
                        // someone else may have created it since we looked
                        warn!("createwallet {}: {}", name, e);
                        match self.wallet_state(name, "createwallet").await? {
                            WalletState::Loaded => WalletAction::AlreadyLoaded,
                            WalletState::Unloaded => self.load(name).await?,
                            WalletState::Missing =>
                                return Err(wallet_error(name, "createwallet", e)),
                        }
                    }
                }
            }
        };
        self.backend.wallet_name = name.to_string();
        self.backend.wallet_loaded = true;
        Ok(action)
    }

    async fn load(&self, name: &str) -> Result<WalletAction, Error> {
        info!("loading wallet {}", name);
        match self.service.load_wallet(name).await {
            Ok(()) => Ok(WalletAction::Loaded),
            Err(e) if e.rpc_code() == Some(RPC_WALLET_ALREADY_LOADED) =>
                Ok(WalletAction::AlreadyLoaded),
            Err(e) => match self.wallet_state(name, "loadwallet").await? {
                WalletState::Loaded => Ok(WalletAction::AlreadyLoaded),
                _ => Err(wallet_error(name, "loadwallet", e)),
            },
        }
    }

    async fn wallet_state(&self, name: &str, call: &'static str) -> Result<WalletState, Error> {
        self.service.wallet_state(name).await.map_err(|e| wallet_error(name, call, e))
    }

    /// Current chain height, as reported by the backend
    pub async fn height(&mut self) -> Result<u64, Error> {
        let height = self
            .service
            .height()
            .await
            .map_err(|e| Error::rpc(Subject::Backend, "getblockcount", e))?;
        self.observe(height);
        Ok(height)
    }

    /// Mine up to `target` if the chain is shorter.  Returns the number of
    /// blocks mined.
    #[instrument(skip(self))]
    pub async fn ensure_min_height(&mut self, target: u64) -> Result<u64, Error> {
        let current = self.height().await?;
        if current >= target {
            info!("chain height {} already at or above {}", current, target);
            return Ok(0);
        }
        self.mine(target - current).await
    }

    /// Mine `count` blocks to a fresh wallet address, then re-read the height.
    /// Returns the number of blocks the backend actually produced.
    #[instrument(skip(self))]
    pub async fn mine(&mut self, count: u64) -> Result<u64, Error> {
        let wallet = self.loaded_wallet("generatetoaddress")?;
        let address = self
            .service
            .new_address(&wallet)
            .await
            .map_err(|e| wallet_error(&wallet, "getnewaddress", e))?;
        info!("mining {} blocks to {}", count, address);
        let hashes = self
            .service
            .generate_blocks(count, &address)
            .await
            .map_err(|e| Error::rpc(Subject::Backend, "generatetoaddress", e))?;
        let mined = hashes.len() as u64;
        if mined != count {
            warn!("asked for {} blocks, backend reported {}", count, mined);
        }
        self.height().await?;
        Ok(mined)
    }

    /// Send `amount_sat` from the wallet to `address`, returning the txid
    #[instrument(skip(self))]
    pub async fn pay_to(&mut self, address: &str, amount_sat: u64) -> Result<String, Error> {
        let wallet = self.loaded_wallet("sendtoaddress")?;
        let txid = self
            .service
            .send_to_address(&wallet, address, amount_sat)
            .await
            .map_err(|e| wallet_error(&wallet, "sendtoaddress", e))?;
        info!("sent {} sat to {} in {}", amount_sat, address, txid);
        Ok(txid)
    }

    fn loaded_wallet(&self, call: &'static str) -> Result<String, Error> {
        if !self.backend.wallet_loaded {
            return Err(wallet_error(&self.backend.wallet_name, call, "wallet not loaded"));
        }
        Ok(self.backend.wallet_name.clone())
    }

    fn observe(&mut self, height: u64) {
        if !self.backend.observe_height(height) {
            warn!("backend height went back from {} to {}", self.backend.height(), height);
        }
    }
}

fn wallet_error(wallet: &str, call: &'static str, e: impl std::fmt::Display) -> Error {
    Error::WalletError { wallet: wallet.to_string(), call, last: e.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::SimNet;
    use std::time::Duration;
    use tokio::time::Instant;

    fn controller(net: &SimNet) -> ChainBackendController {
        ChainBackendController::new(
            net.backend(),
            "http://127.0.0.1:18443/".into(),
            "lnnet".into(),
            &Policy::default(),
        )
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn reachable_after_warmup_test() {
        let net = SimNet::new(1);
        net.state().backend_down_for = 3;
        let mut c = controller(&net);
        let start = Instant::now();
        c.ensure_reachable().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_test() {
        let net = SimNet::new(1);
        net.state().backend_down = true;
        let mut c = controller(&net);
        let start = Instant::now();
        let err = c.ensure_reachable().await.unwrap_err();
        let policy = Policy::default();
        assert!(start.elapsed() <= policy.backend_timeout + policy.backend_interval);
        match err {
            Error::BackendUnavailable { call, last, .. } => {
                assert_eq!(call, "getblockchaininfo");
                assert!(last.contains("connection refused"));
            }
            e => panic!("unexpected {:?}", e),
        }
    }

    #[tokio::test]
    async fn wallet_paths_test() {
        let net = SimNet::new(1);
        let mut c = controller(&net);
        assert_eq!(c.ensure_wallet("lnnet").await.unwrap(), WalletAction::Created);
        assert_eq!(c.ensure_wallet("lnnet").await.unwrap(), WalletAction::AlreadyLoaded);
        net.state().wallets.insert("lnnet".into(), false);
        assert_eq!(c.ensure_wallet("lnnet").await.unwrap(), WalletAction::Loaded);
        assert!(c.backend().wallet_loaded);
        assert_eq!(net.count("backend createwallet"), 1);
        assert_eq!(net.count("backend loadwallet"), 1);
    }

    #[tokio::test]
    async fn wallet_error_test() {
        let net = SimNet::new(1);
        net.state().backend_down = true;
        let mut c = controller(&net);
        match c.ensure_wallet("lnnet").await.unwrap_err() {
            Error::WalletError { wallet, call, .. } => {
                assert_eq!(wallet, "lnnet");
                assert_eq!(call, "listwallets");
            }
            e => panic!("unexpected {:?}", e),
        }
        assert!(!c.backend().wallet_loaded);
    }

    #[tokio::test]
    async fn min_height_test() {
        let net = SimNet::new(1);
        let mut c = controller(&net);
        assert!(matches!(c.ensure_min_height(150).await, Err(Error::WalletError { .. })));
        c.ensure_wallet("lnnet").await.unwrap();
        assert_eq!(c.ensure_min_height(150).await.unwrap(), 150);
        assert_eq!(c.backend().height(), 150);
        assert_eq!(c.ensure_min_height(150).await.unwrap(), 0);
        assert_eq!(c.ensure_min_height(100).await.unwrap(), 0);
        assert_eq!(net.count("backend generatetoaddress"), 1);
        assert!(net.mutations().contains(&"backend generatetoaddress 150".to_string()));
    }

    #[tokio::test]
    async fn short_mine_reports_actual_blocks_test() {
        let net = SimNet::new(1);
        net.state().mine_cap = Some(40);
        let mut c = controller(&net);
        c.ensure_wallet("lnnet").await.unwrap();
        assert_eq!(c.mine(100).await.unwrap(), 40);
        assert_eq!(c.backend().height(), 40);
        assert_eq!(c.ensure_min_height(60).await.unwrap(), 20);
        assert_eq!(c.backend().height(), 60);
    }
}
