use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonrpc_async::simple_http::SimpleHttpTransport;
use jsonrpc_async::Client;
use log::{self, error, info};
use serde;
use serde_json::json;
use tokio::sync::Mutex;
use url::Url;

use crate::convert::{sat_to_btc, BlockchainInfo, WalletDir, WalletState};
use crate::{strip_credentials, BackendService, Error};

/// Async client for RPC to bitcoin core daemon
#[derive(Clone, Debug)]
pub struct BitcoindClient {
    rpc: Arc<Mutex<Client>>,
    // wallet-scoped endpoints, created on first use
    wallets: Arc<Mutex<HashMap<String, Arc<Mutex<Client>>>>>,
    url: Url,
    timeout: Duration,
}

/// BitcoindClient Error
pub type BitcoindClientResult<T> = Result<T, Error>;

async fn make_client(url: &Url) -> BitcoindClientResult<Client> {
    let bare = strip_credentials(url)?;
    let mut builder = SimpleHttpTransport::builder()
        .url(bare.as_str())
        .await
        .map_err(jsonrpc_async::Error::from)?;
    if !url.username().is_empty() {
        builder = builder.auth(url.username(), url.password());
    }
    Ok(Client::with_transport(builder.build()))
}

impl BitcoindClient {
    /// Create a new BitcoindClient; credentials are taken from the URL
    pub async fn new(url: Url, timeout: Duration) -> BitcoindClientResult<Self> {
        let rpc = make_client(&url).await?;
        info!("bitcoind client for {}:{}", url.host_str().unwrap_or("?"), url.port().unwrap_or(0));
        Ok(Self {
            rpc: Arc::new(Mutex::new(rpc)),
            wallets: Arc::new(Mutex::new(HashMap::new())),
            url,
            timeout,
        })
    }

    /// The RPC endpoint, including credentials
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Make a getblockchaininfo RPC call
    pub async fn get_blockchain_info(&self) -> BitcoindClientResult<BlockchainInfo> {
        self.call(&self.rpc, "getblockchaininfo", &[]).await
    }

    async fn wallet_rpc(&self, wallet: &str) -> BitcoindClientResult<Arc<Mutex<Client>>> {
        let mut wallets = self.wallets.lock().await;
        if let Some(rpc) = wallets.get(wallet) {
            return Ok(Arc::clone(rpc));
        }
        let url = self
            .url
            .join(&format!("/wallet/{}", wallet))
            .map_err(|e| Error::Transport(format!("wallet url for {}: {}", wallet, e)))?;
        let rpc = Arc::new(Mutex::new(make_client(&url).await?));
        wallets.insert(wallet.to_string(), Arc::clone(&rpc));
        Ok(rpc)
    }

    async fn call<T: for<'a> serde::de::Deserialize<'a>>(
        &self,
        rpc: &Mutex<Client>,
        cmd: &str,
        args: &[serde_json::Value],
    ) -> Result<T, Error> {
        let rpc = rpc.lock().await;
        let v_args: Vec<_> = args
            .iter()
            .map(serde_json::value::to_raw_value)
            .collect::<std::result::Result<_, serde_json::Error>>()?;
        let req = rpc.build_request(cmd, &v_args[..]);
        log::trace!("JSON-RPC request: {} {}", cmd, serde_json::Value::from(args));

        let resp = match tokio::time::timeout(self.timeout, rpc.send_request(req)).await {
            Ok(res) => res.map_err(Error::from),
            Err(_) => Err(Error::Timeout(self.timeout)),
        };
        if let Err(ref err) = resp {
            error!("{}: {}: {}", cmd, self.url.host_str().unwrap_or("?"), err);
        }
        let value: serde_json::Value = resp?.result().map_err(Error::from)?;
        log::trace!("JSON-RPC response: {} {}", cmd, value);
        serde_json::from_value(value.clone())
            .map_err(|_| Error::Malformed { method: cmd.to_string(), raw: value.to_string() })
    }
}

#[async_trait]
impl BackendService for BitcoindClient {
    async fn status(&self) -> Result<BlockchainInfo, Error> {
        self.get_blockchain_info().await
    }

    async fn wallet_state(&self, name: &str) -> Result<WalletState, Error> {
        let loaded: Vec<String> = self.call(&self.rpc, "listwallets", &[]).await?;
        let on_disk: WalletDir = self.call(&self.rpc, "listwalletdir", &[]).await?;
        Ok(WalletState::from_listings(name, &loaded, &on_disk))
    }

    async fn create_wallet(&self, name: &str) -> Result<(), Error> {
        let _: serde_json::Value = self.call(&self.rpc, "createwallet", &[json!(name)]).await?;
        Ok(())
    }

    async fn load_wallet(&self, name: &str) -> Result<(), Error> {
        let _: serde_json::Value = self.call(&self.rpc, "loadwallet", &[json!(name)]).await?;
        Ok(())
    }

    async fn height(&self) -> Result<u64, Error> {
        self.call(&self.rpc, "getblockcount", &[]).await
    }

    async fn new_address(&self, wallet: &str) -> Result<String, Error> {
        let rpc = self.wallet_rpc(wallet).await?;
        self.call(&rpc, "getnewaddress", &[]).await
    }

    async fn send_to_address(
        &self,
        wallet: &str,
        address: &str,
        amount_sat: u64,
    ) -> Result<String, Error> {
        let rpc = self.wallet_rpc(wallet).await?;
        self.call(&rpc, "sendtoaddress", &[json!(address), json!(sat_to_btc(amount_sat))]).await
    }

    async fn generate_blocks(&self, count: u64, address: &str) -> Result<Vec<String>, Error> {
        self.call(&self.rpc, "generatetoaddress", &[json!(count), json!(address)]).await
    }
}
