#![crate_name = "bitcoind_client"]

//! A typed bitcoind RPC client, and the backend service interface the
//! orchestration core drives.

#![forbid(unsafe_code)]
#![warn(rustdoc::broken_intra_doc_links)]
#![warn(missing_docs)]

/// Bitcoind RPC client
pub mod bitcoind_client;
mod convert;

pub use self::bitcoind_client::BitcoindClient;
pub use self::convert::{BlockchainInfo, WalletState};

use async_trait::async_trait;
use core::fmt;
use log::info;
use std::fmt::{Display, Formatter};
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// bitcoind reports this when a wallet is already loaded
pub const RPC_WALLET_ALREADY_LOADED: i32 = -35;
/// bitcoind reports this when createwallet targets an existing database
pub const RPC_WALLET_ERROR: i32 = -4;
/// bitcoind reports this while it is still warming up
pub const RPC_IN_WARMUP: i32 = -28;

/// RPC errors
#[derive(Debug)]
pub enum Error {
    /// The daemon answered with a JSON-RPC error object
    Rpc {
        /// JSON-RPC error code
        code: i32,
        /// Error message, verbatim
        message: String,
    },
    /// HTTP transport failure (connection refused, bad auth, ...)
    Transport(String),
    /// The request did not complete in time
    Timeout(Duration),
    /// The response did not have the expected shape
    Malformed {
        /// The RPC method
        method: String,
        /// The raw response, for diagnostics
        raw: String,
    },
    /// JSON Error
    Json(serde_json::error::Error),
    /// IO Error
    Io(std::io::Error),
}

impl Error {
    /// The JSON-RPC error code, if the daemon answered with one
    pub fn rpc_code(&self) -> Option<i32> {
        match self {
            Error::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::Rpc { code, message } => write!(f, "rpc error {}: {}", code, message),
            Error::Transport(s) => write!(f, "transport: {}", s),
            Error::Timeout(d) => write!(f, "timed out after {:?}", d),
            Error::Malformed { method, raw } => write!(f, "malformed {} response: {}", method, raw),
            Error::Json(e) => write!(f, "json: {}", e),
            Error::Io(e) => write!(f, "io: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<jsonrpc_async::error::Error> for Error {
    fn from(e: jsonrpc_async::error::Error) -> Error {
        match e {
            jsonrpc_async::error::Error::Rpc(rpce) =>
                Error::Rpc { code: rpce.code, message: rpce.message },
            jsonrpc_async::error::Error::Json(e) => Error::Json(e),
            other => Error::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::error::Error> for Error {
    fn from(e: serde_json::error::Error) -> Error {
        Error::Json(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Io(e)
    }
}

/// The operations the orchestrator needs from the shared blockchain backend.
///
/// All calls are request/response; implementations must bound each call in
/// time so that callers never block indefinitely.
#[async_trait]
pub trait BackendService: Send + Sync {
    /// Chain status, used as the reachability probe
    async fn status(&self) -> Result<BlockchainInfo, Error>;
    /// Whether the named wallet is loaded, on disk only, or absent
    async fn wallet_state(&self, name: &str) -> Result<WalletState, Error>;
    /// Create (and load) a new wallet
    async fn create_wallet(&self, name: &str) -> Result<(), Error>;
    /// Load a wallet that exists on disk
    async fn load_wallet(&self, name: &str) -> Result<(), Error>;
    /// Current chain height
    async fn height(&self) -> Result<u64, Error>;
    /// A fresh receive address owned by `wallet`
    async fn new_address(&self, wallet: &str) -> Result<String, Error>;
    /// Pay `amount_sat` from `wallet` to `address`, returning the txid
    async fn send_to_address(
        &self,
        wallet: &str,
        address: &str,
        amount_sat: u64,
    ) -> Result<String, Error>;
    /// Mine `count` blocks paying to `address`, returning the block hashes
    async fn generate_blocks(&self, count: u64, address: &str) -> Result<Vec<String>, Error>;
}

/// Path of bitcoind's cookie file for a datadir and network name
pub fn bitcoin_cookie_path(bitcoin_dir: &Path, network: &str) -> PathBuf {
    match network {
        "bitcoin" | "mainnet" => bitcoin_dir.join(".cookie"),
        "testnet" => bitcoin_dir.join("testnet3").join(".cookie"),
        other => bitcoin_dir.join(other).join(".cookie"),
    }
}

/// Read a `user:password` pair from a bitcoind cookie file
pub fn read_rpc_cookie(cookie_path: &Path) -> Result<(String, String), Error> {
    info!("auth to bitcoind via cookie {}", cookie_path.to_string_lossy());
    let cookie_contents = read_to_string(cookie_path)?;
    let mut iter = cookie_contents.trim().splitn(2, ':');
    match (iter.next(), iter.next()) {
        (Some(user), Some(pass)) if !user.is_empty() =>
            Ok((user.to_string(), pass.to_string())),
        _ => Err(Error::Malformed {
            method: "cookie".to_string(),
            raw: cookie_path.to_string_lossy().to_string(),
        }),
    }
}

/// A copy of `url` without user and password, safe to log or report
pub fn strip_credentials(url: &Url) -> Result<Url, Error> {
    let mut bare = url.clone();
    bare.set_username("")
        .map_err(|_| Error::Transport(format!("{} cannot carry credentials", url.scheme())))?;
    bare.set_password(None)
        .map_err(|_| Error::Transport(format!("{} cannot carry credentials", url.scheme())))?;
    Ok(bare)
}

/// Construct a client from an RPC URL, falling back to the cookie file when
/// the URL carries no credentials.
pub async fn bitcoind_client_from_url(
    mut url: Url,
    cookie_path: Option<&Path>,
    timeout: Duration,
) -> Result<BitcoindClient, Error> {
    if url.username().is_empty() {
        if let Some(path) = cookie_path {
            let (user, pass) = read_rpc_cookie(path)?;
            url.set_username(&user)
                .map_err(|_| Error::Transport(format!("cannot set user on {}", url)))?;
            url.set_password(Some(&pass))
                .map_err(|_| Error::Transport(format!("cannot set password on {}", url)))?;
        }
    }
    BitcoindClient::new(url, timeout).await
}
