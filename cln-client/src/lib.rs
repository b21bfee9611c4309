#![crate_name = "cln_client"]

//! A typed Core Lightning RPC client, and the node service interface the
//! orchestration core drives.

#![forbid(unsafe_code)]
#![warn(rustdoc::broken_intra_doc_links)]
#![warn(missing_docs)]

/// Unix-socket JSON-RPC client
pub mod client;
/// Typed responses
pub mod model;

pub use self::client::ClnClient;
pub use self::model::*;

use async_trait::async_trait;
use core::fmt;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// JSON-RPC "method not found"
pub const RPC_METHOD_NOT_FOUND: i32 = -32601;

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
    /// The request did not complete in time
    Timeout(Duration),
    /// The response did not have the expected shape
    Malformed {
        /// The RPC method
        method: String,
        /// The raw response, for diagnostics
        raw: String,
    },
    /// The socket closed or produced something that is not JSON-RPC
    Protocol(String),
    /// JSON Error
    Json(serde_json::error::Error),
    /// IO Error, including a missing socket
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
            Error::Timeout(d) => write!(f, "timed out after {:?}", d),
            Error::Malformed { method, raw } => write!(f, "malformed {} response: {}", method, raw),
            Error::Protocol(s) => write!(f, "protocol: {}", s),
            Error::Json(e) => write!(f, "json: {}", e),
            Error::Io(e) => write!(f, "io: {}", e),
        }
    }
}

impl std::error::Error for Error {}

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

/// The operations the orchestrator needs from one payment-channel daemon.
#[async_trait]
pub trait NodeService: Send + Sync {
    /// Node status, used as the readiness probe
    async fn status(&self) -> Result<GetInfo, Error>;
    /// A fresh on-chain deposit address
    async fn new_address(&self) -> Result<String, Error>;
    /// On-chain outputs and channel balances
    async fn list_funds(&self) -> Result<ListFunds, Error>;
    /// Known peers and whether they are connected
    async fn list_peers(&self) -> Result<Vec<Peer>, Error>;
    /// Connect to a peer by identity and network address
    async fn connect(&self, id: &str, host: &str, port: u16) -> Result<(), Error>;
    /// All channels with all peers
    async fn list_peer_channels(&self) -> Result<Vec<PeerChannel>, Error>;
    /// Open a channel of `amount_sat` to a connected peer
    async fn open_channel(&self, id: &str, amount_sat: u64, minconf: u32)
        -> Result<FundChannel, Error>;
    /// Create an invoice for `amount_msat`
    async fn create_invoice(
        &self,
        amount_msat: u64,
        label: &str,
        description: &str,
    ) -> Result<Invoice, Error>;
    /// Pay a bolt11 invoice
    async fn pay(&self, bolt11: &str) -> Result<Payment, Error>;
    /// Attempts made so far to pay a bolt11 invoice
    async fn list_pays(&self, bolt11: &str) -> Result<Vec<PayAttempt>, Error>;
}

/// The RPC socket of a node, given its lightning dir and network name
pub fn rpc_socket_path(lightning_dir: &Path, network: &str) -> PathBuf {
    lightning_dir.join(network).join("lightning-rpc")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_test() {
        assert_eq!(
            rpc_socket_path(Path::new("/rt/lightning/node-1"), "regtest"),
            PathBuf::from("/rt/lightning/node-1/regtest/lightning-rpc")
        );
    }
}
