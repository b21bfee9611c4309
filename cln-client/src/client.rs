use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{error, trace};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::model::{
    FundChannel, GetInfo, Invoice, ListFunds, ListPays, ListPeerChannels, ListPeers, NewAddr,
    PayAttempt, Payment, Peer, PeerChannel,
};
use crate::{Error, NodeService, RPC_METHOD_NOT_FOUND};

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i32,
    message: String,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// Async client for the lightningd unix-socket RPC.
///
/// A new connection is made per request, so a restarted daemon is picked up
/// without any reconnect logic.
#[derive(Debug)]
pub struct ClnClient {
    socket_path: PathBuf,
    timeout: Duration,
    next_id: AtomicU64,
}

impl ClnClient {
    /// Create a client for the socket at `socket_path`
    pub fn new(socket_path: PathBuf, timeout: Duration) -> Self {
        ClnClient { socket_path, timeout, next_id: AtomicU64::new(1) }
    }

    /// The RPC socket this client talks to
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Issue a raw request and return the untyped result
    pub async fn call_raw(&self, method: &str, params: Value) -> Result<Value, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        trace!("JSON-RPC request: {} {}", self.socket_path.display(), request);

        let result = match tokio::time::timeout(self.timeout, self.exchange(&request)).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout(self.timeout)),
        };
        if let Err(ref err) = result {
            error!("{}: {}: {}", method, self.socket_path.display(), err);
        }
        let response = result?;
        match (response.result, response.error) {
            (_, Some(err)) => Err(Error::Rpc { code: err.code, message: err.message }),
            (Some(value), None) => {
                trace!("JSON-RPC response: {} {}", method, value);
                Ok(value)
            }
            (None, None) => Err(Error::Protocol(format!("{}: empty response", method))),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, Error> {
        let value = self.call_raw(method, params).await?;
        serde_json::from_value(value.clone())
            .map_err(|_| Error::Malformed { method: method.to_string(), raw: value.to_string() })
    }

    async fn exchange(&self, request: &Value) -> Result<Response, Error> {
        let mut stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            std::io::Error::new(e.kind(), format!("{}: {}", self.socket_path.display(), e))
        })?;
        stream.write_all(&serde_json::to_vec(request)?).await?;

        // responses are not length-prefixed, read until one complete value parses
        let mut buf = Vec::with_capacity(4096);
        let mut chunk = [0u8; 8192];
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::Protocol("connection closed before a response".to_string()));
            }
            buf.extend_from_slice(&chunk[..n]);
            let mut values = serde_json::Deserializer::from_slice(&buf).into_iter::<Response>();
            match values.next() {
                Some(Ok(response)) => return Ok(response),
                Some(Err(e)) if e.is_eof() => continue,
                Some(Err(e)) => return Err(e.into()),
                None => continue,
            }
        }
    }
}

#[async_trait]
impl NodeService for ClnClient {
    async fn status(&self) -> Result<GetInfo, Error> {
        self.call("getinfo", json!({})).await
    }

    async fn new_address(&self) -> Result<String, Error> {
        let addr: NewAddr = self.call("newaddr", json!({ "addresstype": "bech32" })).await?;
        addr.bech32.or(addr.p2tr).ok_or_else(|| Error::Malformed {
            method: "newaddr".to_string(),
            raw: "{}".to_string(),
        })
    }

    async fn list_funds(&self) -> Result<ListFunds, Error> {
        self.call("listfunds", json!({})).await
    }

    async fn list_peers(&self) -> Result<Vec<Peer>, Error> {
        let peers: ListPeers = self.call("listpeers", json!({})).await?;
        Ok(peers.peers)
    }

    async fn connect(&self, id: &str, host: &str, port: u16) -> Result<(), Error> {
        let _: Value =
            self.call("connect", json!({ "id": id, "host": host, "port": port })).await?;
        Ok(())
    }

    async fn list_peer_channels(&self) -> Result<Vec<PeerChannel>, Error> {
        match self.call::<ListPeerChannels>("listpeerchannels", json!({})).await {
            Ok(list) => Ok(list.channels),
            Err(e) if e.rpc_code() == Some(RPC_METHOD_NOT_FOUND) => {
                // older daemons nest channels in listpeers
                let peers = self.list_peers().await?;
                Ok(peers
                    .into_iter()
                    .flat_map(|p| {
                        let (id, connected) = (p.id, p.connected);
                        p.channels
                            .into_iter()
                            .map(move |c| PeerChannel::from_legacy(&id, connected, c))
                    })
                    .collect())
            }
            Err(e) => Err(e),
        }
    }

    async fn open_channel(
        &self,
        id: &str,
        amount_sat: u64,
        minconf: u32,
    ) -> Result<FundChannel, Error> {
        self.call("fundchannel", json!({ "id": id, "amount": amount_sat, "minconf": minconf }))
            .await
    }

    async fn create_invoice(
        &self,
        amount_msat: u64,
        label: &str,
        description: &str,
    ) -> Result<Invoice, Error> {
        self.call(
            "invoice",
            json!({ "amount_msat": amount_msat, "label": label, "description": description }),
        )
        .await
    }

    async fn pay(&self, bolt11: &str) -> Result<Payment, Error> {
        self.call("pay", json!({ "bolt11": bolt11 })).await
    }

    async fn list_pays(&self, bolt11: &str) -> Result<Vec<PayAttempt>, Error> {
        let pays: ListPays = self.call("listpays", json!({ "bolt11": bolt11 })).await?;
        Ok(pays.pays)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Msat, PaymentStatus};
    use tokio::net::UnixListener;

    // answer one request per connection with a canned reply, split in two writes
    async fn serve(listener: UnixListener, replies: Vec<Value>) {
        for reply in replies {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await.unwrap();
            let bytes = serde_json::to_vec(&reply).unwrap();
            let (head, tail) = bytes.split_at(bytes.len() / 2);
            stream.write_all(head).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            stream.write_all(tail).await.unwrap();
            let _ = stream.write_all(b"\n\n").await;
        }
    }

    #[tokio::test]
    async fn getinfo_over_socket_test() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lightning-rpc");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(serve(
            listener,
            vec![json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": { "id": "02aa", "blockheight": 101, "binding": [] }
            })],
        ));

        let client = ClnClient::new(path, Duration::from_secs(5));
        let info = client.status().await.unwrap();
        assert_eq!(info.id, "02aa");
        assert_eq!(info.blockheight, 101);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn peer_channels_fallback_test() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lightning-rpc");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(serve(
            listener,
            vec![
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": { "code": -32601, "message": "Unknown command 'listpeerchannels'" }
                }),
                json!({
                    "jsonrpc": "2.0",
                    "id": 2,
                    "result": { "peers": [{
                        "id": "03bb",
                        "connected": true,
                        "channels": [{
                            "state": "CHANNELD_AWAITING_LOCKIN",
                            "total_msat": "100000000msat"
                        }]
                    }]}
                }),
            ],
        ));

        let client = ClnClient::new(path, Duration::from_secs(5));
        let channels = client.list_peer_channels().await.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].peer_id, "03bb");
        assert!(channels[0].peer_connected);
        assert_eq!(channels[0].total_msat.to_sat(), 100_000);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rpc_error_and_missing_socket_test() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lightning-rpc");
        let client = ClnClient::new(path.clone(), Duration::from_secs(5));
        assert!(matches!(client.status().await, Err(Error::Io(_))));

        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(serve(
            listener,
            vec![json!({
                "jsonrpc": "2.0",
                "id": 2,
                "error": { "code": 301, "message": "Could not afford 100000sat" }
            })],
        ));
        let err = client.open_channel("03bb", 100_000, 0).await.unwrap_err();
        assert_eq!(err.rpc_code(), Some(301));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn list_pays_test() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lightning-rpc");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(serve(
            listener,
            vec![json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": { "pays": [
                    { "bolt11": "lnbcrt10n1", "payment_hash": "aa01", "status": "pending" },
                    {
                        "bolt11": "lnbcrt10n1",
                        "payment_hash": "aa01",
                        "status": "complete",
                        "amount_msat": "1msat"
                    }
                ]}
            })],
        ));

        let client = ClnClient::new(path, Duration::from_secs(5));
        let pays = client.list_pays("lnbcrt10n1").await.unwrap();
        assert_eq!(pays.len(), 2);
        assert_eq!(pays[0].status, PaymentStatus::Pending);
        assert_eq!(pays[0].amount_msat, None);
        assert_eq!(pays[1].status, PaymentStatus::Complete);
        assert_eq!(pays[1].amount_msat, Some(Msat(1)));
        server.await.unwrap();
    }
}
