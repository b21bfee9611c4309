use cln_client::{rpc_socket_path, ClnClient, NodeService};
use std::path::PathBuf;
use std::time::Duration;

// needs a running regtest lightningd; LIGHTNING_DIR points at its lightning dir
#[tokio::test]
async fn cln_system_test() {
    let dir = PathBuf::from(std::env::var("LIGHTNING_DIR").expect("LIGHTNING_DIR"));
    let client = ClnClient::new(rpc_socket_path(&dir, "regtest"), Duration::from_secs(8));
    let info = client.status().await.unwrap();
    assert_eq!(info.id.len(), 66);
    let funds = client.list_funds().await.unwrap();
    println!("balances: {:?}", funds.balances());
    let channels = client.list_peer_channels().await.unwrap();
    println!("channels: {:?}", channels);
}
