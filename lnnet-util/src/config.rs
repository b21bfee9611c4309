/// Network names accepted on the command line
pub const NETWORK_NAMES: [&'static str; 4] = ["regtest", "testnet", "signet", "bitcoin"];

pub const DEFAULT_NETWORK: &str = "regtest";

pub const DEFAULT_BITCOIN_RPC_HOST: &str = "127.0.0.1";
pub const DEFAULT_BITCOIN_RPC_PORT: u16 = 18443;
pub const DEFAULT_BITCOIN_RPC_USER: &str = "lnrpc";
pub const DEFAULT_BITCOIN_RPC_PASSWORD: &str = "lnrpcpass";

/// Backend wallet that funds the nodes and receives mined coins
pub const DEFAULT_WALLET_NAME: &str = "lnnet";

/// Node `i` listens for peers on `DEFAULT_NODE_BASE_PORT + i`
pub const DEFAULT_NODE_HOST: &str = "127.0.0.1";
pub const DEFAULT_NODE_BASE_PORT: u16 = 9735;

/// Upper bound on any single RPC round trip
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 8;

pub const DEFAULT_RUNTIME_DIR: &str = "runtime";

/// Log file stem, written to the runtime dir
pub const LOG_NAME: &str = "lnnet";
