//! Typed access to the blockchain node.

use async_trait::async_trait;
use faucet_common::utils::converter::{parse_quantity, to_hex};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, trace};

use crate::address::Address;
use crate::error::{FaucetError, FaucetResult};

/// Lowest gas price the faucet will ever use.
pub const MIN_GAS_PRICE: u128 = 1;

/// The node operations the faucet depends on. Each call is one request/response.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Balance of `address` in wei.
    async fn get_balance(&self, address: &Address) -> FaucetResult<u128>;

    /// Transaction count of `address` including transactions still in the pool.
    async fn get_pending_nonce(&self, address: &Address) -> FaucetResult<u64>;

    /// Minimum gas price of the latest block, never below [`MIN_GAS_PRICE`].
    async fn get_gas_price(&self) -> FaucetResult<u128>;

    /// True while the node is still catching up with the network head.
    async fn is_syncing(&self) -> FaucetResult<bool>;

    /// Submits a signed transaction, returning its hash as reported by the node.
    async fn send_raw_transaction(&self, raw: &[u8]) -> FaucetResult<String>;
}

/// Clamps a reported minimum gas price to a usable value.
pub fn clamp_gas_price(reported: u128) -> u128 {
    reported.max(MIN_GAS_PRICE)
}

/// JSON-RPC 2.0 client for an RSK/Ethereum style node.
pub struct JsonRpcChainClient {
    rpc_url: String,
    client: reqwest::Client,
}

impl JsonRpcChainClient {
    pub fn new(rpc_url: String, timeout: Duration) -> FaucetResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FaucetError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self { rpc_url, client })
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn call(&self, method: &str, params: Value) -> FaucetResult<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });
        trace!("RPC -> {} {}", method, payload["params"]);

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| FaucetError::Rpc(format!("{} request failed: {}", method, e)))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| FaucetError::Rpc(format!("{} invalid response: {}", method, e)))?;

        extract_result(method, body)
    }
}

fn extract_result(method: &str, mut body: Value) -> FaucetResult<Value> {
    if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
        return Err(FaucetError::Rpc(format!("{} returned error: {}", method, error)));
    }

    match body.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(FaucetError::Rpc(format!("{} response has no result", method))),
    }
}

fn quantity(method: &str, value: &Value) -> FaucetResult<u128> {
    let text = value
        .as_str()
        .ok_or_else(|| FaucetError::Rpc(format!("{} expected a quantity, got {}", method, value)))?;
    parse_quantity(text).map_err(|e| FaucetError::Rpc(format!("{}: {}", method, e)))
}

fn parse_gas_price(block: &Value) -> FaucetResult<u128> {
    match block.get("minimumGasPrice") {
        Some(Value::String(_)) => {
            let reported = quantity("eth_getBlockByNumber", &block["minimumGasPrice"])?;
            Ok(clamp_gas_price(reported))
        }
        _ => Ok(MIN_GAS_PRICE),
    }
}

fn parse_syncing(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Null => false,
        _ => true,
    }
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn get_balance(&self, address: &Address) -> FaucetResult<u128> {
        let result = self
            .call("eth_getBalance", json!([address.to_string(), "latest"]))
            .await?;
        quantity("eth_getBalance", &result)
    }

    async fn get_pending_nonce(&self, address: &Address) -> FaucetResult<u64> {
        let result = self
            .call("eth_getTransactionCount", json!([address.to_string(), "pending"]))
            .await?;
        let nonce = quantity("eth_getTransactionCount", &result)?;
        u64::try_from(nonce).map_err(|_| FaucetError::Rpc(format!("nonce out of range: {}", nonce)))
    }

    async fn get_gas_price(&self) -> FaucetResult<u128> {
        let block = self
            .call("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let gas_price = parse_gas_price(&block)?;
        debug!("Latest block minimum gas price: {}", gas_price);
        Ok(gas_price)
    }

    async fn is_syncing(&self) -> FaucetResult<bool> {
        let result = self.call("eth_syncing", json!([])).await?;
        Ok(parse_syncing(&result))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> FaucetResult<String> {
        let result = self
            .call("eth_sendRawTransaction", json!([to_hex(raw)]))
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| FaucetError::Rpc(format!("eth_sendRawTransaction expected a hash, got {}", result)))
    }
}
