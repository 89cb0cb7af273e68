//! Transfer transaction construction and signing.
//!
//! Produces legacy RLP transactions signed per EIP-155, which is what RSK
//! nodes accept from `eth_sendRawTransaction`.

use k256::ecdsa::{RecoveryId, Signature, SigningKey};
use rlp::RlpStream;
use std::sync::Arc;

use crate::address::Address;
use crate::config::PayoutPolicy;
use crate::error::{FaucetError, FaucetResult};

/// A transfer that exists only for the duration of one dispense.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub value: u128,
    pub to: Address,
}

impl PendingTransaction {
    fn append_body(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&be_trimmed(&self.gas_price.to_be_bytes()));
        stream.append(&self.gas_limit);
        stream.append(&self.to.0.to_vec());
        stream.append(&be_trimmed(&self.value.to_be_bytes()));
        stream.append_empty_data(); // data
    }

    /// Keccak-256 of `rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0])`.
    pub fn signing_hash(&self, chain_id: u64) -> [u8; 32] {
        let mut stream = RlpStream::new_list(9);
        self.append_body(&mut stream);
        stream.append(&chain_id);
        stream.append_empty_data();
        stream.append_empty_data();
        keccak_hash::keccak(stream.out()).0
    }

    pub fn encode_signed(&self, chain_id: u64, signature: &Signature, recovery_id: RecoveryId) -> Vec<u8> {
        let v = chain_id * 2 + 35 + u64::from(recovery_id.is_y_odd());
        let (r, s) = signature.split_bytes();

        let mut stream = RlpStream::new_list(9);
        self.append_body(&mut stream);
        stream.append(&v);
        stream.append(&be_trimmed(&r));
        stream.append(&be_trimmed(&s));
        stream.out().to_vec()
    }
}

/// Big-endian integer bytes without leading zeros, as RLP requires.
fn be_trimmed(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

/// Builds and signs faucet transfers from the payout policy.
///
/// Holds no mutable state: the same inputs always yield the same bytes.
#[derive(Clone)]
pub struct TransactionSigner {
    policy: Arc<PayoutPolicy>,
}

impl TransactionSigner {
    pub fn new(policy: Arc<PayoutPolicy>) -> Self {
        Self { policy }
    }

    /// Account the transfers are sent from.
    pub fn address(&self) -> Address {
        self.policy.faucet_address
    }

    pub fn pending(&self, to: Address, nonce: u64, gas_price: u128) -> PendingTransaction {
        PendingTransaction {
            nonce,
            gas_price,
            gas_limit: self.policy.gas_limit,
            value: self.policy.dispense_amount,
            to,
        }
    }

    /// Signs a transfer of the payout amount to `to` and returns the raw transaction.
    pub fn build(&self, to: Address, nonce: u64, gas_price: u128) -> FaucetResult<Vec<u8>> {
        let tx = self.pending(to, nonce, gas_price);
        sign(&self.policy.signing_key, self.policy.chain_id, &tx)
    }
}

pub fn sign(key: &SigningKey, chain_id: u64, tx: &PendingTransaction) -> FaucetResult<Vec<u8>> {
    let hash = tx.signing_hash(chain_id);
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(&hash)
        .map_err(|e| FaucetError::Signing(e.to_string()))?;
    Ok(tx.encode_signed(chain_id, &signature, recovery_id))
}

/// Hash under which the node will know a raw transaction.
pub fn transaction_hash(raw: &[u8]) -> [u8; 32] {
    keccak_hash::keccak(raw).0
}
