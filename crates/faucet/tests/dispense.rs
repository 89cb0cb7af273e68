//! End-to-end dispense flow against an in-memory node.

mod common;

use common::*;
use rsk_faucet::verification::NoVerifier;
use rsk_faucet::{Address, DispenseRequest, FaucetError, Rejection, ServiceOptions};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn request(address: &str, token: Option<&str>) -> DispenseRequest {
    DispenseRequest::new(address, token)
}

fn rejection(result: Result<impl std::fmt::Debug, FaucetError>) -> Rejection {
    result
        .expect_err("dispense should have been rejected")
        .rejection()
        .expect("error should be a rejection")
}

fn trimmed(value: u128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

#[tokio::test]
async fn test_dispense_to_fresh_address() {
    let chain = MockChain::new();
    chain.pending_nonce.store(7, Ordering::SeqCst);
    let service = service(chain.clone());

    let receipt = service.dispense(request(DEAD, Some(TOKEN))).await.unwrap();
    assert_eq!(receipt.message(), format!("Successfully sent some SBTCs to {}.", DEAD));
    assert_eq!(receipt.nonce, 7);
    assert_eq!(receipt.amount, "50000000000000000");
    assert!(!service.tracker().is_eligible(DEAD));

    service.shutdown().await;

    let sent = chain.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(receipt.tx_hash, format!("0x{}", hex::encode(keccak_hash::keccak(&sent[0]).0)));

    let tx = rlp::Rlp::new(&sent[0]);
    assert_eq!(tx.item_count().unwrap(), 9);
    assert_eq!(tx.val_at::<u64>(0).unwrap(), 7);
    assert_eq!(tx.val_at::<Vec<u8>>(1).unwrap(), trimmed(60_000_000));
    assert_eq!(tx.val_at::<u64>(2).unwrap(), 21_000);
    let dead: Address = DEAD.to_lowercase().parse().unwrap();
    assert_eq!(tx.val_at::<Vec<u8>>(3).unwrap(), dead.0.to_vec());
    assert_eq!(tx.val_at::<Vec<u8>>(4).unwrap(), trimmed(50_000_000_000_000_000));
    // EIP-155 on chain 31
    let v = tx.val_at::<u64>(6).unwrap();
    assert!(v == 97 || v == 98);

    assert_eq!(service.metrics().dispensed_total.get(), 1);
    assert_eq!(service.metrics().broadcasts_total.get(), 1);
}

#[tokio::test]
async fn test_immediate_retry_is_rejected() {
    let chain = MockChain::new();
    let service = service(chain.clone());

    service.dispense(request(DEAD, Some(TOKEN))).await.unwrap();
    let retry = service.dispense(request(DEAD, Some(TOKEN))).await;
    assert_eq!(rejection(retry), Rejection::AlreadyUsed);

    // Same account in lowercase form
    let lower = service.dispense(request(&DEAD.to_lowercase(), Some(TOKEN))).await;
    assert_eq!(rejection(lower), Rejection::AlreadyUsed);

    service.shutdown().await;
    assert_eq!(chain.sent().len(), 1);
    assert_eq!(service.tracker().len(), 1);
}

#[tokio::test]
async fn test_syncing_node_rejects_before_verification() {
    let chain = MockChain::new();
    chain.syncing.store(true, Ordering::SeqCst);
    let service = service(chain.clone());

    let result = service.dispense(request(DEAD, Some("not-the-token"))).await;
    assert_eq!(rejection(result), Rejection::NodeSyncing);
    assert!(service.tracker().is_eligible(DEAD));

    service.shutdown().await;
    assert!(chain.sent().is_empty());
}

#[tokio::test]
async fn test_guard_order() {
    let chain = MockChain::new();
    chain.syncing.store(true, Ordering::SeqCst);
    let service = service(chain.clone());

    // Address is checked before everything else
    let result = service.dispense(request("0x123", None)).await;
    assert_eq!(rejection(result), Rejection::InvalidAddress);

    // Bad checksum
    let result = service.dispense(request("0x000000000000000000000000000000000000dEaD", Some(TOKEN))).await;
    assert_eq!(rejection(result), Rejection::InvalidAddress);

    // Missing token is reported before the node is asked about sync state
    let result = service.dispense(request(DEAD, None)).await;
    assert_eq!(rejection(result), Rejection::MissingVerification);
    let result = service.dispense(request(DEAD, Some(""))).await;
    assert_eq!(rejection(result), Rejection::MissingVerification);
    assert_eq!(chain.sync_checks.load(Ordering::SeqCst), 0);

    // Already-used is reported before the missing token
    service.tracker().record_grant(OTHER);
    let result = service.dispense(request(OTHER, None)).await;
    assert_eq!(rejection(result), Rejection::AlreadyUsed);

    service.shutdown().await;
    assert!(chain.sent().is_empty());
    assert_eq!(service.metrics().dispensed_total.get(), 0);
}

#[tokio::test]
async fn test_failed_verification_leaves_address_eligible() {
    let chain = MockChain::new();
    let service = service(chain.clone());

    let result = service.dispense(request(DEAD, Some("wrong"))).await;
    assert_eq!(rejection(result), Rejection::VerificationFailed);
    assert!(service.tracker().is_eligible(DEAD));

    service.dispense(request(DEAD, Some(TOKEN))).await.unwrap();

    service.shutdown().await;
    assert_eq!(chain.sent().len(), 1);
}

#[tokio::test]
async fn test_no_verifier_fail_open() {
    let chain = MockChain::new();
    let service = service_with(chain.clone(), Arc::new(NoVerifier), ServiceOptions::default());

    service.dispense(request(DEAD, Some("anything"))).await.unwrap();
    service.shutdown().await;
    assert_eq!(chain.sent().len(), 1);
}

#[tokio::test]
async fn test_no_verifier_fail_closed() {
    let chain = MockChain::new();
    let options = ServiceOptions {
        fail_open_verification: false,
        ..Default::default()
    };
    let service = service_with(chain.clone(), Arc::new(NoVerifier), options);

    let result = service.dispense(request(DEAD, Some("anything"))).await;
    assert_eq!(rejection(result), Rejection::VerificationFailed);
    assert!(service.tracker().is_eligible(DEAD));

    service.shutdown().await;
    assert!(chain.sent().is_empty());
}

#[tokio::test]
async fn test_unreachable_node_records_nothing() {
    let chain = MockChain::new();
    chain.unreachable.store(true, Ordering::SeqCst);
    let service = service(chain.clone());

    let err = service.dispense(request(DEAD, Some(TOKEN))).await.unwrap_err();
    assert!(matches!(err, FaucetError::Rpc(_)));
    assert!(service.tracker().is_eligible(DEAD));
    assert_eq!(service.metrics().dispense_errors_total.get(), 1);

    // Recovers once the node is back
    chain.unreachable.store(false, Ordering::SeqCst);
    service.dispense(request(DEAD, Some(TOKEN))).await.unwrap();

    service.shutdown().await;
    assert_eq!(chain.sent().len(), 1);
}

#[tokio::test]
async fn test_failed_broadcast_keeps_grant() {
    let chain = MockChain::new();
    chain.fail_broadcast.store(true, Ordering::SeqCst);
    let service = service(chain.clone());

    service.dispense(request(DEAD, Some(TOKEN))).await.unwrap();
    service.shutdown().await;

    assert_eq!(chain.sent().len(), 1);
    assert!(!service.tracker().is_eligible(DEAD));
    assert_eq!(service.metrics().broadcast_failures_total.get(), 1);
    assert_eq!(service.metrics().broadcasts_total.get(), 0);
}

#[tokio::test]
async fn test_back_to_back_dispenses_use_distinct_nonces() {
    let chain = MockChain::new();
    chain.pending_nonce.store(5, Ordering::SeqCst);
    let service = service(chain.clone());

    let first = service.dispense(request(DEAD, Some(TOKEN))).await.unwrap();
    let second = service.dispense(request(OTHER, Some(TOKEN))).await.unwrap();
    assert_eq!(first.nonce, 5);
    assert_eq!(second.nonce, 6);

    // Node moves past the local cursor
    chain.wait_for_sent(2).await;
    chain.pending_nonce.store(10, Ordering::SeqCst);
    let third = service
        .dispense(request("0xFb6916095CA1dF60bb79CE92ce3Ea74C37c5D359", Some(TOKEN)))
        .await
        .unwrap();
    assert_eq!(third.nonce, 10);

    service.shutdown().await;
    assert_eq!(chain.sent().len(), 3);
}

#[tokio::test]
async fn test_dropped_transaction_does_not_leave_nonce_gap() {
    let chain = MockChain::new();
    chain.pending_nonce.store(5, Ordering::SeqCst);
    chain.evict.store(true, Ordering::SeqCst);
    let service = service(chain.clone());

    let addresses = [DEAD, OTHER, "0xFb6916095CA1dF60bb79CE92ce3Ea74C37c5D359"];
    for (sent, address) in addresses.iter().enumerate() {
        let receipt = service.dispense(request(address, Some(TOKEN))).await.unwrap();
        // The node accepted and then dropped every earlier transfer.
        assert_eq!(receipt.nonce, 5);

        chain.wait_for_sent(sent + 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    service.shutdown().await;
    assert_eq!(service.metrics().broadcasts_total.get(), 3);
}

#[tokio::test]
async fn test_overlapping_request_waits_for_failed_attempt() {
    let chain = MockChain::new();
    *chain.sync_delay.lock().unwrap() = Some(Duration::from_millis(100));
    let service = Arc::new(service(chain.clone()));

    let failing = {
        let service = service.clone();
        tokio::spawn(async move { service.dispense(request(DEAD, Some("wrong"))).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let valid = {
        let service = service.clone();
        tokio::spawn(async move { service.dispense(request(DEAD, Some(TOKEN))).await })
    };

    assert_eq!(rejection(failing.await.unwrap()), Rejection::VerificationFailed);
    valid.await.unwrap().unwrap();
    assert!(!service.tracker().is_eligible(DEAD));
    assert_eq!(service.tracker().in_flight(), 0);

    service.shutdown().await;
    assert_eq!(chain.sent().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_for_same_address() {
    let chain = MockChain::new();
    *chain.sync_delay.lock().unwrap() = Some(Duration::from_millis(20));
    let service = Arc::new(service(chain.clone()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.dispense(request(DEAD, Some(TOKEN))).await })
        })
        .collect();

    let mut granted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => granted += 1,
            Err(e) => assert_eq!(e.rejection(), Some(Rejection::AlreadyUsed)),
        }
    }
    assert_eq!(granted, 1);

    service.shutdown().await;
    assert_eq!(chain.sent().len(), 1);
    assert_eq!(service.tracker().len(), 1);
}

#[tokio::test]
async fn test_balance_in_sbtc() {
    let chain = MockChain::new();
    *chain.balance.lock().unwrap() = 1_500_000_000_000_000_000;
    let service = service(chain.clone());

    assert_eq!(service.balance().await.unwrap(), "1.5");

    let status = service.get_status().await.unwrap();
    assert_eq!(status.address, FAUCET_ADDRESS);
    assert_eq!(status.dispense_amount, "0.05");
    assert_eq!(status.chain_id, 31);
    service.shutdown().await;
}
