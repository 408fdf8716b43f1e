//! Unit tests for the EVM JSON-RPC client
//!
//! Every test talks to a wiremock server standing in for an anvil/hardhat node.

use chain_clients_evm::abi::{self, AbiArg};
use chain_clients_evm::{EvmClient, Impersonation, JsonRpcFailure, TxRequest};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

const DUMMY_CONTRACT_ADDR: &str = "0x00000000000000000000000000000000000000c1";
const DUMMY_SENDER_ADDR: &str = "0x00000000000000000000000000000000000000c2";
const DUMMY_TX_HASH: &str = "0x0000000000000000000000000000000000000000000000000000000000000abc";

fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": 1
    }))
}

fn rpc_error(code: i64, message: &str, data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "error": { "code": code, "message": message, "data": data },
        "id": 1
    }))
}

/// ABI-encodes `Error(string)` revert data.
fn revert_payload(reason: &str) -> String {
    let mut bytes = abi::selector("Error(string)").to_vec();
    bytes.extend_from_slice(&abi::encode_uint(32));
    bytes.extend_from_slice(&abi::encode_uint(reason.len() as u128));
    let mut padded = reason.as_bytes().to_vec();
    padded.resize(reason.len().div_ceil(32) * 32, 0);
    bytes.extend_from_slice(&padded);
    format!("0x{}", hex::encode(bytes))
}

fn dummy_tx() -> TxRequest {
    TxRequest {
        from: DUMMY_SENDER_ADDR.to_string(),
        to: DUMMY_CONTRACT_ADDR.to_string(),
        data: abi::encode_call("harvest()", &[]).unwrap(),
        value: 0,
    }
}

// ============================================================================
// READS
// ============================================================================

/// What is tested: get_block_number() and get_block_timestamp() decode hex quantities
/// Why: Time-dependent scenarios read the chain clock through these calls
#[tokio::test]
async fn test_block_number_and_timestamp() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_blockNumber" })))
        .respond_with(rpc_result(json!("0x10")))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getBlockByNumber" })))
        .respond_with(rpc_result(json!({ "number": "0x10", "timestamp": "0x6553f100" })))
        .mount(&mock_server)
        .await;

    let client = EvmClient::new(&mock_server.uri()).unwrap();
    assert_eq!(client.get_block_number().await.unwrap(), 16);
    assert_eq!(client.get_block_timestamp().await.unwrap(), 1_700_000_000);
}

/// What is tested: call() sends eth_call with the encoded selector and returns raw data
/// Why: Every view the runner reads goes through call()
#[tokio::test]
async fn test_call_returns_raw_data() {
    let mock_server = MockServer::start().await;
    let data = abi::encode_call("estimatedTotalAssets()", &[]).unwrap();
    let word = format!("0x{}", hex::encode(abi::encode_uint(1_000_000_000)));

    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "eth_call",
            "params": [{ "to": DUMMY_CONTRACT_ADDR, "data": data }]
        })))
        .respond_with(rpc_result(json!(word)))
        .mount(&mock_server)
        .await;

    let client = EvmClient::new(&mock_server.uri()).unwrap();
    let result = client.call(DUMMY_CONTRACT_ADDR, &data).await.unwrap();
    assert_eq!(abi::decode_uint(&result, 0).unwrap(), 1_000_000_000);
}

/// What is tested: a node error surfaces as a downcastable JsonRpcFailure with its revert reason
/// Why: The runner tells rejected calls apart from transport failures by this downcast
#[tokio::test]
async fn test_revert_is_json_rpc_failure() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(rpc_error(3, "execution reverted", json!(revert_payload("!authorized"))))
        .mount(&mock_server)
        .await;

    let client = EvmClient::new(&mock_server.uri()).unwrap();
    let err = client.call(DUMMY_CONTRACT_ADDR, "0x4641257d").await.unwrap_err();
    let failure = err.downcast_ref::<JsonRpcFailure>().expect("JsonRpcFailure");
    assert_eq!(failure.method, "eth_call");
    assert_eq!(failure.code, 3);
    assert_eq!(failure.revert_reason(), "!authorized");
}

/// What is tested: revert_reason() falls back to the message when no payload is attached
/// Why: Hardhat and older nodes only report the reason in the message text
#[test]
fn test_revert_reason_from_message() {
    let failure = JsonRpcFailure {
        method: "eth_sendTransaction".to_string(),
        code: -32603,
        message: "VM Exception while processing transaction: reverted with reason string '!healthcheck'"
            .to_string(),
        data: None,
    };
    assert_eq!(failure.revert_reason(), "!healthcheck");

    let nested = JsonRpcFailure {
        method: "eth_call".to_string(),
        code: -32603,
        message: "Error".to_string(),
        data: Some(json!({ "message": "reverted", "data": revert_payload("!want") })),
    };
    assert_eq!(nested.revert_reason(), "!want");
}

/// What is tested: a malformed Error(string) payload with an oversized length falls back to the message
/// Why: Revert data comes from the node; a bogus length word must not panic the runner
#[test]
fn test_malformed_revert_payload_falls_back_to_message() {
    let mut bytes = abi::selector("Error(string)").to_vec();
    bytes.extend_from_slice(&abi::encode_uint(32));
    bytes.extend_from_slice(&[0xff; 32]);
    bytes.extend_from_slice(b"!authorized");
    let failure = JsonRpcFailure {
        method: "eth_call".to_string(),
        code: 3,
        message: "execution reverted: !authorized".to_string(),
        data: Some(json!(format!("0x{}", hex::encode(bytes)))),
    };
    assert_eq!(failure.revert_reason(), "!authorized");
}

/// What is tested: an unreachable node is a plain error, not a JsonRpcFailure
/// Why: Transport failures must not be mistaken for collaborator rejections
#[tokio::test]
async fn test_unreachable_node_is_not_json_rpc_failure() {
    let client = EvmClient::new("http://127.0.0.1:1").unwrap();
    let err = client.get_block_number().await.unwrap_err();
    assert!(err.downcast_ref::<JsonRpcFailure>().is_none());
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

/// What is tested: send_transaction() returns the hash and wait_for_receipt() returns the mined receipt
/// Why: State-mutating steps submit through the node and inspect status and logs
#[tokio::test]
async fn test_send_transaction_and_wait_for_receipt() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "eth_sendTransaction",
            "params": [{ "from": DUMMY_SENDER_ADDR, "to": DUMMY_CONTRACT_ADDR, "value": "0x0" }]
        })))
        .respond_with(rpc_result(json!(DUMMY_TX_HASH)))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getTransactionReceipt" })))
        .respond_with(rpc_result(json!({
            "transactionHash": DUMMY_TX_HASH,
            "blockNumber": "0x11",
            "status": "0x1",
            "logs": [{
                "address": DUMMY_CONTRACT_ADDR,
                "topics": [abi::event_topic("Harvested(uint256,uint256,uint256,uint256)")],
                "data": "0x",
                "logIndex": "0x0"
            }]
        })))
        .mount(&mock_server)
        .await;

    let client = EvmClient::new(&mock_server.uri()).unwrap();
    let hash = client.send_transaction(&dummy_tx()).await.unwrap();
    assert_eq!(hash, DUMMY_TX_HASH);

    let receipt = client.wait_for_receipt(&hash).await.unwrap();
    assert!(receipt.succeeded());
    assert_eq!(receipt.logs.len(), 1);
    assert_eq!(receipt.logs[0].address, DUMMY_CONTRACT_ADDR);
}

/// What is tested: wait_for_receipt() gives up after the receipt timeout
/// Why: A stalled node must fail the step instead of hanging the run
#[tokio::test]
async fn test_wait_for_receipt_times_out() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getTransactionReceipt" })))
        .respond_with(rpc_result(serde_json::Value::Null))
        .mount(&mock_server)
        .await;

    let client = EvmClient::new(&mock_server.uri())
        .unwrap()
        .with_receipt_timeout(Duration::from_millis(250));
    let err = client.wait_for_receipt(DUMMY_TX_HASH).await.unwrap_err();
    assert!(err.to_string().contains("not mined"));
}

/// What is tested: a transaction with status 0x0 is reported as not succeeded
/// Why: Mined-but-reverted transactions must be replayed for their reason
#[test]
fn test_receipt_status_failure() {
    let receipt: chain_clients_evm::EvmReceipt = serde_json::from_value(json!({
        "transactionHash": DUMMY_TX_HASH,
        "status": "0x0"
    }))
    .unwrap();
    assert!(!receipt.succeeded());
    assert!(receipt.logs.is_empty());
}

// ============================================================================
// DEV-CHAIN CONTROLS
// ============================================================================

/// What is tested: snapshot() returns the node id and revert_to() accepts it
/// Why: Each scenario runs on a snapshot that is restored afterwards
#[tokio::test]
async fn test_snapshot_and_revert() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "evm_snapshot" })))
        .respond_with(rpc_result(json!("0x1")))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "evm_revert", "params": ["0x1"] })))
        .respond_with(rpc_result(json!(true)))
        .mount(&mock_server)
        .await;

    let client = EvmClient::new(&mock_server.uri()).unwrap();
    let id = client.snapshot().await.unwrap();
    assert_eq!(id, "0x1");
    client.revert_to(&id).await.unwrap();
}

/// What is tested: revert_to() fails when the node answers false
/// Why: A silently failed restore would leak state into the next scenario
#[tokio::test]
async fn test_revert_refused() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "evm_revert" })))
        .respond_with(rpc_result(json!(false)))
        .mount(&mock_server)
        .await;

    let client = EvmClient::new(&mock_server.uri()).unwrap();
    let err = client.revert_to("0x9").await.unwrap_err();
    assert!(err.to_string().contains("refused"));
}

/// What is tested: time travel sends evm_increaseTime then evm_mine
/// Why: Locked profit and triggers depend on the chain clock moving
#[tokio::test]
async fn test_increase_time_and_mine() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "evm_increaseTime", "params": [21600] })))
        .respond_with(rpc_result(json!(21600)))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "evm_mine" })))
        .respond_with(rpc_result(json!("0x0")))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = EvmClient::new(&mock_server.uri()).unwrap();
    client.increase_time(21600).await.unwrap();
    client.mine(2).await.unwrap();
}

/// What is tested: impersonate() and set_balance() use the namespace of the node flavour
/// Why: Anvil and hardhat expose the same cheats under different prefixes
#[tokio::test]
async fn test_impersonation_namespaces() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "anvil_impersonateAccount" })))
        .respond_with(rpc_result(serde_json::Value::Null))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "hardhat_setBalance",
            "params": [DUMMY_SENDER_ADDR, "0xde0b6b3a7640000"]
        })))
        .respond_with(rpc_result(json!(true)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = EvmClient::new(&mock_server.uri()).unwrap();
    client.impersonate(DUMMY_SENDER_ADDR, Impersonation::Anvil).await.unwrap();
    client
        .set_balance(DUMMY_SENDER_ADDR, 1_000_000_000_000_000_000, Impersonation::Hardhat)
        .await
        .unwrap();
}

/// What is tested: encode_call() packs address and uint arguments after the selector
/// Why: Calldata for every transaction is built this way
#[test]
fn test_encode_call_with_arguments() {
    let data = abi::encode_call(
        "updateStrategyDebtRatio(address,uint256)",
        &[AbiArg::Address(DUMMY_CONTRACT_ADDR), AbiArg::Uint(5_000)],
    )
    .unwrap();
    // selector + two words
    assert_eq!(data.len(), 2 + 8 + 128);
    assert_eq!(abi::decode_address(&format!("0x{}", &data[10..]), 0).unwrap(), DUMMY_CONTRACT_ADDR);
    assert_eq!(abi::decode_uint(&format!("0x{}", &data[10..]), 1).unwrap(), 5_000);
}
