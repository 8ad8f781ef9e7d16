mod common;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use common::*;
use serde_json::{json, Value};

#[tokio::test]
async fn secured_hop_rewraps_envelope_toward_capable_endpoint() {
    let (addr, _state) = start_secured_server("s").await;

    let mut b = TestClient::connect_secured(&addr, "bob", "s").await;
    b.register(
        json!([{"type": "service", "value": "video-call"}]),
        Some(json!({"security": {"integrity": true, "encryption": true}})),
    )
    .await;

    // A advertises nothing, so its hop stays plaintext.
    let mut a = TestClient::connect(&addr, "alice").await;
    a.send(
        "connect",
        json!({
            "offer": "v=0..o",
            "criteria": [{"type": "service", "value": "video-call"}]
        }),
    )
    .await;
    let ack = a.recv_response().await;
    assert_eq!(ack["status"], 200);

    // The raw frame entering B's transport carries a populated envelope.
    let raw = b.recv_raw().await;
    let sec = &raw["security"];
    assert_eq!(sec["enc"], "AES-GCM");
    assert_eq!(sec["mac"], "HMAC-SHA256");
    assert!(sec["ciphertext"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(sec["iv"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(sec["signature"].as_str().is_some_and(|s| !s.is_empty()));
    // Payload fields are absorbed into the ciphertext.
    assert!(raw.get("offer").is_none());

    // After unpack B sees the offer A sent, with A's identity verbatim.
    let mut unpacked = raw.clone();
    b.keys.as_ref().unwrap().unprotect(&mut unpacked).unwrap();
    assert_eq!(unpacked["message_type"], "connect");
    assert_eq!(unpacked["offer"], "v=0..o");
    assert_eq!(unpacked["source_id"], a.source_id.as_str());
    assert_eq!(unpacked["message_id"], 1);
}

#[tokio::test]
async fn client_protected_request_is_accepted_by_relay() {
    let (addr, _state) = start_secured_server("s").await;

    let mut b = TestClient::connect_secured(&addr, "bob", "s").await;
    // Register through a signed and encrypted envelope.
    let msg = b.build(
        "register",
        json!({
            "criteria": [{"type": "service", "value": "video-call"}],
            "capabilities": {"security": {"integrity": true, "encryption": true}}
        }),
    );
    let mut protected = msg.clone();
    b.keys
        .as_ref()
        .unwrap()
        .protect(
            &mut protected,
            swap_common::SecurityCaps {
                integrity: true,
                encryption: true,
            },
        )
        .unwrap();
    b.send_value(&protected).await;

    // The ack comes back protected (B advertised support) and decodes
    // to a 200.
    let ack = b.recv_response().await;
    assert_eq!(ack["status"], 200);
    assert_eq!(ack["response_to"], msg["message_id"]);
}

#[tokio::test]
async fn tampered_ciphertext_is_answered_with_message_malformatted() {
    let (addr, _state) = start_secured_server("s").await;

    let mut a = TestClient::connect_secured(&addr, "alice", "s").await;
    let msg = a.build(
        "connect",
        json!({
            "offer": "v=0..o",
            "criteria": [{"type": "service", "value": "video-call"}]
        }),
    );
    let mut protected = msg.clone();
    a.keys
        .as_ref()
        .unwrap()
        .protect(
            &mut protected,
            swap_common::SecurityCaps {
                integrity: true,
                encryption: true,
            },
        )
        .unwrap();

    // Flip one byte of the ciphertext.
    let ct = protected["security"]["ciphertext"]
        .as_str()
        .unwrap()
        .to_string();
    let mut bytes = BASE64.decode(ct).unwrap();
    bytes[0] ^= 0x01;
    protected["security"]["ciphertext"] = Value::String(BASE64.encode(bytes));

    a.send_value(&protected).await;

    let response = a.recv_response().await;
    assert_eq!(response["response_to"], msg["message_id"]);
    assert!(response["error"]["type"]
        .as_str()
        .unwrap()
        .ends_with("message_malformatted"));
}

#[tokio::test]
async fn envelope_toward_unsecured_relay_is_unauthorized() {
    let (addr, _state) = start_server().await;

    let mut a = TestClient::connect(&addr, "alice").await;
    let keys = swap_common::KeyMaterial::new("s");
    let mut msg = a.build(
        "connect",
        json!({"offer": "o", "criteria": []}),
    );
    keys.protect(
        &mut msg,
        swap_common::SecurityCaps {
            integrity: true,
            encryption: false,
        },
    )
    .unwrap();
    a.send_value(&msg).await;

    let response = a.recv_response().await;
    assert!(response["error"]["type"]
        .as_str()
        .unwrap()
        .ends_with("unauthorized"));
}
