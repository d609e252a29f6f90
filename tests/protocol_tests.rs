//! Tests for the wire protocol types
//!
//! Round-trips the JSON request/response shapes and checks that the
//! compact response encoding leaves absent fields out entirely.

use meridiankv::error::MeridianError;
use meridiankv::protocol::{Request, Response};
use serde_json::json;

// =============================================================================
// Requests
// =============================================================================

#[test]
fn test_parse_get() {
    let request: Request = serde_json::from_str(r#"{"op":"get","key":"hello"}"#).unwrap();
    assert_eq!(
        request,
        Request::Get {
            key: "hello".to_string()
        }
    );
}

#[test]
fn test_parse_set_with_default_debug_flag() {
    let request: Request =
        serde_json::from_str(r#"{"op":"set","key":"k","value":"v"}"#).unwrap();
    assert_eq!(
        request,
        Request::Set {
            key: "k".to_string(),
            value: "v".to_string(),
            debug_simulate_fail: false,
        }
    );

    let request: Request =
        serde_json::from_str(r#"{"op":"set","key":"k","value":"v","debug_simulate_fail":true}"#)
            .unwrap();
    assert!(matches!(
        request,
        Request::Set {
            debug_simulate_fail: true,
            ..
        }
    ));
}

#[test]
fn test_parse_bulkset_pairs() {
    let request: Request =
        serde_json::from_str(r#"{"op":"bulkset","pairs":[["a","1"],["b","2"]]}"#).unwrap();
    match request {
        Request::BulkSet { pairs, .. } => {
            assert_eq!(
                pairs,
                vec![
                    ("a".to_string(), "1".to_string()),
                    ("b".to_string(), "2".to_string())
                ]
            );
        }
        other => panic!("expected bulkset, got {:?}", other),
    }
}

#[test]
fn test_parse_search_ops() {
    let request: Request = serde_json::from_str(r#"{"op":"search","query":"word"}"#).unwrap();
    assert!(matches!(request, Request::Search { .. }));

    let request: Request =
        serde_json::from_str(r#"{"op":"search_similar","query":"word"}"#).unwrap();
    match request {
        Request::SearchSimilar { top_k, .. } => assert_eq!(top_k, 10),
        other => panic!("expected search_similar, got {:?}", other),
    }

    let request: Request =
        serde_json::from_str(r#"{"op":"search_similar","query":"word","top_k":3}"#).unwrap();
    assert!(matches!(request, Request::SearchSimilar { top_k: 3, .. }));
}

#[test]
fn test_unknown_op_rejected() {
    assert!(serde_json::from_str::<Request>(r#"{"op":"explode","key":"k"}"#).is_err());
    assert!(serde_json::from_str::<Request>(r#"{"key":"k"}"#).is_err());
    assert!(serde_json::from_str::<Request>("[1,2,3]").is_err());
}

// =============================================================================
// Responses
// =============================================================================

#[test]
fn test_plain_ok_is_compact() {
    let encoded = serde_json::to_string(&Response::ok()).unwrap();
    assert_eq!(encoded, r#"{"ok":true}"#);
}

#[test]
fn test_value_response() {
    let encoded = serde_json::to_string(&Response::with_value("world".to_string())).unwrap();
    assert_eq!(encoded, r#"{"ok":true,"value":"world"}"#);
}

#[test]
fn test_not_found_response() {
    let encoded = serde_json::to_string(&Response::not_found()).unwrap();
    assert_eq!(encoded, r#"{"ok":true,"found":false}"#);
}

#[test]
fn test_error_codes() {
    let response = Response::from_error(&MeridianError::IndexesDisabled);
    assert_eq!(response.error.as_deref(), Some("indexes_disabled"));
    assert!(!response.ok);

    let response = Response::from_error(&MeridianError::Unavailable("no majority".to_string()));
    assert_eq!(response.error.as_deref(), Some("unavailable"));

    let response = Response::protocol_error("bad json");
    assert_eq!(response.error.as_deref(), Some("protocol"));
}

#[test]
fn test_not_primary_hint() {
    let response = Response::from_error(&MeridianError::NotPrimary { kv_port: Some(7402) });
    let encoded = serde_json::to_value(&response).unwrap();
    assert_eq!(encoded["error"], "not_primary");
    assert_eq!(encoded["hint"]["primary_kv_port"], 7402);

    let response = Response::from_error(&MeridianError::NotPrimary { kv_port: None });
    let encoded = serde_json::to_value(&response).unwrap();
    assert_eq!(encoded["error"], "not_primary");
    assert!(encoded.get("hint").is_none());
}

#[test]
fn test_request_roundtrip() {
    let original = Request::BulkSet {
        pairs: vec![("k".to_string(), "v".to_string())],
        debug_simulate_fail: false,
    };
    let encoded = serde_json::to_value(&original).unwrap();
    assert_eq!(encoded["op"], "bulkset");
    let decoded: Request = serde_json::from_value(encoded).unwrap();
    assert_eq!(decoded, original);

    let encoded = serde_json::to_value(Request::SearchSimilar {
        query: "q".to_string(),
        top_k: 5,
    })
    .unwrap();
    assert_eq!(encoded["op"], "search_similar");
    assert_eq!(json!(5), encoded["top_k"]);
}
