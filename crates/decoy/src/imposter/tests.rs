//! Tests for the imposter module:
//! - Creation envelope deserialization
//! - ImposterManager lifecycle (create, dispatch, delete, port reuse)
//! - Injection gating and fault isolation through the registry
//! - In-flight requests across deletion, independent imposters
//!
//! Imposters let the manager pick their port unless a test is about ports.

use super::*;
use crate::model::{Protocol, Request};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn local_manager() -> Arc<ImposterManager> {
    Arc::new(ImposterManager::new(ManagerSettings {
        host: "127.0.0.1".to_string(),
        ..ManagerSettings::default()
    }))
}

fn config(value: serde_json::Value) -> ImposterConfig {
    serde_json::from_value(value).unwrap()
}

async fn start(manager: &Arc<ImposterManager>, value: serde_json::Value) -> u16 {
    manager.create_imposter(config(value)).await.unwrap().port()
}

fn client() -> SocketAddr {
    "127.0.0.1:50000".parse().unwrap()
}

fn get(path: &str) -> Request {
    Request::http(Protocol::Http, "GET", path, client())
}

#[test]
fn test_imposter_config_default() {
    let config = config(json!({"port": 8080}));
    assert_eq!(config.port, Some(8080));
    assert_eq!(config.protocol, "http");
    assert!(!config.record_requests);
    assert!(config.stubs.is_empty());
}

#[test]
fn test_imposter_config_keeps_raw_stubs() {
    let config = config(json!({
        "protocol": "https",
        "recordRequests": true,
        "stubs": [{
            "predicates": [{"inject": "function (r) { return true; }"}],
            "responses": [{"is": {"body": "x"}}]
        }]
    }));
    assert_eq!(config.port, None);
    assert!(config.record_requests);
    assert_eq!(
        config.stubs[0].predicates[0],
        json!({"inject": "function (r) { return true; }"})
    );
}

#[test]
fn test_uses_injection_detection() {
    let nested = config(json!({
        "stubs": [{"predicates": [{"not": {"or": [{"equals": {"path": "/"}}, {"inject": "x"}]}}]}]
    }));
    assert!(uses_injection(&nested));

    let in_body = config(json!({
        "stubs": [{"responses": [{"is": {"body": {"inject": "just data"}}}]}]
    }));
    assert!(!uses_injection(&in_body));
}

#[tokio::test]
async fn test_create_dispatch_delete() {
    let manager = local_manager();
    let imposter = manager
        .create_imposter(config(json!({
            "protocol": "http",
            "stubs": [{
                "predicates": [{"equals": {"path": "/test"}}],
                "responses": [{"is": {"statusCode": 202, "body": "MATCHED"}}]
            }]
        })))
        .await
        .unwrap();
    let port = imposter.port();
    assert_eq!(manager.count(), 1);

    let response = manager.dispatch(port, get("/test")).await.unwrap();
    assert_eq!(response.status_code, 202);
    assert_eq!(response.body, "MATCHED");

    let response = manager.dispatch(port, get("/other")).await.unwrap();
    assert_eq!(response.status_code, 200);
    assert_eq!(response.body, "");

    let deleted = manager.delete_imposter(port).await.unwrap();
    assert_eq!(deleted.stubs.len(), 1);
    assert!(matches!(
        manager.dispatch(port, get("/test")).await,
        Err(ImposterError::NotFound(p)) if p == port
    ));
}

#[tokio::test]
async fn test_deleting_frees_port_for_reuse() {
    let manager = local_manager();
    let port = start(&manager, json!({"protocol": "http"})).await;
    let envelope = json!({"protocol": "http", "port": port});

    assert!(matches!(
        manager.create_imposter(config(envelope.clone())).await,
        Err(ImposterError::PortInUse(p)) if p == port
    ));

    manager.delete_imposter(port).await.unwrap();
    drop(std::net::TcpListener::bind(("127.0.0.1", port)).unwrap());
    manager.create_imposter(config(envelope)).await.unwrap();
    manager.delete_all().await;
    assert_eq!(manager.count(), 0);
}

#[tokio::test]
async fn test_auto_assigned_port() {
    let manager = local_manager();
    let imposter = manager
        .create_imposter(config(json!({"protocol": "http"})))
        .await
        .unwrap();
    assert!(imposter.port() >= 49152);
    assert_eq!(imposter.to_config().port, Some(imposter.port()));

    let other = start(&manager, json!({"protocol": "http"})).await;
    assert_ne!(other, imposter.port());
    manager.delete_all().await;
}

#[tokio::test]
async fn test_invalid_definitions_are_not_registered() {
    let manager = local_manager();

    assert!(matches!(
        manager
            .create_imposter(config(json!({"protocol": "smtp"})))
            .await,
        Err(ImposterError::InvalidProtocol(_))
    ));
    assert!(matches!(
        manager
            .create_imposter(config(json!({
                "stubs": [{"predicates": [{"equals": {"path": "/"}, "contains": {"path": "/"}}]}]
            })))
            .await,
        Err(ImposterError::InvalidDefinition(_))
    ));
    assert!(matches!(
        manager
            .create_imposter(config(json!({"protocol": "https", "cert": "only a cert"})))
            .await,
        Err(ImposterError::MissingTlsMaterial(_))
    ));
    assert_eq!(manager.count(), 0);
}

#[tokio::test]
async fn test_https_without_material_uses_builtin_pair() {
    let manager = local_manager();
    let imposter = manager
        .create_imposter(config(json!({
            "protocol": "https",
            "stubs": [{"responses": [{"is": {"body": "secure"}}]}]
        })))
        .await
        .unwrap();
    assert_eq!(imposter.protocol(), Protocol::Https);

    let response = manager
        .dispatch(imposter.port(), Request::http(Protocol::Https, "GET", "/", client()))
        .await
        .unwrap();
    assert_eq!(response.body, "secure");
    manager.delete_all().await;
}

#[tokio::test]
async fn test_creation_never_compiles_injected_source() {
    let manager = local_manager();
    let port = start(
        &manager,
        json!({
            "stubs": [
                {
                    "predicates": [{"inject": "return true;"}],
                    "responses": [{"is": {"body": "unreachable"}}]
                },
                {
                    "predicates": [{"equals": {"path": "/boom"}}],
                    "responses": [{"inject": "function () { throw new Error('BOOM'); }"}]
                },
                {"responses": [{"inject": "function (request) { return { body: request.method + ' INJECTED' }; }"}]}
            ]
        }),
    )
    .await;

    // A predicate that fails to compile is a non-match, so the third stub answers
    let response = manager.dispatch(port, get("/")).await.unwrap();
    assert_eq!(response.body, "GET INJECTED");
    assert_eq!(response.header("connection"), Some("close"));

    let response = manager.dispatch(port, get("/boom")).await.unwrap();
    assert_eq!(response.status_code, 500);
    assert!(!response.body.contains("BOOM"));

    // The imposter keeps serving after a fault
    let response = manager.dispatch(port, get("/")).await.unwrap();
    assert_eq!(response.status_code, 200);

    manager.delete_all().await;
}

#[tokio::test]
async fn test_injection_disabled() {
    let manager = Arc::new(ImposterManager::new(ManagerSettings {
        allow_injection: false,
        host: "127.0.0.1".to_string(),
        ..ManagerSettings::default()
    }));

    assert!(matches!(
        manager
            .create_imposter(config(json!({
                "stubs": [{"responses": [{"inject": "function () { return {}; }"}]}]
            })))
            .await,
        Err(ImposterError::InjectionDisabled)
    ));

    let port = start(&manager, json!({})).await;
    let stub = StubDefinition {
        predicates: vec![json!({"inject": "function () { return true; }"})],
        responses: vec![],
    };
    assert!(matches!(
        manager.add_stub(port, stub, None),
        Err(ImposterError::InjectionDisabled)
    ));
    manager.delete_all().await;
}

#[tokio::test]
async fn test_state_is_per_imposter() {
    let manager = local_manager();
    let counter = json!([{
        "responses": [{"inject": "function (req, state) { state.n = (state.n || 0) + 1; return { body: String(state.n) }; }"}]
    }]);
    let first = start(&manager, json!({"stubs": counter.clone()})).await;
    let second = start(&manager, json!({"stubs": counter})).await;

    assert_eq!(manager.dispatch(first, get("/")).await.unwrap().body, "1");
    assert_eq!(manager.dispatch(first, get("/")).await.unwrap().body, "2");
    assert_eq!(manager.dispatch(second, get("/")).await.unwrap().body, "1");

    manager.delete_all().await;
}

#[tokio::test]
async fn test_stub_crud_through_manager() {
    let manager = local_manager();
    let port = start(&manager, json!({})).await;

    let stub = |body: &str| StubDefinition {
        predicates: vec![],
        responses: vec![json!({"is": {"body": body}})],
    };
    manager.add_stub(port, stub("a"), None).unwrap();
    manager.add_stub(port, stub("b"), Some(0)).unwrap();
    assert_eq!(manager.dispatch(port, get("/")).await.unwrap().body, "b");

    manager.replace_stub(port, 0, stub("c")).unwrap();
    assert_eq!(manager.get_stub(port, 0).unwrap(), stub("c"));
    assert_eq!(manager.delete_stub(port, 0).unwrap(), stub("c"));
    assert_eq!(manager.dispatch(port, get("/")).await.unwrap().body, "a");

    assert!(matches!(
        manager.get_stub(port, 9),
        Err(ImposterError::StubIndexOutOfBounds(9))
    ));
    manager.replace_stubs(port, vec![]).unwrap();
    assert_eq!(manager.dispatch(port, get("/")).await.unwrap().body, "");

    manager.delete_all().await;
}

#[tokio::test]
async fn test_recorded_requests() {
    let manager = local_manager();
    let imposter = manager
        .create_imposter(config(json!({"recordRequests": true})))
        .await
        .unwrap();
    let port = imposter.port();

    manager.dispatch(port, get("/one")).await.unwrap();
    let recorded = imposter.get_recorded_requests();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0]["path"], "/one");
    assert!(recorded[0]["timestamp"].is_string());

    imposter.clear_recorded_requests();
    assert!(imposter.get_recorded_requests().is_empty());
    assert_eq!(imposter.get_request_count(), 0);

    manager.delete_all().await;
}

#[tokio::test]
async fn test_replace_all_is_all_or_nothing() {
    let manager = local_manager();
    let kept = start(
        &manager,
        json!({"stubs": [{"responses": [{"is": {"body": "kept"}}]}]}),
    )
    .await;

    let result = manager
        .replace_all(vec![
            config(json!({"stubs": [{"responses": [{"is": {"body": "new"}}]}]})),
            config(json!({"protocol": "smtp"})),
        ])
        .await;
    assert!(matches!(result, Err(ImposterError::InvalidProtocol(_))));
    assert_eq!(manager.count(), 1);
    assert_eq!(manager.dispatch(kept, get("/")).await.unwrap().body, "kept");

    let result = manager
        .replace_all(vec![
            config(json!({"port": 61001})),
            config(json!({"port": 61001})),
        ])
        .await;
    assert!(matches!(result, Err(ImposterError::PortInUse(61001))));
    assert_eq!(manager.count(), 1);

    let created = manager
        .replace_all(vec![config(
            json!({"stubs": [{"responses": [{"is": {"body": "new"}}]}]}),
        )])
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(manager.count(), 1);
    let port = created[0].port();
    assert_eq!(manager.dispatch(port, get("/")).await.unwrap().body, "new");

    manager.delete_all().await;
}

#[tokio::test]
async fn test_delete_lets_in_flight_request_finish() {
    let manager = local_manager();
    let port = start(
        &manager,
        json!({"stubs": [{"responses": [{"inject": "function (request, state, logger, callback) { setTimeout(function () { callback({ body: 'late' }); }, 500); }"}]}]}),
    )
    .await;

    let in_flight = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.dispatch(port, get("/")).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    manager.delete_imposter(port).await.unwrap();
    assert!(!in_flight.is_finished());
    assert!(matches!(
        manager.dispatch(port, get("/")).await,
        Err(ImposterError::NotFound(p)) if p == port
    ));

    let response = in_flight.await.unwrap().unwrap();
    assert_eq!(response.body, "late");
}

#[tokio::test]
async fn test_slow_imposter_does_not_block_another() {
    let manager = local_manager();
    let slow = start(
        &manager,
        json!({"stubs": [{"responses": [{"inject": "function (request, state, logger, callback) { setTimeout(function () { callback({ body: 'slow' }); }, 800); }"}]}]}),
    )
    .await;
    let fast = start(
        &manager,
        json!({"stubs": [{"responses": [{"inject": "function () { return { body: 'fast' }; }"}]}]}),
    )
    .await;

    let pending = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.dispatch(slow, get("/")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    assert_eq!(manager.dispatch(fast, get("/")).await.unwrap().body, "fast");
    assert!(started.elapsed() < Duration::from_millis(600));
    assert!(!pending.is_finished());

    assert_eq!(pending.await.unwrap().unwrap().body, "slow");
    manager.delete_all().await;
}

#[tokio::test]
async fn test_tcp_imposter_over_socket() {
    let manager = local_manager();
    let port = start(
        &manager,
        json!({
            "protocol": "tcp",
            "stubs": [
                {
                    "predicates": [{"equals": {"data": "ping"}}],
                    "responses": [{"inject": "function (request) { return { data: request.data + ' pong' }; }"}]
                },
                {
                    "predicates": [{"equals": {"data": "fail"}}],
                    "responses": [{"inject": "function () { throw new Error('secret'); }"}]
                }
            ]
        }),
    )
    .await;

    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    stream.write_all(b"ping").await.unwrap();
    let mut buf = vec![0u8; 64];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"ping pong");

    stream.write_all(b"fail").await.unwrap();
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], TCP_FAULT_PAYLOAD.as_bytes());

    drop(stream);
    manager.delete_all().await;
}
