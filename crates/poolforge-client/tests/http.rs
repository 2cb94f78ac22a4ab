//! End-to-end Tests over HTTP
//!
//! Serves the real router on a local port and talks to it with `HttpJobApi`.

mod common;

use futures::StreamExt;
use poolforge_client::collaborators::{MockLedger, MockWallet};
use poolforge_client::{
    ClientError, HttpJobApi, JobApi, MemoryJobIdStore, Orchestrator, OrchestratorConfig,
    ResourceRequest, State,
};
use poolforge_core::{CreateStatus, JobStatus, SubscriptionEvent};
use std::sync::Arc;
use std::time::Duration;

use common::{pool_request, TestServer, ADMIN_TOKEN, NETWORK};

/// Serve the router for `server` and return its base URL
async fn serve(server: &TestServer) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = poolforge_server::create_router(server.app_state());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_orchestrator_over_http() {
    let server = TestServer::start(3).await;
    let api = Arc::new(HttpJobApi::new(serve(&server).await).unwrap());

    let orchestrator = Orchestrator::new(
        api.clone(),
        Arc::new(MockLedger::new()),
        Arc::new(MockWallet::new()),
        Arc::new(MemoryJobIdStore::new()),
    )
    .with_config(OrchestratorConfig {
        retry_delay: Duration::from_millis(5),
        subscription_timeout: Some(Duration::from_secs(30)),
        ..OrchestratorConfig::default()
    });

    let machine = orchestrator.run(&pool_request()).await.unwrap();
    assert_eq!(machine.state, State::Completed, "errors: {:?}", machine.errors);

    let key = machine.resource_public_key.unwrap();
    assert!(machine.message.unwrap().contains(&key));

    // A second confirmation is a success noting the earlier one
    let job_id = machine.job_id.unwrap();
    let again = api.confirm_job(&job_id).await.unwrap();
    assert!(again.contains("already confirmed"));
    assert!(again.contains(&key));
}

#[tokio::test]
async fn test_job_endpoints() {
    let server = TestServer::start(2).await;
    let api = HttpJobApi::new(serve(&server).await).unwrap();

    let created = api
        .create_job(pool_request().with_job_id("http-1"))
        .await
        .unwrap();
    assert_eq!(created.id, "http-1");
    assert_eq!(created.status, CreateStatus::Created);

    let mut events = api.subscribe_job("http-1").await.unwrap();
    let snapshot = match events.next().await {
        Some(Ok(SubscriptionEvent::Completed(snapshot))) => snapshot,
        other => panic!("expected completed event, got {:?}", other),
    };
    drop(events);

    let status = api.status_job("http-1").await.unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.resource_public_key, snapshot.resource_public_key);
    assert!(!status.transaction_payload.unwrap().is_empty());

    let repeated = api
        .create_job(pool_request().with_job_id("http-1"))
        .await
        .unwrap();
    assert_eq!(repeated.status, CreateStatus::Completed);

    // Replaying a finished job's subscription yields one event then closes
    let replay: Vec<_> = api.subscribe_job("http-1").await.unwrap().collect().await;
    assert_eq!(replay.len(), 1);
    assert!(matches!(replay[0], Ok(SubscriptionEvent::Completed(_))));
}

#[tokio::test]
async fn test_factory_over_http() {
    let server = TestServer::start(2).await;
    let api = HttpJobApi::new(serve(&server).await).unwrap();

    let request = ResourceRequest::factory("U1", NETWORK).with_job_id("factory-1");
    api.create_job(request).await.unwrap();

    let mut events = api.subscribe_job("factory-1").await.unwrap();
    assert!(matches!(
        events.next().await,
        Some(Ok(SubscriptionEvent::Completed(_)))
    ));
    drop(events);

    let message = api.confirm_job("factory-1").await.unwrap();
    assert!(message.starts_with("factory "));
}

#[tokio::test]
async fn test_unknown_job_over_http() {
    let server = TestServer::start(2).await;
    let api = HttpJobApi::new(serve(&server).await).unwrap();

    assert!(matches!(
        api.status_job("missing").await,
        Err(ClientError::NotFound(_))
    ));
    assert!(matches!(
        api.confirm_job("missing").await,
        Err(ClientError::NotFound(_))
    ));

    let events: Vec<_> = api.subscribe_job("missing").await.unwrap().collect().await;
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        Ok(SubscriptionEvent::NotFound { job_id }) if job_id == "missing"
    ));
}

#[tokio::test]
async fn test_invalid_request_over_http() {
    let server = TestServer::start(2).await;
    let api = HttpJobApi::new(serve(&server).await).unwrap();

    let request = ResourceRequest::pool("U1", NETWORK, "MINA", "MINA").with_job_id("bad");
    match api.create_job(request).await {
        Err(ClientError::Api { status, message }) => {
            assert_eq!(status, 400);
            assert!(message.contains("different"), "{}", message);
        }
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_health_and_readiness() {
    let server = TestServer::start(2).await;
    let base = serve(&server).await;
    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let ready = client.get(format!("{}/ready", base)).send().await.unwrap();
    assert_eq!(ready.status(), reqwest::StatusCode::OK);
    let ready: serde_json::Value = ready.json().await.unwrap();
    assert_eq!(ready["ready"], true);
    assert_eq!(ready["workers"], 2);
    assert_eq!(ready["heldKeys"], 2);
}

#[tokio::test]
async fn test_signer_administration_over_http() {
    let server = TestServer::start(2).await;
    let base = serve(&server).await;
    let client = reqwest::Client::new();

    let authorization = |base: &str| format!("{}/v1/networks/{}/authorization", base, NETWORK);
    let before: serde_json::Value = client
        .get(authorization(&base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(before["fullRightsSigners"].as_array().unwrap().len(), 2);

    let key = poolforge_core::KeyPair::generate().public_key().to_base64();
    let registered = client
        .post(format!("{}/v1/signers", base))
        .bearer_auth(ADMIN_TOKEN)
        .json(&serde_json::json!({ "publicKey": key }))
        .send()
        .await
        .unwrap();
    assert_eq!(registered.status(), reqwest::StatusCode::CREATED);
    let registered: serde_json::Value = registered.json().await.unwrap();
    let id = registered["id"].as_i64().unwrap();

    let grant_url = format!("{}/v1/signers/{}/grants/{}", base, id, NETWORK);
    let grant: serde_json::Value = client
        .put(&grant_url)
        .bearer_auth(ADMIN_TOKEN)
        .json(&serde_json::json!({ "permissions": poolforge_core::Permissions::FULL.bits() }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(grant["active"], true);

    let after: serde_json::Value = client
        .get(authorization(&base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(after["fullRightsSigners"].as_array().unwrap().len(), 3);
    assert_ne!(after["root"], before["root"]);

    let removed = client
        .delete(&grant_url)
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(removed.status(), reqwest::StatusCode::NO_CONTENT);

    let restored: serde_json::Value = client
        .get(authorization(&base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(restored["root"], before["root"]);

    // Duplicate registration conflicts
    let duplicate = client
        .post(format!("{}/v1/signers", base))
        .bearer_auth(ADMIN_TOKEN)
        .json(&serde_json::json!({ "publicKey": key }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), reqwest::StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_signer_administration_requires_admin_token() {
    let server = TestServer::start(2).await;
    let base = serve(&server).await;
    let client = reqwest::Client::new();

    let authorization_url = format!("{}/v1/networks/{}/authorization", base, NETWORK);
    let before: serde_json::Value = client
        .get(&authorization_url)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let key = poolforge_core::KeyPair::generate().public_key().to_base64();
    let signer_url = format!("{}/v1/signers", base);
    let grant_url = format!("{}/v1/signers/1/grants/{}", base, NETWORK);
    let full = serde_json::json!({ "permissions": poolforge_core::Permissions::FULL.bits() });

    for token in [None, Some("wrong-token")] {
        let with_token = |builder: reqwest::RequestBuilder| match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };

        let registered = with_token(client.post(&signer_url))
            .json(&serde_json::json!({ "publicKey": key }))
            .send()
            .await
            .unwrap();
        assert_eq!(registered.status(), reqwest::StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = registered.json().await.unwrap();
        assert_eq!(body["code"], "UNAUTHENTICATED");

        let granted = with_token(client.put(&grant_url)).json(&full).send().await.unwrap();
        assert_eq!(granted.status(), reqwest::StatusCode::UNAUTHORIZED);

        let removed = with_token(client.delete(&grant_url)).send().await.unwrap();
        assert_eq!(removed.status(), reqwest::StatusCode::UNAUTHORIZED);
    }

    // Nothing reached the signer set
    let after: serde_json::Value = client
        .get(&authorization_url)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(after["root"], before["root"]);
    assert_eq!(after["fullRightsSigners"], before["fullRightsSigners"]);
}
