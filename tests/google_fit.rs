use chrono::{Duration, TimeZone, Utc};
use reqwest::Url;
use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use hydrate_tracker::{
    intake::{IntakeError, IntakeManager},
    oauth::{Credentials, OAuthClient},
    store::{
        google_fit::{GoogleFitOptions, GoogleFitStore},
        StoreError,
    },
};

const API_PATH: &str = "/fitness/v1/users/me";
const STREAM_ID: &str = "hydration-stream";

fn valid_credentials() -> Credentials {
    Credentials {
        access_token: "valid-token".into(),
        refresh_token: "refresh-token".into(),
        expires_at: Utc::now().timestamp() + 3600,
        data_stream_id: Some(STREAM_ID.into()),
    }
}

fn store_for(server: &MockServer, credentials: Option<Credentials>) -> GoogleFitStore {
    let http = reqwest::Client::new();
    let oauth = OAuthClient::new(
        http.clone(),
        "client-id",
        "client-secret",
        Url::parse(&format!("{}/auth", server.uri())).unwrap(),
        Url::parse(&format!("{}/token", server.uri())).unwrap(),
    );

    let mut options =
        GoogleFitOptions::new(Url::parse(&format!("{}{API_PATH}", server.uri())).unwrap());
    options.credentials = credentials;

    GoogleFitStore::new(http, oauth, options).unwrap()
}

#[tokio::test]
async fn writes_one_point_at_the_given_instant() {
    let server = MockServer::start().await;
    let at = Utc.timestamp_opt(1_719_216_000, 0).unwrap();
    let ns = 1_719_216_000_000_000_000_i64;

    Mock::given(method("PATCH"))
        .and(path(format!(
            "{API_PATH}/dataSources/{STREAM_ID}/datasets/{ns}-{ns}"
        )))
        .and(header("authorization", "Bearer valid-token"))
        .and(body_partial_json(json!({
            "dataSourceId": STREAM_ID,
            "minStartTimeNs": ns,
            "maxEndTimeNs": ns,
            "point": [{
                "dataTypeName": "com.google.hydration",
                "startTimeNanos": ns,
                "endTimeNanos": ns,
                "value": [{ "fpVal": 0.5 }]
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let manager = IntakeManager::new(std::sync::Arc::new(store_for(
        &server,
        Some(valid_credentials()),
    )));
    manager.request_authorization().await.unwrap();
    manager.write_intake(0.5, at).await.unwrap();
}

#[tokio::test]
async fn reads_the_aggregated_total() {
    let server = MockServer::start().await;
    let start = Utc.with_ymd_and_hms(2024, 6, 24, 0, 0, 0).unwrap();
    let end = start + Duration::hours(10);

    Mock::given(method("POST"))
        .and(path(format!("{API_PATH}/dataset:aggregate")))
        .and(body_partial_json(json!({
            "aggregateBy": [{ "dataTypeName": "com.google.hydration" }],
            "startTimeMillis": start.timestamp_millis(),
            "endTimeMillis": end.timestamp_millis(),
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bucket": [{
                "dataset": [{
                    "point": [
                        { "value": [{ "fpVal": 0.25 }] },
                        { "value": [{ "fpVal": 1.0 }] }
                    ]
                }]
            }]
        })))
        .mount(&server)
        .await;

    let manager = IntakeManager::new(std::sync::Arc::new(store_for(
        &server,
        Some(valid_credentials()),
    )));
    manager.request_authorization().await.unwrap();

    let total = manager.read_cumulative_intake(start, end).await.unwrap();
    assert_eq!(total, 1.25);
}

#[tokio::test]
async fn empty_aggregate_is_no_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{API_PATH}/dataset:aggregate")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bucket": [{ "dataset": [{ "point": [] }] }]
        })))
        .mount(&server)
        .await;

    let manager = IntakeManager::new(std::sync::Arc::new(store_for(
        &server,
        Some(valid_credentials()),
    )));
    manager.request_authorization().await.unwrap();

    let now = Utc::now();
    let result = manager
        .read_cumulative_intake(now - Duration::hours(1), now)
        .await;
    assert!(matches!(result, Err(IntakeError::NoAggregateResult)));
}

#[tokio::test]
async fn rejected_write_is_a_store_failure() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(403).set_body_string("insufficient scope"))
        .mount(&server)
        .await;

    let manager = IntakeManager::new(std::sync::Arc::new(store_for(
        &server,
        Some(valid_credentials()),
    )));
    manager.request_authorization().await.unwrap();

    let result = manager.write_intake(0.5, Utc::now()).await;
    assert!(matches!(
        result,
        Err(IntakeError::StoreOperationFailed(StoreError::Status { status: 403, .. }))
    ));
}

#[tokio::test]
async fn expired_token_is_refreshed_during_authorization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "refreshed-token",
            "expires_in": 3599
        })))
        .expect(1)
        .mount(&server)
        .await;

    let expired = Credentials {
        expires_at: Utc::now().timestamp() - 10,
        ..valid_credentials()
    };
    let store = store_for(&server, Some(expired));
    let manager = IntakeManager::new(std::sync::Arc::new(store.clone()));

    manager.request_authorization().await.unwrap();

    let credentials = store.credentials().await.unwrap();
    assert_eq!(credentials.access_token, "refreshed-token");
    assert_eq!(credentials.refresh_token, "refresh-token");
}

#[tokio::test]
async fn missing_data_stream_is_created_on_authorization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{API_PATH}/dataSources")))
        .and(body_partial_json(json!({
            "dataStreamName": "HydrationSource",
            "type": "raw",
            "dataType": { "name": "com.google.hydration" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "dataStreamId": "raw:com.google.hydration:123:HydrationSource",
            "dataStreamName": "HydrationSource"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = Credentials {
        data_stream_id: None,
        ..valid_credentials()
    };
    let store = store_for(&server, Some(credentials));
    IntakeManager::new(std::sync::Arc::new(store.clone()))
        .request_authorization()
        .await
        .unwrap();

    assert_eq!(
        store.credentials().await.unwrap().data_stream_id.as_deref(),
        Some("raw:com.google.hydration:123:HydrationSource")
    );
}

#[tokio::test]
async fn existing_data_stream_is_looked_up_on_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{API_PATH}/dataSources")))
        .respond_with(ResponseTemplate::new(409).set_body_string("already exists"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{API_PATH}/dataSources")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "dataSource": [
                { "dataStreamId": "raw:com.google.hydration:999:Other", "dataStreamName": "Other" },
                { "dataStreamId": "raw:com.google.hydration:123:HydrationSource", "dataStreamName": "HydrationSource" }
            ]
        })))
        .mount(&server)
        .await;

    let credentials = Credentials {
        data_stream_id: None,
        ..valid_credentials()
    };
    let store = store_for(&server, Some(credentials));
    IntakeManager::new(std::sync::Arc::new(store.clone()))
        .request_authorization()
        .await
        .unwrap();

    assert_eq!(
        store.credentials().await.unwrap().data_stream_id.as_deref(),
        Some("raw:com.google.hydration:123:HydrationSource")
    );
}

#[tokio::test]
async fn operations_before_authorization_are_refused() {
    let server = MockServer::start().await;
    let manager = IntakeManager::new(std::sync::Arc::new(store_for(
        &server,
        Some(valid_credentials()),
    )));

    let result = manager.write_intake(0.5, Utc::now()).await;
    assert!(matches!(
        result,
        Err(IntakeError::StoreOperationFailed(StoreError::NotAuthorized(_)))
    ));
}

#[tokio::test]
async fn refreshed_grant_is_kept_when_data_source_setup_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "refreshed-token",
            "expires_in": 3599
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{API_PATH}/dataSources")))
        .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let credentials_path = dir.path().join("credentials.json");

    let http = reqwest::Client::new();
    let oauth = OAuthClient::new(
        http.clone(),
        "client-id",
        "client-secret",
        Url::parse(&format!("{}/auth", server.uri())).unwrap(),
        Url::parse(&format!("{}/token", server.uri())).unwrap(),
    );
    let mut options =
        GoogleFitOptions::new(Url::parse(&format!("{}{API_PATH}", server.uri())).unwrap());
    options.credentials_path = Some(credentials_path.clone());
    options.credentials = Some(Credentials {
        expires_at: Utc::now().timestamp() - 10,
        data_stream_id: None,
        ..valid_credentials()
    });
    let store = GoogleFitStore::new(http, oauth, options).unwrap();

    let result = IntakeManager::new(std::sync::Arc::new(store.clone()))
        .request_authorization()
        .await;
    assert!(matches!(
        result,
        Err(IntakeError::StoreOperationFailed(StoreError::Status { status: 503, .. }))
    ));

    let in_memory = store.credentials().await.unwrap();
    assert_eq!(in_memory.access_token, "refreshed-token");
    assert_eq!(in_memory.data_stream_id, None);

    let saved: Credentials =
        serde_json::from_slice(&std::fs::read(&credentials_path).unwrap()).unwrap();
    assert_eq!(saved, in_memory);
}

#[tokio::test]
async fn instants_beyond_nanosecond_range_are_not_sent() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let manager = IntakeManager::new(std::sync::Arc::new(store_for(
        &server,
        Some(valid_credentials()),
    )));
    manager.request_authorization().await.unwrap();

    let far_future = Utc.with_ymd_and_hms(2300, 1, 1, 0, 0, 0).unwrap();
    let result = manager.write_intake(0.5, far_future).await;
    assert!(matches!(
        result,
        Err(IntakeError::StoreOperationFailed(StoreError::InvalidTimestamp(at))) if at == far_future
    ));
}
