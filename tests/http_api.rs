//! REST surface exercised through the router without a socket.

mod common;

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use predictive_trivia_back::{
    dao::game_store::{GameStore, memory::MemoryGameStore},
    routes,
    state::AppState,
};

async fn app() -> Router {
    let store: Arc<dyn GameStore> = Arc::new(MemoryGameStore::new());
    routes::router(common::state_with(store, common::test_config()).await)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn register(app: &Router, name: &str) -> String {
    let (status, body) = send(app, Method::POST, "/players", Some(json!({ "name": name }))).await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

async fn create_game(app: &Router, slugs: &[&str]) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/games",
        Some(json!({ "event_slugs": slugs })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["game_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn player_lifecycle() {
    let app = app().await;
    let id = register(&app, "  Ada  ").await;

    let (status, body) = send(&app, Method::GET, &format!("/players/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Ada");

    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("/players/{id}"),
        Some(json!({ "name": "Grace" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Grace");

    let (status, _) = send(&app, Method::POST, "/players", Some(json!({ "name": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let missing = "0".repeat(32);
    let (status, _) = send(&app, Method::GET, &format!("/players/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn game_round_over_http() {
    let app = app().await;
    let game_id = create_game(&app, &common::SLUGS).await;
    let player = register(&app, "Ada").await;
    let action = json!({ "player_id": player });

    let (status, body) = send(&app, Method::GET, &format!("/games/{game_id}/phase"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "phase": "joinable", "joinable": true }));

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/games/{game_id}/join"),
        Some(action.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["joined"], true);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/games/{game_id}/ready"),
        Some(action.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["advanced"], true);

    let choice_uri = format!("/games/{game_id}/rounds/0/choice");
    let submission = json!({
        "player_id": player,
        "choice": { "kind": "ranked", "value": ["yes", "no"] },
    });
    let (status, body) = send(&app, Method::POST, &choice_uri, Some(submission.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["score_delta"]["yes"], 1.0);

    let (status, _) = send(&app, Method::POST, &choice_uri, Some(submission)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app, Method::GET, &format!("/games/{game_id}/state"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sequence_id"], 5);
    assert_eq!(body["state"]["current_round_index"], 0);

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/games/{game_id}/rounds/7/choice"),
        Some(json!({ "player_id": player, "choice": { "kind": "probability", "value": 0.5 } })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let newcomer = register(&app, "Late").await;
    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/games/{game_id}/join"),
        Some(json!({ "player_id": newcomer })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let app = app().await;
    let game_id = create_game(&app, &common::SLUGS).await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/games/{game_id}/join"),
        Some(json!({ "player_id": "not-an-id" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("validation failed"));

    let (status, body) = send(&app, Method::POST, "/games", Some(json!({ "event_slugs": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("validation failed"));

    // Wrong field type is a deserialization failure, answered in the same shape.
    let (status, body) = send(&app, Method::POST, "/players", Some(json!({ "name": 7 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/players")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"name\":"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["message"].as_str().unwrap().starts_with("bad request"));

    let (status, _) = send(&app, Method::GET, &format!("/games/{}/state", "f".repeat(32)), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_content_is_a_bad_gateway() {
    let app = app().await;
    let game_id = create_game(&app, &["not-in-catalog"]).await;
    let player = register(&app, "Ada").await;
    let action = json!({ "player_id": player });
    send(&app, Method::POST, &format!("/games/{game_id}/join"), Some(action.clone())).await;
    send(&app, Method::POST, &format!("/games/{game_id}/ready"), Some(action)).await;

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/games/{game_id}/rounds/0/choice"),
        Some(json!({ "player_id": player, "choice": { "kind": "ranked", "value": ["yes"] } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (_, body) = send(&app, Method::GET, &format!("/games/{game_id}/state"), None).await;
    assert!(body["state"]["rounds"][0]["choices"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn degraded_backend_answers_service_unavailable() {
    let app = routes::router(AppState::new(common::test_config()));

    let (status, body) = send(&app, Method::GET, "/healthcheck", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");

    let (status, _) = send(&app, Method::POST, "/players", Some(json!({ "name": "Ada" }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn event_stream_of_unknown_game_is_not_found() {
    let app = app().await;
    let (status, _) = send(&app, Method::GET, &format!("/games/{}/events", "a".repeat(32)), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, routes::docs::OPENAPI_PATH, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/games/{id}/rounds/{index}/choice"].is_object());
}
