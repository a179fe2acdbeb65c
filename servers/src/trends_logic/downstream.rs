use crate::trends_logic::error::ApiError;
use crate::trends_logic::pages;
use crate::trends_logic::state::AppState;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    Form, Json, Router,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use lib_trends::core::{ClientSendError, ClientSink};
use lib_trends::models::{Listing, Page, Repository, RepositoryFilter, Stats};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub fn router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.static_dir);
    Router::new()
        .route("/", get(landing_handler))
        .route("/trends", get(trends_handler))
        .route("/trends/{id}", get(repository_handler))
        .route("/stats", get(stats_handler))
        .route("/subscribe", get(subscribe_form_handler))
        .route("/subscribed", get(subscribe_query_handler).post(subscribe_form_post_handler))
        .route("/unsubscribe", get(unsubscribe_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .fallback_service(static_files)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))
}

/// Serves until `shutdown` is cancelled, then lets in-flight requests finish.
pub async fn run(listener: TcpListener, state: AppState, shutdown: CancellationToken) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(component = "http", %addr, "listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!(component = "http", "listener shutting down");
        })
        .await
        .context("http server failed")
}

#[derive(Debug, Default, Deserialize)]
pub struct TrendsQuery {
    pub page: Option<usize>,
    pub per_page: Option<usize>,
    pub language: Option<String>,
    pub min_stars: Option<u64>,
    pub q: Option<String>,
}

impl TrendsQuery {
    fn filter(&self) -> RepositoryFilter {
        RepositoryFilter {
            language: self.language.clone(),
            min_stars: self.min_stars,
            query: self.q.clone(),
        }
        .normalized()
    }

    fn page(&self) -> Page {
        let default = Page::default();
        Page::new(
            self.page.unwrap_or(default.page),
            self.per_page.unwrap_or(default.per_page),
        )
    }
}

async fn trends_handler(State(state): State<AppState>, Query(query): Query<TrendsQuery>) -> Json<Listing> {
    Json(state.store.list(&query.filter(), query.page()))
}

async fn repository_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Repository>, ApiError> {
    let id: u64 = id
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("repository id must be numeric, got {id:?}")))?;
    state
        .store
        .get(id)
        .map(|repo| Json(repo.as_ref().clone()))
        .ok_or_else(|| ApiError::NotFound(format!("repository {id} is not in the current snapshot")))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: Stats,
    pub connected_clients: usize,
    pub subscribers: usize,
}

async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        stats: state.store.stats(),
        connected_clients: state.hub.client_count(),
        subscribers: state.subscribers.len(),
    })
}

async fn landing_handler(State(state): State<AppState>) -> Html<String> {
    Html(pages::landing(&state.store.current_snapshot()))
}

async fn subscribe_form_handler() -> Html<String> {
    Html(pages::subscribe_form())
}

/// Fields of the subscribe form. `min_stars` arrives as text so an empty
/// input field means "no minimum".
#[derive(Debug, Default, Deserialize)]
pub struct SubscribeForm {
    #[serde(default)]
    pub email: String,
    pub language: Option<String>,
    pub min_stars: Option<String>,
}

async fn subscribe_query_handler(State(state): State<AppState>, Query(form): Query<SubscribeForm>) -> Response {
    subscribe(&state, form)
}

async fn subscribe_form_post_handler(State(state): State<AppState>, Form(form): Form<SubscribeForm>) -> Response {
    subscribe(&state, form)
}

fn subscribe(state: &AppState, form: SubscribeForm) -> Response {
    let min_stars = match parse_min_stars(form.min_stars.as_deref()) {
        Ok(min_stars) => min_stars,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Html(pages::rejected("Minimum stars must be a whole number.")),
            )
                .into_response();
        }
    };
    let filter = RepositoryFilter {
        language: form.language,
        min_stars,
        query: None,
    };

    match state.subscribers.subscribe(&form.email, filter) {
        Ok(subscriber) => Html(pages::subscribed(&subscriber)).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Html(pages::rejected(&e.to_string()))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeQuery {
    #[serde(default)]
    pub token: String,
}

async fn unsubscribe_handler(State(state): State<AppState>, Query(query): Query<UnsubscribeQuery>) -> Response {
    match state.subscribers.unsubscribe(&query.token) {
        Some(subscriber) => {
            if let Some(ref notifier) = state.notifier {
                notifier.forget(&subscriber.email);
            }
            Html(pages::unsubscribed(Some(&subscriber.email))).into_response()
        }
        None => (StatusCode::NOT_FOUND, Html(pages::unsubscribed(None))).into_response(),
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Live feed filter. `min_stars` arrives as text so `?min_stars=` means
/// "no minimum", as on the subscribe form.
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub language: Option<String>,
    pub min_stars: Option<String>,
    pub q: Option<String>,
}

/// Blank means no minimum; anything else must be a whole number.
fn parse_min_stars(raw: Option<&str>) -> Result<Option<u64>, String> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| format!("min_stars must be a whole number, got {value:?}")),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Result<Response, ApiError> {
    let min_stars = parse_min_stars(query.min_stars.as_deref()).map_err(ApiError::BadRequest)?;
    let filter = RepositoryFilter {
        language: query.language,
        min_stars,
        query: query.q,
    };
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, filter)))
}

/// Write half of a WebSocket as seen by the hub. Closing it also ends the
/// session's read loop.
struct WsSink {
    sender: SplitSink<WebSocket, Message>,
    closed: CancellationToken,
}

#[async_trait]
impl ClientSink for WsSink {
    async fn send(&mut self, text: String) -> Result<(), ClientSendError> {
        self.sender
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ClientSendError::Io(e.to_string()))
    }

    async fn close(&mut self) {
        self.closed.cancel();
        let _ = self.sender.send(Message::Close(None)).await;
        let _ = self.sender.close().await;
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, filter: RepositoryFilter) {
    let client_id = Uuid::new_v4().to_string();
    let (sender, mut receiver) = socket.split();
    let closed = CancellationToken::new();
    let sink = WsSink {
        sender,
        closed: closed.clone(),
    };

    if !state
        .hub
        .register(client_id.clone(), filter, sink, Some(state.store.current_snapshot()))
    {
        warn!(component = "ws", client = %client_id, "hub refused the connection");
        return;
    }
    info!(component = "ws", client = %client_id, "client connected");

    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(component = "ws", client = %client_id, error = %e, "read failed");
                    break;
                }
            },
        }
    }

    state.hub.unregister(&client_id);
    info!(component = "ws", client = %client_id, "client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use chrono::{TimeZone, Utc};
    use lib_trends::core::{Hub, Store};
    use lib_trends::models::Snapshot;
    use lib_trends::subscribers::SubscriberStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn repo(id: u64, name: &str, stars: u64, score: f64, language: &str) -> Repository {
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        Repository {
            id,
            owner: "acme".into(),
            name: name.into(),
            full_name: format!("acme/{name}"),
            description: Some(format!("{name} tool")),
            html_url: format!("https://github.com/acme/{name}"),
            stars,
            forks: 1,
            language: Some(language.into()),
            created_at: created,
            trend_score: score,
            refreshed_at: created,
        }
    }

    fn test_state() -> AppState {
        let snapshot = Snapshot::build(
            1,
            Utc::now(),
            vec![
                repo(1, "alpha", 50, 3.0, "Rust"),
                repo(2, "beta", 40, 2.0, "Go"),
                repo(3, "gamma", 5, 1.0, "Go"),
            ],
        );
        let static_dir = std::env::temp_dir().join("server_trends_missing_static");
        AppState::new(
            Arc::new(Store::with_snapshot(snapshot)),
            Arc::new(Hub::default()),
            Arc::new(SubscriberStore::new()),
            static_dir,
        )
    }

    async fn get(state: &AppState, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router(state.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    fn json(body: &[u8]) -> serde_json::Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn trends_lists_filtered_pages() {
        let state = test_state();

        let (status, body) = get(&state, "/trends").await;
        assert_eq!(status, StatusCode::OK);
        let listing = json(&body);
        assert_eq!(listing["generation"], 1);
        assert_eq!(listing["total"], 3);
        assert_eq!(listing["items"][0]["name"], "alpha");

        let (_, body) = get(&state, "/trends?language=go&per_page=1&page=2").await;
        let listing = json(&body);
        assert_eq!(listing["total"], 2);
        assert_eq!(listing["page"], 2);
        assert_eq!(listing["items"].as_array().unwrap().len(), 1);
        assert_eq!(listing["items"][0]["name"], "gamma");

        let (_, body) = get(&state, "/trends?min_stars=10&q=BETA").await;
        assert_eq!(json(&body)["total"], 1);
    }

    #[tokio::test]
    async fn single_repository_status_codes() {
        let state = test_state();

        let (status, body) = get(&state, "/trends/2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["full_name"], "acme/beta");

        let (status, body) = get(&state, "/trends/99").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json(&body)["error"], "Not Found");

        let (status, _) = get(&state, "/trends/abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stats_include_clients_and_subscribers() {
        let state = test_state();
        state
            .subscribers
            .subscribe("dev@example.com", RepositoryFilter::default())
            .unwrap();

        let (status, body) = get(&state, "/stats").await;
        assert_eq!(status, StatusCode::OK);
        let stats = json(&body);
        assert_eq!(stats["generation"], 1);
        assert_eq!(stats["total_repositories"], 3);
        assert_eq!(stats["total_stars"], 95);
        assert_eq!(stats["connected_clients"], 0);
        assert_eq!(stats["subscribers"], 1);
    }

    #[tokio::test]
    async fn pages_and_health() {
        let state = test_state();

        let (status, body) = get(&state, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("acme/alpha"));

        let (status, body) = get(&state, "/subscribe").await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("<form"));

        let (status, body) = get(&state, "/health").await;
        assert_eq!((status, body.as_slice()), (StatusCode::OK, b"OK".as_slice()));

        let (status, _) = get(&state, "/no-such-file.txt").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn subscribe_by_form_then_update_and_unsubscribe() {
        let state = test_state();

        let post = |body: &'static str| {
            Request::builder()
                .method("POST")
                .uri("/subscribed")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap()
        };

        let response = router(state.clone())
            .oneshot(post("email=Dev%40Example.com&language=Go&min_stars="))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let first = state.subscribers.get("dev@example.com").unwrap();
        assert_eq!(first.filter.language.as_deref(), Some("Go"));
        assert_eq!(first.filter.min_stars, None);

        let (status, _) = get(&state, "/subscribed?email=dev@example.com&language=Rust&min_stars=10").await;
        assert_eq!(status, StatusCode::OK);
        let second = state.subscribers.get("dev@example.com").unwrap();
        assert_eq!(second.token, first.token);
        assert_eq!(second.filter.language.as_deref(), Some("Rust"));
        assert_eq!(second.filter.min_stars, Some(10));
        assert_eq!(state.subscribers.len(), 1);

        let (status, _) = get(&state, &format!("/unsubscribe?token={}", first.token)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.subscribers.is_empty());

        let (status, _) = get(&state, &format!("/unsubscribe?token={}", first.token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_subscriptions_are_rejected() {
        let state = test_state();

        let (status, body) = get(&state, "/subscribed?email=not-an-address").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8(body).unwrap().contains("Subscription failed"));

        let (status, _) = get(&state, "/subscribed?email=dev@example.com&min_stars=lots").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(state.subscribers.is_empty());
    }

    #[test]
    fn min_stars_parsing() {
        assert_eq!(parse_min_stars(None), Ok(None));
        assert_eq!(parse_min_stars(Some("")), Ok(None));
        assert_eq!(parse_min_stars(Some(" 12 ")), Ok(Some(12)));
        assert!(parse_min_stars(Some("lots")).is_err());
    }

    #[tokio::test]
    async fn websocket_treats_blank_min_stars_as_no_minimum() {
        use tokio_tungstenite::connect_async;

        let state = test_state();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(run(listener, state.clone(), shutdown.clone()));

        let (mut socket, _) = connect_async(format!("ws://{addr}/ws?min_stars=&language=")).await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let first: serde_json::Value = serde_json::from_str(first.to_text().unwrap()).unwrap();
        assert_eq!(first["type"], "snapshot");
        assert_eq!(first["repositories"].as_array().unwrap().len(), 3);

        assert!(connect_async(format!("ws://{addr}/ws?min_stars=lots")).await.is_err());

        socket.close(None).await.unwrap();
        state.hub.shutdown(Duration::from_secs(1)).await;
        shutdown.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn websocket_receives_snapshot_then_updates() {
        use tokio_tungstenite::connect_async;

        let state = test_state();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(run(listener, state.clone(), shutdown.clone()));

        let (mut socket, _) = connect_async(format!("ws://{addr}/ws?language=Go")).await.unwrap();

        let next_json = |msg: tokio_tungstenite::tungstenite::Message| -> serde_json::Value {
            serde_json::from_str(msg.to_text().unwrap()).unwrap()
        };

        let first = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let first = next_json(first);
        assert_eq!(first["type"], "snapshot");
        assert_eq!(first["generation"], 1);
        assert_eq!(first["repositories"].as_array().unwrap().len(), 2);

        let receipt = state
            .store
            .swap(Snapshot::build(
                2,
                Utc::now(),
                vec![repo(2, "beta", 60, 5.0, "Go"), repo(4, "delta", 7, 0.5, "Rust")],
            ))
            .unwrap();
        let report = state.hub.broadcast(receipt.snapshot);
        assert_eq!(report.delivered, 1);

        let update = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let update = next_json(update);
        assert_eq!(update["type"], "update");
        assert_eq!(update["generation"], 2);
        assert_eq!(update["repositories"][0]["name"], "beta");
        assert_eq!(update["repositories"].as_array().unwrap().len(), 1);

        socket.close(None).await.unwrap();
        assert_eq!(state.hub.shutdown(Duration::from_secs(1)).await, 0);
        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
