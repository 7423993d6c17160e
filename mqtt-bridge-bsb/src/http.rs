//! Diagnostic HTTP server: device reads and writes, event log queries.
//!
//! Every request is answered with status 200 and a JSON body:
//! - `?get=<name>` reads a value from the device
//! - `?set=<name>&val=<text>` writes a value
//! - otherwise `?log=..&msg=..&exclude=..` queries the event log buffers

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bsb_common::BoilerDevice;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::error::{BridgeError, Result};
use crate::eventlog::{EventLogStore, LogQuery};
use crate::transform::decode_text_value;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Application state shared across handlers.
struct AppState<D> {
    device: Arc<D>,
    store: Arc<EventLogStore>,
}

impl<D> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            device: self.device.clone(),
            store: self.store.clone(),
        }
    }
}

/// Create the HTTP router. Every path is served by the query handler.
pub fn create_router<D: BoilerDevice>(device: Arc<D>, store: Arc<EventLogStore>) -> Router {
    let state = AppState { device, store };

    Router::new()
        .fallback(query_handler::<D>)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type Params = Vec<(String, String)>;

fn first<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, v)| k == key && !v.is_empty())
        .map(|(_, v)| v.as_str())
}

/// All values of a repeatable, comma separated parameter.
fn list(params: &Params, key: &str) -> Vec<String> {
    params
        .iter()
        .filter(|(k, _)| k == key)
        .flat_map(|(_, v)| v.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Pretty JSON with four-space indentation.
fn render(value: &Value) -> String {
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    if value.serialize(&mut serializer).is_err() {
        return "null".to_string();
    }
    String::from_utf8(buf).unwrap_or_default()
}

fn json_response(body: String) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)], body).into_response()
}

fn error_response(message: impl std::fmt::Display) -> Response {
    json_response(render(&json!({ "error": message.to_string() })))
}

async fn query_handler<D: BoilerDevice>(
    State(state): State<AppState<D>>,
    Query(params): Query<Params>,
) -> Response {
    if let Some(name) = first(&params, "get") {
        debug!(name = %name, "HTTP read");
        return match state.device.get_value(name).await {
            Ok(value) => json_response(render(&value)),
            Err(e) => error_response(e),
        };
    }

    if let Some(name) = first(&params, "set") {
        let Some(text) = params
            .iter()
            .find(|(k, _)| k == "val")
            .map(|(_, v)| v.as_str())
        else {
            return error_response(format!("Missing 'val' for '{}'", name));
        };

        let value = decode_text_value(text);
        debug!(name = %name, value = %value, "HTTP write");
        return match state.device.set_value(name, value, None).await {
            Ok(()) => json_response(String::new()),
            Err(e) => error_response(e),
        };
    }

    let logs = list(&params, "log");
    let query = LogQuery {
        logs: (!logs.is_empty()).then_some(logs),
        include: list(&params, "msg"),
        exclude: list(&params, "exclude"),
    };

    let body: Map<String, Value> = state
        .store
        .query(&query)
        .into_iter()
        .map(|(name, lines)| (name, Value::from(lines)))
        .collect();

    json_response(render(&Value::Object(body)))
}

/// The diagnostic HTTP server.
pub struct QueryServer<D: BoilerDevice> {
    device: Arc<D>,
    store: Arc<EventLogStore>,
    listen_addr: SocketAddr,
}

impl<D: BoilerDevice> QueryServer<D> {
    /// Create a new server.
    pub fn new(device: Arc<D>, store: Arc<EventLogStore>, listen_addr: SocketAddr) -> Self {
        Self {
            device,
            store,
            listen_addr,
        }
    }

    /// Run the server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let router = create_router(self.device, self.store);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| BridgeError::Http(format!("Failed to bind to {}: {}", self.listen_addr, e)))?;

        info!(addr = %self.listen_addr, "HTTP server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| BridgeError::Http(e.to_string()))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
