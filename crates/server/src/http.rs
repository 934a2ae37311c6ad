use crate::dispatch::Dispatcher;
use crate::rate_limit::{Decision, RequestMeta};
use crate::state::AppState;
use anyhow::{anyhow, Result};
use conexus_protocol::JsonRpcResponse;
use conexus_store::VectorBackend;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

/// Bind and serve `POST /mcp`, `GET /health`, `GET /metrics`, and the
/// OAuth endpoints until shutdown. Binding happens synchronously so a bad
/// address is a startup failure (non-zero exit), not a background log line.
pub fn spawn_http(
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Result<tokio::task::JoinHandle<()>> {
    let shutdown = state.shutdown.clone();
    let make_service = make_service_fn(move |conn: &AddrStream| {
        let state = Arc::clone(&state);
        let peer = conn.remote_addr();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let state = Arc::clone(&state);
                async move { Ok::<_, Infallible>(route(state, peer, req).await) }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .map_err(|err| anyhow!("failed to bind HTTP endpoint on {addr}: {err}"))?
        .serve(make_service)
        .with_graceful_shutdown(async move { shutdown.cancelled().await });
    log::info!("HTTP endpoint listening on {addr}");

    Ok(tokio::spawn(async move {
        if let Err(err) = server.await {
            log::error!("HTTP server failed: {err}");
        }
    }))
}

async fn route(state: Arc<AppState>, peer: SocketAddr, req: Request<Body>) -> Response<Body> {
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let method = req.method().clone();

    let decision = {
        let headers = req.headers();
        let meta = RequestMeta {
            peer: Some(peer.ip()),
            path: &path,
            query: query.as_deref(),
            authorization: header(headers, "authorization"),
            x_api_key: header(headers, "x-api-key"),
            x_forwarded_for: header(headers, "x-forwarded-for"),
            x_real_ip: header(headers, "x-real-ip"),
        };
        state.limiter.check(&meta)
    };

    if let Decision::Denied {
        limit,
        reset_unix,
        retry_after_secs,
    } = decision
    {
        state.metrics.rate_limited_total.inc();
        return rate_limited_response(limit, reset_unix, retry_after_secs);
    }

    let response = match (method, path.as_str()) {
        (Method::POST, "/mcp") => mcp(&state, req).await,
        (Method::GET, "/health") => health(&state).await,
        (Method::GET, "/metrics") => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/plain; version=0.0.4")
            .body(Body::from(state.metrics.encode()))
            .unwrap_or_default(),
        (Method::GET, "/oauth/success") => oauth_page("Authorization complete. You can close this window."),
        (Method::GET, "/oauth/error") => oauth_page("Authorization failed. Check the server logs."),
        (Method::GET, p) if p.starts_with("/oauth/") => oauth(&state, p, query.as_deref()).await,
        _ => json_response(
            StatusCode::NOT_FOUND,
            &json!({ "error": "not_found", "message": format!("no route for {path}") }),
        ),
    };

    match decision {
        Decision::Allowed {
            limit,
            remaining,
            reset_unix,
        } => with_rate_headers(response, limit, remaining, reset_unix),
        _ => response,
    }
}

async fn mcp(state: &Arc<AppState>, req: Request<Body>) -> Response<Body> {
    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(body) => body,
        Err(err) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &json!({ "error": "body_read_failed", "message": err.to_string() }),
            );
        }
    };

    let raw: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(_) => {
            // JSON-RPC parse errors travel as JSON-RPC errors, not HTTP ones.
            return json_body(StatusCode::OK, &JsonRpcResponse::parse_failure());
        }
    };

    let dispatcher = Dispatcher::new(Arc::clone(state));
    match dispatcher.handle_value(raw).await {
        Some(response) => json_body(StatusCode::OK, &response),
        None => Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Body::empty())
            .unwrap_or_default(),
    }
}

async fn health(state: &Arc<AppState>) -> Response<Body> {
    let documents = state.backend.count().await.unwrap_or(0);
    state.metrics.indexed_documents.set(documents as i64);
    state
        .metrics
        .active_sessions
        .set(state.sessions.active_count() as i64);

    json_response(
        StatusCode::OK,
        &json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "documents": documents,
            "sessions": state.sessions.active_count(),
            "federation_cache": state.federation.stats(),
            "result_cache": state.results.stats(),
            "connectors": state.connectors.list().len(),
            "index": state.index.snapshot(),
        }),
    )
}

/// `/oauth/<provider>/authorize` and `/oauth/<provider>/callback`.
async fn oauth(state: &Arc<AppState>, path: &str, query: Option<&str>) -> Response<Body> {
    let Some(flow) = &state.oauth else {
        return json_response(
            StatusCode::NOT_FOUND,
            &json!({ "error": "oauth_disabled", "message": "no OAuth providers configured" }),
        );
    };

    let mut segments = path.trim_start_matches("/oauth/").splitn(2, '/');
    let provider = segments.next().unwrap_or_default().to_string();
    let action = segments.next().unwrap_or_default();

    match action {
        "authorize" => match flow.authorize_redirect(&provider) {
            Ok(target) => redirect(&target),
            Err(err) => redirect(&error_page_url(&provider, &err.to_string())),
        },
        "callback" => {
            let params = parse_query(query.unwrap_or_default());
            let code = params.get("code").cloned().unwrap_or_default();
            let state_token = params.get("state").cloned().unwrap_or_default();
            if code.is_empty() || state_token.is_empty() {
                return redirect(&error_page_url(&provider, "missing code or state"));
            }
            match flow.handle_callback(&provider, &code, &state_token).await {
                Ok(_token) => redirect(&format!("/oauth/success?provider={provider}")),
                Err(err) => redirect(&error_page_url(&provider, &err.to_string())),
            }
        }
        _ => json_response(
            StatusCode::NOT_FOUND,
            &json!({ "error": "not_found", "message": format!("no oauth route {path}") }),
        ),
    }
}

fn parse_query(query: &str) -> std::collections::HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn error_page_url(provider: &str, message: &str) -> String {
    let encoded: String =
        url::form_urlencoded::byte_serialize(message.as_bytes()).collect();
    format!("/oauth/error?provider={provider}&error={encoded}")
}

fn redirect(location: &str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::FOUND)
        .header("Location", location)
        .body(Body::empty())
        .unwrap_or_default()
}

fn oauth_page(message: &str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/html; charset=utf-8")
        .body(Body::from(format!(
            "<!doctype html><html><body><p>{message}</p></body></html>"
        )))
        .unwrap_or_default()
}

fn rate_limited_response(limit: u32, reset_unix: u64, retry_after_secs: u64) -> Response<Body> {
    let body = json!({
        "error": "rate_limited",
        "message": "too many requests",
        "retry_after": retry_after_secs,
    });
    Response::builder()
        .status(StatusCode::TOO_MANY_REQUESTS)
        .header("Content-Type", "application/json")
        .header("X-RateLimit-Limit", limit.to_string())
        .header("X-RateLimit-Remaining", "0")
        .header("X-RateLimit-Reset", reset_unix.to_string())
        .header("Retry-After", retry_after_secs.to_string())
        .body(Body::from(body.to_string()))
        .unwrap_or_default()
}

fn with_rate_headers(
    mut response: Response<Body>,
    limit: u32,
    remaining: u32,
    reset_unix: u64,
) -> Response<Body> {
    let headers = response.headers_mut();
    if let Ok(value) = limit.to_string().parse() {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = remaining.to_string().parse() {
        headers.insert("X-RateLimit-Remaining", value);
    }
    if let Ok(value) = reset_unix.to_string().parse() {
        headers.insert("X-RateLimit-Reset", value);
    }
    response
}

fn header<'a>(headers: &'a hyper::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn json_response(status: StatusCode, value: &serde_json::Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(value.to_string()))
        .unwrap_or_default()
}

fn json_body<T: serde::Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_string(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(Body::from(body))
            .unwrap_or_default(),
        Err(err) => {
            log::error!("response serialisation failed: {err}");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({ "error": "serialisation_failed" }),
            )
        }
    }
}
