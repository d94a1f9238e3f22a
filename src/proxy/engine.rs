use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::{Body, to_bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::constants::{BLOCK_THRESHOLD, LOGIN_PATH, PROXY_COOKIE};
use crate::proxy::session::block_duration;
use crate::proxy::{ProxyState, auth, sniffer};

/// What to do with the `pyproxy` cookie on the way out.
enum CookieMarker {
    None,
    Set,
    Delete,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Strip a port (and brackets) from a Host header value.
fn host_only(value: &str) -> String {
    let value = value.trim();
    if let Some(inner) = value.strip_prefix('[') {
        return inner.split(']').next().unwrap_or(inner).to_string();
    }
    match value.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host.to_string(),
        _ => value.to_string(),
    }
}

/// Per-request pipeline: rate limit, first-contact browser check, origin
/// firewall, block check, authorization rewrite, forward, auth bookkeeping
/// and cookie marking.
pub async fn proxy_engine(
    State(state): State<Arc<ProxyState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let client_host = peer.ip().to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());
    if state.env.debug {
        debug!("{method} {path_and_query}");
    }

    // Rate limiting happens before anything else touches the request.
    let rate_id = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| client_host.clone());
    if let Err(retry_after) = state.limiter.check(&format!("{rate_id}{path}")).await {
        return too_many_requests(retry_after);
    }

    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let host_header = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if state.session.first_contact(&client_host).await {
        let forwarded_host = request
            .headers()
            .get("x-forwarded-host")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        info!(
            "Connection received from client-host: {client_host}, host-header: {host_header:?}, x-fwd-host: {forwarded_host:?}"
        );
        info!("User agent: {user_agent}");
        if let Some(browser) = sniffer::parse_user_agent(&user_agent)
            && sniffer::is_unsupported(&browser, &state.env.unsupported_browsers)
        {
            warn!(
                "{} {} is listed as unsupported, warning {client_host}",
                browser.family, browser.version
            );
            return Html(state.templates.unsupported_browser(&browser)).into_response();
        }
    }

    // Origin firewall: the request's base-URL host must be allowed.
    let origin_host = host_only(&host_header);
    let origin_allowed = state.session.allowed_origins.read().await.contains(&origin_host);
    if !origin_allowed {
        warn!("Connection received from an unapproved origin: {origin_host:?}");
        return forbidden(&state, &origin_host);
    }

    // Block check: forbid set first, then the durable ledger.
    if state.session.forbid.lock().await.contains(&client_host) {
        match state.store.get(&client_host).await {
            Ok(Some(block_until)) if block_until > now_secs() => {
                warn!("{client_host} is blocked until epoch {block_until}");
                return forbidden(&state, &client_host);
            }
            Ok(_) => {
                // Stale state: drop it lazily and let the request through.
                state.session.forbid.lock().await.remove(&client_host);
                if let Err(e) = state.store.remove(&client_host).await {
                    error!("Failed to prune stale block records: {e}");
                }
            }
            Err(e) => {
                error!("Block store unavailable: {e}");
                return forbidden(&state, &client_host);
            }
        }
    }

    if state.session.should_log(&client_host, &path).await {
        info!("{method} {path}");
    }

    // Authorization rewriting and cookie marking.
    let mut headers = request.headers().clone();
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    let mut cookie_marker = CookieMarker::None;
    let is_login = method == Method::POST && path == LOGIN_PATH;
    if is_login {
        if let Some(authorization) = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            && let Some(credentials) = auth::authenticate(authorization, &state.destination.auth_map)
            && let Ok(json) = serde_json::to_string(&credentials)
            && let Ok(value) = HeaderValue::from_str(&json)
        {
            headers.insert(header::AUTHORIZATION, value);
            cookie_marker = CookieMarker::Delete;
        }
    } else if method == Method::GET && (path == "/" || path == "/login") {
        cookie_marker = CookieMarker::Set;
    }

    let body = match to_bytes(request.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to read request body from {client_host}: {e}");
            return (StatusCode::BAD_REQUEST, "Bad Request").into_response();
        }
    };

    // Forward to the upstream with the (possibly rewritten) headers.
    let url = format!("{}{}", state.destination.url, path_and_query);
    let upstream = match state
        .http_client
        .request(method.clone(), &url)
        .headers(headers)
        .body(body.to_vec())
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            error!("Upstream unreachable: {e}");
            return service_unavailable(&state);
        }
    };

    let status = upstream.status();

    // Auth bookkeeping after the child has decided the login.
    if is_login {
        if status == StatusCode::FORBIDDEN {
            record_login_failure(&state, &client_host).await;
        } else {
            clear_login_failures(&state, &client_host).await;
        }
    }

    // Response shaping: drop the encoding header (the body is already
    // decoded); text-ish bodies lose Content-Length so chunked streaming to
    // media players cannot end up with a mismatch.
    let mut response_headers = upstream.headers().clone();
    response_headers.remove(header::CONTENT_ENCODING);
    response_headers.remove(header::TRANSFER_ENCODING);
    let content_type = response_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if content_type.contains("text") || content_type.contains("javascript") {
        response_headers.remove(header::CONTENT_LENGTH);
    }

    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to read upstream response: {e}");
            return service_unavailable(&state);
        }
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;

    match cookie_marker {
        CookieMarker::Set => {
            if let Ok(value) = HeaderValue::from_str(&format!("{PROXY_COOKIE}=on; Path=/")) {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
        }
        CookieMarker::Delete => {
            if let Ok(value) = HeaderValue::from_str(&format!("{PROXY_COOKIE}=; Max-Age=0; Path=/"))
            {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
        }
        CookieMarker::None => {}
    }

    response
}

/// Advance the failure counter and, once past the threshold, persist an
/// escalating block (remove-then-put keeps the ledger free of pile-ups).
async fn record_login_failure(state: &ProxyState, host: &str) {
    let count = state.session.record_login_failure(host).await;
    if count < BLOCK_THRESHOLD {
        warn!("Failed login attempt {count} from {host}");
        return;
    }
    let duration = block_duration(count);
    let block_until = now_secs() + duration.as_secs() as i64;
    warn!(
        "Blocking {host} for {} minute(s) after {count} failed login attempts",
        duration.as_secs() / 60
    );
    if let Err(e) = state.store.remove(host).await {
        error!("Failed to clear prior block records for {host}: {e}");
    }
    if let Err(e) = state.store.put(host, block_until).await {
        error!("Failed to persist block record for {host}: {e}");
    }
}

/// A successful login wipes the host's failure state everywhere.
async fn clear_login_failures(state: &ProxyState, host: &str) {
    if state.session.clear_login_failures(host).await {
        info!("Login failures cleared for {host}");
        if let Err(e) = state.store.remove(host).await {
            error!("Failed to remove block records for {host}: {e}");
        }
    }
}

fn too_many_requests(retry_after: u64) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_after.to_string())],
        "Too Many Requests",
    )
        .into_response()
}

fn forbidden(state: &ProxyState, origin: &str) -> Response {
    (StatusCode::FORBIDDEN, Html(state.templates.forbidden(origin))).into_response()
}

/// 503 with a short client-side cache so a hammering browser backs off
/// while the child is down.
fn service_unavailable(state: &ProxyState) -> Response {
    let expires = (Utc::now() + chrono::Duration::seconds(300))
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [
            (header::CACHE_CONTROL, "max-age=300".to_string()),
            (header::EXPIRES, expires),
        ],
        Html(state.templates.service_unavailable()),
    )
        .into_response()
}
