use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EnvConfig;
use crate::constants::IP_ECHO_ENDPOINTS;
use crate::proxy::ProxyState;

/// The machine's LAN address, learned by opening a UDP socket toward a
/// public address and reading back the chosen local address. No packet is
/// actually sent.
pub fn private_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(("8.8.8.8", 80)).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

/// The machine's public address, as reported by the first echo endpoint
/// that answers with a well-formed IPv4. The rotation is shuffled so a dead
/// endpoint cannot starve resolution.
pub async fn public_ip(client: &reqwest::Client) -> Option<Ipv4Addr> {
    let mut endpoints: Vec<&str> = IP_ECHO_ENDPOINTS.to_vec();
    endpoints.shuffle(&mut rand::rng());
    for endpoint in endpoints {
        match client.get(endpoint).send().await {
            Ok(response) => {
                if let Ok(text) = response.text().await
                    && let Ok(ip) = text.trim().parse::<Ipv4Addr>()
                {
                    return Some(ip);
                }
                debug!("Malformed answer from {endpoint}");
            }
            Err(e) => debug!("IP echo endpoint {endpoint} failed: {e}"),
        }
    }
    None
}

fn resolves_to_localhost(host: &str) -> bool {
    ("localhost", 0)
        .to_socket_addrs()
        .map(|mut addrs| addrs.any(|addr| addr.ip().to_string() == host))
        .unwrap_or(false)
}

/// Assemble the allowed-origin set: static origins, the bind host, the
/// localhost aliases when bound there, and the optional dynamic addresses.
/// Every entry is a bare host; empty strings never make it in.
pub async fn allowance(env: &EnvConfig, client: &reqwest::Client) -> HashSet<String> {
    let mut allowed: HashSet<String> = env.origins.iter().cloned().collect();
    allowed.insert(env.host.clone());

    if env.host == "localhost" || resolves_to_localhost(&env.host) {
        allowed.insert("localhost".to_string());
        allowed.insert("0.0.0.0".to_string());
    }

    if env.allow_private_ip {
        match private_ip() {
            Some(ip) => {
                allowed.insert(ip.to_string());
            }
            None => warn!("Failed to resolve the private IP address"),
        }
    }
    if env.allow_public_ip {
        match public_ip(client).await {
            Some(ip) => {
                allowed.insert(ip.to_string());
            }
            None => warn!("Failed to resolve the public IP address"),
        }
    }

    allowed.retain(|host| !host.is_empty());
    allowed
}

/// Re-run origin resolution on a fixed interval, logging the diff and
/// swapping the set atomically. Stops when the supervisor signals shutdown.
pub fn spawn_refresher(
    state: Arc<ProxyState>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs(state.env.origin_refresh.unwrap_or(300));
        let mut ticker = tokio::time::interval(period);
        // The first tick fires immediately; the set was just computed.
        ticker.tick().await;
        info!("Origin refresher running every {}s", period.as_secs());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let fresh = allowance(&state.env, &state.http_client).await;
                    let current = state.session.allowed_origins.read().await.clone();
                    for added in fresh.difference(&current) {
                        info!("Allowing connections from {added:?}");
                    }
                    for removed in current.difference(&fresh) {
                        warn!("Revoking access for {removed:?}");
                    }
                    if fresh != current {
                        *state.session.allowed_origins.write().await = fresh;
                    }
                }
                _ = shutdown.changed() => {
                    info!("Origin refresher stopped");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvConfig;
    use std::path::PathBuf;

    fn env(host: &str, origins: &[&str]) -> EnvConfig {
        EnvConfig {
            host: host.to_string(),
            port: 8000,
            workers: 1,
            debug: false,
            origins: origins.iter().map(|s| s.to_string()).collect(),
            database: PathBuf::from("proxy.db"),
            allow_public_ip: false,
            allow_private_ip: false,
            origin_refresh: None,
            rate_limit: vec![],
            unsupported_browsers: vec![],
            error_page: PathBuf::from("templates/error.html"),
            warn_page: PathBuf::from("templates/warn.html"),
        }
    }

    #[tokio::test]
    async fn test_allowance_includes_bind_host_and_statics() {
        let client = reqwest::Client::new();
        let allowed = allowance(&env("192.168.1.5", &["example.com"]), &client).await;
        assert!(allowed.contains("192.168.1.5"));
        assert!(allowed.contains("example.com"));
        assert!(!allowed.contains("localhost"));
    }

    #[tokio::test]
    async fn test_localhost_bind_adds_aliases() {
        let client = reqwest::Client::new();
        let allowed = allowance(&env("127.0.0.1", &[]), &client).await;
        assert!(allowed.contains("127.0.0.1"));
        assert!(allowed.contains("localhost"));
        assert!(allowed.contains("0.0.0.0"));
    }

    #[tokio::test]
    async fn test_allowance_never_contains_empty_entries() {
        let client = reqwest::Client::new();
        let allowed = allowance(&env("127.0.0.1", &[]), &client).await;
        assert!(allowed.iter().all(|host| !host.is_empty()));
    }
}
