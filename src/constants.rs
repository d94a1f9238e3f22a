use std::time::Duration;

/// Login endpoint on the upstream filebrowser server. Requests to this path
/// get their authorization header decoded, verified and rewritten.
pub const LOGIN_PATH: &str = "/api/login";

/// Cookie the proxy sets on root/login page loads and clears after a
/// successful login rewrite. The name is part of the wire contract with the
/// filebrowser frontend shim.
pub const PROXY_COOKIE: &str = "pyproxy";

/// Database file created by the filebrowser binary next to itself.
pub const CHILD_DB: &str = "filebrowser.db";

/// Escalating block durations (minutes) for login-failure counters 4..=9.
/// A counter of 10 or more gets [`LONG_BLOCK`] instead.
pub static BLOCK_MINUTES: &[(u32, u64)] = &[(4, 5), (5, 10), (6, 20), (7, 40), (8, 80), (9, 160)];

/// Block applied once the failure counter reaches 10: thirty days.
pub const LONG_BLOCK: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Failure count at which a host starts getting blocked.
pub const BLOCK_THRESHOLD: u32 = 4;

/// Plaintext IPv4 echo services polled (in rotation) to learn the machine's
/// public address. The first well-formed answer wins.
pub static IP_ECHO_ENDPOINTS: &[&str] = &[
    "https://checkip.amazonaws.com/",
    "https://api.ipify.org/",
    "https://ipinfo.io/ip",
    "https://v4.ident.me/",
    "https://icanhazip.com/",
];

/// Cool-down between child restart attempts.
pub const RESTART_COOLDOWN: Duration = Duration::from_secs(3);

/// Grace period for the proxy runtime to drain on shutdown.
pub const PROXY_JOIN_GRACE: Duration = Duration::from_secs(3);

/// Forceful-termination retries after the grace period, and their spacing.
pub const PROXY_KILL_ATTEMPTS: u32 = 5;
pub const PROXY_KILL_INTERVAL: Duration = Duration::from_millis(100);

/// Browser recommendation shown on the unsupported-browser page.
pub const RECOMMENDED_BROWSERS: &str = "Firefox or Safari";
