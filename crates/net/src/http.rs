use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use reqwest::Client;
use tracing::trace;

/// User-agent strings the stealth mode rotates through when sending control
/// requests (spec §4.4 "stealth"). Deliberately ordinary browser/OS strings
/// so a naive vendor endpoint can't fingerprint this toolkit by UA alone.
const STEALTH_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15",
];

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub use_ssl: bool,
    pub verify_tls: bool,
    pub stealth: bool,
    /// Jitter bounds applied before sending when `stealth` is set. Default
    /// 50-400ms (spec §4.4).
    pub stealth_jitter: (Duration, Duration),
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            use_ssl: false,
            verify_tls: true,
            stealth: false,
            stealth_jitter: (Duration::from_millis(50), Duration::from_millis(400)),
        }
    }
}

/// Builds a `reqwest::Client` per `FetchOptions`; TLS verification is only
/// ever disabled when the caller both forces SSL and explicitly opts out of
/// verification (spec §4.4: "`use_ssl`: force `https` and allow
/// `verify_tls=false`").
pub fn build_client(opts: &FetchOptions) -> anyhow::Result<Client> {
    let mut builder = Client::builder().timeout(opts.timeout);
    if opts.use_ssl && !opts.verify_tls {
        builder = builder.danger_accept_invalid_certs(true);
    }
    builder.build().context("failed to build HTTP client")
}

/// Picks a pseudo-random user-agent from the rotating pool.
pub fn pick_user_agent() -> &'static str {
    let idx = rand::rng().random_range(0..STEALTH_USER_AGENTS.len());
    STEALTH_USER_AGENTS[idx]
}

/// Waits a random jitter inside `bounds` before a stealth request is sent
/// (spec §4.4, §8 scenario F: "4 invocations... have inter-request gaps all
/// >= 50ms and <= 400ms").
pub async fn stealth_jitter(bounds: (Duration, Duration)) {
    let (lo, hi) = bounds;
    let lo_ms = lo.as_millis() as u64;
    let hi_ms = hi.as_millis().max(lo.as_millis() + 1) as u64;
    let wait_ms = rand::rng().random_range(lo_ms..hi_ms);
    trace!(wait_ms, "stealth jitter");
    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
}

/// Fetches `url` as text, honoring stealth mode (rotating UA + jitter) if
/// enabled. Used by both Discovery (description fetch) and Profiling (SCPD
/// fetch); Control has its own richer `send` path since it needs to POST
/// SOAP bodies and inspect status/headers.
pub async fn fetch_text(client: &Client, url: &url::Url, opts: &FetchOptions) -> anyhow::Result<String> {
    if opts.stealth {
        stealth_jitter(opts.stealth_jitter).await;
    }

    let mut req = client.get(url.clone());
    if opts.stealth {
        req = req.header(reqwest::header::USER_AGENT, pick_user_agent());
    }

    let resp = req.send().await.context("request failed")?;
    if !resp.status().is_success() {
        anyhow::bail!("HTTP status {}", resp.status().as_u16());
    }
    resp.text().await.context("failed to read response body")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stealth_user_agents_are_distinct() {
        let set: std::collections::HashSet<_> = STEALTH_USER_AGENTS.iter().collect();
        assert_eq!(set.len(), STEALTH_USER_AGENTS.len());
    }

    #[tokio::test]
    async fn jitter_respects_bounds() {
        let bounds = (Duration::from_millis(10), Duration::from_millis(20));
        let start = tokio::time::Instant::now();
        stealth_jitter(bounds).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(10));
    }
}
