use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use upnp_recon_core::{RconError, Result};
use upnp_recon_net::{pick_user_agent, stealth_jitter};

/// A fully-built outbound request, independent of the protocol that
/// produced it (SOAP, form-encoded, JSON) so the `Transport` seam stays
/// uniform across adapters.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: reqwest::Method,
    pub url: url::Url,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct InboundResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Transport seam for the Control Engine (spec §9 design notes, SPEC_FULL
/// §1 ambient stack): real requests go over HTTP, tests inject a canned
/// fake instead of touching the network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> Result<InboundResponse>;
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub timeout: Duration,
    pub use_ssl: bool,
    pub verify_tls: bool,
    pub stealth: bool,
    pub stealth_jitter: (Duration, Duration),
    pub max_attempts: u32,
    pub dry_run: bool,
    /// Request/response snippet length attached to errors (spec §7),
    /// 300 bytes by default, 1000 in verbose mode.
    pub snippet_len: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            use_ssl: false,
            verify_tls: true,
            stealth: false,
            stealth_jitter: (Duration::from_millis(50), Duration::from_millis(400)),
            max_attempts: 3,
            dry_run: false,
            snippet_len: 300,
        }
    }
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(opts: &TransportOptions) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(opts.timeout);
        if opts.use_ssl && !opts.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(Self { client: builder.build()? })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<InboundResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .body(request.body.clone());
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                RconError::Timeout
            } else {
                RconError::NetworkUnreachable(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| RconError::NetworkUnreachable(e.to_string()))?
            .to_vec();

        // Any status that came back as a completed HTTP exchange is surfaced
        // to the caller as `Ok`, body intact — a 500 from a UPnP device
        // usually carries a `<s:Fault>` the caller needs to parse before it
        // can tell a business-logic failure from a transient server error
        // (spec §4.4 / testable property #9). Only genuine transport
        // failures (above) are `Err`.
        Ok(InboundResponse { status, body })
    }
}

fn truncate(bytes: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max {
        text.into_owned()
    } else {
        let boundary = floor_char_boundary(&text, max);
        format!("{}...", &text[..boundary])
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut idx = index.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 408
}

/// Sends `request` through `transport`, applying the stealth jitter/UA
/// rotation and the exponential-backoff retry policy of spec §4.4 /§7.
/// Retries only on `is_transient()` transport errors or a retryable-looking
/// HTTP status, never on `dry_run`. Equivalent to
/// `send_with_retry_checked` with a closure that always allows the retry.
pub async fn send_with_retry(
    transport: &dyn Transport,
    request: OutboundRequest,
    opts: &TransportOptions,
) -> Result<InboundResponse> {
    send_with_retry_checked(transport, request, opts, |_resp| true).await
}

/// Like [`send_with_retry`], but for a completed response with a
/// retryable-looking status (5xx/408), `retry_on_response` is consulted
/// before actually retrying. This lets a SOAP-aware caller inspect the
/// body for a `<s:Fault>` and refuse the retry when the "failure" is
/// really a business-logic `SoapFault` the device sent deliberately — that
/// must reach the caller as-is, not be retried away (spec §4.4, testable
/// property #9).
pub async fn send_with_retry_checked<F>(
    transport: &dyn Transport,
    mut request: OutboundRequest,
    opts: &TransportOptions,
    retry_on_response: F,
) -> Result<InboundResponse>
where
    F: Fn(&InboundResponse) -> bool,
{
    if opts.dry_run {
        return Ok(InboundResponse {
            status: 0,
            body: request.body,
        });
    }

    if opts.stealth {
        stealth_jitter(opts.stealth_jitter).await;
        request
            .headers
            .insert("User-Agent".to_string(), pick_user_agent().to_string());
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        match transport.send(&request).await {
            Ok(resp)
                if attempt < opts.max_attempts
                    && is_retryable_status(resp.status)
                    && retry_on_response(&resp) =>
            {
                let backoff_ms = 2u64.pow(attempt.min(6)) * 100;
                let jitter_ms = rand::rng().random_range(0..100);
                tokio::time::sleep(Duration::from_millis(backoff_ms + jitter_ms)).await;
                continue;
            }
            Ok(resp) => return Ok(resp),
            Err(e) if attempt < opts.max_attempts && e.is_transient() => {
                let backoff_ms = 2u64.pow(attempt.min(6)) * 100;
                let jitter_ms = rand::rng().random_range(0..100);
                tokio::time::sleep(Duration::from_millis(backoff_ms + jitter_ms)).await;
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

pub fn snippet_of(bytes: &[u8], opts: &TransportOptions) -> String {
    truncate(bytes, opts.snippet_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyTransport {
        fail_times: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn send(&self, _request: &OutboundRequest) -> Result<InboundResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(RconError::Timeout)
            } else {
                Ok(InboundResponse { status: 200, body: b"ok".to_vec() })
            }
        }
    }

    struct AlwaysInvalidArgument;

    #[async_trait]
    impl Transport for AlwaysInvalidArgument {
        async fn send(&self, _request: &OutboundRequest) -> Result<InboundResponse> {
            Err(RconError::InvalidArgument("bad".to_string()))
        }
    }

    fn request() -> OutboundRequest {
        OutboundRequest {
            method: reqwest::Method::POST,
            url: url::Url::parse("http://192.0.2.5:1400/ctl").unwrap(),
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    #[tokio::test]
    async fn retries_on_transient_error_then_succeeds() {
        let transport = FlakyTransport { fail_times: 2, calls: AtomicU32::new(0) };
        let opts = TransportOptions { max_attempts: 3, ..Default::default() };
        let result = send_with_retry(&transport, request(), &opts).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn never_retries_invalid_argument() {
        let transport = AlwaysInvalidArgument;
        let opts = TransportOptions { max_attempts: 5, ..Default::default() };
        let result = send_with_retry(&transport, request(), &opts).await;
        assert!(matches!(result, Err(RconError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn dry_run_never_calls_transport() {
        let transport = AlwaysInvalidArgument;
        let opts = TransportOptions { dry_run: true, ..Default::default() };
        let result = send_with_retry(&transport, request(), &opts).await;
        assert!(result.is_ok());
    }

    struct AlwaysStatus {
        status: u16,
        body: Vec<u8>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Transport for AlwaysStatus {
        async fn send(&self, _request: &OutboundRequest) -> Result<InboundResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(InboundResponse { status: self.status, body: self.body.clone() })
        }
    }

    #[tokio::test]
    async fn bad_status_is_surfaced_as_ok_with_body_intact() {
        let transport = AlwaysStatus { status: 500, body: b"server error".to_vec(), calls: AtomicU32::new(0) };
        let opts = TransportOptions { max_attempts: 1, ..Default::default() };
        let result = send_with_retry(&transport, request(), &opts).await.unwrap();
        assert_eq!(result.status, 500);
        assert_eq!(result.body, b"server error");
    }

    #[tokio::test]
    async fn retries_plain_5xx_without_a_refusing_callback() {
        let transport = AlwaysStatus { status: 503, body: Vec::new(), calls: AtomicU32::new(0) };
        let opts = TransportOptions { max_attempts: 3, ..Default::default() };
        let _ = send_with_retry(&transport, request(), &opts).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn checked_retry_stops_when_callback_refuses() {
        let transport = AlwaysStatus { status: 500, body: Vec::new(), calls: AtomicU32::new(0) };
        let opts = TransportOptions { max_attempts: 5, ..Default::default() };
        let _ = send_with_retry_checked(&transport, request(), &opts, |_resp| false).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}
