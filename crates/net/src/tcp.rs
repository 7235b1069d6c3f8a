use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Attempt a bounded TCP connect sweep of `(host, port)` pairs, spec §4.1
/// step 2, §5 ("Port-sweep connects: <= 256 in flight, rate-limited
/// globally"). Mirrors the `Semaphore` + `FuturesUnordered` pattern used for
/// bounded fan-out elsewhere in the stack (e.g. the Profiling Engine's SCPD
/// fetch fan-out).
///
/// When `token` is given and fires before the sweep finishes, returns
/// whatever addresses were already found open instead of waiting for the
/// remaining in-flight connects (spec §5: cancellation must surface partial
/// results, testable property #11).
pub async fn sweep_open_ports(
    hosts: Vec<IpAddr>,
    ports: Vec<u16>,
    concurrency: usize,
    connect_timeout: Duration,
    token: Option<&CancellationToken>,
) -> Vec<SocketAddr> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut unordered = FuturesUnordered::new();

    for host in hosts {
        for &port in &ports {
            let semaphore = semaphore.clone();
            let addr = SocketAddr::new(host, port);
            unordered.push(async move {
                let _permit = semaphore.acquire().await.ok()?;
                let connected = tokio::time::timeout(connect_timeout, tokio::net::TcpStream::connect(addr))
                    .await
                    .ok()?
                    .is_ok();
                connected.then_some(addr)
            });
        }
    }

    let mut open = Vec::new();
    loop {
        let next = match token {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => break,
                    result = unordered.next() => result,
                }
            }
            None => unordered.next().await,
        };
        match next {
            Some(Some(addr)) => {
                trace!(%addr, "port open");
                open.push(addr);
            }
            Some(None) => {}
            None => break,
        }
    }
    open
}

/// Every IPv4 host in `cidr`, excluding the network/broadcast addresses and
/// `exclude_host` (the probing host itself), per spec §4.1 step 2.
pub fn hosts_in_cidr(cidr: ipnetwork::Ipv4Network, exclude_host: Option<std::net::Ipv4Addr>) -> Vec<IpAddr> {
    let network = cidr.network();
    let broadcast = cidr.broadcast();
    cidr.iter()
        .filter(|ip| *ip != network && *ip != broadcast && Some(*ip) != exclude_host)
        .map(IpAddr::V4)
        .collect()
}
