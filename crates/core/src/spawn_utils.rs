use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, Instrument};

use crate::error::RconError;

/// Races `fut` against `token`, returning `RconError::Canceled` if the token
/// fires first. This is all-or-nothing: if `fut` was accumulating results
/// internally, they're dropped along with it. Spec §5's "Cancellation"
/// requirement — partial results already collected must be returned to the
/// caller — means Discovery, Profiling and the Mass Orchestrator each build
/// their own cancellation-aware fan-out loop instead of wrapping their
/// whole operation in this helper (see `discover_cancelable`,
/// `profile_devices_cancelable`, `orchestrator::run_cancelable`). This stays
/// around for operations where discarding an in-flight, non-accumulating
/// future on cancel is the correct behavior; the Control Engine's
/// single-action `invoke` doesn't need even that, being already
/// self-bounding via `TransportOptions::timeout` and `max_attempts`.
pub async fn run_cancelable<T>(
    span: tracing::Span,
    token: &CancellationToken,
    fut: impl std::future::Future<Output = T>,
) -> Result<T, RconError> {
    async move {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("canceled");
                Err(RconError::Canceled)
            }
            v = fut => Ok(v),
        }
    }
    .instrument(span)
    .await
}

/// Spawns a future with tracing instrumentation, logging completion and
/// cancellation uniformly (mirrors the teacher's `spawn_utils::spawn`).
#[track_caller]
pub fn spawn_traced(
    span: tracing::Span,
    fut: impl std::future::Future<Output = ()> + Send + 'static,
) -> tokio::task::JoinHandle<()> {
    let fut = async move {
        trace!("started");
        fut.await;
        trace!("finished");
    }
    .instrument(span);
    tokio::task::spawn(fut)
}
