use core::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Timer task that reports `generation` on `report` once `delay` has elapsed.
///
/// The scheduler never cancels an individual deadline: a report for a
/// generation that is no longer collecting is simply drained and ignored. The
/// only early exit is scheduler shutdown, so no timer outlives the loop that
/// would have drained it.
pub(crate) async fn deadline_task(
    delay: Duration,
    generation: u64,
    report: mpsc::UnboundedSender<u64>,
    shutdown: CancellationToken,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Deadline set for generation {generation} in {delay:?}");

    tokio::select! {
        () = tokio::time::sleep(delay) => {
            // The loop may already be gone; nothing left to tell.
            let _ = report.send(generation);
        }
        () = shutdown.cancelled() => {}
    }
}
