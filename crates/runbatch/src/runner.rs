use crate::{
    action::Action,
    event::{EventBus, EventKind},
    report::{Outcome, RunReport},
    request::QueueItem,
    stats::Stats,
};
use core::panic::AssertUnwindSafe;
use futures::FutureExt;
use std::sync::Arc;
use tokio::{sync::mpsc, time::Instant};

/// Owns one generation from its first request until its waiters are woken.
///
/// The runner drains its queue until the close marker arrives, then invokes
/// the action exactly once, signals every collected completion sink, and only
/// then releases the capacity token that came with the close marker.
///
/// If the queue is dropped before the close marker arrives (scheduler
/// shutdown), the generation is abandoned: the action never runs and dropping
/// the collected sinks resolves each waiter's [`Completion`] to
/// [`Error::Abandoned`].
///
/// [`Completion`]: crate::Completion
/// [`Error::Abandoned`]: crate::Error::Abandoned
pub(crate) struct GenerationRunner<A> {
    generation: u64,
    queue: mpsc::UnboundedReceiver<QueueItem>,
    action: Arc<A>,
    events: EventBus,
    stats: Arc<Stats>,
}

impl<A: Action> GenerationRunner<A> {
    pub(crate) const fn new(
        generation: u64,
        queue: mpsc::UnboundedReceiver<QueueItem>,
        action: Arc<A>,
        events: EventBus,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            generation,
            queue,
            action,
            events,
            stats,
        }
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(generation = self.generation)))]
    pub(crate) async fn run(mut self) {
        let generation = self.generation;
        let mut waiters = Vec::new();

        let permit = loop {
            match self.queue.recv().await {
                Some(QueueItem::Request(request)) => {
                    if let Some(notify) = request.notify {
                        waiters.push(notify);
                    }
                }
                Some(QueueItem::Close(permit)) => break permit,
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        "Generation {generation} abandoned with {} waiters",
                        waiters.len()
                    );
                    self.events.publish(
                        generation,
                        EventKind::Abandoned {
                            waiters: waiters.len(),
                        },
                    );
                    return;
                }
            }
        };

        #[cfg(feature = "tracing")]
        tracing::info!("Close marker received; proceeding with run {generation}");
        self.events.publish(
            generation,
            EventKind::Closed {
                waiters: waiters.len(),
            },
        );

        #[cfg(feature = "tracing")]
        tracing::info!("Starting run {generation}");
        self.events.publish(generation, EventKind::Executing);

        let started = Instant::now();
        // The future is built inside the guard so a panic raised before its
        // first poll is caught as well.
        let outcome = match AssertUnwindSafe(async { self.action.perform().await })
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Outcome::Succeeded,
            Ok(Err(e)) => Outcome::Failed {
                reason: e.to_string(),
            },
            Err(_) => Outcome::Failed {
                reason: "action panicked".to_string(),
            },
        };
        let elapsed = started.elapsed();
        self.stats.record_execution(outcome.is_success());

        match &outcome {
            Outcome::Succeeded => {
                #[cfg(feature = "tracing")]
                tracing::info!("Finished run {generation} in {elapsed:?}");
            }
            Outcome::Failed { reason: _reason } => {
                #[cfg(feature = "tracing")]
                tracing::error!("Run {generation} failed after {elapsed:?}: {_reason}");
            }
        }

        let report = RunReport {
            generation,
            outcome: outcome.clone(),
        };
        for notify in waiters {
            // The caller may have stopped waiting; that is its business.
            let _ = notify.send(report.clone());
        }

        self.events
            .publish(generation, EventKind::Done { outcome, elapsed });

        // Releasing the token lets the scheduler close the next generation.
        drop(permit);
    }
}
