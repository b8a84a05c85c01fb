use super::*;
use crate::{
    action::action_fn,
    event::EventKind,
    report::{Outcome, RunReport},
};
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::{Instant, sleep};

/// Action that records when it ran and how many copies ran at once.
#[derive(Clone)]
struct Probe {
    state: Arc<ProbeState>,
    duration: Duration,
    fail: bool,
}

#[derive(Default)]
struct ProbeState {
    running: AtomicUsize,
    max_running: AtomicUsize,
    starts: Mutex<Vec<Instant>>,
    ends: Mutex<Vec<Instant>>,
}

impl Probe {
    fn new(duration: Duration) -> Self {
        Self {
            state: Arc::default(),
            duration,
            fail: false,
        }
    }

    fn failing(duration: Duration) -> Self {
        Self {
            fail: true,
            ..Self::new(duration)
        }
    }

    fn starts(&self) -> Vec<Instant> {
        self.state.starts.lock().unwrap().clone()
    }

    fn ends(&self) -> Vec<Instant> {
        self.state.ends.lock().unwrap().clone()
    }

    fn calls(&self) -> usize {
        self.starts().len()
    }

    fn max_running(&self) -> usize {
        self.state.max_running.load(Ordering::SeqCst)
    }
}

impl Action for Probe {
    type Error = String;

    async fn perform(&self) -> core::result::Result<(), String> {
        self.state.starts.lock().unwrap().push(Instant::now());
        let running = self.state.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_running.fetch_max(running, Ordering::SeqCst);

        sleep(self.duration).await;

        self.state.running.fetch_sub(1, Ordering::SeqCst);
        self.state.ends.lock().unwrap().push(Instant::now());
        if self.fail {
            Err("boom".to_string())
        } else {
            Ok(())
        }
    }
}

fn spawn(probe: &Probe) -> Scheduler {
    Scheduler::spawn(probe.clone(), SchedulerConfig::default())
}

async fn next_done(events: &mut broadcast::Receiver<GenerationEvent>) -> (u64, Outcome) {
    loop {
        let event = events.recv().await.unwrap();
        if let EventKind::Done { outcome, .. } = event.kind {
            return (event.generation, outcome);
        }
    }
}

const SLACK: Duration = Duration::from_millis(10);

#[tokio::test(start_paused = true)]
async fn simultaneous_zero_tolerance_requests_share_one_run() {
    let probe = Probe::new(Duration::from_secs(8));
    let scheduler = spawn(&probe);
    let mut events = scheduler.subscribe();
    let t0 = Instant::now();

    scheduler.submit(Duration::ZERO).await.unwrap();
    scheduler.submit(Duration::ZERO).await.unwrap();

    let (generation, outcome) = next_done(&mut events).await;
    assert_eq!(generation, 0);
    assert_eq!(outcome, Outcome::Succeeded);
    assert!(probe.starts()[0] - t0 < SLACK);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(probe.calls(), 1);
    let stats = scheduler.stats();
    assert_eq!(stats.accepted_requests, 2);
    assert_eq!(stats.active_generation, 1);
    assert_eq!(stats.completed_executions, 1);
}

#[tokio::test(start_paused = true)]
async fn short_late_deadline_closes_and_wakes_both_waiters() {
    let probe = Probe::new(Duration::from_secs(8));
    let scheduler = spawn(&probe);
    let t0 = Instant::now();

    let first = scheduler
        .submit_with_completion(Duration::from_secs(2))
        .await
        .unwrap();
    sleep(Duration::from_secs(1)).await;
    let second = scheduler
        .submit_with_completion(Duration::ZERO)
        .await
        .unwrap();

    let (first, second) = tokio::join!(first, second);
    let woke = Instant::now();
    assert_eq!(first.unwrap().generation, 0);
    assert_eq!(second.unwrap().generation, 0);

    let starts = probe.starts();
    assert_eq!(starts.len(), 1);
    assert!(starts[0] >= t0 + Duration::from_secs(1));
    assert!(starts[0] < t0 + Duration::from_secs(1) + SLACK);
    assert!(woke >= probe.ends()[0]);
}

#[tokio::test(start_paused = true)]
async fn request_during_execution_joins_next_generation() {
    let probe = Probe::new(Duration::from_secs(3));
    let scheduler = spawn(&probe);

    let a = scheduler
        .submit_with_completion(Duration::ZERO)
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;
    let b = scheduler
        .submit_with_completion(Duration::ZERO)
        .await
        .unwrap();

    let (a, b) = tokio::join!(a, b);
    assert_eq!(a.unwrap().generation, 0);
    assert_eq!(b.unwrap().generation, 1);

    let (starts, ends) = (probe.starts(), probe.ends());
    assert_eq!(starts.len(), 2);
    assert!(starts[1] >= ends[0]);
    assert_eq!(probe.max_running(), 1);
}

#[tokio::test(start_paused = true)]
async fn first_deadline_wins_over_longer_tolerance() {
    let probe = Probe::new(Duration::from_secs(2));
    let scheduler = spawn(&probe);
    let t0 = Instant::now();

    let long = scheduler
        .submit_with_completion(Duration::from_secs(5))
        .await
        .unwrap();
    let short = scheduler
        .submit_with_completion(Duration::from_secs(1))
        .await
        .unwrap();

    let (long, short) = tokio::join!(long, short);
    assert_eq!(long.unwrap().generation, 0);
    assert_eq!(short.unwrap().generation, 0);

    let start = probe.starts()[0];
    assert!(start >= t0 + Duration::from_secs(1));
    assert!(start < t0 + Duration::from_secs(1) + SLACK);

    // The 5s deadline fires against a closed generation and is drained.
    sleep(Duration::from_secs(10)).await;
    assert_eq!(probe.calls(), 1);
    assert_eq!(scheduler.stats().pending_deadlines, 0);
}

#[tokio::test(start_paused = true)]
async fn later_deadlines_in_same_generation_are_not_armed() {
    let probe = Probe::new(Duration::from_millis(500));
    let scheduler = spawn(&probe);

    scheduler.submit(Duration::from_secs(1)).await.unwrap();
    scheduler.submit(Duration::from_secs(5)).await.unwrap();
    scheduler.submit(Duration::from_secs(3)).await.unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(scheduler.stats().pending_deadlines, 1);

    sleep(Duration::from_secs(2)).await;
    let stats = scheduler.stats();
    assert_eq!(stats.pending_deadlines, 0);
    assert_eq!(stats.completed_executions, 1);
}

#[tokio::test(start_paused = true)]
async fn requests_keep_joining_while_previous_run_executes() {
    let probe = Probe::new(Duration::from_secs(3));
    let scheduler = spawn(&probe);
    let t0 = Instant::now();

    let a = scheduler
        .submit_with_completion(Duration::ZERO)
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;
    let b = scheduler
        .submit_with_completion(Duration::ZERO)
        .await
        .unwrap();
    sleep(Duration::from_millis(900)).await;
    // Generation 1 is already closing; this rides along without arming its
    // own hour-long deadline.
    let c = scheduler
        .submit_with_completion(Duration::from_secs(3600))
        .await
        .unwrap();

    let (a, b, c) = tokio::join!(a, b, c);
    assert_eq!(a.unwrap().generation, 0);
    assert_eq!(b.unwrap().generation, 1);
    assert_eq!(c.unwrap().generation, 1);
    assert!(Instant::now() < t0 + Duration::from_secs(10));
    assert_eq!(probe.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn storm_is_single_flight_and_covers_every_request() {
    let probe = Probe::new(Duration::from_millis(750));
    let scheduler = spawn(&probe);

    let mut completions = Vec::new();
    for i in 0..120_u64 {
        let tolerance = Duration::from_millis((i * 37) % 500);
        completions.push(scheduler.submit_with_completion(tolerance).await.unwrap());
        sleep(Duration::from_millis(25)).await;
    }

    let reports: Vec<RunReport> = futures::future::join_all(completions)
        .await
        .into_iter()
        .map(|report| report.unwrap())
        .collect();

    assert!(reports.iter().all(|r| r.outcome.is_success()));
    assert!(
        reports
            .windows(2)
            .all(|pair| pair[0].generation <= pair[1].generation)
    );

    let mut generations: Vec<u64> = reports.iter().map(|r| r.generation).collect();
    generations.dedup();
    assert_eq!(probe.calls(), generations.len());
    assert!(probe.calls() > 1);
    assert_eq!(probe.max_running(), 1);

    let (starts, ends) = (probe.starts(), probe.ends());
    for (next_start, prev_end) in starts.iter().skip(1).zip(&ends) {
        assert!(next_start >= prev_end);
    }
}

#[tokio::test(start_paused = true)]
async fn failed_action_reports_and_keeps_scheduling() {
    let probe = Probe::failing(Duration::from_secs(1));
    let scheduler = spawn(&probe);

    let first = scheduler
        .submit_with_completion(Duration::ZERO)
        .await
        .unwrap()
        .await
        .unwrap();
    assert_eq!(first.generation, 0);
    assert_eq!(
        first.outcome,
        Outcome::Failed {
            reason: "boom".to_string()
        }
    );

    let second = scheduler
        .submit_with_completion(Duration::ZERO)
        .await
        .unwrap()
        .await
        .unwrap();
    assert_eq!(second.generation, 1);

    let stats = scheduler.stats();
    assert_eq!(stats.completed_executions, 2);
    assert_eq!(stats.failed_executions, 2);
}

#[tokio::test(start_paused = true)]
async fn panicking_action_still_releases_waiters_and_token() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let scheduler = Scheduler::spawn(
        action_fn(move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    panic!("kaboom");
                }
                Ok::<(), String>(())
            }
        }),
        SchedulerConfig::default(),
    );

    let first = scheduler
        .submit_with_completion(Duration::ZERO)
        .await
        .unwrap()
        .await
        .unwrap();
    assert_eq!(
        first.outcome,
        Outcome::Failed {
            reason: "action panicked".to_string()
        }
    );

    let second = scheduler
        .submit_with_completion(Duration::ZERO)
        .await
        .unwrap()
        .await
        .unwrap();
    assert_eq!(second.generation, 1);
    assert_eq!(second.outcome, Outcome::Succeeded);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn action_panicking_before_returning_its_future_is_a_failed_run() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let scheduler = Scheduler::spawn(
        action_fn(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("kaboom before the first poll");
            }
            futures::future::ready(Ok::<(), String>(()))
        }),
        SchedulerConfig::default(),
    );
    let mut events = scheduler.subscribe();

    let first = scheduler
        .submit_with_completion(Duration::ZERO)
        .await
        .unwrap()
        .await
        .unwrap();
    assert_eq!(
        first.outcome,
        Outcome::Failed {
            reason: "action panicked".to_string()
        }
    );
    assert_eq!(next_done(&mut events).await.0, 0);

    let stats = scheduler.stats();
    assert_eq!(stats.completed_executions, 1);
    assert_eq!(stats.failed_executions, 1);

    let second = scheduler
        .submit_with_completion(Duration::ZERO)
        .await
        .unwrap()
        .await
        .unwrap();
    assert_eq!(second.generation, 1);
    assert_eq!(second.outcome, Outcome::Succeeded);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn lifecycle_events_follow_generation_order() {
    let probe = Probe::new(Duration::from_secs(2));
    let scheduler = spawn(&probe);
    let mut events = scheduler.subscribe();

    let completion = scheduler
        .submit_with_completion(Duration::ZERO)
        .await
        .unwrap();

    let mut seen = Vec::new();
    loop {
        let event = events.recv().await.unwrap();
        let done = event.generation == 0 && matches!(event.kind, EventKind::Done { .. });
        seen.push(event);
        if done {
            break;
        }
    }
    completion.await.unwrap();

    let first: Vec<&EventKind> = seen
        .iter()
        .filter(|event| event.generation == 0)
        .map(|event| &event.kind)
        .collect();
    assert_eq!(first.len(), 3);
    assert_eq!(first[0], &EventKind::Closed { waiters: 1 });
    assert_eq!(first[1], &EventKind::Executing);
    match first[2] {
        EventKind::Done { outcome, elapsed } => {
            assert_eq!(outcome, &Outcome::Succeeded);
            assert!(*elapsed >= Duration::from_secs(2));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(seen.contains(&GenerationEvent {
        generation: 1,
        kind: EventKind::Opened,
    }));
}

#[tokio::test(start_paused = true)]
async fn shutdown_finishes_in_flight_run_and_abandons_the_rest() {
    let probe = Probe::new(Duration::from_secs(3));
    let scheduler = spawn(&probe);
    let mut events = scheduler.subscribe();

    let running = scheduler
        .submit_with_completion(Duration::ZERO)
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;
    let queued = scheduler
        .submit_with_completion(Duration::from_secs(3600))
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;

    scheduler.shutdown().await.unwrap();

    assert_eq!(running.await.unwrap().generation, 0);
    assert_eq!(queued.await, Err(Error::Abandoned));
    assert!(scheduler.is_shutting_down());
    assert_eq!(
        scheduler.submit(Duration::ZERO).await,
        Err(Error::ServiceShutdown)
    );
    assert_eq!(probe.calls(), 1);
    assert_eq!(scheduler.stats().pending_deadlines, 0);

    let mut abandoned = None;
    while let Ok(event) = events.try_recv() {
        if let EventKind::Abandoned { waiters } = event.kind {
            abandoned = Some((event.generation, waiters));
        }
    }
    assert_eq!(abandoned, Some((1, 1)));
}

#[tokio::test(start_paused = true)]
async fn shutdown_abandons_generation_waiting_for_token() {
    let probe = Probe::new(Duration::from_secs(3));
    let scheduler = spawn(&probe);

    let running = scheduler
        .submit_with_completion(Duration::ZERO)
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;
    let closing = scheduler
        .submit_with_completion(Duration::ZERO)
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;

    scheduler.shutdown().await.unwrap();

    assert!(running.await.unwrap().outcome.is_success());
    assert_eq!(closing.await, Err(Error::Abandoned));
    assert_eq!(probe.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_last_handle_abandons_collecting_generation() {
    let probe = Probe::new(Duration::from_secs(1));
    let scheduler = spawn(&probe);
    let mut events = scheduler.subscribe();

    let pending = scheduler
        .submit_with_completion(Duration::from_secs(3600))
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;
    drop(scheduler);

    assert_eq!(pending.await, Err(Error::Abandoned));
    assert_eq!(probe.calls(), 0);

    let mut abandoned = None;
    while let Ok(event) = events.recv().await {
        if let EventKind::Abandoned { waiters } = event.kind {
            abandoned = Some((event.generation, waiters));
        }
    }
    assert_eq!(abandoned, Some((0, 1)));
}
