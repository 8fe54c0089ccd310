//! Integration tests for the dispatcher lifecycle on a real runtime.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pollq::plan::{RunLog, SimTask, TaskSpec};
use pollq::{
    BlockingPool, Dispatcher, DispatcherConfig, DispatcherState, Error, EventKind, FnSource,
    MemorySink, ScriptedSource, Task, TaskError, WorkerPool,
};

const TICK: Duration = Duration::from_millis(20);
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
    runs: Mutex<Vec<u32>>,
}

impl Gauge {
    fn runs_of(&self, id: u32) -> usize {
        self.runs.lock().unwrap().iter().filter(|r| **r == id).count()
    }
}

/// Tracks how many probes run at the same time.
#[derive(Clone)]
struct Probe {
    id: u32,
    work: Duration,
    gauge: Arc<Gauge>,
}

impl Task for Probe {
    fn run(&self) -> Result<(), TaskError> {
        let now = self.gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.work);
        self.gauge.runs.lock().unwrap().push(self.id);
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

impl PartialEq for Probe {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Probe {}

impl Hash for Probe {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Probe#{}", self.id)
    }
}

fn sim(log: &Arc<RunLog>, id: u32, duration_ms: u64, fail: bool) -> SimTask {
    SimTask::new(
        &TaskSpec {
            id,
            duration_ms,
            fail,
        },
        Arc::clone(log),
    )
}

fn one_shot(log: &Arc<RunLog>, ids: &[u32]) -> ScriptedSource<SimTask> {
    ScriptedSource::new([ids.iter().map(|id| sim(log, *id, 0, false)).collect::<Vec<_>>()])
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn zero_interval_is_rejected() {
    let log = Arc::new(RunLog::default());
    let config = DispatcherConfig::new(
        one_shot(&log, &[1]),
        BlockingPool::unbounded().unwrap(),
        Duration::ZERO,
    );
    assert!(matches!(Dispatcher::new(config), Err(Error::InvalidConfig(_))));
}

#[tokio::test]
async fn lifecycle_moves_created_running_stopped() {
    let log = Arc::new(RunLog::default());
    let dispatcher = Dispatcher::new(DispatcherConfig::new(
        one_shot(&log, &[1]),
        BlockingPool::new(2).unwrap(),
        TICK,
    ))
    .unwrap();

    assert_eq!(dispatcher.state(), DispatcherState::Created);
    dispatcher.start().unwrap();
    assert_eq!(dispatcher.state(), DispatcherState::Running);
    assert!(matches!(dispatcher.start(), Err(Error::AlreadyRunning)));

    dispatcher.stop(STOP_TIMEOUT).await;
    assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    assert!(matches!(dispatcher.start(), Err(Error::AlreadyStopped)));

    // Stopping twice is harmless.
    dispatcher.stop(STOP_TIMEOUT).await;
    assert_eq!(dispatcher.state(), DispatcherState::Stopped);
}

#[tokio::test]
async fn stopped_before_start_cannot_be_started() {
    let log = Arc::new(RunLog::default());
    let dispatcher = Dispatcher::new(DispatcherConfig::new(
        one_shot(&log, &[1]),
        BlockingPool::unbounded().unwrap(),
        TICK,
    ))
    .unwrap();

    dispatcher.stop(STOP_TIMEOUT).await;
    assert!(matches!(dispatcher.start(), Err(Error::AlreadyStopped)));
    assert_eq!(dispatcher.ticks(), 0);
    assert!(log.runs().is_empty());
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_shot_batch_runs_each_task_exactly_once() {
    let log = Arc::new(RunLog::default());
    let dispatcher = Dispatcher::new(DispatcherConfig::new(
        one_shot(&log, &[1, 2, 3]),
        BlockingPool::new(4).unwrap(),
        TICK,
    ))
    .unwrap();

    dispatcher.start().unwrap();
    tokio::time::sleep(TICK * 10).await;
    dispatcher.stop(STOP_TIMEOUT).await;

    assert!(dispatcher.ticks() >= 2);
    let mut runs = log.runs();
    runs.sort_unstable();
    assert_eq!(runs, vec![1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn budget_caps_concurrent_tasks_under_a_lagging_source() {
    let gauge = Arc::new(Gauge::default());
    let batch: Vec<Probe> = (1..=6)
        .map(|id| Probe {
            id,
            work: Duration::from_millis(40),
            gauge: Arc::clone(&gauge),
        })
        .collect();
    // The source keeps returning every probe, finished or not.
    let source = FnSource::new(move || Some(batch.clone()));

    let dispatcher = Dispatcher::new(
        DispatcherConfig::new(source, BlockingPool::unbounded().unwrap(), TICK)
            .admission_budget(2),
    )
    .unwrap();

    dispatcher.start().unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    dispatcher.stop(STOP_TIMEOUT).await;

    assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    for id in 1..=6 {
        assert_eq!(gauge.runs_of(id), 1, "probe {id} should run exactly once");
    }
    assert_eq!(dispatcher.ledger().forwarded_len(), 0);
    assert_eq!(dispatcher.ledger().completed_len(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_task_is_retried_on_later_ticks() {
    let log = Arc::new(RunLog::default());
    let source = ScriptedSource::new([]).then_repeat(vec![sim(&log, 7, 0, true)]);
    let sink = Arc::new(MemorySink::<SimTask>::new());

    let dispatcher = Dispatcher::new(
        DispatcherConfig::new(source, BlockingPool::new(1).unwrap(), TICK).sink(sink.clone()),
    )
    .unwrap();

    dispatcher.start().unwrap();
    tokio::time::sleep(TICK * 10).await;
    dispatcher.stop(STOP_TIMEOUT).await;

    assert!(log.count(7) >= 2, "ran {} times", log.count(7));
    assert!(!dispatcher.ledger().is_completed(&sim(&log, 7, 0, true)));
    let failures = sink
        .kinds()
        .iter()
        .filter(|k| matches!(k, EventKind::TaskFailed { .. }))
        .count();
    assert_eq!(failures, log.count(7));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_waits_for_in_flight_tasks() {
    let log = Arc::new(RunLog::default());
    let source = ScriptedSource::new([vec![sim(&log, 1, 150, false)]]);

    let dispatcher = Dispatcher::new(DispatcherConfig::new(
        source,
        BlockingPool::new(1).unwrap(),
        TICK,
    ))
    .unwrap();

    dispatcher.start().unwrap();
    tokio::time::sleep(TICK * 2).await;
    assert!(log.runs().is_empty());

    dispatcher.stop(STOP_TIMEOUT).await;
    assert_eq!(log.runs(), vec![1]);
    assert!(dispatcher.ledger().is_completed(&sim(&log, 1, 0, false)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_ticks_after_stop() {
    let log = Arc::new(RunLog::default());
    let source = ScriptedSource::new([]).then_repeat(vec![sim(&log, 1, 0, false)]);
    let dispatcher =
        Dispatcher::new(DispatcherConfig::new(source, BlockingPool::unbounded().unwrap(), TICK))
            .unwrap();

    dispatcher.start().unwrap();
    tokio::time::sleep(TICK * 3).await;
    dispatcher.stop(STOP_TIMEOUT).await;

    let pulls = dispatcher.source().pulls();
    assert!(pulls >= 1);
    tokio::time::sleep(TICK * 5).await;
    assert_eq!(dispatcher.source().pulls(), pulls);
    assert!(dispatcher.pool().is_shutdown());
}
