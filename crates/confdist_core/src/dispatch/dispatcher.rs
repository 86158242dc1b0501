//! Update dispatcher: per-identity ordered delivery of record versions.
//!
//! # Responsibility
//! - Decide, per task, whether the record's live version still has to be
//!   delivered or was already superseded.
//! - Run tasks on a fixed worker pool, routing every identity to one worker.
//!
//! # Invariants
//! - Tasks for the same identity never run concurrently and run in enqueue
//!   order.
//! - A task always delivers the record's live content, never the content
//!   seen at enqueue time.
//! - `mark_dispatched` is only called after every target accepted the
//!   version, and only with the version that was read before delivery.
//! - No record lock is held while a subscriber runs.

use crate::dispatch::subscriber::{DeliveryError, Subscriber};
use crate::error::{CoreError, CoreResult};
use crate::model::properties::Properties;
use crate::model::record::VersionedRecord;
use log::{debug, info, warn};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// What a dispatch task delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Regular version delivery, subject to the staleness check.
    Update,
    /// Delivers the live state to specific subscribers only (attach or
    /// location change). Never marks dispatched. Steps aside once the record
    /// moved past the version seen at enqueue: the update task scheduled by
    /// that write already includes these subscribers.
    Targeted,
    /// Tells subscribers that lost the record that there is no configuration.
    Revoke,
}

/// A queued unit of work for one record.
pub struct DispatchTask {
    record: Arc<VersionedRecord>,
    version_at_enqueue: i64,
    targets: Vec<Arc<dyn Subscriber>>,
    kind: TaskKind,
}

impl DispatchTask {
    pub fn new(
        kind: TaskKind,
        record: Arc<VersionedRecord>,
        targets: Vec<Arc<dyn Subscriber>>,
    ) -> Self {
        let version_at_enqueue = record.modification_counter();
        Self {
            record,
            version_at_enqueue,
            targets,
            kind,
        }
    }

    pub fn update(record: Arc<VersionedRecord>, targets: Vec<Arc<dyn Subscriber>>) -> Self {
        Self::new(TaskKind::Update, record, targets)
    }

    pub fn identity(&self) -> &str {
        self.record.identity()
    }

    pub fn version_at_enqueue(&self) -> i64 {
        self.version_at_enqueue
    }
}

/// Result of processing one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// `version` reached every target and was marked dispatched.
    Delivered { version: i64, subscribers: usize },
    /// A newer-or-equal version was already delivered; nothing was called.
    Stale { live: i64, dispatched: i64 },
    /// At least one target failed; the version stays undelivered.
    Failed { version: i64, failures: usize },
    /// Targeted or revoke delivery finished.
    Notified { subscribers: usize, failures: usize },
    /// Targeted task overtaken by a newer write; that write's update task
    /// delivers instead.
    Superseded { enqueued: i64, live: i64 },
    /// Targeted task for a deleted record.
    Skipped,
}

/// Runs one task to completion on the calling thread.
pub fn process_task(task: &DispatchTask) -> DispatchOutcome {
    let record = task.record.as_ref();
    match task.kind {
        TaskKind::Update => process_update(task),
        TaskKind::Targeted => {
            if record.is_deleted() {
                return DispatchOutcome::Skipped;
            }
            let (live, content) = record.current_version();
            if live > task.version_at_enqueue {
                debug!(
                    "event=dispatch module=dispatch status=superseded identity={} enqueued={} live={}",
                    record.identity(),
                    task.version_at_enqueue,
                    live
                );
                return DispatchOutcome::Superseded {
                    enqueued: task.version_at_enqueue,
                    live,
                };
            }
            let visible = content.map(|content| record.visible_properties(content));
            let failures = deliver_all(record.identity(), visible.as_ref(), &task.targets);
            DispatchOutcome::Notified {
                subscribers: task.targets.len(),
                failures,
            }
        }
        TaskKind::Revoke => {
            let failures = deliver_all(record.identity(), None, &task.targets);
            DispatchOutcome::Notified {
                subscribers: task.targets.len(),
                failures,
            }
        }
    }
}

fn process_update(task: &DispatchTask) -> DispatchOutcome {
    let record = task.record.as_ref();
    let (live, content) = record.current_version();
    let dispatched = record.dispatched_counter();

    if live <= dispatched {
        debug!(
            "event=dispatch module=dispatch status=stale identity={} enqueued={} live={} dispatched={}",
            record.identity(),
            task.version_at_enqueue,
            live,
            dispatched
        );
        return DispatchOutcome::Stale { live, dispatched };
    }

    let visible = content.map(|content| record.visible_properties(content));
    let failures = deliver_all(record.identity(), visible.as_ref(), &task.targets);
    if failures > 0 {
        return DispatchOutcome::Failed {
            version: live,
            failures,
        };
    }

    record.mark_dispatched(live);
    debug!(
        "event=dispatch module=dispatch status=ok identity={} enqueued={} version={} subscribers={} absent={}",
        record.identity(),
        task.version_at_enqueue,
        live,
        task.targets.len(),
        visible.is_none()
    );
    DispatchOutcome::Delivered {
        version: live,
        subscribers: task.targets.len(),
    }
}

fn deliver_all(
    identity: &str,
    properties: Option<&Properties>,
    targets: &[Arc<dyn Subscriber>],
) -> usize {
    let mut failures = 0;
    for subscriber in targets {
        if let Err(err) = deliver_one(subscriber.as_ref(), identity, properties) {
            failures += 1;
            warn!(
                "event=dispatch module=dispatch status=error identity={} subscriber={} error_code=delivery_failed error={}",
                identity, err.subscriber_id, err.message
            );
        }
    }
    failures
}

fn deliver_one(
    subscriber: &dyn Subscriber,
    identity: &str,
    properties: Option<&Properties>,
) -> Result<(), DeliveryError> {
    match catch_unwind(AssertUnwindSafe(|| subscriber.deliver(identity, properties))) {
        Ok(result) => result,
        Err(_) => Err(DeliveryError::new(
            subscriber.subscriber_id(),
            "subscriber panicked during delivery",
        )),
    }
}

/// Running totals across all workers.
#[derive(Debug, Default)]
pub struct DispatchStats {
    delivered: AtomicU64,
    stale: AtomicU64,
    failed: AtomicU64,
    notified: AtomicU64,
}

impl DispatchStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn stale(&self) -> u64 {
        self.stale.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn notified(&self) -> u64 {
        self.notified.load(Ordering::Relaxed)
    }

    fn record(&self, outcome: &DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Delivered { .. } => &self.delivered,
            DispatchOutcome::Stale { .. } | DispatchOutcome::Superseded { .. } => &self.stale,
            DispatchOutcome::Failed { .. } => &self.failed,
            DispatchOutcome::Notified { .. } => &self.notified,
            DispatchOutcome::Skipped => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

enum WorkerMessage {
    Run(DispatchTask),
    Barrier(Sender<()>),
}

struct Worker {
    sender: Option<Sender<WorkerMessage>>,
    handle: Option<JoinHandle<()>>,
}

/// Worker pool executing dispatch tasks.
///
/// Each identity hashes to exactly one worker, whose FIFO channel serializes
/// that identity's tasks. Dropping the dispatcher drains queued tasks and
/// joins the workers.
pub struct UpdateDispatcher {
    workers: Vec<Worker>,
    stats: Arc<DispatchStats>,
}

impl UpdateDispatcher {
    /// Spawns `worker_count` dispatch threads (at least one).
    pub fn new(worker_count: usize) -> CoreResult<Self> {
        let stats = Arc::new(DispatchStats::default());
        let mut workers = Vec::with_capacity(worker_count.max(1));

        for index in 0..worker_count.max(1) {
            let (sender, receiver) = mpsc::channel();
            let worker_stats = Arc::clone(&stats);
            let handle = thread::Builder::new()
                .name(format!("confdist-dispatch-{index}"))
                .spawn(move || run_worker(receiver, worker_stats))
                .map_err(|err| CoreError::Dispatcher(err.to_string()))?;
            workers.push(Worker {
                sender: Some(sender),
                handle: Some(handle),
            });
        }

        info!(
            "event=dispatcher_start module=dispatch status=ok workers={}",
            workers.len()
        );
        Ok(Self { workers, stats })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Queues `task` on the worker owning its identity.
    ///
    /// Returns `false` when the worker is gone and the task was dropped.
    pub fn enqueue(&self, task: DispatchTask) -> bool {
        let index = self.worker_index(task.identity());
        let identity = task.identity().to_string();
        let sent = self.workers[index]
            .sender
            .as_ref()
            .is_some_and(|sender| sender.send(WorkerMessage::Run(task)).is_ok());
        if !sent {
            warn!(
                "event=dispatch_enqueue module=dispatch status=error identity={} worker={} error_code=worker_unavailable",
                identity, index
            );
        }
        sent
    }

    /// Blocks until every task enqueued before this call has been processed.
    pub fn flush(&self) {
        let acks: Vec<Receiver<()>> = self
            .workers
            .iter()
            .filter_map(|worker| {
                let (ack_sender, ack_receiver) = mpsc::channel();
                let sender = worker.sender.as_ref()?;
                sender.send(WorkerMessage::Barrier(ack_sender)).ok()?;
                Some(ack_receiver)
            })
            .collect();

        for ack in acks {
            let _ = ack.recv();
        }
    }

    fn worker_index(&self, identity: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        identity.hash(&mut hasher);
        (hasher.finish() % self.workers.len() as u64) as usize
    }
}

impl Drop for UpdateDispatcher {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            worker.sender.take();
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
        info!("event=dispatcher_stop module=dispatch status=ok");
    }
}

fn run_worker(receiver: Receiver<WorkerMessage>, stats: Arc<DispatchStats>) {
    while let Ok(message) = receiver.recv() {
        match message {
            WorkerMessage::Run(task) => {
                let outcome = process_task(&task);
                stats.record(&outcome);
            }
            WorkerMessage::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{process_task, DispatchOutcome, DispatchTask, TaskKind, UpdateDispatcher};
    use crate::dispatch::subscriber::{DeliveryError, Subscriber};
    use crate::model::properties::{Properties, IDENTITY_KEY};
    use crate::model::record::VersionedRecord;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Option<Properties>>>,
        fail: AtomicBool,
    }

    impl Recorder {
        fn seen(&self) -> Vec<Option<Properties>> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Subscriber for Recorder {
        fn subscriber_id(&self) -> &str {
            "recorder"
        }

        fn deliver(
            &self,
            _identity: &str,
            properties: Option<&Properties>,
        ) -> Result<(), DeliveryError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DeliveryError::new("recorder", "unavailable"));
            }
            self.seen.lock().unwrap().push(properties.cloned());
            Ok(())
        }
    }

    struct Panicking;

    impl Subscriber for Panicking {
        fn subscriber_id(&self) -> &str {
            "panicking"
        }

        fn deliver(&self, _: &str, _: Option<&Properties>) -> Result<(), DeliveryError> {
            panic!("boom");
        }
    }

    fn record() -> Arc<VersionedRecord> {
        Arc::new(VersionedRecord::new("app.http", None, None, None).unwrap())
    }

    fn content(port: i64) -> Properties {
        Properties::new().with("port", port)
    }

    #[test]
    fn tasks_completing_out_of_order_collapse_to_latest() {
        let record = record();
        let recorder = Arc::new(Recorder::default());
        let targets: Vec<Arc<dyn Subscriber>> = vec![recorder.clone()];

        let mut tasks = Vec::new();
        for port in 1..=3 {
            record.assign_content(content(port)).unwrap();
            tasks.push(DispatchTask::update(record.clone(), targets.clone()));
        }
        let max_enqueued = tasks.iter().map(|t| t.version_at_enqueue()).max().unwrap();

        let outcomes: Vec<_> = [2, 0, 1].iter().map(|&i| process_task(&tasks[i])).collect();

        assert!(matches!(outcomes[0], DispatchOutcome::Delivered { version, .. } if version == max_enqueued));
        assert!(matches!(outcomes[1], DispatchOutcome::Stale { .. }));
        assert!(matches!(outcomes[2], DispatchOutcome::Stale { .. }));
        assert_eq!(record.dispatched_counter(), max_enqueued);

        let seen = recorder.seen();
        assert_eq!(seen.len(), 1);
        let delivered = seen[0].as_ref().expect("content should be delivered");
        assert_eq!(delivered.get("port").and_then(|v| v.as_i64()), Some(3));
        assert_eq!(delivered.get_str(IDENTITY_KEY), Some("app.http"));
    }

    #[test]
    fn late_task_for_old_version_delivers_newer_content_once() {
        let record = record();
        let recorder = Arc::new(Recorder::default());
        let targets: Vec<Arc<dyn Subscriber>> = vec![recorder.clone()];

        record.assign_content(content(1)).unwrap();
        let early = DispatchTask::update(record.clone(), targets.clone());
        record.assign_content(content(2)).unwrap();

        assert!(matches!(process_task(&early), DispatchOutcome::Delivered { .. }));
        let later = DispatchTask::update(record.clone(), targets);
        assert!(matches!(process_task(&later), DispatchOutcome::Stale { .. }));
        assert_eq!(recorder.seen().len(), 1);
    }

    #[test]
    fn failed_delivery_is_retried_by_next_task() {
        let record = record();
        let recorder = Arc::new(Recorder::default());
        let targets: Vec<Arc<dyn Subscriber>> = vec![recorder.clone()];
        record.assign_content(content(1)).unwrap();

        recorder.fail.store(true, Ordering::SeqCst);
        let outcome = process_task(&DispatchTask::update(record.clone(), targets.clone()));
        assert!(matches!(outcome, DispatchOutcome::Failed { failures: 1, .. }));
        assert!(record.dispatched_counter() < record.modification_counter());

        recorder.fail.store(false, Ordering::SeqCst);
        let outcome = process_task(&DispatchTask::update(record.clone(), targets));
        assert!(matches!(outcome, DispatchOutcome::Delivered { .. }));
        assert_eq!(record.dispatched_counter(), record.modification_counter());
    }

    #[test]
    fn deleted_record_delivers_absence_once() {
        let record = record();
        let recorder = Arc::new(Recorder::default());
        let targets: Vec<Arc<dyn Subscriber>> = vec![recorder.clone()];
        record.assign_content(content(1)).unwrap();
        let pending = DispatchTask::update(record.clone(), targets.clone());
        record.delete();

        assert!(matches!(process_task(&pending), DispatchOutcome::Delivered { .. }));
        let after = DispatchTask::update(record.clone(), targets.clone());
        assert!(matches!(process_task(&after), DispatchOutcome::Stale { .. }));
        let targeted = DispatchTask::new(TaskKind::Targeted, record.clone(), targets);
        assert_eq!(process_task(&targeted), DispatchOutcome::Skipped);

        assert_eq!(recorder.seen(), vec![None]);
    }

    #[test]
    fn targeted_task_ignores_dispatched_counter() {
        let record = record();
        record.assign_content(content(7)).unwrap();
        record.mark_dispatched(record.modification_counter());

        let late_joiner = Arc::new(Recorder::default());
        let targets: Vec<Arc<dyn Subscriber>> = vec![late_joiner.clone()];
        let task = DispatchTask::new(TaskKind::Targeted, record.clone(), targets);
        assert!(matches!(
            process_task(&task),
            DispatchOutcome::Notified { subscribers: 1, failures: 0 }
        ));
        assert_eq!(late_joiner.seen().len(), 1);
    }

    #[test]
    fn targeted_task_steps_aside_for_newer_write() {
        let record = record();
        record.assign_content(content(1)).unwrap();
        let late_joiner = Arc::new(Recorder::default());
        let targets: Vec<Arc<dyn Subscriber>> = vec![late_joiner.clone()];

        let targeted = DispatchTask::new(TaskKind::Targeted, record.clone(), targets.clone());
        record.assign_content(content(2)).unwrap();
        let update = DispatchTask::update(record.clone(), targets);

        assert_eq!(
            process_task(&targeted),
            DispatchOutcome::Superseded { enqueued: 2, live: 3 }
        );
        assert!(matches!(process_task(&update), DispatchOutcome::Delivered { version: 3, .. }));
        let ports: Vec<_> = late_joiner
            .seen()
            .iter()
            .map(|p| p.as_ref().and_then(|p| p.get("port")).and_then(|v| v.as_i64()))
            .collect();
        assert_eq!(ports, vec![Some(2)]);
    }

    #[test]
    fn panicking_subscriber_counts_as_failure() {
        let record = record();
        let recorder = Arc::new(Recorder::default());
        let targets: Vec<Arc<dyn Subscriber>> = vec![Arc::new(Panicking), recorder.clone()];

        let outcome = process_task(&DispatchTask::update(record.clone(), targets));
        assert!(matches!(outcome, DispatchOutcome::Failed { failures: 1, .. }));
        assert_eq!(recorder.seen().len(), 1);
    }

    #[test]
    fn worker_pool_processes_and_flushes() {
        let dispatcher = UpdateDispatcher::new(3).expect("dispatcher should start");
        assert_eq!(dispatcher.worker_count(), 3);
        let record = record();
        let recorder = Arc::new(Recorder::default());
        let targets: Vec<Arc<dyn Subscriber>> = vec![recorder.clone()];

        for port in 0..20 {
            record.assign_content(content(port)).unwrap();
            assert!(dispatcher.enqueue(DispatchTask::update(record.clone(), targets.clone())));
        }
        dispatcher.flush();

        assert_eq!(record.dispatched_counter(), record.modification_counter());
        let ports: Vec<i64> = recorder
            .seen()
            .iter()
            .map(|p| p.as_ref().and_then(|p| p.get("port")).and_then(|v| v.as_i64()).unwrap())
            .collect();
        assert!(ports.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ports.last(), Some(&19));
        assert_eq!(
            dispatcher.stats().delivered() + dispatcher.stats().stale(),
            20
        );
    }
}
