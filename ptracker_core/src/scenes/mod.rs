//! Scene classifier state machine
//!
//! Throughput evaluations arm a transition in the shared [`SceneEvent`] and
//! wake a dedicated worker thread. The worker runs the transition in two
//! phases on the notifier bus: `SceneChangePrepare` lets consumers tear down
//! the policy of the scene being left, then `SceneChange` applies the new
//! scene and commits it. The very first transition skips the prepare phase.
//!
//! Scenes only escalate, except when an exception trigger (suspend) has been
//! seen `reset_threshold` times in a row.

pub mod condition;

pub use condition::{default_conditions, ConditionTable, SceneCondition, UNBOUNDED_KBPS};

use crate::config::FsmConfig;
use crate::error::{PtrackerError, PtrackerResult};
use crate::notifier::{Notifier, NotifierBus, NotifyOutcome};
use crate::ptracker_internal;
use crate::types::{Reason, Scene, SceneEvent, ThroughputSnapshot, ThroughputSource};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Bus priority of the classifier's own subscriber
pub const FSM_NOTIFIER_PRIORITY: i32 = 0;

/// Next dispatch the worker performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Announce `SceneChangePrepare` for the armed transition
    Prepare = 0,
    /// Announce `SceneChange` and commit `dst`
    Commit = 1,
}

impl From<u8> for Phase {
    fn from(value: u8) -> Self {
        match value {
            0 => Phase::Prepare,
            _ => Phase::Commit,
        }
    }
}

/// State guarded by the message lock
struct Transition {
    msg: SceneEvent,
    /// Exception events seen since the last armed transition
    reset_count: u32,
    /// Bumped on every arm; lets the worker tell whether it committed the latest one
    armed_seq: u64,
    /// A transition is armed and not yet committed
    pending: bool,
}

impl Transition {
    /// Scene the next evaluation is compared against: the armed destination
    /// while a transition is in flight, the committed scene otherwise.
    fn target(&self) -> Scene {
        if self.pending {
            self.msg.dst
        } else {
            self.msg.state
        }
    }
}

/// Single-slot wake signal; repeated signals before the worker runs coalesce.
#[derive(Default)]
struct Wake {
    pending: bool,
    stop: bool,
}

struct FsmShared {
    table: ConditionTable,
    reset_threshold: u32,
    source: Arc<dyn ThroughputSource>,
    transition: Mutex<Transition>,
    wake: Mutex<Wake>,
    wake_cv: Condvar,
    phase: AtomicU8,
    commits: AtomicU64,
    last_suspend: Mutex<Option<Instant>>,
}

impl FsmShared {
    fn signal(&self) {
        let mut wake = self.wake.lock();
        wake.pending = true;
        self.wake_cv.notify_one();
    }

    fn stopped(&self) -> bool {
        self.wake.lock().stop
    }

    fn condition_get(&self, transition: &Transition, snapshot: &ThroughputSnapshot) -> (Scene, u64) {
        self.table
            .classify(snapshot)
            .unwrap_or((transition.msg.state, transition.msg.rate))
    }

    /// Arm a transition if the evaluated scene qualifies. Returns whether the
    /// worker was woken.
    fn decision(&self, reason: Reason) -> bool {
        let snapshot = self.source.snapshot();
        self.decide(reason, &snapshot)
    }

    fn decide(&self, reason: Reason, snapshot: &ThroughputSnapshot) -> bool {
        if self.stopped() {
            return false;
        }

        let mut transition = self.transition.lock();
        let (new_scene, rate) = self.condition_get(&transition, snapshot);

        let mut allow_downgrade = false;
        if reason.is_exception() {
            transition.reset_count += 1;
            allow_downgrade = transition.reset_count % self.reset_threshold == 0;
        }

        let target = transition.target();
        if new_scene == target && !reason.always_reevaluates() {
            return false;
        }
        if new_scene < target && !allow_downgrade {
            return false;
        }

        let state = transition.msg.state;
        debug!(
            "[SceneFsm] reason {}, reset_cnt {}, {} -> {} (was {})",
            reason, transition.reset_count, state, new_scene, target
        );

        transition.reset_count = 0;
        transition.armed_seq += 1;
        transition.pending = true;
        transition.msg.src = state;
        transition.msg.dst = new_scene;
        transition.msg.reason = reason;
        transition.msg.rate = rate;
        drop(transition);

        self.signal();
        true
    }

    fn note_suspend(&self) {
        let now = Instant::now();
        if let Some(prev) = self.last_suspend.lock().replace(now) {
            debug!(
                "[SceneFsm] suspend after {} ms",
                now.duration_since(prev).as_millis()
            );
        }
    }
}

/// Worker loop. Dispatches with no lock held.
fn run_worker(shared: Arc<FsmShared>, bus: Arc<NotifierBus<SceneEvent>>) {
    loop {
        {
            let mut wake = shared.wake.lock();
            while !wake.pending && !wake.stop {
                shared.wake_cv.wait(&mut wake);
            }
            if wake.stop {
                info!("[SceneFsm] worker stopped");
                break;
            }
            wake.pending = false;
        }

        let (msg, seq) = {
            let transition = shared.transition.lock();
            (transition.msg, transition.armed_seq)
        };
        debug!(
            "[SceneFsm] state: {}, trans {} -> {}, rate {}",
            msg.state, msg.src, msg.dst, msg.rate
        );

        match Phase::from(shared.phase.load(Ordering::Acquire)) {
            Phase::Prepare => {
                bus.dispatch(Reason::SceneChangePrepare, &msg);
                shared.phase.store(Phase::Commit as u8, Ordering::Release);
                // Commit follows on the next wake
                shared.signal();
            }
            Phase::Commit => {
                bus.dispatch(Reason::SceneChange, &msg);
                {
                    let mut transition = shared.transition.lock();
                    transition.msg.state = msg.dst;
                    if transition.armed_seq == seq {
                        transition.pending = false;
                    } else {
                        // re-armed during dispatch; the next prepare leaves msg.dst
                        transition.msg.src = msg.dst;
                    }
                }
                shared.commits.fetch_add(1, Ordering::AcqRel);
                shared.phase.store(Phase::Prepare as u8, Ordering::Release);
            }
        }
    }
}

/// Bus subscriber feeding client events into the classifier.
struct FsmNotifier {
    shared: Arc<FsmShared>,
}

impl Notifier<SceneEvent> for FsmNotifier {
    fn name(&self) -> &str {
        "scene_fsm"
    }

    fn notify(&self, reason: Reason, _ctx: &SceneEvent) -> NotifyOutcome {
        match reason {
            Reason::Suspend => {
                self.shared.note_suspend();
                self.shared.decision(reason);
            }
            Reason::StationChange | Reason::ThroughputSample => {
                self.shared.decision(reason);
            }
            _ => {}
        }
        NotifyOutcome::Continue
    }
}

/// Scene classifier with its transition worker.
///
/// Stopping (explicitly or on drop) unregisters from the bus, stops the
/// worker and joins it.
pub struct SceneFsm {
    shared: Arc<FsmShared>,
    bus: Arc<NotifierBus<SceneEvent>>,
    handler: Arc<dyn Notifier<SceneEvent>>,
    worker: Option<JoinHandle<()>>,
}

impl SceneFsm {
    /// Validate `config`, subscribe to `bus` and start the worker.
    pub fn start(
        config: &FsmConfig,
        bus: Arc<NotifierBus<SceneEvent>>,
        source: Arc<dyn ThroughputSource>,
    ) -> PtrackerResult<Self> {
        if config.reset_threshold == 0 {
            return Err(PtrackerError::invalid_argument("reset_threshold must be at least 1"));
        }
        let table = ConditionTable::new(config.conditions.clone())?;

        let shared = Arc::new(FsmShared {
            table,
            reset_threshold: config.reset_threshold,
            source,
            transition: Mutex::new(Transition {
                msg: SceneEvent::default(),
                reset_count: 0,
                armed_seq: 0,
                pending: false,
            }),
            wake: Mutex::new(Wake::default()),
            wake_cv: Condvar::new(),
            // first link-up goes straight to commit
            phase: AtomicU8::new(Phase::Commit as u8),
            commits: AtomicU64::new(0),
            last_suspend: Mutex::new(None),
        });

        let handler: Arc<dyn Notifier<SceneEvent>> = Arc::new(FsmNotifier {
            shared: Arc::clone(&shared),
        });
        bus.register(Arc::clone(&handler), FSM_NOTIFIER_PRIORITY)?;

        let worker_shared = Arc::clone(&shared);
        let worker_bus = Arc::clone(&bus);
        let worker = thread::Builder::new()
            .name("ptracker-scene-fsm".to_string())
            .spawn(move || run_worker(worker_shared, worker_bus));
        let worker = match worker {
            Ok(handle) => handle,
            Err(e) => {
                bus.unregister(&handler);
                log::error!("[SceneFsm] unable to start worker thread: {}", e);
                return Err(PtrackerError::ThreadStart(e.to_string()));
            }
        };

        Ok(Self {
            shared,
            bus,
            handler,
            worker: Some(worker),
        })
    }

    /// Evaluate a snapshot and arm a transition when it qualifies.
    /// Returns whether a transition was armed.
    pub fn evaluate(&self, reason: Reason, snapshot: &ThroughputSnapshot) -> bool {
        self.shared.decide(reason, snapshot)
    }

    /// [`evaluate`](Self::evaluate) against the throughput feed.
    pub fn decision(&self, reason: Reason) -> bool {
        self.shared.decision(reason)
    }

    /// Highest-ranked qualifying scene and its rate; the committed scene if
    /// nothing qualifies.
    pub fn condition_get(&self, snapshot: &ThroughputSnapshot) -> (Scene, u64) {
        let transition = self.shared.transition.lock();
        self.shared.condition_get(&transition, snapshot)
    }

    pub fn committed_scene(&self) -> Scene {
        self.shared.transition.lock().msg.state
    }

    /// Copy of the transition message
    pub fn message(&self) -> SceneEvent {
        self.shared.transition.lock().msg
    }

    pub fn reset_count(&self) -> u32 {
        self.shared.transition.lock().reset_count
    }

    /// Whether an armed transition has not been committed yet
    pub fn is_pending(&self) -> bool {
        self.shared.transition.lock().pending
    }

    pub fn phase(&self) -> Phase {
        Phase::from(self.shared.phase.load(Ordering::Acquire))
    }

    /// Number of completed commit phases
    pub fn commit_count(&self) -> u64 {
        self.shared.commits.load(Ordering::Acquire)
    }

    pub fn conditions(&self) -> &[SceneCondition] {
        self.shared.table.conditions()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Unregister, stop and join the worker. Idempotent.
    pub fn stop(&mut self) -> PtrackerResult<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        self.bus.unregister(&self.handler);
        {
            let mut wake = self.shared.wake.lock();
            wake.stop = true;
            self.shared.wake_cv.notify_one();
        }

        worker.join().map_err(|_| {
            warn!("[SceneFsm] worker panicked");
            ptracker_internal!("scene worker panicked")
        })
    }
}

impl Drop for SceneFsm {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl std::fmt::Debug for SceneFsm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneFsm")
            .field("message", &self.message())
            .field("phase", &self.phase())
            .field("commits", &self.commit_count())
            .field("running", &self.is_running())
            .finish()
    }
}
