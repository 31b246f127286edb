//! Shared test utilities for ptracker_core integration tests
#![allow(dead_code)]

use parking_lot::{Condvar, Mutex};
use ptracker_core::client::{TwtCapability, TwtOps, TwtPowerState, TwtSetupParam};
use ptracker_core::error::PtrackerResult;
use ptracker_core::notifier::{NotifyOutcome, SceneObserver};
use ptracker_core::types::{Reason, SceneEvent, ThroughputSnapshot, ThroughputSource};
use std::time::{Duration, Instant};

/// Install a test logger once per process. `RUST_LOG=debug` shows tracker output.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `cond` until it holds or five seconds pass.
pub fn wait_until<F: FnMut() -> bool>(mut cond: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    true
}

pub fn kbps(v: u64) -> ThroughputSnapshot {
    ThroughputSnapshot::combined(v * 1000)
}

/// Throughput feed whose snapshot the test controls
#[derive(Default)]
pub struct MockFeed {
    snapshot: Mutex<ThroughputSnapshot>,
}

impl MockFeed {
    pub fn set(&self, snapshot: ThroughputSnapshot) {
        *self.snapshot.lock() = snapshot;
    }

    pub fn set_kbps(&self, v: u64) {
        self.set(kbps(v));
    }
}

impl ThroughputSource for MockFeed {
    fn snapshot(&self) -> ThroughputSnapshot {
        *self.snapshot.lock()
    }
}

/// Closed gate blocks `on_scene_change` until opened.
#[derive(Default)]
pub struct Gate {
    closed: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub fn close(&self) {
        *self.closed.lock() = true;
    }

    pub fn open(&self) {
        *self.closed.lock() = false;
        self.cv.notify_all();
    }

    fn pass(&self) {
        let mut closed = self.closed.lock();
        while *closed {
            self.cv.wait(&mut closed);
        }
    }
}

/// Observer recording every scene callback in order
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<(Reason, SceneEvent)>>,
    pub gate: Gate,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<(Reason, SceneEvent)> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }
}

impl SceneObserver for RecordingObserver {
    fn name(&self) -> &str {
        "recorder"
    }

    fn on_scene_change(&self, event: &SceneEvent) -> NotifyOutcome {
        self.events.lock().push((Reason::SceneChange, *event));
        self.gate.pass();
        NotifyOutcome::Continue
    }

    fn on_scene_change_prepare(&self, event: &SceneEvent) -> NotifyOutcome {
        self.events.lock().push((Reason::SceneChangePrepare, *event));
        NotifyOutcome::Continue
    }
}

/// Device client logging every setup/teardown request
pub struct MockTwt {
    pub calls: Mutex<Vec<String>>,
    pub pwr: Mutex<TwtPowerState>,
    pub capability: Mutex<TwtCapability>,
}

impl Default for MockTwt {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            pwr: Mutex::new(TwtPowerState::default()),
            capability: Mutex::new(TwtCapability {
                device_cap: 1,
                peer_cap: 1,
            }),
        }
    }
}

impl MockTwt {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl TwtOps for MockTwt {
    fn setup(&self, param: &TwtSetupParam) -> PtrackerResult<()> {
        self.calls
            .lock()
            .push(format!("setup:{}", param.wake_interval_us));
        Ok(())
    }

    fn teardown(&self, param: &TwtSetupParam) -> PtrackerResult<()> {
        self.calls.lock().push(format!("teardown:{}", param.config_id));
        Ok(())
    }

    fn capability(&self) -> PtrackerResult<TwtCapability> {
        Ok(*self.capability.lock())
    }

    fn power_state(&self) -> PtrackerResult<TwtPowerState> {
        Ok(*self.pwr.lock())
    }
}
