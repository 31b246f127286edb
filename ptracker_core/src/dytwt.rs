//! Dynamic TWT (target wake time) manager
//!
//! Policy consumer of scene transitions. Low-traffic scenes get a TWT
//! schedule whose wake interval shrinks as traffic grows; latency- and
//! throughput-sensitive scenes run without one. On prepare the schedule of
//! the previous scene is torn down, on change the new scene's action is
//! applied and an outcome record is appended to the manager's history.

use crate::client::{ClientRegistry, TwtOps, TwtPowerState, TwtSetupParam};
use crate::config::TwtConfig;
use crate::error::{PtrackerError, PtrackerResult};
use crate::history::{HistoryLog, HistoryRecord, HEADER_SIZE};
use crate::notifier::{NotifyOutcome, SceneObserver};
use crate::types::{Reason, Scene, SceneEvent};
use bytemuck::{Pod, Zeroable};
use log::{debug, error, warn};
use parking_lot::Mutex;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const HISTORY_NAME: &str = "Dynamic TWT Setup";

/// What to do with TWT when a scene is entered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwtAction {
    Setup,
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneAction {
    pub action: TwtAction,
    pub param: TwtSetupParam,
}

/// Administrative test actions, by integer code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwtTestAction {
    Setup = 0,
    Teardown = 1,
    Capability = 2,
    PowerState = 3,
    Toggle = 4,
}

impl TryFrom<u32> for TwtTestAction {
    type Error = PtrackerError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(TwtTestAction::Setup),
            1 => Ok(TwtTestAction::Teardown),
            2 => Ok(TwtTestAction::Capability),
            3 => Ok(TwtTestAction::PowerState),
            4 => Ok(TwtTestAction::Toggle),
            other => Err(PtrackerError::Unsupported(format!(
                "action {} is not supported",
                other
            ))),
        }
    }
}

/// Result of an administrative action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugReply {
    Done,
    Capability(bool),
    PowerState(TwtPowerState),
    Enabled(bool),
}

/// History payload written after the common header
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct TwtRecord {
    /// 1 if the scene action was applied
    pub apply: u32,
    pub reason: u32,
    pub rate: u64,
    pub pwr: TwtPowerState,
}

/// Build the per-scene action table.
pub fn scene_actions(config: &TwtConfig) -> [SceneAction; Scene::COUNT] {
    let setup = |interval| SceneAction {
        action: TwtAction::Setup,
        param: TwtSetupParam {
            config_id: config.config_id,
            nego_type: 0,
            trigger_type: 0,
            wake_duration_us: config.wake_duration_us,
            wake_interval_us: interval,
        },
    };
    let teardown = SceneAction {
        action: TwtAction::Teardown,
        param: TwtSetupParam {
            config_id: config.config_id,
            ..Default::default()
        },
    };
    [
        setup(config.idle_interval_us),
        setup(config.web_interval_us),
        setup(config.streaming_interval_us),
        teardown,
        teardown,
    ]
}

/// Total time in ms and asleep percentage from cumulative microsecond counters.
fn power_summary(asleep: u64, awake: u64) -> (u64, u64) {
    let total = asleep.saturating_add(awake) / 100;
    let percent = if total == 0 { 0 } else { asleep / total };
    (total / 10, percent)
}

/// History formatter: period values come from the delta to the next record,
/// totals from the record itself.
pub fn format_record(cur: &HistoryRecord<'_>, next: Option<&HistoryRecord<'_>>, out: &mut String) {
    let c: TwtRecord = cur.payload_as().unwrap_or_default();
    let (total_time, total_percent) = power_summary(c.pwr.asleep, c.pwr.awake);

    let (period_time, period_percent) = match next.and_then(|n| n.payload_as::<TwtRecord>()) {
        Some(n) => {
            let awake = if n.pwr.awake > c.pwr.awake {
                n.pwr.awake - c.pwr.awake
            } else {
                c.pwr.awake
            };
            let asleep = if n.pwr.asleep > c.pwr.asleep {
                n.pwr.asleep - c.pwr.asleep
            } else {
                c.pwr.asleep
            };
            power_summary(asleep, awake)
        }
        None => (0, 0),
    };

    let time = chrono::DateTime::<chrono::Local>::from(cur.timestamp());
    let scene = Scene::from_rank(cur.discriminant())
        .map(Scene::name)
        .unwrap_or("unknown");
    let reason = Reason::from_code(c.reason)
        .map(Reason::label)
        .unwrap_or("unknown");
    let _ = writeln!(
        out,
        "{} {}: Applied: {}, Time: {} ({}) ms, Percent: {}% ({}%) Reason: {}, Rate: {}",
        time.format("%H:%M:%S%.3f"),
        scene,
        if c.apply != 0 { "TRUE" } else { "FALSE" },
        period_time,
        total_time,
        period_percent,
        total_percent,
        reason,
        c.rate
    );
}

struct TwtState {
    /// Scene of the last recorded change; decides the teardown on prepare
    prev: Option<Scene>,
    /// Target of the setup/teardown test actions
    test_state: Scene,
}

/// Dynamic TWT policy consumer.
pub struct DynamicTwt {
    actions: [SceneAction; Scene::COUNT],
    station_settle: Duration,
    history_limit: usize,
    clients: Arc<ClientRegistry>,
    history: HistoryLog,
    enabled: AtomicBool,
    state: Mutex<TwtState>,
}

impl DynamicTwt {
    pub fn new(config: &TwtConfig, clients: Arc<ClientRegistry>) -> PtrackerResult<Self> {
        config.validate()?;
        let history = HistoryLog::create(
            HISTORY_NAME,
            config.record_count,
            HEADER_SIZE + std::mem::size_of::<TwtRecord>(),
        )?
        .with_formatter(format_record);

        Ok(Self {
            actions: scene_actions(config),
            station_settle: Duration::from_millis(config.station_settle_ms),
            history_limit: config.history_buffer_size,
            clients,
            history,
            enabled: AtomicBool::new(config.enabled),
            state: Mutex::new(TwtState {
                prev: None,
                test_state: Scene::Idle,
            }),
        })
    }

    pub fn action(&self, scene: Scene) -> &SceneAction {
        &self.actions[scene.rank() as usize]
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Formatted history, capped at the configured buffer size
    pub fn history_text(&self) -> String {
        self.history.read_to_string(self.history_limit)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Flip the feature flag, returning the new value.
    pub fn toggle(&self) -> bool {
        !self.enabled.fetch_xor(true, Ordering::AcqRel)
    }

    pub fn previous_scene(&self) -> Option<Scene> {
        self.state.lock().prev
    }

    pub fn test_state(&self) -> Scene {
        self.state.lock().test_state
    }

    pub fn set_test_state(&self, scene: Scene) {
        self.state.lock().test_state = scene;
    }

    fn client(&self) -> PtrackerResult<Arc<dyn TwtOps>> {
        self.clients
            .get()
            .ok_or_else(|| PtrackerError::not_found("no TWT client registered"))
    }

    pub fn setup(&self, scene: Scene) -> PtrackerResult<()> {
        self.client()?.setup(&self.action(scene).param)
    }

    pub fn teardown(&self, scene: Scene) -> PtrackerResult<()> {
        self.client()?.teardown(&self.action(scene).param)
    }

    /// Whether both device and peer support TWT
    pub fn capable(&self) -> bool {
        let Ok(client) = self.client() else {
            return false;
        };
        match client.capability() {
            Ok(cap) => {
                debug!("[DyTwt] device: {}, peer: {}", cap.device_cap, cap.peer_cap);
                cap.supported()
            }
            Err(e) => {
                debug!("[DyTwt] capability query failed: {}", e);
                false
            }
        }
    }

    pub fn power_state(&self) -> PtrackerResult<TwtPowerState> {
        self.client()?.power_state()
    }

    /// Run an administrative test action by code.
    pub fn debug_action(&self, code: u32) -> PtrackerResult<DebugReply> {
        let action = TwtTestAction::try_from(code).inspect_err(|e| error!("[DyTwt] {}", e))?;
        match action {
            TwtTestAction::Setup => self.setup(self.test_state()).map(|_| DebugReply::Done),
            TwtTestAction::Teardown => self.teardown(self.test_state()).map(|_| DebugReply::Done),
            TwtTestAction::Capability => Ok(DebugReply::Capability(self.capable())),
            TwtTestAction::PowerState => self.power_state().map(DebugReply::PowerState),
            TwtTestAction::Toggle => Ok(DebugReply::Enabled(self.toggle())),
        }
    }

    /// Append the outcome of a scene change. Recorded even when nothing was applied.
    fn record(&self, event: &SceneEvent, apply: bool) {
        let pwr = match self.power_state() {
            Ok(pwr) => pwr,
            Err(e) => {
                debug!("[DyTwt] power state unavailable: {}", e);
                TwtPowerState::default()
            }
        };
        let record = TwtRecord {
            apply: apply as u32,
            reason: event.reason.code(),
            rate: event.rate,
            pwr,
        };
        {
            let mut slot = self.history.store(event.dst.rank());
            if let Err(e) = slot.write(&record) {
                error!("[DyTwt] history record dropped: {}", e);
            }
        }
        self.state.lock().prev = Some(event.dst);
    }
}

impl SceneObserver for DynamicTwt {
    fn name(&self) -> &str {
        "dynamic_twt"
    }

    fn on_scene_change(&self, event: &SceneEvent) -> NotifyOutcome {
        let Ok(client) = self.client() else {
            return NotifyOutcome::Continue;
        };

        if !self.is_enabled() {
            self.record(event, false);
            return NotifyOutcome::Continue;
        }
        if !self.capable() {
            debug!("[DyTwt] twt is not supported on device or peer");
            self.record(event, false);
            return NotifyOutcome::Continue;
        }

        let act = self.action(event.dst);
        debug!(
            "[DyTwt] twt setup for state: {}, reason: {}",
            event.dst, event.reason
        );

        // wait for the station to be ready after connecting
        if event.reason == Reason::StationChange && !self.station_settle.is_zero() {
            std::thread::sleep(self.station_settle);
        }

        let apply = match act.action {
            TwtAction::Setup => match client.setup(&act.param) {
                Ok(()) => true,
                Err(e) => {
                    warn!("[DyTwt] setup for {} failed: {}", event.dst, e);
                    false
                }
            },
            // already torn down during prepare
            TwtAction::Teardown => true,
        };
        self.record(event, apply);
        NotifyOutcome::Continue
    }

    fn on_scene_change_prepare(&self, _event: &SceneEvent) -> NotifyOutcome {
        if !self.clients.is_registered() {
            return NotifyOutcome::Continue;
        }
        if let Some(prev) = self.previous_scene() {
            if prev < Scene::LowLatency {
                if let Err(e) = self.teardown(prev) {
                    warn!("[DyTwt] teardown for {} failed: {}", prev, e);
                }
            }
        }
        NotifyOutcome::Continue
    }
}

impl std::fmt::Debug for DynamicTwt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicTwt")
            .field("enabled", &self.is_enabled())
            .field("prev", &self.previous_scene())
            .field("history", &self.history)
            .finish()
    }
}
