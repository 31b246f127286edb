//! Device client interface
//!
//! The wireless driver registers one client with the tracker. Through it the
//! TWT manager negotiates wake schedules and samples power statistics.

use crate::error::PtrackerResult;
use bytemuck::{Pod, Zeroable};
use log::info;
use parking_lot::RwLock;
use std::sync::Arc;

/// Parameters of one TWT setup/teardown request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TwtSetupParam {
    pub config_id: u8,
    pub nego_type: u8,
    pub trigger_type: u8,
    pub wake_duration_us: u32,
    pub wake_interval_us: u32,
}

/// TWT support reported by the device and by the connected peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TwtCapability {
    pub device_cap: u16,
    pub peer_cap: u16,
}

impl TwtCapability {
    pub fn supported(&self) -> bool {
        self.device_cap != 0 && self.peer_cap != 0
    }
}

/// Cumulative time awake/asleep in microseconds
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct TwtPowerState {
    pub awake: u64,
    pub asleep: u64,
}

/// Operations the device driver exposes for TWT management.
pub trait TwtOps: Send + Sync {
    fn setup(&self, param: &TwtSetupParam) -> PtrackerResult<()>;
    fn teardown(&self, param: &TwtSetupParam) -> PtrackerResult<()>;
    fn capability(&self) -> PtrackerResult<TwtCapability>;
    fn power_state(&self) -> PtrackerResult<TwtPowerState>;
}

/// Holds the single registered device client.
#[derive(Default)]
pub struct ClientRegistry {
    client: RwLock<Option<Arc<dyn TwtOps>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client` unless one is already present. Returns whether it
    /// was installed.
    pub fn register(&self, client: Arc<dyn TwtOps>) -> bool {
        let mut slot = self.client.write();
        if slot.is_some() {
            return false;
        }
        *slot = Some(client);
        info!("[Tracker] client registered");
        true
    }

    /// Remove `client` if it is the registered one.
    pub fn unregister(&self, client: &Arc<dyn TwtOps>) -> bool {
        let mut slot = self.client.write();
        let matches = slot.as_ref().is_some_and(|current| {
            std::ptr::eq(
                Arc::as_ptr(current) as *const (),
                Arc::as_ptr(client) as *const (),
            )
        });
        if matches {
            *slot = None;
            info!("[Tracker] client unregistered");
        }
        matches
    }

    pub fn get(&self) -> Option<Arc<dyn TwtOps>> {
        self.client.read().clone()
    }

    pub fn is_registered(&self) -> bool {
        self.client.read().is_some()
    }
}
