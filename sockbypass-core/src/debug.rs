use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use sockbypass_common::debug_slot;

/// Operator-controlled debug slots: an enabled flag and a counter of
/// redirected data units. The data path only reads the flag and bumps the
/// counter.
#[derive(Debug, Default)]
pub struct DebugTable {
    enabled: AtomicU32,
    packets: AtomicU64,
}

impl DebugTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(u32::from(on), Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed) == 1
    }

    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    pub(crate) fn count_packet(&self) {
        self.packets.fetch_add(1, Ordering::Relaxed);
    }

    /// Raw slot read, mirroring the kernel `DEBUG_MAP` layout. Unknown slots
    /// yield `None`.
    pub fn slot(&self, index: u32) -> Option<u64> {
        match index {
            debug_slot::ENABLED => Some(u64::from(self.enabled.load(Ordering::Relaxed))),
            debug_slot::PACKETS => Some(self.packets()),
            _ => None,
        }
    }
}
