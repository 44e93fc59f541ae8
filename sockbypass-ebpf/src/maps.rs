//! Userspace access to the pinned maps of a running bypass.
//!
//! These open the pins directly, so the agent's `debug` and `entries`
//! commands work from a separate process while `run` owns the programs.

use std::path::Path;

use aya::maps::{Array, HashMap, Map, MapData};
use sockbypass_common::{debug_slot, names, Addr2Tuple, ProxyValue, Socket4Tuple};
use sockbypass_core::{ConnectionTuple, Endpoint, ProxyEntry};

use crate::{EbpfError, Result};

fn open_pin(pin_path: &Path, name: &'static str) -> Result<MapData> {
    let path = pin_path.join(name);
    if !path.exists() {
        return Err(EbpfError::MapNotFound(name));
    }
    Ok(MapData::from_pin(path)?)
}

/// Read/write handle on `DEBUG_MAP`.
pub struct DebugControl {
    map: Array<MapData, u32>,
}

impl DebugControl {
    pub fn open(pin_path: &Path) -> Result<Self> {
        let data = open_pin(pin_path, names::DEBUG_MAP)?;
        let map = Array::try_from(Map::Array(data))?;
        Ok(Self { map })
    }

    pub fn set_enabled(&mut self, on: bool) -> Result<()> {
        self.map.set(debug_slot::ENABLED, u32::from(on), 0)?;
        Ok(())
    }

    pub fn is_enabled(&self) -> Result<bool> {
        Ok(self.map.get(&debug_slot::ENABLED, 0)? != 0)
    }

    /// Data units redirected while debugging was on.
    pub fn packet_count(&self) -> Result<u32> {
        Ok(self.map.get(&debug_slot::PACKETS, 0)?)
    }
}

/// Snapshot reader for the correlation maps.
pub struct ProxyMapReader {
    proxy: HashMap<MapData, Socket4Tuple, ProxyValue>,
    pending: HashMap<MapData, Addr2Tuple, Addr2Tuple>,
}

impl ProxyMapReader {
    pub fn open(pin_path: &Path) -> Result<Self> {
        let proxy = HashMap::try_from(Map::HashMap(open_pin(pin_path, names::MAP_PROXY)?))?;
        let pending =
            HashMap::try_from(Map::HashMap(open_pin(pin_path, names::MAP_ACTIVE_ESTAB)?))?;
        Ok(Self { proxy, pending })
    }

    /// Every `MAP_PROXY` row. Rows deleted during the walk are skipped.
    pub fn entries(&self) -> Result<Vec<(ConnectionTuple, ProxyEntry)>> {
        let mut out = Vec::new();
        for item in self.proxy.iter() {
            let (key, value) = item?;
            out.push((ConnectionTuple::from(key), ProxyEntry::from(value)));
        }
        out.sort_by_key(|(tuple, _)| (tuple.local.addr, tuple.local.port));
        Ok(out)
    }

    /// Every pending origin: initiator local endpoint and its original destination.
    pub fn pending(&self) -> Result<Vec<(Endpoint, Endpoint)>> {
        let mut out = Vec::new();
        for item in self.pending.iter() {
            let (key, value) = item?;
            out.push((Endpoint::from(key), Endpoint::from(value)));
        }
        out.sort_by_key(|(initiator, _)| (initiator.addr, initiator.port));
        Ok(out)
    }
}
