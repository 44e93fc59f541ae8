#![cfg(target_os = "linux")]

use std::fs;
use std::path::Path;

use sockbypass_common::names;
use sockbypass_ebpf::program::{unpin_maps, PINNED_MAPS};
use sockbypass_ebpf::sys::{cgroup_v2_root, DEFAULT_PIN_PATH};
use sockbypass_ebpf::{DebugControl, EbpfError, LoadOptions, ProxyMapReader};

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[test]
fn test_cgroup_root_on_pure_v2_host() {
    let base = Path::new("/sys/fs/cgroup");
    assert_eq!(cgroup_v2_root(base, true), base);
}

#[test]
fn test_cgroup_root_on_hybrid_host() {
    let base = Path::new("/sys/fs/cgroup");
    assert_eq!(cgroup_v2_root(base, false), base.join("unified"));
}

#[test]
fn test_load_options_defaults() {
    let opts = LoadOptions::new("/opt/sockbypass/programs.o");
    assert_eq!(opts.pin_path, Path::new(DEFAULT_PIN_PATH));
    assert!(opts.cgroup_path.is_none());
    assert!(opts.egress_interfaces.is_empty());
}

#[test]
fn test_every_map_is_pinned() {
    for name in [names::MAP_ACTIVE_ESTAB, names::MAP_PROXY, names::MAP_REDIR, names::DEBUG_MAP] {
        assert!(PINNED_MAPS.contains(&name), "{name} missing");
    }
}

#[test]
fn test_unpin_removes_only_bypass_maps() -> TestResult {
    let dir = tempfile::tempdir()?;
    for name in PINNED_MAPS {
        fs::write(dir.path().join(name), b"")?;
    }
    fs::write(dir.path().join("unrelated_map"), b"")?;

    assert_eq!(unpin_maps(dir.path())?, PINNED_MAPS.len());
    for name in PINNED_MAPS {
        assert!(!dir.path().join(name).exists());
    }
    assert!(dir.path().join("unrelated_map").exists());
    Ok(())
}

#[test]
fn test_unpin_is_idempotent() -> TestResult {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join(names::MAP_PROXY), b"")?;

    assert_eq!(unpin_maps(dir.path())?, 1);
    assert_eq!(unpin_maps(dir.path())?, 0);
    Ok(())
}

#[test]
fn test_open_without_pins_reports_missing_map() -> TestResult {
    let dir = tempfile::tempdir()?;

    match DebugControl::open(dir.path()) {
        Err(EbpfError::MapNotFound(name)) => assert_eq!(name, names::DEBUG_MAP),
        Err(other) => return Err(format!("unexpected error: {other}").into()),
        Ok(_) => return Err("opened a map that is not pinned".into()),
    }
    match ProxyMapReader::open(dir.path()) {
        Err(EbpfError::MapNotFound(name)) => assert_eq!(name, names::MAP_PROXY),
        Err(other) => return Err(format!("unexpected error: {other}").into()),
        Ok(_) => return Err("opened a map that is not pinned".into()),
    }
    Ok(())
}
