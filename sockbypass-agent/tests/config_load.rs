use std::fs;
use std::path::{Path, PathBuf};

use sockbypass_agent::{load_from_path, AgentError};
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A scratch directory with a fake object file and the given config body.
/// `{object}` and `{dir}` in `body` are substituted.
fn write_config(body: &str) -> Result<(TempDir, PathBuf), std::io::Error> {
    let dir = tempfile::tempdir()?;
    let object = dir.path().join("programs.o");
    fs::write(&object, b"\x7fELF")?;

    let body = body
        .replace("{object}", &object.display().to_string())
        .replace("{dir}", &dir.path().display().to_string());
    let path = dir.path().join("agent.toml");
    fs::write(&path, body)?;
    Ok((dir, path))
}

fn config_error(path: &Path) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    match load_from_path(path) {
        Err(AgentError::Config(msg)) => Ok(msg),
        Err(other) => Err(format!("unexpected error: {other}").into()),
        Ok(cfg) => Err(format!("config accepted: {cfg:?}").into()),
    }
}

#[test]
fn loads_minimal_config() -> TestResult {
    let (dir, path) = write_config(r#"object = "{object}""#)?;

    let cfg = load_from_path(&path)?;
    assert_eq!(cfg.object, dir.path().join("programs.o"));
    assert_eq!(cfg.pin_path, PathBuf::from("/sys/fs/bpf/tc/globals"));
    assert!(cfg.cgroup_path.is_none());
    assert!(cfg.egress_interfaces.is_empty());
    assert_eq!(cfg.logging.level, "info");
    assert!(!cfg.logging.show_target);
    Ok(())
}

#[test]
fn loads_full_config() -> TestResult {
    let (dir, path) = write_config(
        r#"
object = "{object}"
pin_path = "/sys/fs/bpf/sockbypass"
cgroup_path = "{dir}"
egress_interfaces = ["eth0", "net1"]

[logging]
level = "debug"
show_target = true
"#,
    )?;

    let cfg = load_from_path(&path)?;
    assert_eq!(cfg.pin_path, PathBuf::from("/sys/fs/bpf/sockbypass"));
    let cgroup = cfg.cgroup_path.ok_or("cgroup_path missing")?;
    assert_eq!(cgroup, dir.path());
    assert_eq!(cfg.egress_interfaces, vec!["eth0", "net1"]);
    assert_eq!(cfg.logging.level, "debug");
    assert!(cfg.logging.show_target);
    Ok(())
}

#[test]
fn rejects_missing_file() {
    let result = load_from_path("/nonexistent/sockbypass/agent.toml");
    assert!(matches!(result, Err(AgentError::Config(msg)) if msg.contains("read")));
}

#[test]
fn rejects_missing_object() -> TestResult {
    let (dir, path) = write_config(r#"object = "{dir}/absent.o""#)?;
    let msg = config_error(&path)?;
    assert!(msg.contains("BPF object not found"), "{msg}");
    drop(dir);
    Ok(())
}

#[test]
fn rejects_relative_pin_path() -> TestResult {
    let (_dir, path) = write_config(
        r#"
object = "{object}"
pin_path = "bpf/pins"
"#,
    )?;
    let msg = config_error(&path)?;
    assert!(msg.contains("absolute"), "{msg}");
    Ok(())
}

#[test]
fn rejects_missing_cgroup_dir() -> TestResult {
    let (_dir, path) = write_config(
        r#"
object = "{object}"
cgroup_path = "{dir}/no-such-cgroup"
"#,
    )?;
    let msg = config_error(&path)?;
    assert!(msg.contains("cgroup"), "{msg}");
    Ok(())
}

#[test]
fn rejects_duplicate_interface() -> TestResult {
    let (_dir, path) = write_config(
        r#"
object = "{object}"
egress_interfaces = ["eth0", "eth0"]
"#,
    )?;
    let msg = config_error(&path)?;
    assert!(msg.contains("Duplicate egress interface"), "{msg}");
    Ok(())
}

#[test]
fn rejects_unknown_log_level() -> TestResult {
    let (_dir, path) = write_config(
        r#"
object = "{object}"

[logging]
level = "verbose"
"#,
    )?;
    let msg = config_error(&path)?;
    assert!(msg.contains("log level"), "{msg}");
    Ok(())
}

#[test]
fn rejects_unknown_field() -> TestResult {
    let (_dir, path) = write_config(
        r#"
object = "{object}"
table_capacity = 1024
"#,
    )?;
    let msg = config_error(&path)?;
    assert!(msg.contains("parse"), "{msg}");
    Ok(())
}
