//! Host preparation before any BPF object is loaded.

use std::ffi::CString;
use std::fs;
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::{EbpfError, Result};

/// Root of the BPF filesystem.
pub const BPFFS_ROOT: &str = "/sys/fs/bpf";
/// Where the correlation maps are pinned, shared with tc tooling.
pub const DEFAULT_PIN_PATH: &str = "/sys/fs/bpf/tc/globals";
/// cgroup mount point; v1 hosts expose the unified hierarchy below it.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

const BPF_FS_MAGIC: i64 = 0xcafe_4a11;
const CGROUP2_SUPER_MAGIC: i64 = 0x6367_7270;

/// Lift RLIMIT_MEMLOCK so map creation is not capped on pre-5.11 kernels.
#[allow(unsafe_code)]
pub fn raise_memlock_rlimit() -> Result<()> {
    let limit = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    // SAFETY: `limit` is a valid, initialized rlimit for the duration of the call.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &limit) };
    if rc != 0 {
        return Err(EbpfError::Rlimit(io::Error::last_os_error()));
    }
    Ok(())
}

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// Filesystem magic of the mount backing `path`.
#[allow(unsafe_code)]
pub fn fs_magic(path: &Path) -> io::Result<i64> {
    let cpath = c_path(path)?;
    let mut st = MaybeUninit::<libc::statfs>::uninit();
    // SAFETY: `cpath` is NUL-terminated and `st` is large enough for statfs(2).
    let rc = unsafe { libc::statfs(cpath.as_ptr(), st.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: statfs(2) returned 0, so the struct is fully written.
    let st = unsafe { st.assume_init() };
    #[allow(clippy::unnecessary_cast)]
    Ok(st.f_type as i64)
}

#[allow(unsafe_code)]
fn mount_bpffs(target: &Path) -> io::Result<()> {
    let target = c_path(target)?;
    let fstype = c"bpf";
    // SAFETY: all pointers are NUL-terminated C strings alive for the call;
    // no mount data is passed.
    let rc = unsafe {
        libc::mount(
            target.as_ptr(),
            target.as_ptr(),
            fstype.as_ptr(),
            0,
            std::ptr::null(),
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Make sure `root` exists and is a BPF filesystem, mounting one if not.
pub fn ensure_bpffs(root: &Path) -> Result<()> {
    if !root.exists() {
        fs::create_dir_all(root).map_err(|source| EbpfError::Io {
            op: "create",
            path: root.to_path_buf(),
            source,
        })?;
    }

    let magic = fs_magic(root).map_err(|source| EbpfError::Io {
        op: "statfs",
        path: root.to_path_buf(),
        source,
    })?;
    if magic == BPF_FS_MAGIC {
        return Ok(());
    }

    mount_bpffs(root).map_err(|source| EbpfError::Io {
        op: "mount bpffs on",
        path: root.to_path_buf(),
        source,
    })?;
    info!(root = %root.display(), "mounted bpffs");
    Ok(())
}

/// Pick the cgroup v2 hierarchy to attach sockops to: the mount point
/// itself on a pure v2 host, its `unified` subtree otherwise.
pub fn cgroup_v2_root(base: &Path, base_is_v2: bool) -> PathBuf {
    if base_is_v2 {
        base.to_path_buf()
    } else {
        base.join("unified")
    }
}

/// Detect the cgroup v2 root below [`CGROUP_ROOT`].
pub fn detect_cgroup_root() -> PathBuf {
    let base = Path::new(CGROUP_ROOT);
    let is_v2 = match fs_magic(base) {
        Ok(magic) => magic == CGROUP2_SUPER_MAGIC,
        Err(err) => {
            warn!(%err, base = %base.display(), "cannot stat cgroup root, assuming hybrid layout");
            false
        }
    };
    cgroup_v2_root(base, is_v2)
}
