use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use aya::maps::SockHash;
use aya::programs::sk_msg::SkMsgLinkId;
use aya::programs::sock_ops::SockOpsLinkId;
use aya::programs::tc::{self, SchedClassifierLinkId, TcAttachType};
use aya::programs::{CgroupAttachMode, SchedClassifier, SkMsg, SockOps};
use aya::{Ebpf, EbpfLoader};
use sockbypass_common::{names, Socket4Tuple};
use tracing::{debug, info, warn};

use crate::sys;
use crate::{EbpfError, Result};

/// Maps pinned under [`LoadOptions::pin_path`].
pub const PINNED_MAPS: [&str; 4] = [
    names::MAP_ACTIVE_ESTAB,
    names::MAP_PROXY,
    names::MAP_REDIR,
    names::DEBUG_MAP,
];

/// Where to find the compiled programs and where to hook them.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Compiled `sockbypass-ebpf-programs` object.
    pub object: PathBuf,
    /// Pin directory for the correlation maps.
    pub pin_path: PathBuf,
    /// cgroup v2 directory for the sockops hook. `None` detects the root.
    pub cgroup_path: Option<PathBuf>,
    /// Interfaces that get the egress disable classifier.
    pub egress_interfaces: Vec<String>,
}

impl LoadOptions {
    pub fn new(object: impl Into<PathBuf>) -> Self {
        Self {
            object: object.into(),
            pin_path: PathBuf::from(sys::DEFAULT_PIN_PATH),
            cgroup_path: None,
            egress_interfaces: Vec::new(),
        }
    }
}

/// The three kernel programs, loaded and attached.
///
/// Dropping this detaches the programs. The pinned maps stay until
/// [`BypassProgram::close`] removes them.
pub struct BypassProgram {
    ebpf: Ebpf,
    pin_path: PathBuf,
    sockops_link: Option<SockOpsLinkId>,
    redir_link: Option<SkMsgLinkId>,
    egress_links: Vec<(String, SchedClassifierLinkId)>,
}

impl BypassProgram {
    /// Prepare the host, load the object and attach every program.
    pub fn load(opts: &LoadOptions) -> Result<Self> {
        sys::raise_memlock_rlimit()?;
        sys::ensure_bpffs(Path::new(sys::BPFFS_ROOT))?;
        fs::create_dir_all(&opts.pin_path).map_err(|source| EbpfError::Io {
            op: "create pin directory",
            path: opts.pin_path.clone(),
            source,
        })?;

        let ebpf = EbpfLoader::new()
            .map_pin_path(&opts.pin_path)
            .load_file(&opts.object)?;
        info!(object = %opts.object.display(), pin_path = %opts.pin_path.display(), "BPF object loaded");

        let mut program = Self {
            ebpf,
            pin_path: opts.pin_path.clone(),
            sockops_link: None,
            redir_link: None,
            egress_links: Vec::new(),
        };

        program.attach_redir()?;

        let cgroup = opts.cgroup_path.clone().unwrap_or_else(sys::detect_cgroup_root);
        program.attach_sockops(&cgroup)?;

        for iface in &opts.egress_interfaces {
            program.attach_egress(iface)?;
        }

        Ok(program)
    }

    fn attach_redir(&mut self) -> Result<()> {
        let map_fd = {
            let map = self
                .ebpf
                .map(names::MAP_REDIR)
                .ok_or(EbpfError::MapNotFound(names::MAP_REDIR))?;
            let sockhash: SockHash<_, Socket4Tuple> = SockHash::try_from(map)?;
            sockhash.fd().try_clone().map_err(|source| EbpfError::Io {
                op: "dup sockhash fd of",
                path: self.pin_path.join(names::MAP_REDIR),
                source,
            })?
        };

        let name = names::PROG_REDIR;
        let prog: &mut SkMsg = self
            .ebpf
            .program_mut(name)
            .ok_or(EbpfError::ProgramNotFound(name))?
            .try_into()
            .map_err(|source| EbpfError::ProgramType { name, source })?;
        prog.load().map_err(|source| EbpfError::ProgramLoad { name, source })?;
        let link = prog
            .attach(&map_fd)
            .map_err(|source| EbpfError::Attach { name, source })?;

        self.redir_link = Some(link);
        info!(program = name, map = names::MAP_REDIR, "sk_msg redirect attached");
        Ok(())
    }

    fn attach_sockops(&mut self, cgroup: &Path) -> Result<()> {
        let cgroup_file = File::open(cgroup).map_err(|source| EbpfError::Io {
            op: "open cgroup",
            path: cgroup.to_path_buf(),
            source,
        })?;

        let name = names::PROG_SOCKOPS;
        let prog: &mut SockOps = self
            .ebpf
            .program_mut(name)
            .ok_or(EbpfError::ProgramNotFound(name))?
            .try_into()
            .map_err(|source| EbpfError::ProgramType { name, source })?;
        prog.load().map_err(|source| EbpfError::ProgramLoad { name, source })?;
        let link = prog
            .attach(&cgroup_file, CgroupAttachMode::default())
            .map_err(|source| EbpfError::Attach { name, source })?;

        self.sockops_link = Some(link);
        info!(program = name, cgroup = %cgroup.display(), "sockops tracker attached");
        Ok(())
    }

    fn attach_egress(&mut self, iface: &str) -> Result<()> {
        // Fails when the qdisc already exists, which is fine.
        if let Err(err) = tc::qdisc_add_clsact(iface) {
            debug!(iface, %err, "clsact qdisc not added");
        }

        let name = names::PROG_DISABLE;
        let prog: &mut SchedClassifier = self
            .ebpf
            .program_mut(name)
            .ok_or(EbpfError::ProgramNotFound(name))?
            .try_into()
            .map_err(|source| EbpfError::ProgramType { name, source })?;
        if self.egress_links.is_empty() {
            prog.load().map_err(|source| EbpfError::ProgramLoad { name, source })?;
        }
        let link = prog
            .attach(iface, TcAttachType::Egress)
            .map_err(|source| EbpfError::Attach { name, source })?;

        self.egress_links.push((iface.to_string(), link));
        info!(program = name, iface, "egress disable classifier attached");
        Ok(())
    }

    pub fn pin_path(&self) -> &Path {
        &self.pin_path
    }

    /// Interfaces the egress classifier is attached to.
    pub fn egress_interfaces(&self) -> impl Iterator<Item = &str> {
        self.egress_links.iter().map(|(iface, _)| iface.as_str())
    }

    /// Detach every program and remove the pinned maps.
    pub fn close(mut self) -> Result<()> {
        if let Some(link) = self.redir_link.take() {
            let prog: &mut SkMsg = self
                .ebpf
                .program_mut(names::PROG_REDIR)
                .ok_or(EbpfError::ProgramNotFound(names::PROG_REDIR))?
                .try_into()
                .map_err(|source| EbpfError::ProgramType { name: names::PROG_REDIR, source })?;
            if let Err(err) = prog.detach(link) {
                warn!(program = names::PROG_REDIR, %err, "detach failed");
            }
        }

        if let Some(link) = self.sockops_link.take() {
            let prog: &mut SockOps = self
                .ebpf
                .program_mut(names::PROG_SOCKOPS)
                .ok_or(EbpfError::ProgramNotFound(names::PROG_SOCKOPS))?
                .try_into()
                .map_err(|source| EbpfError::ProgramType { name: names::PROG_SOCKOPS, source })?;
            if let Err(err) = prog.detach(link) {
                warn!(program = names::PROG_SOCKOPS, %err, "detach failed");
            }
        }

        let egress = std::mem::take(&mut self.egress_links);
        if !egress.is_empty() {
            let prog: &mut SchedClassifier = self
                .ebpf
                .program_mut(names::PROG_DISABLE)
                .ok_or(EbpfError::ProgramNotFound(names::PROG_DISABLE))?
                .try_into()
                .map_err(|source| EbpfError::ProgramType { name: names::PROG_DISABLE, source })?;
            for (iface, link) in egress {
                if let Err(err) = prog.detach(link) {
                    warn!(program = names::PROG_DISABLE, iface, %err, "detach failed");
                }
            }
        }

        let pin_path = self.pin_path.clone();
        drop(self);
        let removed = unpin_maps(&pin_path)?;
        info!(pin_path = %pin_path.display(), removed, "programs detached, maps unpinned");
        Ok(())
    }
}

/// Remove the pin files of [`PINNED_MAPS`] below `pin_path`.
///
/// Missing files are skipped. Returns how many were removed.
pub fn unpin_maps(pin_path: &Path) -> Result<usize> {
    let mut removed = 0;
    for name in PINNED_MAPS {
        let path = pin_path.join(name);
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(EbpfError::Io { op: "unpin", path, source }),
        }
    }
    Ok(removed)
}
