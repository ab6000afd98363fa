//! Optional side-car files copied next to the head-position output.
//!
//! Downstream apps (Maxwell filtering, epoching) expect to find the
//! recording's fine-calibration, crosstalk, destination, events and channel
//! files in the output directory under fixed names.  Each one is copied
//! only when it was configured *and* exists; everything else is skipped
//! without complaint.
use std::fs::{self, File, FileTimes};
use std::io;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};

/// The optional side-car categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SidecarKind {
    Crosstalk,
    Calibration,
    Destination,
    Events,
    Channels,
}

impl SidecarKind {
    pub const ALL: [SidecarKind; 5] = [
        SidecarKind::Crosstalk,
        SidecarKind::Calibration,
        SidecarKind::Destination,
        SidecarKind::Events,
        SidecarKind::Channels,
    ];

    /// Key in `config.json`.
    pub fn config_key(self) -> &'static str {
        match self {
            SidecarKind::Crosstalk   => "crosstalk",
            SidecarKind::Calibration => "calibration",
            SidecarKind::Destination => "destination",
            SidecarKind::Events      => "events",
            SidecarKind::Channels    => "channels",
        }
    }

    /// Canonical file name inside the output directory.
    pub fn file_name(self) -> &'static str {
        match self {
            SidecarKind::Crosstalk   => "crosstalk_meg.fif",
            SidecarKind::Calibration => "calibration_meg.dat",
            SidecarKind::Destination => "destination.fif",
            SidecarKind::Events      => "events.tsv",
            SidecarKind::Channels    => "channels.tsv",
        }
    }
}

/// Configured side-car paths; `None` means "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SidecarPaths {
    pub crosstalk:   Option<PathBuf>,
    pub calibration: Option<PathBuf>,
    pub destination: Option<PathBuf>,
    pub events:      Option<PathBuf>,
    pub channels:    Option<PathBuf>,
}

impl SidecarPaths {
    pub fn get(&self, kind: SidecarKind) -> Option<&Path> {
        self.slot(kind).as_deref()
    }

    pub fn set(&mut self, kind: SidecarKind, path: Option<PathBuf>) {
        *self.slot_mut(kind) = path;
    }

    fn slot(&self, kind: SidecarKind) -> &Option<PathBuf> {
        match kind {
            SidecarKind::Crosstalk   => &self.crosstalk,
            SidecarKind::Calibration => &self.calibration,
            SidecarKind::Destination => &self.destination,
            SidecarKind::Events      => &self.events,
            SidecarKind::Channels    => &self.channels,
        }
    }

    fn slot_mut(&mut self, kind: SidecarKind) -> &mut Option<PathBuf> {
        match kind {
            SidecarKind::Crosstalk   => &mut self.crosstalk,
            SidecarKind::Calibration => &mut self.calibration,
            SidecarKind::Destination => &mut self.destination,
            SidecarKind::Events      => &mut self.events,
            SidecarKind::Channels    => &mut self.channels,
        }
    }
}

/// Copy every configured, existing side-car into `out_dir`.
///
/// Returns the destination paths that were written.  `out_dir` must already
/// exist.  Copy failures are fatal.
pub fn copy_sidecars(paths: &SidecarPaths, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for kind in SidecarKind::ALL {
        let Some(src) = paths.get(kind) else {
            tracing::debug!(kind = kind.config_key(), "side-car not configured");
            continue;
        };
        if !src.exists() {
            tracing::debug!(kind = kind.config_key(), path = %src.display(), "side-car missing, skipped");
            continue;
        }
        let dst = out_dir.join(kind.file_name());
        copy_preserving_times(src, &dst)?;
        tracing::info!(kind = kind.config_key(), "copied {} → {}", src.display(), dst.display());
        written.push(dst);
    }
    Ok(written)
}

/// Byte copy through a fresh handle that also restores access and
/// modification times.  The source's permissions are applied last, so a
/// read-only source still yields a read-only copy.
fn copy_preserving_times(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::metadata(src).with_context(|| format!("stat {}", src.display()))?;
    if dst.exists() {
        fs::remove_file(dst).with_context(|| format!("replace {}", dst.display()))?;
    }
    let mut from = File::open(src).with_context(|| format!("open {}", src.display()))?;
    let mut to = File::create(dst).with_context(|| format!("create {}", dst.display()))?;
    io::copy(&mut from, &mut to)
        .with_context(|| format!("copy {} to {}", src.display(), dst.display()))?;

    let mut times = FileTimes::new();
    if let Ok(t) = meta.accessed() {
        times = times.set_accessed(t);
    }
    if let Ok(t) = meta.modified() {
        times = times.set_modified(t);
    }
    to.set_times(times)
        .with_context(|| format!("set file times on {}", dst.display()))?;
    drop(to);
    fs::set_permissions(dst, meta.permissions())
        .with_context(|| format!("set permissions on {}", dst.display()))?;
    Ok(())
}
