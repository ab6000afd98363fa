//! End-to-end run: recording in, `headshape.pos` out.
//!
//! ```text
//! config.json ─ config::load ─┐
//!                              ├─ fiff::open_raw(fif)
//!                              ├─ sidecar::copy_sidecars → out_dir/
//!                              ├─ chpi::compute_chpi_amplitudes
//!                              ├─ chpi::compute_chpi_locs
//!                              ├─ chpi::compute_head_pos
//!                              └─ pos::write_head_pos → out_dir/headshape.pos
//! ```
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};

use crate::chpi::{compute_chpi_amplitudes, compute_chpi_locs, compute_head_pos};
use crate::config::{self, AppConfig, HeadPosParams};
use crate::fiff::{open_raw, RawFif};
use crate::pos::{write_head_pos, HeadPositions};
use crate::sidecar::copy_sidecars;

/// Name of the head-position file inside the output directory.
pub const POS_FILE_NAME: &str = "headshape.pos";

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub pos_file:    PathBuf,
    pub n_positions: usize,
    /// Side-car copies written to the output directory.
    pub sidecars:    Vec<PathBuf>,
}

/// The three cHPI stages on an opened recording.
pub fn estimate_head_pos(raw: &RawFif, params: &HeadPosParams) -> Result<HeadPositions> {
    let amps = compute_chpi_amplitudes(raw, &params.amplitudes())
        .context("computing cHPI amplitudes")?;
    let locs = compute_chpi_locs(&raw.info, &amps, &params.locs())
        .context("computing cHPI coil locations")?;
    compute_head_pos(&raw.info, &locs, &params.head_pos())
        .context("computing head positions")
}

/// Run with an already loaded configuration.
pub fn run(cfg: &AppConfig, out_dir: &Path) -> Result<RunSummary> {
    if cfg.headshape.is_some() {
        tracing::debug!("headshape file configured but not used");
    }
    let raw = open_raw(&cfg.fif)
        .with_context(|| format!("reading MEG recording {}", cfg.fif.display()))?;
    tracing::info!(
        path = %cfg.fif.display(),
        n_chan = raw.info.n_chan,
        sfreq = raw.info.sfreq,
        duration_s = raw.duration_secs(),
        hpi_freqs = ?raw.info.hpi_freqs,
        "opened recording"
    );

    fs::create_dir_all(out_dir)
        .with_context(|| format!("create output directory {}", out_dir.display()))?;
    let sidecars = copy_sidecars(&cfg.sidecars, out_dir).context("copying side-car files")?;

    let positions = estimate_head_pos(&raw, &cfg.params)?;
    let pos_file = out_dir.join(POS_FILE_NAME);
    write_head_pos(&pos_file, &positions)?;
    tracing::info!(n_positions = positions.len(), path = %pos_file.display(), "head positions written");

    Ok(RunSummary { pos_file, n_positions: positions.len(), sidecars })
}

/// Load `config_path` and [`run`] it.
pub fn run_from_config_file(config_path: &Path, out_dir: &Path) -> Result<RunSummary> {
    let cfg = config::load(config_path)?;
    run(&cfg, out_dir)
}
