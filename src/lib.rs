//! # headpos: head position estimation from cHPI MEG recordings
//!
//! During a MEG recording, small coils taped to the head are driven with
//! sinusoidal currents at known frequencies (continuous head-position
//! indicators, cHPI).  `headpos` tracks those coils through the recording
//! and writes the head's pose over time as an MNE/MaxFilter `.pos` file,
//! the input that movement compensation needs downstream.
//!
//! The stages track the cHPI model used by [MNE](https://mne.tools); the
//! FIF reader is native and needs no external runtime.
//!
//! ## Pipeline overview
//!
//! ```text
//! config.json ──► config::load        allow-list, "" → null, typed params
//! raw.fif     ──► fiff::open_raw      channels, HPI freqs, dig, dev→head
//!                 sidecar             crosstalk / calibration / … copied
//!                 chpi::amplitudes    sliding sinusoid fits, ext. projection
//!                 chpi::locs          magnetic-dipole fits per coil
//!                 chpi::head_pos      rigid fits → quaternions
//!             ◄── pos                 out_dir/headshape.pos
//!             ◄── report              product.json
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use headpos::chpi::{compute_chpi_amplitudes, compute_chpi_locs, compute_head_pos};
//! use headpos::config::HeadPosParams;
//! use headpos::fiff::open_raw;
//!
//! let raw = open_raw("data/test_move_anon_raw.fif").unwrap();
//! let p = HeadPosParams::default();
//! let amps = compute_chpi_amplitudes(&raw, &p.amplitudes()).unwrap();
//! let locs = compute_chpi_locs(&raw.info, &amps, &p.locs()).unwrap();
//! let pos = compute_head_pos(&raw.info, &locs, &p.head_pos()).unwrap();
//! for row in &pos.rows {
//!     println!("{:8.3} s  trans {:?}", row.time, row.trans);
//! }
//! ```
//!
//! Or the whole run, as the `headpos` binary does it:
//!
//! ```no_run
//! use std::path::Path;
//! let summary = headpos::pipeline::run_from_config_file(
//!     Path::new("config.json"),
//!     Path::new("out_dir"),
//! ).unwrap();
//! println!("{} positions → {}", summary.n_positions, summary.pos_file.display());
//! ```

pub mod chpi;
pub mod config;
pub mod fiff;
pub mod pipeline;
pub mod pos;
pub mod report;
pub mod sidecar;

pub use config::{AppConfig, ConfigError, HeadPosParams};
pub use pipeline::{run, run_from_config_file, RunSummary, POS_FILE_NAME};
pub use pos::{HeadPositions, PosRow};
pub use report::Product;
