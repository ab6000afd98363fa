//! FIFF file format reader.
//!
//! Reads `.fif` MEG recordings compatible with
//! [MNE-Python](https://mne.tools), including the HPI and digitizer
//! metadata needed for head-position estimation.
//!
//! # Quick start
//! ```no_run
//! use headpos::fiff::open_raw;
//!
//! let raw = open_raw("data/test_move_anon_raw.fif").unwrap();
//! println!("{} channels @ {} Hz, {} HPI coils",
//!     raw.info.n_chan, raw.info.sfreq, raw.info.hpi_freqs.len());
//! ```
pub mod constants;
pub mod info;
pub mod raw;
pub mod tag;
pub mod tree;

pub use info::{ChannelInfo, CoordTrans, DigPoint, MeasInfo, read_meas_info};
pub use raw::{open_raw, RawFif, BufferRecord};
pub use tag::{TagHeader, read_tag_header};
pub use tree::{Node, read_tree, scan_directory, try_load_directory};
