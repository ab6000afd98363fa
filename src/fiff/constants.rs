//! FIFF format constants.
//!
//! Names follow [`mne/_fiff/constants.py`][mne-src] so that a tag kind seen
//! in a hex dump can be looked up on either side.
//!
//! Every piece of data in a FIF file is wrapped in a **tag**: a 16-byte
//! header (`kind`, `type`, `size`, `next`) followed by a payload.  Tags are
//! grouped into **blocks** by `FIFF_BLOCK_START` / `FIFF_BLOCK_END`
//! sentinels, forming a tree.  Head-position work needs three corners of
//! that tree beyond the raw buffers: the digitizer (`FIFFB_ISOTRAK`), the
//! HPI measurement setup (`FIFFB_HPI_MEAS`) and the device→head transform.
//!
//! [mne-src]: https://github.com/mne-tools/mne-python/blob/main/mne/_fiff/constants.py

#![allow(dead_code)]

// ── Block kinds ───────────────────────────────────────────────────────────

/// Measurement block: top-level container for one recording.
pub const FIFFB_MEAS:            i32 = 100;
/// Measurement-info block holding channel metadata and sfreq.
pub const FIFFB_MEAS_INFO:       i32 = 101;
/// Raw (continuous) data block.
pub const FIFFB_RAW_DATA:        i32 = 102;
/// Digitizer (Polhemus) block holding `FIFF_DIG_POINT` tags.
pub const FIFFB_ISOTRAK:         i32 = 107;
/// HPI measurement setup (coil frequencies, sampling parameters).
pub const FIFFB_HPI_MEAS:        i32 = 108;
/// HPI fit result written by the acquisition software.
pub const FIFFB_HPI_RESULT:      i32 = 109;
/// One HPI coil inside `FIFFB_HPI_MEAS`.
pub const FIFFB_HPI_COIL:        i32 = 110;
/// Continuous data block (alias used by some acquisition systems).
pub const FIFFB_CONTINUOUS_DATA: i32 = 112;
/// MaxShield (internal active shielding) raw data block.
pub const FIFFB_IAS_RAW_DATA:    i32 = 119;

// ── Tag kinds: structural ─────────────────────────────────────────────────

/// Unique file identifier (first tag in every FIF file).
pub const FIFF_FILE_ID:         i32 = 100;
/// Pointer to the embedded tag directory (second tag, payload = byte offset).
pub const FIFF_DIR_POINTER:     i32 = 101;
/// Opens a new block; payload = block kind (i32).
pub const FIFF_BLOCK_START:     i32 = 104;
/// Closes the most recently opened block.
pub const FIFF_BLOCK_END:       i32 = 105;

// ── Tag kinds: measurement info ──────────────────────────────────────────

/// Number of channels (i32).
pub const FIFF_NCHAN:           i32 = 200;
/// Sampling frequency in Hz (f32).
pub const FIFF_SFREQ:           i32 = 201;
/// Channel info struct (one per channel; see [`super::info::ChannelInfo`]).
pub const FIFF_CH_INFO:         i32 = 203;
/// Free-text comment / description (string).
pub const FIFF_COMMENT:         i32 = 206;
/// Index of the first sample in acquisition time (i32).
pub const FIFF_FIRST_SAMPLE:    i32 = 208;
/// Experimenter name (string).
pub const FIFF_EXPERIMENTER:    i32 = 212;
/// Digitization point struct (see [`super::info::DigPoint`]).
pub const FIFF_DIG_POINT:       i32 = 213;
/// Number of HPI coils (i32).
pub const FIFF_HPI_NCOIL:       i32 = 216;
/// Online lowpass cutoff in Hz (f32); may be NaN if not set.
pub const FIFF_LOWPASS:         i32 = 219;
/// Colon-separated list of bad channel names (string).
pub const FIFF_BAD_CHS:         i32 = 220;
/// Coordinate transformation struct (see [`super::info::CoordTrans`]).
pub const FIFF_COORD_TRANS:     i32 = 222;
/// Online highpass cutoff in Hz (f32); may be NaN if not set.
pub const FIFF_HIGHPASS:        i32 = 223;
/// Power-line frequency in Hz (f32).
pub const FIFF_LINE_FREQ:       i32 = 235;
/// Driving frequency of one HPI coil in Hz (f32).
pub const FIFF_HPI_COIL_FREQ:   i32 = 236;
/// Digitized HPI point rank for each coil, 1-based (i32 array).
pub const FIFF_HPI_DIGITIZATION_ORDER: i32 = 247;
/// Recording description, alias for `FIFF_COMMENT`.
pub const FIFF_DESCRIPTION:     i32 = FIFF_COMMENT;

// ── Tag kinds: data buffers ───────────────────────────────────────────────

/// One buffer of raw signal samples (interleaved `[n_samp, n_chan]`,
/// big-endian, type = `FIFFT_FLOAT` or `FIFFT_DOUBLE` or `FIFFT_SHORT`).
pub const FIFF_DATA_BUFFER:     i32 = 300;
/// Skip `n` complete buffers (inter-buffer gap; payload = n as i32).
pub const FIFF_DATA_SKIP:       i32 = 301;

// ── Tag payload types (the `type` field of a tag header) ──────────────────

/// Void / no payload.
pub const FIFFT_VOID:              u32 = 0;
/// Big-endian signed 16-bit integer.
pub const FIFFT_SHORT:             u32 = 2;
/// Big-endian signed 32-bit integer.
pub const FIFFT_INT:               u32 = 3;
/// Big-endian IEEE 754 single-precision float (4 bytes).
pub const FIFFT_FLOAT:             u32 = 4;
/// Big-endian IEEE 754 double-precision float (8 bytes).
pub const FIFFT_DOUBLE:            u32 = 5;
/// Latin-1 (ISO 8859-1) string, **not** NUL-terminated.
pub const FIFFT_STRING:            u32 = 10;
/// 16-bit DAU packed sample (same wire width as `FIFFT_SHORT`).
pub const FIFFT_DAU_PACK16:        u32 = 16;
/// 96-byte channel info struct (see [`super::info::ChannelInfo`]).
pub const FIFFT_CH_INFO_STRUCT:    u32 = 30;
/// File-ID struct.
pub const FIFFT_ID_STRUCT:         u32 = 31;
/// Tag-directory entry struct (16 bytes per entry).
pub const FIFFT_DIR_ENTRY_STRUCT:  u32 = 32;
/// Digitisation point struct (20 bytes).
pub const FIFFT_DIG_POINT_STRUCT:  u32 = 33;
/// Coordinate transform struct (104 bytes).
pub const FIFFT_COORD_TRANS_STRUCT:u32 = 35;

// ── `next` field sentinels in a tag header ────────────────────────────────

/// The next tag follows immediately: `next_pos = pos + 16 + size`.
pub const FIFFV_NEXT_SEQ:  i32 = 0;
/// There is no next tag (end of sequence / block).
pub const FIFFV_NEXT_NONE: i32 = -1;

// ── Channel kind codes (`ChannelInfo::kind`) ──────────────────────────────

/// MEG magnetometer or gradiometer channel.
pub const FIFFV_MEG_CH:     i32 = 1;
/// EEG scalp-potential channel.
pub const FIFFV_EEG_CH:     i32 = 2;
/// Stimulus / trigger channel.
pub const FIFFV_STIM_CH:    i32 = 3;
/// MEG reference (compensation) channel.
pub const FIFFV_REF_MEG_CH: i32 = 301;
/// Miscellaneous auxiliary channel.
pub const FIFFV_MISC_CH:    i32 = 502;

// ── Coil types (`ChannelInfo::coil_type`) ─────────────────────────────────

/// Ideal point magnetometer.
pub const FIFFV_COIL_POINT_MAGNETOMETER: i32 = 9;
/// Neuromag Vectorview planar gradiometer, revisions T1–T4.
pub const FIFFV_COIL_VV_PLANAR_W:  i32 = 3011;
pub const FIFFV_COIL_VV_PLANAR_T1: i32 = 3012;
pub const FIFFV_COIL_VV_PLANAR_T2: i32 = 3013;
pub const FIFFV_COIL_VV_PLANAR_T3: i32 = 3014;
/// Neuromag Vectorview magnetometer, revisions T1–T3.
pub const FIFFV_COIL_VV_MAG_T1:    i32 = 3022;
pub const FIFFV_COIL_VV_MAG_T2:    i32 = 3023;
pub const FIFFV_COIL_VV_MAG_T3:    i32 = 3024;

// ── Digitization point kinds (`DigPoint::kind`) ───────────────────────────

/// Nasion / LPA / RPA.
pub const FIFFV_POINT_CARDINAL: i32 = 1;
/// HPI coil location.
pub const FIFFV_POINT_HPI:      i32 = 2;
/// EEG electrode location.
pub const FIFFV_POINT_EEG:      i32 = 3;
/// Extra head-shape point.
pub const FIFFV_POINT_EXTRA:    i32 = 4;

// ── Coordinate frames ─────────────────────────────────────────────────────

/// MEG device (helmet) coordinates.
pub const FIFFV_COORD_DEVICE: i32 = 1;
/// Polhemus isotrak coordinates.
pub const FIFFV_COORD_ISOTRAK: i32 = 3;
/// Head coordinates defined by the fiducials.
pub const FIFFV_COORD_HEAD:   i32 = 4;

// ── Helpers ───────────────────────────────────────────────────────────────

/// Return the number of bytes occupied by one sample of the given tag type.
///
/// Returns `None` for types that do not represent scalar numeric samples
/// (e.g. strings, structs).
///
/// # Examples
///
/// ```
/// use headpos::fiff::constants::{bytes_per_sample, FIFFT_FLOAT, FIFFT_DOUBLE, FIFFT_SHORT};
/// assert_eq!(bytes_per_sample(FIFFT_FLOAT),  Some(4));
/// assert_eq!(bytes_per_sample(FIFFT_DOUBLE), Some(8));
/// assert_eq!(bytes_per_sample(FIFFT_SHORT),  Some(2));
/// assert_eq!(bytes_per_sample(99),            None);
/// ```
pub fn bytes_per_sample(tag_type: u32) -> Option<usize> {
    match tag_type {
        FIFFT_DAU_PACK16 | FIFFT_SHORT  => Some(2),
        FIFFT_FLOAT                     => Some(4),
        FIFFT_DOUBLE                    => Some(8),
        FIFFT_INT                       => Some(4),
        _                               => None,
    }
}

/// `true` for Vectorview-style planar gradiometer coils.
pub fn is_planar_gradiometer(coil_type: i32) -> bool {
    matches!(
        coil_type,
        FIFFV_COIL_VV_PLANAR_W
            | FIFFV_COIL_VV_PLANAR_T1
            | FIFFV_COIL_VV_PLANAR_T2
            | FIFFV_COIL_VV_PLANAR_T3
    )
}
