//! Raw FIF data reader with on-demand sample access.
//!
//! # Algorithm
//! 1. Load the tag directory (embedded directory if present, else scan).
//! 2. Build the block tree and read [`MeasInfo`].
//! 3. Find the raw-data block: `FIFFB_RAW_DATA`, then
//!    `FIFFB_CONTINUOUS_DATA`, then the MaxShield `FIFFB_IAS_RAW_DATA`.
//! 4. Walk its tags into a buffer table; samples are only read on demand.
//!
//! # Calibration
//! ```text
//! calibrated[ch, t] = raw_value[t, ch] × chs[ch].cal × chs[ch].range
//! ```
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use anyhow::{anyhow, bail, Context, Result};
use ndarray::{s, Array2};

use super::constants::*;
use super::info::{read_meas_info, MeasInfo};
use super::tag::{read_i32, TagHeader};
use super::tree::{read_tree, scan_directory, try_load_directory, Node};

/// One contiguous run of samples in the file.
#[derive(Debug, Clone)]
pub struct BufferRecord {
    /// Data tag, or `None` for a skipped (zero-filled) stretch.
    pub tag:        Option<TagHeader>,
    /// First sample of this buffer in acquisition time.
    pub first_samp: u64,
    pub n_samp:     usize,
}

/// An opened raw FIF recording; data are read lazily from `path`.
#[derive(Debug, Clone)]
pub struct RawFif {
    pub info:       MeasInfo,
    /// First sample index in acquisition time.
    pub first_samp: u64,
    /// Last sample index (inclusive) in acquisition time.
    pub last_samp:  u64,
    pub path:       PathBuf,
    pub buffers:    Vec<BufferRecord>,
    /// Data came from a MaxShield (IAS) block.
    pub maxshield:  bool,
}

impl RawFif {
    /// Total number of time points.
    #[inline]
    pub fn n_times(&self) -> usize {
        (self.last_samp - self.first_samp + 1) as usize
    }

    /// Total duration in seconds.
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        self.n_times() as f64 / self.info.sfreq
    }

    /// Read every sample of every channel, `[n_chan, n_times]`.
    pub fn read_all_data(&self) -> Result<Array2<f64>> {
        self.read_slice(0, self.n_times())
    }

    /// Read the half-open sample range `[start, end)`, relative to
    /// `first_samp`, for all channels.
    pub fn read_slice(&self, start: usize, end: usize) -> Result<Array2<f64>> {
        let n_t = self.n_times();
        if start > end || end > n_t {
            bail!("sample range {start}..{end} outside recording of {n_t} samples");
        }
        let n_ch = self.info.n_chan;
        let cals = self.info.cals();
        let mut out = Array2::<f64>::zeros((n_ch, end - start));

        let file = File::open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        let mut reader = BufReader::new(file);

        let mut samp_base = 0usize;
        let mut out_offset = 0usize;
        for buf in &self.buffers {
            let buf_end = samp_base + buf.n_samp;
            if samp_base < end && buf_end > start {
                let pick_l = start.saturating_sub(samp_base);
                let pick_r = buf.n_samp.min(end - samp_base);
                let n_pick = pick_r - pick_l;
                if let Some(tag) = &buf.tag {
                    let data = read_buffer_data(&mut reader, tag, buf.n_samp, n_ch, &cals)?;
                    out.slice_mut(s![.., out_offset..out_offset + n_pick])
                       .assign(&data.slice(s![.., pick_l..pick_r]));
                }
                out_offset += n_pick;
            }
            samp_base = buf_end;
        }
        Ok(out)
    }
}

/// Open a FIF file without preloading data.
///
/// Mirrors `mne.io.read_raw_fif(fname, allow_maxshield=True)`: MaxShield
/// data are accepted but flagged, since they have not been through SSS.
pub fn open_raw<P: AsRef<Path>>(path: P) -> Result<RawFif> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let directory = match try_load_directory(&mut reader)? {
        Some(d) => d,
        None    => scan_directory(&mut reader)?,
    };
    let tree = read_tree(&mut reader, &directory)?;
    let info = read_meas_info(&mut reader, &tree)
        .with_context(|| format!("reading measurement info of {}", path.display()))?;

    let meas_node = tree
        .find_block(FIFFB_MEAS)
        .ok_or_else(|| anyhow!("FIFFB_MEAS not found"))?;
    let (raw_node, maxshield) = find_raw_block(meas_node)
        .ok_or_else(|| anyhow!("no raw-data block in {}", path.display()))?;
    if maxshield {
        tracing::warn!(
            path = %path.display(),
            "recording contains unprocessed MaxShield data; results may be degraded"
        );
    }

    let buffers = read_buffer_table(&mut reader, raw_node, info.n_chan)?;
    let first_samp = buffers[0].first_samp;
    let last = buffers.last().map(|b| b.first_samp + b.n_samp as u64).unwrap_or(first_samp);
    if last == first_samp {
        bail!("raw-data block of {} holds no samples", path.display());
    }

    tracing::debug!(
        n_chan = info.n_chan,
        sfreq = info.sfreq,
        n_buffers = buffers.len(),
        "opened {}", path.display()
    );

    Ok(RawFif {
        info,
        first_samp,
        last_samp: last - 1,
        path: path.to_path_buf(),
        buffers,
        maxshield,
    })
}

fn find_raw_block(meas: &Node) -> Option<(&Node, bool)> {
    meas.find_block(FIFFB_RAW_DATA)
        .or_else(|| meas.find_block(FIFFB_CONTINUOUS_DATA))
        .map(|n| (n, false))
        .or_else(|| meas.find_block(FIFFB_IAS_RAW_DATA).map(|n| (n, true)))
}

/// Walk the raw block's tags into buffer records.
///
/// A `FIFF_DATA_SKIP` before the first buffer shifts `first_samp`; one
/// between buffers becomes a zero-filled gap.  Skips count whole buffers of
/// the size of the buffer that follows them.
fn read_buffer_table<R: Read + Seek>(
    reader: &mut R,
    raw_node: &Node,
    n_chan: usize,
) -> Result<Vec<BufferRecord>> {
    if n_chan == 0 {
        bail!("recording has no channels");
    }
    let mut next_samp = match raw_node.find_tag(FIFF_FIRST_SAMPLE) {
        Some(tag) => read_i32(reader, tag)?.max(0) as u64,
        None => 0,
    };
    let mut pending_skip = 0usize;
    let mut buffers: Vec<BufferRecord> = Vec::new();

    for ent in &raw_node.entries {
        match ent.kind {
            FIFF_DATA_SKIP => pending_skip += read_i32(reader, ent)?.max(0) as usize,
            FIFF_DATA_BUFFER => {
                let bps = bytes_per_sample(ent.ftype)
                    .ok_or_else(|| anyhow!("unknown buffer type {}", ent.ftype))?;
                let n_samp = ent.payload_len() / (bps * n_chan);

                if pending_skip > 0 {
                    let gap = n_samp * pending_skip;
                    if buffers.is_empty() {
                        next_samp += gap as u64;
                    } else {
                        buffers.push(BufferRecord { tag: None, first_samp: next_samp, n_samp: gap });
                        next_samp += gap as u64;
                    }
                    pending_skip = 0;
                }

                buffers.push(BufferRecord { tag: Some(*ent), first_samp: next_samp, n_samp });
                next_samp += n_samp as u64;
            }
            _ => {}
        }
    }

    if buffers.iter().all(|b| b.tag.is_none()) {
        bail!("no FIFF_DATA_BUFFER tags found in raw-data block");
    }
    Ok(buffers)
}

/// Read one data buffer and return `[n_chan, n_samp]` with calibration.
///
/// The on-disk layout is `[n_samp, n_chan]` (interleaved channels,
/// big-endian).
fn read_buffer_data<R: Read + Seek>(
    reader: &mut R,
    tag:    &TagHeader,
    n_samp: usize,
    n_chan: usize,
    cals:   &[f64],
) -> Result<Array2<f64>> {
    let bps = bytes_per_sample(tag.ftype)
        .ok_or_else(|| anyhow!("unsupported buffer type {}", tag.ftype))?;
    reader
        .seek(SeekFrom::Start(tag.data_pos()))
        .with_context(|| format!("seek to buffer data @ {:#x}", tag.data_pos()))?;
    let mut bytes = vec![0u8; n_samp * n_chan * bps];
    reader
        .read_exact(&mut bytes)
        .with_context(|| format!("read data buffer @ {:#x}", tag.pos))?;

    let decode: fn(&[u8]) -> f64 = match tag.ftype {
        FIFFT_FLOAT  => |b| f32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f64,
        FIFFT_DOUBLE => |b| f64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
        FIFFT_INT    => |b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f64,
        FIFFT_SHORT | FIFFT_DAU_PACK16 => |b| i16::from_be_bytes([b[0], b[1]]) as f64,
        other => bail!("unsupported buffer type {other}"),
    };

    let mut out = Array2::<f64>::zeros((n_chan, n_samp));
    for (i, sample) in bytes.chunks_exact(bps).enumerate() {
        let (t, c) = (i / n_chan, i % n_chan);
        out[[c, t]] = decode(sample) * cals[c];
    }
    Ok(out)
}
