//! Measurement info (MNE's `Info` struct) read from a FIF file.
//!
//! Besides the channel table this reads the three pieces of metadata that
//! head-position estimation depends on: digitized HPI coil locations, the
//! device→head transform and the HPI coil driving frequencies.
use std::io::{Read, Seek};
use anyhow::{anyhow, bail, Result};
use nalgebra::{Matrix3, Vector3};

use super::constants::*;
use super::tag::*;
use super::tree::Node;

// ── Channel info ─────────────────────────────────────────────────────────

/// Channel info, parsed from a `FIFFT_CH_INFO_STRUCT` (30) tag.
///
/// On-disk layout (big-endian, 96 bytes):
/// ```text
///  4  scanno       i32
///  4  logno        i32
///  4  kind         i32
///  4  range        f32
///  4  cal          f32
///  4  coil_type    i32
/// 48  loc          12 × f32
///  4  unit         i32
///  4  unit_mul     i32
/// 16  ch_name      16 × u8 (null-padded Latin-1)
/// ```
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub scan_no:   i32,
    pub log_no:    i32,
    pub kind:      i32,
    pub range:     f32,
    pub cal:       f32,
    pub coil_type: i32,
    /// Coil origin followed by the coil frame axes `ex`, `ey`, `ez`
    /// (device coordinates, metres).
    pub loc:       [f32; 12],
    pub unit:      i32,
    pub unit_mul:  i32,
    pub name:      String,
}

impl ChannelInfo {
    /// Length of the on-disk struct.
    pub const SIZE: usize = 96;

    /// Calibration factor applied to raw samples: `cal × range`.
    #[inline]
    pub fn calibration(&self) -> f64 {
        (self.cal as f64) * (self.range as f64)
    }

    /// `true` for MEG sensor channels (not reference magnetometers).
    #[inline]
    pub fn is_meg(&self) -> bool {
        self.kind == FIFFV_MEG_CH
    }

    /// Coil origin in device coordinates.
    pub fn origin(&self) -> Vector3<f64> {
        self.loc_vec(0)
    }

    /// Coil frame axis `i` (0 = ex, 1 = ey, 2 = ez / normal).
    pub fn axis(&self, i: usize) -> Vector3<f64> {
        self.loc_vec(3 + 3 * i)
    }

    fn loc_vec(&self, at: usize) -> Vector3<f64> {
        Vector3::new(self.loc[at] as f64, self.loc[at + 1] as f64, self.loc[at + 2] as f64)
    }

    /// Parse from the payload of a FIFFT_CH_INFO_STRUCT tag.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::SIZE {
            bail!("ch_info payload too short: {} bytes (need {})", raw.len(), Self::SIZE);
        }
        let mut loc = [0f32; 12];
        for (i, v) in loc.iter_mut().enumerate() {
            *v = be_f32(&raw[24 + i * 4..]);
        }
        let name_bytes = &raw[80..96];
        let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(16);
        Ok(ChannelInfo {
            scan_no:   be_i32(&raw[0..]),
            log_no:    be_i32(&raw[4..]),
            kind:      be_i32(&raw[8..]),
            range:     be_f32(&raw[12..]),
            cal:       be_f32(&raw[16..]),
            coil_type: be_i32(&raw[20..]),
            loc,
            unit:      be_i32(&raw[72..]),
            unit_mul:  be_i32(&raw[76..]),
            name:      name_bytes[..end].iter().map(|&b| b as char).collect(),
        })
    }
}

// ── Digitization ─────────────────────────────────────────────────────────

/// One digitized point (`FIFFT_DIG_POINT_STRUCT`, 20 bytes: kind, ident, r[3]).
#[derive(Debug, Clone, PartialEq)]
pub struct DigPoint {
    /// `FIFFV_POINT_CARDINAL`, `FIFFV_POINT_HPI`, …
    pub kind:  i32,
    /// Running number within the kind (HPI coils are numbered from 1).
    pub ident: i32,
    /// Location in head coordinates (metres).
    pub r:     Vector3<f64>,
}

impl DigPoint {
    pub const SIZE: usize = 20;

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::SIZE {
            bail!("dig point payload too short: {} bytes", raw.len());
        }
        Ok(DigPoint {
            kind:  be_i32(&raw[0..]),
            ident: be_i32(&raw[4..]),
            r: Vector3::new(
                be_f32(&raw[8..]) as f64,
                be_f32(&raw[12..]) as f64,
                be_f32(&raw[16..]) as f64,
            ),
        })
    }
}

// ── Coordinate transform ─────────────────────────────────────────────────

/// Rigid transform between two coordinate frames (`FIFFT_COORD_TRANS_STRUCT`).
///
/// On disk: `from`, `to`, rotation (9 × f32, row-major), translation
/// (3 × f32), followed by the inverse rotation and translation, which we
/// recompute instead of trusting.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordTrans {
    pub from:  i32,
    pub to:    i32,
    pub rot:   Matrix3<f64>,
    pub trans: Vector3<f64>,
}

impl CoordTrans {
    pub const SIZE: usize = 104;

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::SIZE {
            bail!("coord trans payload too short: {} bytes", raw.len());
        }
        let f = |i: usize| be_f32(&raw[8 + 4 * i..]) as f64;
        Ok(CoordTrans {
            from:  be_i32(&raw[0..]),
            to:    be_i32(&raw[4..]),
            rot:   Matrix3::from_fn(|r, c| f(3 * r + c)),
            trans: Vector3::new(f(9), f(10), f(11)),
        })
    }

    /// Map a point from `self.from` to `self.to` coordinates.
    #[inline]
    pub fn apply(&self, r: &Vector3<f64>) -> Vector3<f64> {
        self.rot * r + self.trans
    }

    /// The transform in the opposite direction.
    pub fn inverse(&self) -> CoordTrans {
        let rot_t = self.rot.transpose();
        CoordTrans {
            from:  self.to,
            to:    self.from,
            trans: -(rot_t * self.trans),
            rot:   rot_t,
        }
    }
}

// ── Measurement info ─────────────────────────────────────────────────────

/// Measurement metadata extracted from `FIFFB_MEAS_INFO`.
#[derive(Debug, Clone)]
pub struct MeasInfo {
    pub n_chan:     usize,
    pub sfreq:     f64,
    pub lowpass:   Option<f64>,
    pub highpass:  Option<f64>,
    pub line_freq: Option<f64>,
    pub chs:       Vec<ChannelInfo>,
    pub bad_ch_names: Vec<String>,
    pub experimenter: Option<String>,
    pub description:  Option<String>,
    /// All digitized points (cardinal, HPI, EEG, extra).
    pub dig:        Vec<DigPoint>,
    /// Device → head transform, if the recording carries one.
    pub dev_head_t: Option<CoordTrans>,
    /// HPI coil driving frequencies in coil order.
    pub hpi_freqs:  Vec<f64>,
    /// For coil `k`, the zero-based rank (by `ident`) of its digitized
    /// point, from the last `FIFFB_HPI_RESULT`.  `None` means ident order.
    pub hpi_dig_order: Option<Vec<usize>>,
}

impl MeasInfo {
    /// Calibration array `[n_chan]`: `cal[i] = chs[i].cal * chs[i].range`.
    pub fn cals(&self) -> Vec<f64> {
        self.chs.iter().map(|c| c.calibration()).collect()
    }

    /// Channel names in order.
    pub fn ch_names(&self) -> Vec<&str> {
        self.chs.iter().map(|c| c.name.as_str()).collect()
    }

    /// Indices of good MEG channels.
    pub fn meg_picks(&self) -> Vec<usize> {
        self.chs
            .iter()
            .enumerate()
            .filter(|(_, ch)| ch.is_meg() && !self.bad_ch_names.contains(&ch.name))
            .map(|(i, _)| i)
            .collect()
    }

    /// HPI digitization points in coil order: sorted by `ident`, then
    /// permuted by [`hpi_dig_order`](Self::hpi_dig_order) when present.
    pub fn hpi_dig(&self) -> Result<Vec<&DigPoint>> {
        let mut pts: Vec<&DigPoint> =
            self.dig.iter().filter(|d| d.kind == FIFFV_POINT_HPI).collect();
        pts.sort_by_key(|d| d.ident);
        let Some(order) = &self.hpi_dig_order else {
            return Ok(pts);
        };
        let mut seen = vec![false; pts.len()];
        for &k in order {
            if k >= pts.len() || std::mem::replace(&mut seen[k], true) {
                bail!(
                    "HPI digitization order {:?} is not a permutation of {} points",
                    order.iter().map(|k| k + 1).collect::<Vec<_>>(),
                    pts.len()
                );
            }
        }
        if order.len() != pts.len() {
            bail!("HPI digitization order has {} entries for {} points", order.len(), pts.len());
        }
        Ok(order.iter().map(|&k| pts[k]).collect())
    }
}

/// Read `MeasInfo` from an open FIF file given the tree.
pub fn read_meas_info<R: Read + Seek>(reader: &mut R, tree: &Node) -> Result<MeasInfo> {
    let meas_node = tree
        .find_block(FIFFB_MEAS)
        .ok_or_else(|| anyhow!("FIFFB_MEAS block not found"))?;
    let info_node = meas_node
        .find_block(FIFFB_MEAS_INFO)
        .ok_or_else(|| anyhow!("FIFFB_MEAS_INFO block not found"))?;

    let mut n_chan     = None::<usize>;
    let mut sfreq      = None::<f64>;
    let mut lowpass    = None::<f64>;
    let mut highpass   = None::<f64>;
    let mut line_freq  = None::<f64>;
    let mut chs        = Vec::<ChannelInfo>::new();
    let mut bad_ch_names = Vec::<String>::new();
    let mut experimenter = None::<String>;
    let mut description  = None::<String>;
    let mut dev_head_t   = None::<CoordTrans>;

    let finite = |v: f32| v.is_finite().then_some(v as f64);

    for ent in &info_node.entries {
        match ent.kind {
            FIFF_NCHAN     => n_chan = Some(read_i32(reader, ent)?.max(0) as usize),
            FIFF_SFREQ     => sfreq = Some(read_f32(reader, ent)? as f64),
            FIFF_LOWPASS   => lowpass = finite(read_f32(reader, ent)?),
            FIFF_HIGHPASS  => highpass = finite(read_f32(reader, ent)?),
            FIFF_LINE_FREQ => line_freq = finite(read_f32(reader, ent)?),
            FIFF_CH_INFO   => {
                let raw = read_raw_bytes(reader, ent)?;
                chs.push(ChannelInfo::from_bytes(&raw)?);
            }
            FIFF_BAD_CHS => {
                let s = read_string(reader, ent)?;
                bad_ch_names = s
                    .split(':')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            FIFF_EXPERIMENTER => experimenter = Some(read_string(reader, ent)?),
            FIFF_DESCRIPTION  => description = Some(read_string(reader, ent)?),
            FIFF_COORD_TRANS => {
                let t = CoordTrans::from_bytes(&read_raw_bytes(reader, ent)?)?;
                match (t.from, t.to) {
                    (FIFFV_COORD_DEVICE, FIFFV_COORD_HEAD) => dev_head_t = Some(t),
                    (FIFFV_COORD_HEAD, FIFFV_COORD_DEVICE) => dev_head_t = Some(t.inverse()),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    let n_chan = n_chan.ok_or_else(|| anyhow!("FIFF_NCHAN not found"))?;
    let sfreq  = sfreq.ok_or_else(|| anyhow!("FIFF_SFREQ not found"))?;
    if chs.len() != n_chan {
        bail!("expected {n_chan} ch_info structs, got {}", chs.len());
    }

    let dig = read_dig_points(reader, info_node)?;
    let hpi_freqs = read_hpi_freqs(reader, info_node)?;
    let hpi_dig_order = read_hpi_dig_order(reader, info_node)?;

    Ok(MeasInfo {
        n_chan, sfreq, lowpass, highpass, line_freq, chs, bad_ch_names,
        experimenter, description, dig, dev_head_t, hpi_freqs, hpi_dig_order,
    })
}

fn read_dig_points<R: Read + Seek>(reader: &mut R, info_node: &Node) -> Result<Vec<DigPoint>> {
    let mut dig = Vec::new();
    for isotrak in info_node.find_blocks(FIFFB_ISOTRAK) {
        for ent in isotrak.entries.iter().filter(|e| e.kind == FIFF_DIG_POINT) {
            for rec in read_struct_records(reader, ent, DigPoint::SIZE)? {
                dig.push(DigPoint::from_bytes(&rec)?);
            }
        }
    }
    Ok(dig)
}

fn read_hpi_freqs<R: Read + Seek>(reader: &mut R, info_node: &Node) -> Result<Vec<f64>> {
    let mut freqs = Vec::new();
    for meas in info_node.find_blocks(FIFFB_HPI_MEAS) {
        for coil in meas.find_blocks(FIFFB_HPI_COIL) {
            if let Some(tag) = coil.find_tag(FIFF_HPI_COIL_FREQ) {
                freqs.push(read_f32(reader, tag)? as f64);
            }
        }
    }
    Ok(freqs)
}

/// Digitization order of the last HPI result block, made zero-based.
fn read_hpi_dig_order<R: Read + Seek>(reader: &mut R, info_node: &Node) -> Result<Option<Vec<usize>>> {
    let Some(tag) = info_node
        .find_blocks(FIFFB_HPI_RESULT)
        .pop()
        .and_then(|b| b.find_tag(FIFF_HPI_DIGITIZATION_ORDER))
    else {
        return Ok(None);
    };
    read_i32_array(reader, tag)?
        .into_iter()
        .map(|k| {
            usize::try_from(k - 1)
                .map_err(|_| anyhow!("HPI digitization order entry {k} must be at least 1"))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}
