//! Shared helpers: a synthetic Vectorview-like helmet, a cHPI simulator and
//! a minimal FIF writer, so the whole pipeline can run on files with known
//! ground truth.
#![allow(dead_code)]
use std::f64::consts::TAU;
use std::path::Path;

use headpos::chpi::{MegSensors, Sensor, SensorKind};
use headpos::fiff::constants::*;
use nalgebra::{Matrix3, Rotation3, Vector3};
use ndarray::Array2;

pub const SFREQ: f64 = 1000.0;
pub const LINE_FREQ: f64 = 60.0;
pub const LOWPASS: f64 = 330.0;
pub const HPI_FREQS: [f64; 4] = [83.0, 143.0, 203.0, 263.0];
const HELMET_RADIUS: f64 = 0.12;
const COIL_MOMENT: f64 = 1e-8;

// ── Sensor array ──────────────────────────────────────────────────────────

/// One channel of the synthetic array.
#[derive(Debug, Clone)]
pub struct SimChannel {
    pub name:      String,
    pub kind:      i32,
    pub coil_type: i32,
    pub origin:    Vector3<f64>,
    pub ex:        Vector3<f64>,
    pub ey:        Vector3<f64>,
    pub ez:        Vector3<f64>,
}

/// 60 helmet sites × (magnetometer + two orthogonal planar gradiometers),
/// followed by one stimulus channel.
pub fn channels() -> Vec<SimChannel> {
    let mut chs = Vec::new();
    let rings = [(0.12, 6), (0.42, 12), (0.72, 18), (1.02, 24)];
    let mut site = 0;
    for (theta, n_phi) in rings {
        for k in 0..n_phi {
            let phi = k as f64 * TAU / n_phi as f64 + 0.1 * theta;
            let ez = Vector3::new(theta.sin() * phi.cos(), theta.sin() * phi.sin(), theta.cos());
            let ex = Vector3::z().cross(&ez).try_normalize(1e-9).unwrap_or(Vector3::x());
            let ey = ez.cross(&ex);
            let origin = ez * HELMET_RADIUS;
            site += 1;
            let mk = |suffix: u32, coil_type: i32, ex: Vector3<f64>, ey: Vector3<f64>| SimChannel {
                name: format!("MEG{site:03}{suffix}"),
                kind: FIFFV_MEG_CH,
                coil_type,
                origin,
                ex,
                ey,
                ez,
            };
            chs.push(mk(2, FIFFV_COIL_VV_PLANAR_T1, ex, ey));
            chs.push(mk(3, FIFFV_COIL_VV_PLANAR_T1, ey, -ex));
            chs.push(mk(1, FIFFV_COIL_VV_MAG_T3, ex, ey));
        }
    }
    chs.push(SimChannel {
        name: "STI101".into(),
        kind: FIFFV_STIM_CH,
        coil_type: 0,
        origin: Vector3::zeros(),
        ex: Vector3::x(),
        ey: Vector3::y(),
        ez: Vector3::z(),
    });
    chs
}

/// The MEG part of [`channels`] as forward-model sensors.
pub fn meg_sensors(chs: &[SimChannel]) -> MegSensors {
    let picks: Vec<usize> = (0..chs.len()).filter(|&i| chs[i].kind == FIFFV_MEG_CH).collect();
    let sensors = picks
        .iter()
        .map(|&i| {
            let ch = &chs[i];
            let kind = if is_planar_gradiometer(ch.coil_type) {
                SensorKind::PlanarGradiometer
            } else {
                SensorKind::Magnetometer
            };
            Sensor::new(kind, ch.origin, ch.ex, ch.ez)
        })
        .collect();
    MegSensors { picks, sensors }
}

// ── Scenarios ─────────────────────────────────────────────────────────────

/// Device→head pose at `t` seconds after the first sample.
pub type Pose = fn(f64) -> (Matrix3<f64>, Vector3<f64>);

fn still_pose(_t: f64) -> (Matrix3<f64>, Vector3<f64>) {
    (Matrix3::identity(), Vector3::new(0.0, 0.005, -0.01))
}

/// Slow nodding about z plus a few millimetres of drift and sway.
fn moving_pose(t: f64) -> (Matrix3<f64>, Vector3<f64>) {
    let rot = Rotation3::from_euler_angles(0.01, 0.0, 0.03 * (TAU * 0.2 * t).sin()).into_inner();
    let trans = Vector3::new(
        0.002 * (TAU * 0.25 * t).sin(),
        0.005 + 0.001 * t,
        -0.01,
    );
    (rot, trans)
}

/// A synthetic cHPI recording with known head motion.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub n_times:    usize,
    pub first_samp: u64,
    /// Digitized HPI coil positions, head frame.
    pub coils_head: Vec<Vector3<f64>>,
    pub pose:       Pose,
    /// Uniform interference field and line noise.
    pub interference: bool,
    /// 1-based digitization order written to `FIFFB_HPI_RESULT`; coil `k`
    /// gets dig ident `order[k]`.  `None` writes no result block.
    pub dig_order: Option<[i32; 4]>,
}

impl Scenario {
    /// Four coils on the upper head, moving head, interference on.
    pub fn moving(seconds: f64) -> Self {
        Scenario {
            n_times: (seconds * SFREQ) as usize,
            first_samp: 12_000,
            coils_head: vec![
                Vector3::new(0.06, 0.02, 0.06),
                Vector3::new(-0.06, 0.02, 0.06),
                Vector3::new(0.03, 0.07, 0.07),
                Vector3::new(-0.02, -0.05, 0.08),
            ],
            pose: moving_pose,
            interference: true,
            dig_order: None,
        }
    }

    /// Still head with coil 1 placed 3 mm inside the first-ring sensor site.
    pub fn coil_near_sensor(seconds: f64) -> Self {
        let chs = channels();
        let site = chs.iter().find(|c| c.name == "MEG0071").map(|c| c.origin).unwrap();
        let (rot, trans) = still_pose(0.0);
        let near_dev = site * (1.0 - 0.003 / HELMET_RADIUS);
        let mut s = Scenario::moving(seconds);
        s.pose = still_pose;
        s.coils_head[0] = rot * near_dev + trans;
        s
    }

    pub fn t0(&self) -> f64 {
        self.first_samp as f64 / SFREQ
    }

    /// Coil positions in the device frame at `t` seconds after the first sample.
    pub fn coils_dev(&self, t: f64) -> Vec<Vector3<f64>> {
        let (rot, trans) = (self.pose)(t);
        self.coils_head.iter().map(|h| rot.transpose() * (h - trans)).collect()
    }

    pub fn true_trans(&self, t: f64) -> Vector3<f64> {
        (self.pose)(t).1
    }

    /// Calibrated data `[n_chan, n_times]` in the order of [`channels`].
    pub fn simulate(&self) -> Array2<f64> {
        let chs = channels();
        let meg = meg_sensors(&chs);
        let mut data = Array2::<f64>::zeros((chs.len(), self.n_times));
        for k in 0..self.n_times {
            let t = k as f64 / SFREQ;
            let (rot, _) = (self.pose)(t);
            for (c, (r, h)) in self.coils_dev(t).iter().zip(&self.coils_head).enumerate() {
                // Coil moments point outward and turn with the head.
                let m = rot.transpose() * h.normalize() * COIL_MOMENT;
                let s = (TAU * HPI_FREQS[c] * t + 0.4 * c as f64).sin();
                let b = meg.dipole_gain(r) * m;
                for (i, &ch) in meg.picks.iter().enumerate() {
                    data[[ch, k]] += b[i] * s;
                }
            }
            if self.interference {
                let ext = Vector3::new(
                    2e-11 * (TAU * LINE_FREQ * t).sin(),
                    1e-11 * (TAU * 7.0 * t + 1.0).sin(),
                    5e-12 * (1.0 + 0.5 * (TAU * 0.3 * t).sin()),
                );
                for (i, &ch) in meg.picks.iter().enumerate() {
                    if meg.sensors[i].kind == SensorKind::Magnetometer {
                        data[[ch, k]] += chs[ch].ez.dot(&ext);
                    }
                }
            }
        }
        data
    }

    /// Simulate and write a complete raw FIF file.
    pub fn write_fif(&self, path: &Path) {
        let chs = channels();
        let data = self.simulate();
        let (rot, trans) = (self.pose)(0.0);

        let mut w = FifWriter::default();
        w.tag(FIFF_FILE_ID, FIFFT_ID_STRUCT, &[0u8; 20]);
        w.i32(FIFF_DIR_POINTER, -1);
        w.start(FIFFB_MEAS);
        w.start(FIFFB_MEAS_INFO);
        w.i32(FIFF_NCHAN, chs.len() as i32);
        w.f32(FIFF_SFREQ, SFREQ as f32);
        w.f32(FIFF_LOWPASS, LOWPASS as f32);
        w.f32(FIFF_HIGHPASS, 0.1);
        w.f32(FIFF_LINE_FREQ, LINE_FREQ as f32);
        w.tag(FIFF_COORD_TRANS, FIFFT_COORD_TRANS_STRUCT, &coord_trans_bytes(&rot, &trans));
        for (i, ch) in chs.iter().enumerate() {
            w.tag(FIFF_CH_INFO, FIFFT_CH_INFO_STRUCT, &ch_info_bytes(i, ch));
        }
        w.start(FIFFB_ISOTRAK);
        let order = self.dig_order.unwrap_or([1, 2, 3, 4]);
        for (r, ident) in self.coils_head.iter().zip(order) {
            w.tag(FIFF_DIG_POINT, FIFFT_DIG_POINT_STRUCT, &dig_bytes(FIFFV_POINT_HPI, ident, r));
        }
        w.tag(FIFF_DIG_POINT, FIFFT_DIG_POINT_STRUCT, &dig_bytes(FIFFV_POINT_CARDINAL, 1, &Vector3::new(-0.08, 0.0, 0.0)));
        w.end(FIFFB_ISOTRAK);
        w.start(FIFFB_HPI_MEAS);
        w.i32(FIFF_HPI_NCOIL, HPI_FREQS.len() as i32);
        for f in HPI_FREQS {
            w.start(FIFFB_HPI_COIL);
            w.f32(FIFF_HPI_COIL_FREQ, f as f32);
            w.end(FIFFB_HPI_COIL);
        }
        w.end(FIFFB_HPI_MEAS);
        if let Some(order) = self.dig_order {
            w.start(FIFFB_HPI_RESULT);
            let payload: Vec<u8> = order.iter().flat_map(|k| k.to_be_bytes()).collect();
            w.tag(FIFF_HPI_DIGITIZATION_ORDER, FIFFT_INT, &payload);
            w.end(FIFFB_HPI_RESULT);
        }
        w.end(FIFFB_MEAS_INFO);

        w.start(FIFFB_RAW_DATA);
        w.i32(FIFF_FIRST_SAMPLE, self.first_samp as i32);
        for start in (0..self.n_times).step_by(1000) {
            let end = (start + 1000).min(self.n_times);
            let mut payload = Vec::with_capacity((end - start) * chs.len() * 4);
            for k in start..end {
                for c in 0..chs.len() {
                    payload.extend_from_slice(&(data[[c, k]] as f32).to_be_bytes());
                }
            }
            w.tag(FIFF_DATA_BUFFER, FIFFT_FLOAT, &payload);
        }
        w.end(FIFFB_RAW_DATA);
        w.end(FIFFB_MEAS);
        std::fs::write(path, w.finish()).unwrap();
    }
}

// ── FIF writer ────────────────────────────────────────────────────────────

/// Sequential tag chain; the last tag terminates it.
#[derive(Default)]
pub struct FifWriter {
    buf:  Vec<u8>,
    last: usize,
}

impl FifWriter {
    pub fn tag(&mut self, kind: i32, ftype: u32, payload: &[u8]) {
        self.last = self.buf.len();
        self.buf.extend_from_slice(&kind.to_be_bytes());
        self.buf.extend_from_slice(&ftype.to_be_bytes());
        self.buf.extend_from_slice(&(payload.len() as i32).to_be_bytes());
        self.buf.extend_from_slice(&FIFFV_NEXT_SEQ.to_be_bytes());
        self.buf.extend_from_slice(payload);
    }

    pub fn i32(&mut self, kind: i32, v: i32) {
        self.tag(kind, FIFFT_INT, &v.to_be_bytes());
    }

    pub fn f32(&mut self, kind: i32, v: f32) {
        self.tag(kind, FIFFT_FLOAT, &v.to_be_bytes());
    }

    pub fn start(&mut self, block: i32) {
        self.i32(FIFF_BLOCK_START, block);
    }

    pub fn end(&mut self, block: i32) {
        self.i32(FIFF_BLOCK_END, block);
    }

    pub fn finish(mut self) -> Vec<u8> {
        let at = self.last + 12;
        self.buf[at..at + 4].copy_from_slice(&FIFFV_NEXT_NONE.to_be_bytes());
        self.buf
    }
}

fn push_f32s(out: &mut Vec<u8>, vals: impl IntoIterator<Item = f64>) {
    for v in vals {
        out.extend_from_slice(&(v as f32).to_be_bytes());
    }
}

fn ch_info_bytes(idx: usize, ch: &SimChannel) -> Vec<u8> {
    let mut out = Vec::with_capacity(96);
    out.extend_from_slice(&(idx as i32 + 1).to_be_bytes());
    out.extend_from_slice(&(idx as i32 + 1).to_be_bytes());
    out.extend_from_slice(&ch.kind.to_be_bytes());
    push_f32s(&mut out, [1.0, 1.0]);
    out.extend_from_slice(&ch.coil_type.to_be_bytes());
    for v in [ch.origin, ch.ex, ch.ey, ch.ez] {
        push_f32s(&mut out, v.iter().copied());
    }
    let unit: i32 = if is_planar_gradiometer(ch.coil_type) { 201 } else { 112 };
    out.extend_from_slice(&unit.to_be_bytes());
    out.extend_from_slice(&0_i32.to_be_bytes());
    let mut name = [0u8; 16];
    name[..ch.name.len()].copy_from_slice(ch.name.as_bytes());
    out.extend_from_slice(&name);
    out
}

fn coord_trans_bytes(rot: &Matrix3<f64>, trans: &Vector3<f64>) -> Vec<u8> {
    let mut out = Vec::with_capacity(104);
    out.extend_from_slice(&FIFFV_COORD_DEVICE.to_be_bytes());
    out.extend_from_slice(&FIFFV_COORD_HEAD.to_be_bytes());
    let row_major = |m: &Matrix3<f64>| (0..9).map(move |i| m[(i / 3, i % 3)]).collect::<Vec<_>>();
    push_f32s(&mut out, row_major(rot));
    push_f32s(&mut out, trans.iter().copied());
    let inv = rot.transpose();
    push_f32s(&mut out, row_major(&inv));
    push_f32s(&mut out, (-(inv * trans)).iter().copied());
    out
}

fn dig_bytes(kind: i32, ident: i32, r: &Vector3<f64>) -> Vec<u8> {
    let mut out = Vec::with_capacity(20);
    out.extend_from_slice(&kind.to_be_bytes());
    out.extend_from_slice(&ident.to_be_bytes());
    push_f32s(&mut out, r.iter().copied());
    out
}
