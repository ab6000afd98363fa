//! Sliding-window cHPI amplitude estimation.
//!
//! # Algorithm
//! For every window of `round(t_window·sfreq)` samples, centred every
//! `round(t_step_min·sfreq)` samples:
//!
//! 1. Least-squares fit of each good MEG channel to a model with a sine and
//!    cosine at every coil frequency, a sine and cosine at every power-line
//!    harmonic up to the lowpass, a constant and a linear drift.  The model
//!    pseudo-inverse is computed once.
//! 2. Whiten the fitted coefficients with ad-hoc sensor noise and project
//!    out the external-interference basis.
//! 3. For each coil, the rank-1 SVD of its `[n_sensors, 2]` sine/cosine block
//!    gives the topography `u₀·s₀` (the in-phase spatial pattern).
//!
//! Data are read from disk in chunks, so memory stays bounded for long
//! recordings.
use std::f64::consts::TAU;
use anyhow::{anyhow, bail, Context, Result};
use nalgebra::{DMatrix, DVector};
use ndarray::{s, Array2, ArrayView2};

use crate::fiff::{MeasInfo, RawFif};
use super::external::{external_basis, project_out};
use super::forward::MegSensors;
use super::AmplitudeParams;

/// Samples read from disk per chunk, in seconds of data.
const CHUNK_SECS: f64 = 30.0;

/// Per-window coil topographies.
#[derive(Debug, Clone)]
pub struct ChpiAmplitudes {
    /// Window centres in seconds since acquisition start (`first_samp`
    /// included).
    pub times:     Vec<f64>,
    /// Coil frequencies, coil order.
    pub freqs:     Vec<f64>,
    /// One `[n_coils, n_sensors]` matrix per window: whitened, projected
    /// topographies.
    pub slopes:    Vec<DMatrix<f64>>,
    pub sensors:   MegSensors,
    /// Diagonal whitener applied to the topographies.
    pub whitener:  DVector<f64>,
    /// Orthonormal external basis projected out of the topographies.
    pub ext_basis: DMatrix<f64>,
}

impl ChpiAmplitudes {
    pub fn n_coils(&self) -> usize {
        self.freqs.len()
    }
}

/// Precomputed per-recording state shared by all windows.
struct WindowFitter {
    sensors:   MegSensors,
    whitener:  DVector<f64>,
    ext_basis: DMatrix<f64>,
    /// Transposed model pseudo-inverse, `[n_window, n_model]`.
    pinv_t:    DMatrix<f64>,
    n_window:  usize,
    n_step:    usize,
    freqs:     Vec<f64>,
}

impl WindowFitter {
    fn new(info: &MeasInfo, params: &AmplitudeParams) -> Result<Self> {
        let sfreq = info.sfreq;
        let nyquist = sfreq / 2.0;
        let freqs = info.hpi_freqs.clone();
        if freqs.is_empty() {
            bail!("recording has no HPI coil frequencies (was cHPI active?)");
        }
        if let Some(f) = freqs.iter().find(|&&f| !(f > 0.0 && f < nyquist)) {
            bail!("HPI frequency {f} Hz outside (0, {nyquist}) Hz");
        }
        if let Some(lp) = info.lowpass {
            for f in freqs.iter().filter(|&&f| f > lp) {
                tracing::warn!(freq = f, lowpass = lp, "HPI frequency above the recording lowpass");
            }
        }

        let n_window = (params.t_window * sfreq).round() as usize;
        let n_step = ((params.t_step_min * sfreq).round() as usize).max(1);
        let line = line_harmonics(info);
        let n_model = 2 * (freqs.len() + line.len()) + 2;
        if n_window <= n_model {
            bail!(
                "t_window of {} s gives {n_window} samples, need more than {n_model} model terms",
                params.t_window
            );
        }

        let half = (n_window / 2) as f64;
        let model = DMatrix::from_fn(n_window, n_model, |k, j| {
            let t = (k as f64 - half) / sfreq;
            let n_sin = freqs.len() + line.len();
            if j < 2 * n_sin {
                let f = if j / 2 < freqs.len() { freqs[j / 2] } else { line[j / 2 - freqs.len()] };
                let phase = TAU * f * t;
                if j % 2 == 0 { phase.sin() } else { phase.cos() }
            } else if j == 2 * n_sin {
                1.0
            } else {
                t
            }
        });
        let pinv_t = model
            .pseudo_inverse(1e-12)
            .map_err(|e| anyhow!("cHPI model pseudo-inverse: {e}"))?
            .transpose();

        let sensors = MegSensors::from_info(info)?;
        let whitener = sensors.whitener();
        let ext_basis = external_basis(&sensors, &whitener, params.ext_order)?;

        tracing::info!(
            n_coils = freqs.len(),
            n_sensors = sensors.len(),
            n_line = line.len(),
            n_window,
            n_step,
            ext_rank = ext_basis.ncols(),
            "cHPI amplitude fitting set up"
        );
        Ok(WindowFitter { sensors, whitener, ext_basis, pinv_t, n_window, n_step, freqs })
    }

    /// Topographies of one window, `window` holding every channel.
    fn fit(&self, window: ArrayView2<f64>) -> Result<DMatrix<f64>> {
        let picks = &self.sensors.picks;
        let d = DMatrix::from_fn(picks.len(), self.n_window, |i, k| window[[picks[i], k]]);
        let mut coefs = d * &self.pinv_t;
        for (mut row, w) in coefs.row_iter_mut().zip(self.whitener.iter()) {
            row *= *w;
        }
        let coefs = project_out(&self.ext_basis, &coefs);

        let mut slopes = DMatrix::zeros(self.freqs.len(), picks.len());
        for c in 0..self.freqs.len() {
            let svd = coefs.columns(2 * c, 2).into_owned().svd(true, false);
            let u = svd.u.ok_or_else(|| anyhow!("SVD of coil {c} amplitudes failed"))?;
            let (imax, s0) = svd.singular_values.argmax();
            slopes.row_mut(c).copy_from(&(u.column(imax) * s0).transpose());
        }
        Ok(slopes)
    }

    /// Window start offsets (relative to column 0) fitting in `n_samples`.
    fn window_starts(&self, n_samples: usize) -> impl Iterator<Item = usize> {
        let last = n_samples.checked_sub(self.n_window);
        (0..).step_by(self.n_step).take_while(move |&s| last.is_some_and(|l| s <= l))
    }

    fn center_time(&self, first_samp: u64, start: usize, sfreq: f64) -> f64 {
        (first_samp + (start + self.n_window / 2) as u64) as f64 / sfreq
    }

    fn finish(self, times: Vec<f64>, slopes: Vec<DMatrix<f64>>) -> ChpiAmplitudes {
        ChpiAmplitudes {
            times,
            freqs: self.freqs,
            slopes,
            sensors: self.sensors,
            whitener: self.whitener,
            ext_basis: self.ext_basis,
        }
    }
}

/// Power-line harmonics to model: multiples of the line frequency up to the
/// lowpass, strictly below Nyquist.
fn line_harmonics(info: &MeasInfo) -> Vec<f64> {
    let Some(line) = info.line_freq.filter(|f| *f > 0.0) else {
        tracing::info!("no line frequency in recording, line harmonics not modelled");
        return Vec::new();
    };
    let nyquist = info.sfreq / 2.0;
    let top = info.lowpass.map_or(nyquist, |lp| lp.min(nyquist));
    (1..)
        .map(|h| h as f64 * line)
        .take_while(|&f| f <= top && f < nyquist)
        .collect()
}

/// Estimate cHPI topographies over `[tmin, tmax]` of an opened recording.
pub fn compute_chpi_amplitudes(raw: &RawFif, params: &AmplitudeParams) -> Result<ChpiAmplitudes> {
    let info = &raw.info;
    let sfreq = info.sfreq;
    let n_times = raw.n_times();
    let start = (params.tmin * sfreq).round() as usize;
    let end = params
        .tmax
        .map_or(n_times, |t| ((t * sfreq).round() as usize + 1).min(n_times));
    if start >= end {
        bail!(
            "tmin = {} s lies beyond the end of the recording ({:.3} s)",
            params.tmin,
            raw.duration_secs()
        );
    }

    let fitter = WindowFitter::new(info, params)?;
    let starts: Vec<usize> = fitter.window_starts(end - start).map(|s| s + start).collect();
    if starts.is_empty() {
        bail!(
            "analysed span of {} samples is shorter than one window ({} samples)",
            end - start,
            fitter.n_window
        );
    }

    let chunk_len = ((CHUNK_SECS * sfreq) as usize).max(fitter.n_window);
    let mut chunk: Option<(usize, Array2<f64>)> = None;
    let mut times = Vec::with_capacity(starts.len());
    let mut slopes = Vec::with_capacity(starts.len());
    for ws in starts {
        let we = ws + fitter.n_window;
        let (cs, data) = match chunk.take() {
            Some((cs, d)) if cs <= ws && we <= cs + d.ncols() => (cs, d),
            _ => {
                let ce = (ws + chunk_len).min(end);
                let d = raw
                    .read_slice(ws, ce)
                    .with_context(|| format!("reading samples {ws}..{ce}"))?;
                (ws, d)
            }
        };
        slopes.push(fitter.fit(data.slice(s![.., ws - cs..we - cs]))?);
        times.push(fitter.center_time(raw.first_samp, ws, sfreq));
        chunk = Some((cs, data));
    }

    tracing::info!(n_windows = times.len(), "cHPI amplitudes computed");
    Ok(fitter.finish(times, slopes))
}

/// Same as [`compute_chpi_amplitudes`] on in-memory data `[n_chan, n_times]`
/// whose first column is acquisition sample `first_samp`.  `tmin`/`tmax` are
/// ignored; every window that fits in `data` is used.
pub fn compute_chpi_amplitudes_from_data(
    info: &MeasInfo,
    data: &Array2<f64>,
    first_samp: u64,
    params: &AmplitudeParams,
) -> Result<ChpiAmplitudes> {
    if data.nrows() != info.n_chan {
        bail!("data has {} rows, info lists {} channels", data.nrows(), info.n_chan);
    }
    let fitter = WindowFitter::new(info, params)?;
    let mut times = Vec::new();
    let mut slopes = Vec::new();
    for ws in fitter.window_starts(data.ncols()) {
        slopes.push(fitter.fit(data.slice(s![.., ws..ws + fitter.n_window]))?);
        times.push(fitter.center_time(first_samp, ws, info.sfreq));
    }
    if times.is_empty() {
        bail!("{} samples is shorter than one window ({} samples)", data.ncols(), fitter.n_window);
    }
    Ok(fitter.finish(times, slopes))
}
