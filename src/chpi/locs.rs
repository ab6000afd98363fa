//! HPI coil localisation by magnetic-dipole fitting.
//!
//! # Algorithm
//! Coil seeds start at the digitized HPI points mapped into the device
//! frame.  Walking the amplitude windows in time order, a window is fitted
//! when it is the first one, when `t_step_max` has passed since the last
//! fit, or when any coil topography has decorrelated from the last fitted
//! one (`|cos| < 0.98`).  Every coil of a fitted window gets a
//! Levenberg–Marquardt search over position; the moment is linear and
//! solved in closed form inside each residual evaluation.
//!
//! A coil is seeded from its previous fit when that fit was good
//! (gof ≥ 0.98) and from the reference position otherwise.  With
//! `adjust_dig` the reference becomes the first fitted position.
use anyhow::{anyhow, bail, Result};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn, Vector3};

use crate::fiff::MeasInfo;
use super::amplitudes::ChpiAmplitudes;
use super::external::project_out;
use super::forward::MegSensors;
use super::{LocParams, TooClose};

/// A coil closer than this to a sensor origin is suspicious (m).
pub const TOO_CLOSE_DIST: f64 = 0.005;
/// Topography correlation below which a window is refitted.
pub const REFIT_CORR: f64 = 0.98;
/// Previous fits at least this good seed the next one.
pub const SEED_GOF: f64 = 0.98;
/// Central-difference step for the Jacobian (m).
const FD_STEP: f64 = 1e-6;
const LM_PATIENCE: usize = 100;

/// One fitted coil.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoilFit {
    /// Position in the device frame (m).
    pub rr:     Vector3<f64>,
    /// Dipole moment (A·m²).
    pub moment: Vector3<f64>,
    /// `1 − ‖residual‖² / ‖data‖²` in whitened, projected space.
    pub gof:    f64,
}

/// Coil fits at the refit times.
#[derive(Debug, Clone, Default)]
pub struct ChpiLocs {
    /// Seconds since acquisition start.
    pub times: Vec<f64>,
    /// `fits[i][coil]` belongs to `times[i]`.
    pub fits:  Vec<Vec<CoilFit>>,
}

impl ChpiLocs {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Digitized HPI coil positions in head coordinates, checked against the
/// number of coil frequencies.
pub(crate) fn hpi_dig_head(info: &MeasInfo, n_coils: usize) -> Result<Vec<Vector3<f64>>> {
    let dig = info.hpi_dig()?;
    if dig.len() != n_coils {
        bail!(
            "recording has {} digitized HPI coils but {n_coils} HPI frequencies",
            dig.len()
        );
    }
    Ok(dig.iter().map(|d| d.r).collect())
}

fn initial_positions(info: &MeasInfo, n_coils: usize) -> Result<Vec<Vector3<f64>>> {
    let head_dev = info
        .dev_head_t
        .as_ref()
        .ok_or_else(|| anyhow!("recording has no device→head transform"))?
        .inverse();
    Ok(hpi_dig_head(info, n_coils)?.iter().map(|r| head_dev.apply(r)).collect())
}

/// Whitened, projected dipole forward model for one recording.
struct DipoleFitter<'a> {
    sensors:   &'a MegSensors,
    whitener:  &'a DVector<f64>,
    ext_basis: &'a DMatrix<f64>,
}

impl<'a> DipoleFitter<'a> {
    fn new(amps: &'a ChpiAmplitudes) -> Self {
        DipoleFitter { sensors: &amps.sensors, whitener: &amps.whitener, ext_basis: &amps.ext_basis }
    }

    fn gain(&self, rd: &Vector3<f64>) -> DMatrix<f64> {
        let mut g = self.sensors.dipole_gain(rd);
        for (mut row, w) in g.row_iter_mut().zip(self.whitener.iter()) {
            row *= *w;
        }
        project_out(self.ext_basis, &g)
    }

    /// Residual `y − A m̂` and best moment `m̂` for a dipole at `rd`.
    fn residual(&self, rd: &Vector3<f64>, y: &DVector<f64>) -> Option<(DVector<f64>, Vector3<f64>)> {
        let a = self.gain(rd);
        let svd = a.clone().svd(true, true);
        let tol = svd.singular_values.max() * 1e-12;
        let m = svd.solve(y, tol).ok()?;
        let res = y - &a * &m;
        Some((res, Vector3::new(m[0], m[1], m[2])))
    }

    fn fit(&self, y: &DVector<f64>, seed: Vector3<f64>) -> Result<CoilFit> {
        let y_norm2 = y.norm_squared();
        if y_norm2 == 0.0 {
            return Ok(CoilFit { rr: seed, moment: Vector3::zeros(), gof: 0.0 });
        }
        let problem = DipoleProblem {
            fitter: self,
            y,
            rd: DVector::from_column_slice(seed.as_slice()),
        };
        let (problem, report) = LevenbergMarquardt::new()
            .with_ftol(1e-12)
            .with_xtol(1e-12)
            .with_patience(LM_PATIENCE)
            .minimize(problem);
        if !report.termination.was_successful() {
            tracing::debug!(termination = ?report.termination, "dipole fit stopped early");
        }
        let rr = Vector3::new(problem.rd[0], problem.rd[1], problem.rd[2]);
        let (res, moment) = self
            .residual(&rr, y)
            .ok_or_else(|| anyhow!("dipole least-squares solve failed"))?;
        Ok(CoilFit { rr, moment, gof: 1.0 - res.norm_squared() / y_norm2 })
    }
}

struct DipoleProblem<'a> {
    fitter: &'a DipoleFitter<'a>,
    y:      &'a DVector<f64>,
    rd:     DVector<f64>,
}

impl DipoleProblem<'_> {
    fn position(x: &DVector<f64>) -> Vector3<f64> {
        Vector3::new(x[0], x[1], x[2])
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for DipoleProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.rd.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.rd.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.fitter.residual(&Self::position(&self.rd), self.y)?.0)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let r0 = Self::position(&self.rd);
        let mut jac = DMatrix::zeros(self.y.len(), 3);
        for k in 0..3 {
            let mut step = Vector3::zeros();
            step[k] = FD_STEP;
            let (plus, _) = self.fitter.residual(&(r0 + step), self.y)?;
            let (minus, _) = self.fitter.residual(&(r0 - step), self.y)?;
            jac.set_column(k, &((plus - minus) / (2.0 * FD_STEP)));
        }
        Some(jac)
    }
}

/// `|cos|` of the angle between two topographies; the SVD sign is arbitrary.
fn abs_corr(a: &DVector<f64>, b: &DVector<f64>) -> f64 {
    let denom = a.norm() * b.norm();
    if denom == 0.0 {
        return if a.norm() == b.norm() { 1.0 } else { 0.0 };
    }
    a.dot(b).abs() / denom
}

fn check_distance(
    sensors: &MegSensors,
    fit: &CoilFit,
    coil: usize,
    time: f64,
    policy: TooClose,
) -> Result<()> {
    let dist = sensors.min_distance(&fit.rr);
    if dist >= TOO_CLOSE_DIST {
        return Ok(());
    }
    let msg = format!(
        "HPI coil {} fitted {:.1} mm from the nearest MEG sensor at t = {time:.3} s (limit {:.1} mm)",
        coil + 1,
        dist * 1e3,
        TOO_CLOSE_DIST * 1e3
    );
    match policy {
        TooClose::Raise => bail!(msg),
        TooClose::Warning => tracing::warn!("{msg}"),
        TooClose::Info => tracing::info!("{msg}"),
    }
    Ok(())
}

/// Fit coil positions to cHPI amplitudes.
pub fn compute_chpi_locs(info: &MeasInfo, amps: &ChpiAmplitudes, params: &LocParams) -> Result<ChpiLocs> {
    let n_coils = amps.n_coils();
    let mut reference = initial_positions(info, n_coils)?;
    let fitter = DipoleFitter::new(amps);

    let mut out = ChpiLocs::default();
    let mut last_slopes: Option<Vec<DVector<f64>>> = None;
    for (&t, slopes) in amps.times.iter().zip(&amps.slopes) {
        let topo: Vec<DVector<f64>> = (0..n_coils).map(|c| slopes.row(c).transpose()).collect();
        if let (Some(&lt), Some(prev)) = (out.times.last(), &last_slopes) {
            let stale = t - lt >= params.t_step_max - 1e-6;
            let moved = topo.iter().zip(prev).any(|(a, b)| abs_corr(a, b) < REFIT_CORR);
            if !stale && !moved {
                continue;
            }
        }

        let prev_fits = out.fits.last();
        let mut fits = Vec::with_capacity(n_coils);
        for (c, y) in topo.iter().enumerate() {
            let seed = match prev_fits.map(|f| f[c]) {
                Some(f) if f.gof >= SEED_GOF => f.rr,
                _ => reference[c],
            };
            let fit = fitter.fit(y, seed)?;
            check_distance(fitter.sensors, &fit, c, t, params.too_close)?;
            fits.push(fit);
        }
        tracing::debug!(
            t,
            gof = ?fits.iter().map(|f| (f.gof * 1e3).round() / 1e3).collect::<Vec<_>>(),
            "coil fit"
        );

        if params.adjust_dig && out.is_empty() {
            reference = fits.iter().map(|f| f.rr).collect();
        }
        out.times.push(t);
        out.fits.push(fits);
        last_slopes = Some(topo);
    }

    tracing::info!(n_fits = out.len(), n_windows = amps.times.len(), "HPI coil locations computed");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chpi::external::external_basis;
    use crate::chpi::forward::{Sensor, SensorKind};
    use approx::assert_abs_diff_eq;

    fn helmet() -> MegSensors {
        let mut sensors = Vec::new();
        for ring in 0..5 {
            let theta = 0.15 + 0.3 * ring as f64;
            let n_phi = 6 + 4 * ring;
            for k in 0..n_phi {
                let phi = k as f64 * std::f64::consts::TAU / n_phi as f64;
                let n = Vector3::new(theta.sin() * phi.cos(), theta.sin() * phi.sin(), theta.cos());
                let ex = Vector3::z().cross(&n).try_normalize(1e-9).unwrap_or(Vector3::x());
                let origin = n * 0.12;
                sensors.push(Sensor::new(SensorKind::Magnetometer, origin, ex, n));
                sensors.push(Sensor::new(SensorKind::PlanarGradiometer, origin, ex, n));
            }
        }
        let picks = (0..sensors.len()).collect();
        MegSensors { picks, sensors }
    }

    #[test]
    fn recovers_dipole_position_from_noiseless_field() {
        let sensors = helmet();
        let whitener = sensors.whitener();
        let basis = external_basis(&sensors, &whitener, 1).unwrap();
        let fitter = DipoleFitter { sensors: &sensors, whitener: &whitener, ext_basis: &basis };

        let truth = Vector3::new(0.03, -0.02, 0.07);
        let m = Vector3::new(2e-8, -1e-8, 3e-8);
        let y = fitter.gain(&truth) * m;
        let fit = fitter.fit(&y, truth + Vector3::new(0.008, 0.006, -0.005)).unwrap();
        assert_abs_diff_eq!((fit.rr - truth).norm(), 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(fit.gof, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!((fit.moment - m).norm() / m.norm(), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn silent_coil_keeps_seed_with_zero_gof() {
        let sensors = helmet();
        let whitener = sensors.whitener();
        let basis = DMatrix::zeros(sensors.len(), 0);
        let fitter = DipoleFitter { sensors: &sensors, whitener: &whitener, ext_basis: &basis };
        let seed = Vector3::new(0.0, 0.0, 0.05);
        let fit = fitter.fit(&DVector::zeros(sensors.len()), seed).unwrap();
        assert_eq!(fit.rr, seed);
        assert_eq!(fit.gof, 0.0);
    }

    #[test]
    fn correlation_ignores_sign() {
        let a = DVector::from_vec(vec![1.0, 2.0, -1.0]);
        assert_abs_diff_eq!(abs_corr(&a, &(-&a)), 1.0, epsilon = 1e-12);
        assert_eq!(abs_corr(&DVector::zeros(3), &DVector::zeros(3)), 1.0);
        assert_eq!(abs_corr(&a, &DVector::zeros(3)), 0.0);
    }

    #[test]
    fn too_close_policy() {
        let sensors = helmet();
        let origin = sensors.sensors[0].origin;
        let fit = CoilFit { rr: origin * 0.98, moment: Vector3::zeros(), gof: 1.0 };
        assert!(check_distance(&sensors, &fit, 0, 1.0, TooClose::Raise).is_err());
        assert!(check_distance(&sensors, &fit, 0, 1.0, TooClose::Warning).is_ok());
        assert!(check_distance(&sensors, &fit, 0, 1.0, TooClose::Info).is_ok());
        let far = CoilFit { rr: Vector3::new(0.0, 0.0, 0.05), ..fit };
        assert!(check_distance(&sensors, &far, 0, 1.0, TooClose::Raise).is_ok());
    }
}
