//! MEG sensor geometry and the free-space magnetic-dipole forward model.
//!
//! HPI coils sit a few centimetres from the sensors and are driven with a
//! known current, so they are modelled as magnetic dipoles in free space:
//!
//! ```text
//! B(r) = μ0/4π · (3 (m·û) û − m) / |R|³,   R = r − r_d,  û = R / |R|
//! ```
//!
//! Each sensor integrates `n · B` over a handful of points.  Magnetometers
//! use one point at the coil origin; planar gradiometers use two points
//! ±8.4 mm along the coil x axis with weights ±1/baseline, giving T/m.
use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector, RowVector3, Vector3};

use crate::fiff::constants::is_planar_gradiometer;
use crate::fiff::MeasInfo;

/// μ0 / 4π in T·m/A.
pub const MU0_OVER_4PI: f64 = 1e-7;
/// Vectorview planar gradiometer baseline in metres.
pub const GRAD_BASELINE: f64 = 0.0168;
/// Ad-hoc noise level of a magnetometer (T).
pub const MAG_NOISE: f64 = 20e-15;
/// Ad-hoc noise level of a planar gradiometer (T/m).
pub const GRAD_NOISE: f64 = 5e-13;
/// Distances below this are clamped to keep the field finite.
const MIN_SOURCE_DIST: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Magnetometer,
    PlanarGradiometer,
}

#[derive(Debug, Clone)]
struct IntegrationPoint {
    r: Vector3<f64>,
    n: Vector3<f64>,
    w: f64,
}

#[derive(Debug, Clone)]
pub struct Sensor {
    pub kind:   SensorKind,
    pub origin: Vector3<f64>,
    points: Vec<IntegrationPoint>,
}

impl Sensor {
    /// Build from a channel's `loc` frame (origin, ex, ey, ez).
    pub fn new(kind: SensorKind, origin: Vector3<f64>, ex: Vector3<f64>, ez: Vector3<f64>) -> Self {
        let points = match kind {
            SensorKind::Magnetometer => vec![IntegrationPoint { r: origin, n: ez, w: 1.0 }],
            SensorKind::PlanarGradiometer => {
                let half = ex * (GRAD_BASELINE / 2.0);
                let w = 1.0 / GRAD_BASELINE;
                vec![
                    IntegrationPoint { r: origin + half, n: ez, w },
                    IntegrationPoint { r: origin - half, n: ez, w: -w },
                ]
            }
        };
        Sensor { kind, origin, points }
    }

    pub fn noise(&self) -> f64 {
        match self.kind {
            SensorKind::Magnetometer => MAG_NOISE,
            SensorKind::PlanarGradiometer => GRAD_NOISE,
        }
    }

    /// Sensor reading per unit dipole moment at `rd` (row of the gain matrix).
    fn dipole_row(&self, rd: &Vector3<f64>) -> RowVector3<f64> {
        self.points.iter().fold(RowVector3::zeros(), |acc, p| {
            let big_r = p.r - rd;
            let dist = big_r.norm().max(MIN_SOURCE_DIST);
            let u = big_r / dist;
            let scale = MU0_OVER_4PI * p.w / dist.powi(3);
            acc + (u.transpose() * (3.0 * p.n.dot(&u)) - p.n.transpose()) * scale
        })
    }

    /// Sensor reading of an arbitrary field `f`.
    fn field_reading<F: Fn(&Vector3<f64>) -> Vector3<f64>>(&self, f: F) -> f64 {
        self.points.iter().map(|p| p.w * p.n.dot(&f(&p.r))).sum()
    }
}

/// The good MEG channels of a recording, in pick order.
#[derive(Debug, Clone)]
pub struct MegSensors {
    /// Channel indices into `MeasInfo::chs`.
    pub picks:   Vec<usize>,
    pub sensors: Vec<Sensor>,
}

impl MegSensors {
    pub fn from_info(info: &MeasInfo) -> Result<Self> {
        let picks = info.meg_picks();
        if picks.is_empty() {
            bail!("recording has no good MEG channels");
        }
        let sensors = picks
            .iter()
            .map(|&i| {
                let ch = &info.chs[i];
                let kind = if is_planar_gradiometer(ch.coil_type) {
                    SensorKind::PlanarGradiometer
                } else {
                    SensorKind::Magnetometer
                };
                Sensor::new(kind, ch.origin(), ch.axis(0), ch.axis(2))
            })
            .collect();
        Ok(MegSensors { picks, sensors })
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Diagonal of the ad-hoc whitener, `1 / noise` per sensor.
    pub fn whitener(&self) -> DVector<f64> {
        DVector::from_iterator(self.len(), self.sensors.iter().map(|s| 1.0 / s.noise()))
    }

    /// Gain matrix `[n_sensors, 3]` of a dipole at `rd` (device frame).
    pub fn dipole_gain(&self, rd: &Vector3<f64>) -> DMatrix<f64> {
        let mut g = DMatrix::zeros(self.len(), 3);
        for (i, s) in self.sensors.iter().enumerate() {
            g.row_mut(i).copy_from(&s.dipole_row(rd));
        }
        g
    }

    /// Readings of a set of fields, one column per field.
    pub fn field_gain<F: Fn(&Vector3<f64>) -> Vector3<f64>>(&self, fields: &[F]) -> DMatrix<f64> {
        DMatrix::from_fn(self.len(), fields.len(), |i, j| {
            self.sensors[i].field_reading(&fields[j])
        })
    }

    /// Distance from `r` to the nearest sensor origin.
    pub fn min_distance(&self, r: &Vector3<f64>) -> f64 {
        self.sensors
            .iter()
            .map(|s| (s.origin - r).norm())
            .fold(f64::INFINITY, f64::min)
    }
}
