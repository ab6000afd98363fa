//! External-interference basis.
//!
//! Fields from sources outside the helmet are smooth across the array, so a
//! low-order expansion captures most of them.  Order 1 is the three uniform
//! fields; order 2 adds the five linearly varying harmonic fields
//! (gradients of `xy`, `yz`, `xz`, `x² − y²`, `2z² − x² − y²`).  The basis
//! is built in whitened sensor space and orthonormalised, so projecting it
//! out is `y − U Uᵀ y`.
use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector, Vector3};

use super::forward::MegSensors;
use super::AmplitudeParams;

type Field = fn(&Vector3<f64>) -> Vector3<f64>;

const ORDER_1: [Field; 3] = [
    |_| Vector3::x(),
    |_| Vector3::y(),
    |_| Vector3::z(),
];

const ORDER_2: [Field; 5] = [
    |r| Vector3::new(r.y, r.x, 0.0),
    |r| Vector3::new(0.0, r.z, r.y),
    |r| Vector3::new(r.z, 0.0, r.x),
    |r| Vector3::new(2.0 * r.x, -2.0 * r.y, 0.0),
    |r| Vector3::new(-2.0 * r.x, -2.0 * r.y, 4.0 * r.z),
];

/// Relative singular-value cut-off when orthonormalising.
const RANK_TOL: f64 = 1e-10;

/// Orthonormal whitened external basis `[n_sensors, k]`; `k == 0` for
/// order 0.
pub fn external_basis(sensors: &MegSensors, whitener: &DVector<f64>, order: usize) -> Result<DMatrix<f64>> {
    if order > AmplitudeParams::MAX_EXT_ORDER {
        bail!("external basis order {order} not supported (max {})", AmplitudeParams::MAX_EXT_ORDER);
    }
    let mut fields: Vec<Field> = Vec::new();
    if order >= 1 {
        fields.extend(ORDER_1);
    }
    if order >= 2 {
        fields.extend(ORDER_2);
    }
    if fields.is_empty() {
        return Ok(DMatrix::zeros(sensors.len(), 0));
    }

    let mut s = sensors.field_gain(&fields);
    for (mut row, w) in s.row_iter_mut().zip(whitener.iter()) {
        row *= *w;
    }
    // Column scales differ by orders of magnitude between orders.
    for mut col in s.column_iter_mut() {
        let n = col.norm();
        if n > 0.0 {
            col /= n;
        }
    }

    let svd = s.svd(true, false);
    let u = svd.u.ok_or_else(|| anyhow::anyhow!("SVD of external basis failed"))?;
    let s_max = svd.singular_values.max();
    let keep: Vec<usize> = svd
        .singular_values
        .iter()
        .enumerate()
        .filter(|(_, &v)| v > RANK_TOL * s_max)
        .map(|(i, _)| i)
        .collect();
    Ok(u.select_columns(&keep))
}

/// `y − U (Uᵀ y)` applied to every column of `m`.
pub fn project_out(basis: &DMatrix<f64>, m: &DMatrix<f64>) -> DMatrix<f64> {
    if basis.ncols() == 0 {
        return m.clone();
    }
    m - basis * (basis.transpose() * m)
}
