//! Rigid point-set registration and rotation quaternions.
use anyhow::{anyhow, bail, Result};
use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

/// Least-squares rigid transform `head ≈ rot · dev + trans`.
#[derive(Debug, Clone, PartialEq)]
pub struct RigidFit {
    pub rot:   Matrix3<f64>,
    pub trans: Vector3<f64>,
    /// `1 − Σ residual² / Σ |head − centroid|²`.
    pub g:     f64,
}

impl RigidFit {
    #[inline]
    pub fn apply(&self, r: &Vector3<f64>) -> Vector3<f64> {
        self.rot * r + self.trans
    }
}

fn centroid(pts: &[Vector3<f64>]) -> Vector3<f64> {
    pts.iter().sum::<Vector3<f64>>() / pts.len() as f64
}

/// Kabsch/Procrustes fit of `dev` onto `head` (paired, at least 3 points).
pub fn fit_rigid(dev: &[Vector3<f64>], head: &[Vector3<f64>]) -> Result<RigidFit> {
    if dev.len() != head.len() {
        bail!("rigid fit needs paired points, got {} and {}", dev.len(), head.len());
    }
    if dev.len() < 3 {
        bail!("rigid fit needs at least 3 points, got {}", dev.len());
    }
    let dc = centroid(dev);
    let hc = centroid(head);
    let h = dev
        .iter()
        .zip(head)
        .fold(Matrix3::zeros(), |acc, (d, t)| acc + (d - dc) * (t - hc).transpose());

    let svd = h.svd(true, true);
    let u = svd.u.ok_or_else(|| anyhow!("SVD failed in rigid fit"))?;
    let v = svd.v_t.ok_or_else(|| anyhow!("SVD failed in rigid fit"))?.transpose();
    let d = (v * u.transpose()).determinant().signum();
    let rot = v * Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, d)) * u.transpose();
    let trans = hc - rot * dc;

    let resid: f64 = dev.iter().zip(head).map(|(d, t)| (rot * d + trans - t).norm_squared()).sum();
    let spread: f64 = head.iter().map(|t| (t - hc).norm_squared()).sum();
    let g = if spread > 0.0 { 1.0 - resid / spread } else { 0.0 };
    Ok(RigidFit { rot, trans, g })
}

/// Vector part of the unit quaternion of `rot`, sign chosen so the scalar
/// part is non-negative.
pub fn rot_to_quat(rot: &Matrix3<f64>) -> [f64; 3] {
    let q = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(*rot));
    let s = if q.w < 0.0 { -1.0 } else { 1.0 };
    [s * q.i, s * q.j, s * q.k]
}

/// Inverse of [`rot_to_quat`].
pub fn quat_to_rot(q: [f64; 3]) -> Matrix3<f64> {
    let [b, c, d] = q;
    let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
    let uq = UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(a, b, c, d));
    uq.to_rotation_matrix().into_inner()
}
