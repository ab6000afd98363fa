//! Head position from fitted coil locations.
//!
//! # Algorithm
//! For each coil-fit time:
//!
//! 1. Coils with `gof ≥ gof_limit` are registered onto the head-frame
//!    reference positions with a rigid fit.  While more than three coils
//!    remain, single-coil drops are tried recursively and the subset with
//!    the best `g` wins.
//! 2. Per-coil errors are `|T(dev) − ref|`.  A row needs at least three coils
//!    with `gof ≥ gof_limit` and error `< dist_limit`, otherwise it is
//!    skipped with a warning.
//! 3. The row carries the quaternion and translation of `T`, its `g`, the
//!    mean error of the coils used, and the speed of the translation since
//!    the previous accepted row.
//!
//! The reference is the digitization, or with `adjust_dig` the first
//! accepted fit mapped into the head frame.
use anyhow::Result;
use nalgebra::Vector3;

use crate::fiff::MeasInfo;
use crate::pos::{HeadPositions, PosRow};
use super::locs::{hpi_dig_head, ChpiLocs, CoilFit};
use super::rigid::{fit_rigid, rot_to_quat, RigidFit};
use super::HeadPosFitParams;

const MIN_COILS: usize = 3;

/// Rigid fit over `idx`.  While more than three coils remain, every
/// single-coil drop is tried recursively; the subset with the best `g` wins.
fn best_subset_fit(
    dev: &[Vector3<f64>],
    head: &[Vector3<f64>],
    idx: &[usize],
) -> Result<(RigidFit, Vec<usize>)> {
    let d: Vec<_> = idx.iter().map(|&i| dev[i]).collect();
    let h: Vec<_> = idx.iter().map(|&i| head[i]).collect();
    let mut best = (fit_rigid(&d, &h)?, idx.to_vec());
    if idx.len() > MIN_COILS {
        for drop in 0..idx.len() {
            let sub: Vec<usize> = idx.iter().enumerate().filter(|&(k, _)| k != drop).map(|(_, &i)| i).collect();
            let cand = best_subset_fit(dev, head, &sub)?;
            if cand.0.g > best.0.g {
                best = cand;
            }
        }
    }
    Ok(best)
}

/// Turn coil fits into head positions.
pub fn compute_head_pos(info: &MeasInfo, locs: &ChpiLocs, params: &HeadPosFitParams) -> Result<HeadPositions> {
    let n_coils = locs.fits.first().map_or(info.hpi_freqs.len(), Vec::len);
    let mut reference = hpi_dig_head(info, n_coils)?;

    let mut rows = Vec::with_capacity(locs.len());
    let mut prev: Option<(f64, Vector3<f64>)> = None;
    for (&t, fits) in locs.times.iter().zip(&locs.fits) {
        let dev: Vec<Vector3<f64>> = fits.iter().map(|f| f.rr).collect();
        let good: Vec<usize> = (0..n_coils).filter(|&c| fits[c].gof >= params.gof_limit).collect();
        if good.len() < MIN_COILS {
            warn_skip(t, fits, "too few coils with good fits");
            continue;
        }

        let (fit, used) = best_subset_fit(&dev, &reference, &good)?;
        let errs: Vec<f64> = dev
            .iter()
            .zip(&reference)
            .map(|(d, r)| (fit.apply(d) - r).norm())
            .collect();
        let n_ok = good.iter().filter(|&&c| errs[c] < params.dist_limit).count();
        if n_ok < MIN_COILS {
            warn_skip(t, fits, &format!(
                "{n_ok} coils within {:.1} mm, errors {:?} mm",
                params.dist_limit * 1e3,
                errs.iter().map(|e| (e * 1e4).round() / 10.0).collect::<Vec<_>>()
            ));
            continue;
        }

        let err = used.iter().map(|&c| errs[c]).sum::<f64>() / used.len() as f64;
        let vel = match prev {
            Some((pt, ptrans)) if t > pt => (fit.trans - ptrans).norm() / (t - pt),
            _ => 0.0,
        };
        rows.push(PosRow {
            time: t,
            quat: rot_to_quat(&fit.rot),
            trans: [fit.trans.x, fit.trans.y, fit.trans.z],
            gof: fit.g,
            err,
            vel,
        });

        if params.adjust_dig && prev.is_none() {
            reference = dev.iter().map(|d| fit.apply(d)).collect();
        }
        prev = Some((t, fit.trans));
    }

    if rows.is_empty() && !locs.is_empty() {
        tracing::warn!("no head position passed the goodness-of-fit and distance limits");
    }
    tracing::info!(n_positions = rows.len(), n_fits = locs.len(), "head positions computed");
    Ok(HeadPositions { rows })
}

fn warn_skip(t: f64, fits: &[CoilFit], why: &str) {
    tracing::warn!(
        t,
        gof = ?fits.iter().map(|f| (f.gof * 1e3).round() / 1e3).collect::<Vec<_>>(),
        "skipping head position: {why}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chpi::rigid::quat_to_rot;
    use crate::fiff::constants::FIFFV_POINT_HPI;
    use crate::fiff::DigPoint;
    use approx::assert_abs_diff_eq;
    use nalgebra::{Matrix3, Rotation3};

    fn head_dig() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(0.07, 0.01, 0.02),
            Vector3::new(-0.07, 0.01, 0.02),
            Vector3::new(0.03, 0.08, 0.05),
            Vector3::new(-0.03, 0.08, 0.05),
        ]
    }

    fn info() -> MeasInfo {
        let dig = head_dig()
            .into_iter()
            .enumerate()
            .map(|(i, r)| DigPoint { kind: FIFFV_POINT_HPI, ident: i as i32 + 1, r })
            .collect();
        MeasInfo {
            n_chan: 0, sfreq: 1000.0, lowpass: None, highpass: None, line_freq: None,
            chs: vec![], bad_ch_names: vec![], experimenter: None, description: None,
            dig, dev_head_t: None, hpi_freqs: vec![83.0, 143.0, 203.0, 263.0], hpi_dig_order: None,
        }
    }

    /// Coil fits for a head whose device→head transform is (`rot`, `trans`).
    fn fits_for(rot: &Matrix3<f64>, trans: &Vector3<f64>, gof: f64) -> Vec<CoilFit> {
        head_dig()
            .iter()
            .map(|h| CoilFit { rr: rot.transpose() * (h - trans), moment: Vector3::zeros(), gof })
            .collect()
    }

    #[test]
    fn exact_fits_give_exact_rows() {
        let rot = Rotation3::from_euler_angles(0.02, -0.03, 0.1).into_inner();
        let t1 = Vector3::new(0.0, 0.01, 0.04);
        let t2 = Vector3::new(0.0, 0.012, 0.04);
        let locs = ChpiLocs {
            times: vec![10.0, 10.5],
            fits: vec![fits_for(&rot, &t1, 0.999), fits_for(&rot, &t2, 0.999)],
        };
        let pos = compute_head_pos(&info(), &locs, &HeadPosFitParams::default()).unwrap();
        assert_eq!(pos.len(), 2);
        let r0 = &pos.rows[0];
        assert_abs_diff_eq!((quat_to_rot(r0.quat) - rot).norm(), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(r0.trans[1], 0.01, epsilon = 1e-9);
        assert_abs_diff_eq!(r0.err, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(r0.gof, 1.0, epsilon = 1e-9);
        assert_eq!(r0.vel, 0.0);
        // The translation moved 2 mm in 0.5 s.
        assert_abs_diff_eq!(pos.rows[1].vel, 0.004, epsilon = 1e-9);
    }

    #[test]
    fn rotation_about_head_origin_has_zero_velocity() {
        let tr = Vector3::new(0.0, 0.01, 0.04);
        let r1 = Matrix3::identity();
        let r2 = Rotation3::from_euler_angles(0.0, 0.0, 0.1).into_inner();
        let locs = ChpiLocs {
            times: vec![3.0, 4.0],
            fits: vec![fits_for(&r1, &tr, 0.999), fits_for(&r2, &tr, 0.999)],
        };
        let pos = compute_head_pos(&info(), &locs, &HeadPosFitParams::default()).unwrap();
        assert_eq!(pos.len(), 2);
        assert_abs_diff_eq!((quat_to_rot(pos.rows[1].quat) - r2).norm(), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pos.rows[1].vel, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn bad_gof_rows_are_skipped() {
        let rot = Matrix3::identity();
        let tr = Vector3::new(0.0, 0.0, 0.04);
        let mut weak = fits_for(&rot, &tr, 0.999);
        weak[0].gof = 0.5;
        weak[1].gof = 0.5;
        let locs = ChpiLocs { times: vec![1.0, 2.0], fits: vec![weak, fits_for(&rot, &tr, 0.999)] };
        let pos = compute_head_pos(&info(), &locs, &HeadPosFitParams::default()).unwrap();
        assert_eq!(pos.len(), 1);
        assert_eq!(pos.rows[0].time, 2.0);
    }

    #[test]
    fn one_displaced_coil_is_dropped() {
        let rot = Matrix3::identity();
        let tr = Vector3::new(0.0, 0.0, 0.04);
        let mut fits = fits_for(&rot, &tr, 0.999);
        fits[2].rr += Vector3::new(0.02, 0.0, 0.0);
        let locs = ChpiLocs { times: vec![1.0], fits: vec![fits] };
        let pos = compute_head_pos(&info(), &locs, &HeadPosFitParams::default()).unwrap();
        assert_eq!(pos.len(), 1);
        assert_abs_diff_eq!(pos.rows[0].trans[2], 0.04, epsilon = 1e-9);
        assert_abs_diff_eq!(pos.rows[0].err, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn two_displaced_coils_of_five_are_dropped() {
        let mut dig = head_dig();
        dig.push(Vector3::new(0.0, -0.06, 0.07));
        let tr = Vector3::new(0.0, 0.0, 0.04);
        let mut dev: Vec<Vector3<f64>> = dig.iter().map(|h| h - tr).collect();
        dev[1] += Vector3::new(0.0, 0.015, 0.0);
        dev[3] += Vector3::new(-0.02, 0.0, 0.01);

        let (fit, used) = best_subset_fit(&dev, &dig, &[0, 1, 2, 3, 4]).unwrap();
        assert_eq!(used, vec![0, 2, 4]);
        assert_abs_diff_eq!(fit.g, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!((fit.trans - tr).norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn adjust_dig_measures_against_first_fit() {
        let rot = Matrix3::identity();
        let tr = Vector3::new(0.0, 0.0, 0.04);
        // Fitted coil geometry is stretched along x relative to the
        // digitization, so errors against it cannot vanish.
        let stretched = |t: Vector3<f64>| {
            let mut f = fits_for(&rot, &t, 0.999);
            for c in &mut f {
                c.rr.x *= 1.1;
            }
            f
        };
        let locs = ChpiLocs {
            times: vec![1.0, 2.0],
            fits: vec![stretched(tr), stretched(tr)],
        };
        let loose = HeadPosFitParams { dist_limit: 0.02, ..HeadPosFitParams::default() };
        let plain = compute_head_pos(&info(), &locs, &loose).unwrap();
        let adjusted = compute_head_pos(
            &info(),
            &locs,
            &HeadPosFitParams { adjust_dig: true, ..loose.clone() },
        )
        .unwrap();
        assert_eq!((plain.len(), adjusted.len()), (2, 2));
        assert!(plain.rows[1].err > 1e-3);
        assert_abs_diff_eq!(adjusted.rows[1].err, 0.0, epsilon = 1e-9);
    }
}
