//! MNE / MaxFilter head-position (`.pos`) files.
//!
//! ASCII table, one header line followed by one row per head position:
//!
//! ```text
//!  Time       q1       q2       q3       q4       q5       q6       g-value  error    velocity
//!     12.000  0.00312 -0.00145  0.00087  0.00041  0.01214  0.04003  0.99812  0.00112  0.00035
//! ```
//!
//! `q1..q3` are the vector part of the device→head rotation quaternion,
//! `q4..q6` the translation in metres.  Rows are written with the
//! `'% 9.3f'` / `'% 8.5f'` printf formats MNE uses, so files diff cleanly
//! against MNE output.
use std::path::Path;
use anyhow::{bail, Context, Result};

/// Header line of a `.pos` file (without newline).
pub const POS_HEADER: &str =
    " Time       q1       q2       q3       q4       q5       q6       g-value  error    velocity";

/// One estimated head position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PosRow {
    /// Seconds since the start of acquisition (includes `first_samp`).
    pub time:  f64,
    /// Vector part of the unit rotation quaternion (scalar part ≥ 0).
    pub quat:  [f64; 3],
    /// Translation in metres.
    pub trans: [f64; 3],
    /// Goodness of the rigid fit.
    pub gof:   f64,
    /// Mean coil position error in metres.
    pub err:   f64,
    /// Speed of the translation since the previous row, m/s.
    pub vel:   f64,
}

impl PosRow {
    pub fn to_array(&self) -> [f64; 10] {
        let [q1, q2, q3] = self.quat;
        let [x, y, z] = self.trans;
        [self.time, q1, q2, q3, x, y, z, self.gof, self.err, self.vel]
    }

    pub fn from_array(a: [f64; 10]) -> Self {
        PosRow {
            time:  a[0],
            quat:  [a[1], a[2], a[3]],
            trans: [a[4], a[5], a[6]],
            gof:   a[7],
            err:   a[8],
            vel:   a[9],
        }
    }
}

/// The positions array, `(n, 10)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeadPositions {
    pub rows: Vec<PosRow>,
}

impl HeadPositions {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as plain `[f64; 10]` arrays.
    pub fn to_arrays(&self) -> Vec<[f64; 10]> {
        self.rows.iter().map(PosRow::to_array).collect()
    }
}

/// printf-style `% W.Pf`: a space stands in for the plus sign.
fn fmt_space(v: f64, width: usize, prec: usize) -> String {
    let mut s = format!("{v:.prec$}");
    if !s.starts_with('-') {
        s.insert(0, ' ');
    }
    format!("{s:>width$}")
}

/// Render the whole file.
pub fn format_head_pos(pos: &HeadPositions) -> String {
    let mut out = String::with_capacity(POS_HEADER.len() + 1 + pos.len() * 92);
    out.push_str(POS_HEADER);
    out.push('\n');
    for row in &pos.rows {
        let a = row.to_array();
        out.push(' ');
        out.push_str(&fmt_space(a[0], 9, 3));
        for v in &a[1..] {
            out.push(' ');
            out.push_str(&fmt_space(*v, 8, 5));
        }
        out.push('\n');
    }
    out
}

/// Write `pos` to `path` (mirrors `mne.chpi.write_head_pos`).
pub fn write_head_pos(path: &Path, pos: &HeadPositions) -> Result<()> {
    std::fs::write(path, format_head_pos(pos))
        .with_context(|| format!("write head positions to {}", path.display()))
}

/// Parse `.pos` text; header and blank lines are skipped.
pub fn parse_head_pos(text: &str) -> Result<HeadPositions> {
    let mut rows = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("Time") {
            continue;
        }
        let vals = line
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("line {}: non-numeric field", lineno + 1))?;
        let Ok(arr) = <[f64; 10]>::try_from(vals.as_slice()) else {
            bail!("line {}: expected 10 columns, found {}", lineno + 1, vals.len());
        };
        rows.push(PosRow::from_array(arr));
    }
    Ok(HeadPositions { rows })
}

/// Read a `.pos` file (mirrors `mne.chpi.read_head_pos`).
pub fn read_head_pos(path: &Path) -> Result<HeadPositions> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))?;
    parse_head_pos(&text).with_context(|| format!("parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn row() -> PosRow {
        PosRow {
            time: 12.0,
            quat: [0.00312, -0.00145, 0.00087],
            trans: [0.00041, 0.01214, 0.04003],
            gof: 0.99812,
            err: 0.00112,
            vel: 0.00035,
        }
    }

    #[test]
    fn space_flag_formatting() {
        assert_eq!(fmt_space(12.0, 9, 3), "   12.000");
        assert_eq!(fmt_space(-0.00145, 8, 5), "-0.00145");
        assert_eq!(fmt_space(0.00312, 8, 5), " 0.00312");
        assert_eq!(fmt_space(-123.5, 9, 3), " -123.500");
    }

    #[test]
    fn rows_match_mne_layout() {
        let text = format_head_pos(&HeadPositions { rows: vec![row()] });
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(POS_HEADER));
        assert_eq!(
            lines.next(),
            Some("    12.000  0.00312 -0.00145  0.00087  0.00041  0.01214  0.04003  0.99812  0.00112  0.00035")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn parse_reads_back_written_rows() {
        let text = format_head_pos(&HeadPositions { rows: vec![row(), PosRow { time: 13.0, ..row() }] });
        let back = parse_head_pos(&text).unwrap();
        assert_eq!(back.len(), 2);
        assert_abs_diff_eq!(back.rows[1].time, 13.0, epsilon = 1e-9);
        assert_abs_diff_eq!(back.rows[0].trans[2], 0.04003, epsilon = 1e-9);
    }

    #[test]
    fn parse_rejects_wrong_column_count() {
        let err = parse_head_pos(" Time q1\n 1.0 2.0 3.0\n").unwrap_err();
        assert!(format!("{err:#}").contains("expected 10 columns"));
    }

    #[test]
    fn empty_positions_still_get_a_header() {
        let text = format_head_pos(&HeadPositions::default());
        assert_eq!(text, format!("{POS_HEADER}\n"));
        assert!(parse_head_pos(&text).unwrap().is_empty());
    }
}
