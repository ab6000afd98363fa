//! Continuous head-position indicator (cHPI) estimation.
//!
//! Three stages, each matching the MNE function of the same name:
//!
//! - [`amplitudes`]: per-window sinusoid fits at the coil frequencies →
//!   one sensor topography per coil and time
//!   (`mne.chpi.compute_chpi_amplitudes`).
//! - [`locs`]: magnetic-dipole fits of those topographies → coil positions
//!   in the device frame (`mne.chpi.compute_chpi_locs`).
//! - [`head_pos`]: rigid device→head fits of the coil positions against the
//!   digitization → quaternion rows (`mne.chpi.compute_head_pos`).
//!
//! Supporting pieces: [`forward`] (sensor geometry, dipole field),
//! [`external`] (external-interference basis) and [`rigid`] (Procrustes fit,
//! quaternions).
use std::fmt;
use std::str::FromStr;

pub mod amplitudes;
pub mod external;
pub mod forward;
pub mod head_pos;
pub mod locs;
pub mod rigid;

pub use amplitudes::{compute_chpi_amplitudes, compute_chpi_amplitudes_from_data, ChpiAmplitudes};
pub use forward::{MegSensors, Sensor, SensorKind};
pub use head_pos::compute_head_pos;
pub use locs::{compute_chpi_locs, ChpiLocs, CoilFit};
pub use rigid::{fit_rigid, quat_to_rot, rot_to_quat, RigidFit};

/// Parameters of [`compute_chpi_amplitudes`].
#[derive(Debug, Clone, PartialEq)]
pub struct AmplitudeParams {
    /// Step between window centres (s).
    pub t_step_min: f64,
    /// Window length (s).
    pub t_window:   f64,
    /// External-basis order projected out (0 disables).
    pub ext_order:  usize,
    /// Start of the analysed span, seconds from the first sample.
    pub tmin:       f64,
    /// End of the analysed span; `None` runs to the end.
    pub tmax:       Option<f64>,
}

impl AmplitudeParams {
    /// Highest supported external-basis order (uniform fields plus
    /// linear gradients).
    pub const MAX_EXT_ORDER: usize = 2;
}

impl Default for AmplitudeParams {
    fn default() -> Self {
        AmplitudeParams { t_step_min: 0.01, t_window: 0.2, ext_order: 1, tmin: 0.0, tmax: None }
    }
}

/// Policy for a coil found within [`locs::TOO_CLOSE_DIST`] of a sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TooClose {
    /// Abort the run.
    #[default]
    Raise,
    /// Log a warning and keep going.
    Warning,
    /// Log at info level and keep going.
    Info,
}

impl FromStr for TooClose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raise"   => Ok(TooClose::Raise),
            "warning" => Ok(TooClose::Warning),
            "info"    => Ok(TooClose::Info),
            other => Err(format!("expected one of raise, warning, info; got `{other}`")),
        }
    }
}

impl fmt::Display for TooClose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TooClose::Raise   => "raise",
            TooClose::Warning => "warning",
            TooClose::Info    => "info",
        })
    }
}

/// Parameters of [`compute_chpi_locs`].
#[derive(Debug, Clone, PartialEq)]
pub struct LocParams {
    /// Longest gap between two fits (s).
    pub t_step_max: f64,
    pub too_close:  TooClose,
    /// Seed later fits from the first fit instead of the digitization.
    pub adjust_dig: bool,
}

impl Default for LocParams {
    fn default() -> Self {
        LocParams { t_step_max: 1.0, too_close: TooClose::Raise, adjust_dig: false }
    }
}

/// Parameters of [`compute_head_pos`].
#[derive(Debug, Clone, PartialEq)]
pub struct HeadPosFitParams {
    /// Largest accepted coil error (m).
    pub dist_limit: f64,
    /// Smallest accepted coil goodness of fit.
    pub gof_limit:  f64,
    /// Replace the digitized reference by the first accepted fit.
    pub adjust_dig: bool,
}

impl Default for HeadPosFitParams {
    fn default() -> Self {
        HeadPosFitParams { dist_limit: 0.005, gof_limit: 0.98, adjust_dig: false }
    }
}
