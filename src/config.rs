//! Run configuration.
//!
//! The workflow platform hands the app a flat `config.json` whose values may
//! be numbers, booleans, strings, or `""` for "not set".  Loading happens in
//! two steps:
//!
//! 1. [`normalize`] keeps only the keys this app understands and turns every
//!    empty string into `null`.  Platform bookkeeping (`_app`, `_tid`,
//!    `_inputs`, `_outputs`, …) simply falls outside the allow-list.
//! 2. [`AppConfig::from_map`] converts the normalized map into typed fields;
//!    `null` means "use the default" (or "no bound" for `tmax`).
//!
//! ```
//! use headpos::config::AppConfig;
//! use serde_json::json;
//!
//! let cfg = AppConfig::from_value(json!({
//!     "fif": "sub-01_task-rest_meg.fif",
//!     "calibration": "",
//!     "param_compute_amplitudes_tmax": "",
//!     "param_compute_head_pos_gof_limit": 0.95,
//!     "_tid": 12,
//! })).unwrap();
//! assert_eq!(cfg.params.tmax, None);
//! assert_eq!(cfg.params.gof_limit, 0.95);
//! assert!(cfg.sidecars.calibration.is_none());
//! ```
use std::path::{Path, PathBuf};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::chpi::{AmplitudeParams, HeadPosFitParams, LocParams, TooClose};
use crate::sidecar::{SidecarKind, SidecarPaths};

/// Key of the MEG recording path.
pub const KEY_FIF: &str = "fif";
/// Key of the optional head-shape file (accepted, not used by this app).
pub const KEY_HEADSHAPE: &str = "headshape";

pub const KEY_T_STEP_MIN: &str = "param_compute_amplitudes_t_step_min";
pub const KEY_T_WINDOW: &str = "param_compute_amplitudes_t_window";
pub const KEY_EXT_ORDER: &str = "param_compute_amplitudes_ext_order";
pub const KEY_TMIN: &str = "param_compute_amplitudes_tmin";
pub const KEY_TMAX: &str = "param_compute_amplitudes_tmax";
pub const KEY_T_STEP_MAX: &str = "param_compute_locs_t_step_max";
pub const KEY_TOO_CLOSE: &str = "param_compute_locs_too_close";
pub const KEY_LOCS_ADJUST_DIG: &str = "param_compute_locs_adjust_dig";
pub const KEY_DIST_LIMIT: &str = "param_compute_head_pos_dist_limit";
pub const KEY_GOF_LIMIT: &str = "param_compute_head_pos_gof_limit";
pub const KEY_HEAD_POS_ADJUST_DIG: &str = "param_compute_head_pos_adjust_dig";

/// The eleven computation parameters, in stage order.
pub const PARAM_KEYS: [&str; 11] = [
    KEY_T_STEP_MIN, KEY_T_WINDOW, KEY_EXT_ORDER, KEY_TMIN, KEY_TMAX,
    KEY_T_STEP_MAX, KEY_TOO_CLOSE, KEY_LOCS_ADJUST_DIG,
    KEY_DIST_LIMIT, KEY_GOF_LIMIT, KEY_HEAD_POS_ADJUST_DIG,
];

/// Every key that survives [`normalize`].
pub fn allowed_keys() -> impl Iterator<Item = &'static str> {
    [KEY_FIF, KEY_HEADSHAPE]
        .into_iter()
        .chain(SidecarKind::ALL.into_iter().map(SidecarKind::config_key))
        .chain(PARAM_KEYS)
}

/// Configuration problems, reported before any data are touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("missing required key `{0}`")]
    Missing(&'static str),

    #[error("key `{key}`: expected {expected}, got {got}")]
    InvalidType {
        key: &'static str,
        expected: &'static str,
        got: String,
    },

    #[error("key `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

// ── Parameters ────────────────────────────────────────────────────────────

/// The closed set of head-position parameters.
///
/// Defaults are MNE's defaults for `compute_chpi_amplitudes`,
/// `compute_chpi_locs` and `compute_head_pos`.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadPosParams {
    /// Step between amplitude windows in seconds. Default `0.01`.
    pub t_step_min: f64,
    /// Amplitude window length in seconds. Default `0.2`.
    pub t_window: f64,
    /// Order of the external-interference basis projected out of the
    /// amplitudes (0 disables). Default `1`.
    pub ext_order: usize,
    /// Start of the analysed span in seconds from the first sample. Default `0`.
    pub tmin: f64,
    /// End of the analysed span; `None` runs to the end. Default `None`.
    pub tmax: Option<f64>,
    /// Longest interval between two coil fits in seconds. Default `1.0`.
    pub t_step_max: f64,
    /// What to do with a coil fitted too close to a sensor. Default `raise`.
    pub too_close: TooClose,
    /// Re-seed coil fits from the first fit rather than the digitization.
    pub locs_adjust_dig: bool,
    /// Largest accepted coil position error in metres. Default `0.005`.
    pub dist_limit: f64,
    /// Smallest accepted coil goodness of fit. Default `0.98`.
    pub gof_limit: f64,
    /// Measure head-pos errors against the first fit instead of the digitization.
    pub head_pos_adjust_dig: bool,
}

impl Default for HeadPosParams {
    fn default() -> Self {
        Self {
            t_step_min: 0.01,
            t_window: 0.2,
            ext_order: 1,
            tmin: 0.0,
            tmax: None,
            t_step_max: 1.0,
            too_close: TooClose::Raise,
            locs_adjust_dig: false,
            dist_limit: 0.005,
            gof_limit: 0.98,
            head_pos_adjust_dig: false,
        }
    }
}

impl HeadPosParams {
    /// Range checks the computation stages rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key, reason: String| Err(ConfigError::InvalidValue { key, reason });
        if !(self.t_step_min > 0.0) {
            return invalid(KEY_T_STEP_MIN, format!("must be > 0, got {}", self.t_step_min));
        }
        if !(self.t_window > 0.0) {
            return invalid(KEY_T_WINDOW, format!("must be > 0, got {}", self.t_window));
        }
        if self.ext_order > AmplitudeParams::MAX_EXT_ORDER {
            return invalid(
                KEY_EXT_ORDER,
                format!("must be at most {}, got {}", AmplitudeParams::MAX_EXT_ORDER, self.ext_order),
            );
        }
        if !(self.tmin >= 0.0) {
            return invalid(KEY_TMIN, format!("must be >= 0, got {}", self.tmin));
        }
        if let Some(tmax) = self.tmax {
            if !(tmax > self.tmin) {
                return invalid(KEY_TMAX, format!("must be greater than tmin ({}), got {tmax}", self.tmin));
            }
        }
        if !(self.t_step_max > 0.0) {
            return invalid(KEY_T_STEP_MAX, format!("must be > 0, got {}", self.t_step_max));
        }
        if !(self.dist_limit > 0.0) {
            return invalid(KEY_DIST_LIMIT, format!("must be > 0, got {}", self.dist_limit));
        }
        if !(0.0..=1.0).contains(&self.gof_limit) {
            return invalid(KEY_GOF_LIMIT, format!("must lie in [0, 1], got {}", self.gof_limit));
        }
        Ok(())
    }

    pub fn amplitudes(&self) -> AmplitudeParams {
        AmplitudeParams {
            t_step_min: self.t_step_min,
            t_window: self.t_window,
            ext_order: self.ext_order,
            tmin: self.tmin,
            tmax: self.tmax,
        }
    }

    pub fn locs(&self) -> LocParams {
        LocParams {
            t_step_max: self.t_step_max,
            too_close: self.too_close,
            adjust_dig: self.locs_adjust_dig,
        }
    }

    pub fn head_pos(&self) -> HeadPosFitParams {
        HeadPosFitParams {
            dist_limit: self.dist_limit,
            gof_limit: self.gof_limit,
            adjust_dig: self.head_pos_adjust_dig,
        }
    }
}

// ── App configuration ─────────────────────────────────────────────────────

/// Everything one run needs, fully typed.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// MEG recording with cHPI signals.
    pub fif: PathBuf,
    pub sidecars: SidecarPaths,
    /// Head-shape file; accepted for compatibility, never read.
    pub headshape: Option<PathBuf>,
    pub params: HeadPosParams,
}

impl AppConfig {
    /// Build from an already normalized map.  Unknown keys are ignored.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, ConfigError> {
        let fif = get_path(map, KEY_FIF)?.ok_or(ConfigError::Missing(KEY_FIF))?;

        let mut sidecars = SidecarPaths::default();
        for kind in SidecarKind::ALL {
            sidecars.set(kind, get_path(map, kind.config_key())?);
        }

        let d = HeadPosParams::default();
        let params = HeadPosParams {
            t_step_min: get_f64(map, KEY_T_STEP_MIN)?.unwrap_or(d.t_step_min),
            t_window: get_f64(map, KEY_T_WINDOW)?.unwrap_or(d.t_window),
            ext_order: get_usize(map, KEY_EXT_ORDER)?.unwrap_or(d.ext_order),
            tmin: get_f64(map, KEY_TMIN)?.unwrap_or(d.tmin),
            tmax: get_f64(map, KEY_TMAX)?,
            t_step_max: get_f64(map, KEY_T_STEP_MAX)?.unwrap_or(d.t_step_max),
            too_close: match get_str(map, KEY_TOO_CLOSE)? {
                Some(s) => s.parse().map_err(|reason| ConfigError::InvalidValue {
                    key: KEY_TOO_CLOSE,
                    reason,
                })?,
                None => d.too_close,
            },
            locs_adjust_dig: get_bool(map, KEY_LOCS_ADJUST_DIG)?.unwrap_or(d.locs_adjust_dig),
            dist_limit: get_f64(map, KEY_DIST_LIMIT)?.unwrap_or(d.dist_limit),
            gof_limit: get_f64(map, KEY_GOF_LIMIT)?.unwrap_or(d.gof_limit),
            head_pos_adjust_dig: get_bool(map, KEY_HEAD_POS_ADJUST_DIG)?
                .unwrap_or(d.head_pos_adjust_dig),
        };
        params.validate()?;

        Ok(AppConfig {
            fif,
            sidecars,
            headshape: get_path(map, KEY_HEADSHAPE)?,
            params,
        })
    }

    /// Normalize a parsed JSON document, then convert it.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(map) => Self::from_map(&normalize(&map)),
            other => Err(ConfigError::NotAnObject(json_type(&other))),
        }
    }
}

/// Read, normalize and convert a `config.json`.
pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&text)?;
    AppConfig::from_value(value)
}

/// Keep allow-listed keys only and replace blank strings with `null`.
///
/// Idempotent: `normalize(&normalize(m)) == normalize(m)`.
pub fn normalize(map: &Map<String, Value>) -> Map<String, Value> {
    allowed_keys()
        .filter_map(|key| {
            let value = match map.get(key)? {
                Value::String(s) if s.trim().is_empty() => Value::Null,
                v => v.clone(),
            };
            Some((key.to_string(), value))
        })
        .collect()
}

// ── Typed getters (absent or null → Ok(None)) ─────────────────────────────

fn present<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).filter(|v| !v.is_null())
}

fn type_error(key: &'static str, expected: &'static str, got: &Value) -> ConfigError {
    ConfigError::InvalidType { key, expected, got: got.to_string() }
}

fn get_f64(map: &Map<String, Value>, key: &'static str) -> Result<Option<f64>, ConfigError> {
    let Some(v) = present(map, key) else { return Ok(None) };
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|x| x.is_finite())
        .map(Some)
        .ok_or_else(|| type_error(key, "a finite number", v))
}

fn get_usize(map: &Map<String, Value>, key: &'static str) -> Result<Option<usize>, ConfigError> {
    let Some(v) = present(map, key) else { return Ok(None) };
    let parsed = match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|x| *x >= 0.0 && x.fract() == 0.0).map(|x| x as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .map(|n| Some(n as usize))
        .ok_or_else(|| type_error(key, "a non-negative integer", v))
}

fn get_bool(map: &Map<String, Value>, key: &'static str) -> Result<Option<bool>, ConfigError> {
    let Some(v) = present(map, key) else { return Ok(None) };
    match v {
        Value::Bool(b) => Ok(Some(*b)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            _ => Err(type_error(key, "a boolean", v)),
        },
        _ => Err(type_error(key, "a boolean", v)),
    }
}

fn get_str<'a>(map: &'a Map<String, Value>, key: &'static str) -> Result<Option<&'a str>, ConfigError> {
    match present(map, key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim())),
        Some(v) => Err(type_error(key, "a string", v)),
    }
}

fn get_path(map: &Map<String, Value>, key: &'static str) -> Result<Option<PathBuf>, ConfigError> {
    Ok(get_str(map, key)?.map(PathBuf::from))
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
