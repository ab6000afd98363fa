use headpos::config::{self, normalize, AppConfig, ConfigError, PARAM_KEYS};
use serde_json::{json, Map, Value};

fn platform_config() -> Map<String, Value> {
    json!({
        "fif": "/data/sub-01_meg.fif",
        "crosstalk": "/data/ct_sparse.fif",
        "calibration": "",
        "destination": "",
        "events": "  ",
        "channels": "/data/channels.tsv",
        "headshape": "",
        "param_compute_amplitudes_t_step_min": "0.02",
        "param_compute_amplitudes_t_window": 0.25,
        "param_compute_amplitudes_ext_order": 2,
        "param_compute_amplitudes_tmin": "",
        "param_compute_amplitudes_tmax": 120,
        "param_compute_locs_t_step_max": "",
        "param_compute_locs_too_close": "info",
        "param_compute_locs_adjust_dig": true,
        "param_compute_head_pos_dist_limit": "",
        "param_compute_head_pos_gof_limit": 0.9,
        "param_compute_head_pos_adjust_dig": "false",
        "_app": "5e8b", "_tid": 7, "_inputs": [{"id": "meg"}], "_outputs": [],
        "unrelated": 1,
    })
    .as_object()
    .cloned()
    .unwrap()
}

#[test]
fn normalize_is_idempotent() {
    let once = normalize(&platform_config());
    assert_eq!(normalize(&once), once);
}

#[test]
fn blanks_become_null_and_values_pass_through() {
    let raw = platform_config();
    let n = normalize(&raw);
    for (key, value) in &n {
        match raw[key].as_str() {
            Some(s) if s.trim().is_empty() => assert_eq!(value, &Value::Null, "{key}"),
            _ => assert_eq!(value, &raw[key], "{key}"),
        }
    }
    assert!(PARAM_KEYS.iter().all(|k| n.contains_key(*k)));
    assert!(!n.contains_key("unrelated"));
    assert!(n.keys().all(|k| !k.starts_with('_')));
}

#[test]
fn typed_config_from_platform_document() {
    let cfg = AppConfig::from_map(&normalize(&platform_config())).unwrap();
    let p = &cfg.params;
    assert_eq!(p.t_step_min, 0.02);
    assert_eq!(p.t_window, 0.25);
    assert_eq!(p.ext_order, 2);
    assert_eq!(p.tmin, 0.0);
    assert_eq!(p.tmax, Some(120.0));
    assert_eq!(p.t_step_max, 1.0);
    assert_eq!(p.too_close.to_string(), "info");
    assert!(p.locs_adjust_dig);
    assert_eq!(p.dist_limit, 0.005);
    assert_eq!(p.gof_limit, 0.9);
    assert!(!p.head_pos_adjust_dig);
    assert!(cfg.sidecars.crosstalk.is_some());
    assert!(cfg.sidecars.events.is_none());
    assert!(cfg.headshape.is_none());
}

#[test]
fn load_reports_io_and_json_errors() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.json");
    assert!(matches!(config::load(&missing), Err(ConfigError::Io { .. })));

    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{\"fif\": ").unwrap();
    assert!(matches!(config::load(&broken), Err(ConfigError::Json(_))));

    let ok = dir.path().join("config.json");
    std::fs::write(&ok, r#"{"fif": "a.fif", "param_compute_amplitudes_ext_order": "3"}"#).unwrap();
    let err = config::load(&ok).unwrap_err();
    assert!(err.to_string().contains("param_compute_amplitudes_ext_order"));
}
