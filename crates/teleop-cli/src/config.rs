//! Configuration vault – reads/writes `~/.teleop/config.toml`.
//!
//! The file holds a full [`TeleopConfig`]; every section is optional and
//! missing keys take their defaults.  `TELEOP_*` environment variables are
//! applied on top after loading.

use std::fs;
use std::path::{Path, PathBuf};

use teleop_runtime::TeleopConfig;

/// Return the path to `~/.teleop/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

/// Where calibration records go unless `[calibration] path` says otherwise.
pub fn default_calibration_path() -> PathBuf {
    teleop_dir_for_home(&home_dir()).join("calibration.json")
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn teleop_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".teleop")
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    teleop_dir_for_home(home).join("config.toml")
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<TeleopConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: TeleopConfig =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    cfg.validate().map_err(|e| e.to_string())?;
    Ok(Some(cfg))
}

/// Apply `TELEOP_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TELEOP_ROBOT_URL` | `robot.url` |
/// | `TELEOP_POSE_BIND` | `pose_source.bind` |
/// | `TELEOP_MOTION_SCALE` | `motion.motion_scale` |
/// | `TELEOP_TICK_RATE_HZ` | `control.tick_rate_hz` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut TeleopConfig) {
    if let Ok(v) = std::env::var("TELEOP_ROBOT_URL") {
        cfg.robot.url = v;
    }
    if let Ok(v) = std::env::var("TELEOP_POSE_BIND") {
        cfg.pose_source.bind = v;
    }
    if let Ok(v) = std::env::var("TELEOP_MOTION_SCALE")
        && let Ok(scale) = v.parse::<f32>()
    {
        cfg.motion.motion_scale = scale;
    }
    if let Ok(v) = std::env::var("TELEOP_TICK_RATE_HZ")
        && let Ok(hz) = v.parse::<f32>()
    {
        cfg.control.tick_rate_hz = hz;
    }
}

/// Save the config to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &TeleopConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
