//! Persisted calibration record.
//!
//! A successful fresh calibration is written to disk so the next session can
//! offer to reuse it.  The file is a versioned JSON document:
//!
//! ```json
//! {
//!   "schema": "teleop.calibration",
//!   "version": 1,
//!   "left":  { "position": {"x":0.0,"y":0.0,"z":0.0}, "orientation": {"w":1.0,"x":0.0,"y":0.0,"z":0.0} },
//!   "right": { … },
//!   "motion_scale": 1.5,
//!   "frame_remap": "xr",
//!   "captured_at": "2026-01-01T00:00:00Z"
//! }
//! ```
//!
//! The reference poses are robot-frame and already scaled, so a record is
//! only valid for the motion scale and axis remap it was captured with.
//! Anything that does not check out fails with
//! [`TeleopError::CalibrationLoad`]; nothing is silently patched up.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use teleop_perception::transform::AxisRemap;
use teleop_types::{CalibrationOrigin, Pose, TeleopError};
use tracing::info;

use crate::config::MotionConfig;

pub const SCHEMA: &str = "teleop.calibration";
pub const VERSION: u32 = 1;

const SCALE_TOLERANCE: f32 = 1e-6;

/// On-disk form of a [`CalibrationOrigin`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub schema: String,
    pub version: u32,
    pub left: Pose,
    pub right: Pose,
    pub motion_scale: f32,
    pub frame_remap: AxisRemap,
    pub captured_at: DateTime<Utc>,
}

impl CalibrationRecord {
    pub fn new(origin: &CalibrationOrigin, motion: &MotionConfig) -> Self {
        Self {
            schema: SCHEMA.to_string(),
            version: VERSION,
            left: origin.left,
            right: origin.right,
            motion_scale: motion.motion_scale,
            frame_remap: motion.frame_remap,
            captured_at: origin.captured_at,
        }
    }

    /// Check the record against the running configuration and return the
    /// origin it holds.
    ///
    /// Pose validity is checked separately by
    /// [`Calibrator::load_origin`](crate::calibrator::Calibrator::load_origin),
    /// which knows which hands are active.
    pub fn into_origin(self, motion: &MotionConfig) -> Result<CalibrationOrigin, TeleopError> {
        if self.schema != SCHEMA {
            return Err(load_err(format!("unknown schema {:?}", self.schema)));
        }
        if self.version != VERSION {
            return Err(load_err(format!(
                "unsupported version {} (expected {VERSION})",
                self.version
            )));
        }
        if (self.motion_scale - motion.motion_scale).abs() > SCALE_TOLERANCE {
            return Err(load_err(format!(
                "captured with motion_scale {} but running with {}",
                self.motion_scale, motion.motion_scale
            )));
        }
        if self.frame_remap != motion.frame_remap {
            return Err(load_err(format!(
                "captured with frame_remap {:?} but running with {:?}",
                self.frame_remap, motion.frame_remap
            )));
        }
        Ok(CalibrationOrigin {
            left: self.left,
            right: self.right,
            captured_at: self.captured_at,
        })
    }
}

/// File-backed calibration storage.
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    path: PathBuf,
}

impl CalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the raw record, if one exists.
    ///
    /// # Errors
    ///
    /// [`TeleopError::CalibrationLoad`] when the file exists but cannot be
    /// read or parsed.
    pub fn peek(&self) -> Result<Option<CalibrationRecord>, TeleopError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| load_err(format!("reading {}: {e}", self.path.display())))?;
        let record = serde_json::from_str(&raw)
            .map_err(|e| load_err(format!("parsing {}: {e}", self.path.display())))?;
        Ok(Some(record))
    }

    /// Load and check the stored origin.  `Ok(None)` when nothing is stored.
    pub fn load(&self, motion: &MotionConfig) -> Result<Option<CalibrationOrigin>, TeleopError> {
        self.peek()?.map(|r| r.into_origin(motion)).transpose()
    }

    /// Write `origin` atomically (temp file, then rename).
    pub fn save(&self, origin: &CalibrationOrigin, motion: &MotionConfig) -> Result<(), TeleopError> {
        let record = CalibrationRecord::new(origin, motion);
        let raw = serde_json::to_string_pretty(&record)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|e| save_err(format!("creating {}: {e}", parent.display())))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw).map_err(|e| save_err(format!("writing {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| save_err(format!("renaming into {}: {e}", self.path.display())))?;
        info!(path = %self.path.display(), "Calibration saved");
        Ok(())
    }

    /// Delete the stored record.  Missing files are fine.
    pub fn discard(&self) -> Result<(), TeleopError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(save_err(format!("removing {}: {e}", self.path.display()))),
        }
    }
}

fn load_err(msg: String) -> TeleopError {
    TeleopError::CalibrationLoad(msg)
}

fn save_err(msg: String) -> TeleopError {
    TeleopError::Serialization(format!("calibration store: {msg}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use teleop_types::{Quaternion, Vec3};

    fn origin() -> CalibrationOrigin {
        CalibrationOrigin {
            left: Pose::new(Vec3::new(0.1, 0.2, 0.3), Quaternion::identity()),
            right: Pose::new(Vec3::new(0.1, -0.2, 0.3), Quaternion::identity()),
            captured_at: Utc::now(),
        }
    }

    fn store() -> (tempfile::TempDir, CalibrationStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::new(dir.path().join("calib").join("calibration.json"));
        (dir, store)
    }

    #[test]
    fn save_then_load() {
        let (_dir, store) = store();
        let motion = MotionConfig::default();
        let saved = origin();
        store.save(&saved, &motion).unwrap();

        assert!(!store.path().with_extension("json.tmp").exists());
        let loaded = store.load(&motion).unwrap().unwrap();
        assert_eq!(loaded, saved);
    }

    #[test]
    fn missing_file_is_none() {
        let (_dir, store) = store();
        assert!(store.peek().unwrap().is_none());
        assert!(store.load(&MotionConfig::default()).unwrap().is_none());
        store.discard().unwrap();
    }

    #[test]
    fn corrupt_file_is_load_error() {
        let (_dir, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{ not json").unwrap();
        assert!(matches!(store.peek(), Err(TeleopError::CalibrationLoad(_))));
    }

    #[test]
    fn wrong_schema_or_version_rejected() {
        let motion = MotionConfig::default();
        let mut record = CalibrationRecord::new(&origin(), &motion);
        record.version = 2;
        assert!(matches!(
            record.clone().into_origin(&motion),
            Err(TeleopError::CalibrationLoad(_))
        ));
        record.version = VERSION;
        record.schema = "something.else".to_string();
        assert!(matches!(
            record.into_origin(&motion),
            Err(TeleopError::CalibrationLoad(_))
        ));
    }

    #[test]
    fn motion_mismatch_rejected() {
        let (_dir, store) = store();
        store.save(&origin(), &MotionConfig::default()).unwrap();

        let scaled = MotionConfig {
            motion_scale: 2.0,
            ..MotionConfig::default()
        };
        assert!(matches!(
            store.load(&scaled),
            Err(TeleopError::CalibrationLoad(msg)) if msg.contains("motion_scale")
        ));

        let remapped = MotionConfig {
            frame_remap: AxisRemap::Identity,
            ..MotionConfig::default()
        };
        assert!(matches!(
            store.load(&remapped),
            Err(TeleopError::CalibrationLoad(msg)) if msg.contains("frame_remap")
        ));
    }

    #[test]
    fn discard_removes_record() {
        let (_dir, store) = store();
        store.save(&origin(), &MotionConfig::default()).unwrap();
        store.discard().unwrap();
        assert!(store.peek().unwrap().is_none());
    }
}
