use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::pipeline::schedule::{Schedule, TeachingPeriod};
use crate::utils::path::resolve_under;

/// Which subject a teacher teaches and which ledger file records it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TeacherAssignment {
    pub subject: String,
    pub database: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device: String,
    pub input_format: String,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            input_format: "v4l2".to_string(),
            width: 640,
            height: 480,
            framerate: 15,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub student_images: PathBuf,
    pub teacher_images: PathBuf,
    pub models_dir: PathBuf,
    pub tolerance: f32,
    pub frame_interval_ms: u64,
    pub poll_interval_secs: u64,
    pub max_sessions: usize,
    pub session_frame_limit: Option<usize>,
    pub end_with_period: bool,
    pub camera: CameraConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            student_images: PathBuf::from("face/images/student_image"),
            teacher_images: PathBuf::from("face/images/teacher_image"),
            models_dir: PathBuf::from("models"),
            tolerance: 0.5,
            frame_interval_ms: 200,
            poll_interval_secs: 5,
            max_sessions: 5,
            session_frame_limit: None,
            end_with_period: false,
            camera: CameraConfig::default(),
        }
    }
}

/// One configuration shared by the web API and the capture loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data: PathBuf,
    pub port: u16,
    pub registry_db: String,
    pub periods: Vec<TeachingPeriod>,
    pub teachers: BTreeMap<String, TeacherAssignment>,
    pub capture: CaptureConfig,
}

impl Default for Config {
    fn default() -> Self {
        let periods = [
            ("09:20", "10:20"),
            ("10:21", "11:15"),
            ("11:25", "13:09"),
            ("13:10", "14:10"),
            ("14:11", "15:10"),
            ("15:11", "22:10"),
        ]
        .iter()
        .map(|(s, e)| TeachingPeriod::new(*s, *e))
        .collect();

        let teachers = [
            ("teacher01", "DCC", "dcc_attendance.db"),
            ("teacher02", "IEFT", "ieft_attendance.db"),
            ("teacher03", "CD", "cd_attendance.db"),
            ("teacher04", "AAD", "aad_attendance.db"),
            ("teacher05", "CGIP", "cgip_attendance.db"),
            ("teacher06", "MP", "mp_attendance.db"),
            ("teacher07", "NL", "nl_attendance.db"),
        ]
        .iter()
        .map(|(t, s, d)| (t.to_string(), TeacherAssignment { subject: s.to_string(), database: d.to_string() }))
        .collect();

        Self {
            data: PathBuf::from("rollcall-data"),
            port: 5000,
            registry_db: "registry.db".to_string(),
            periods,
            teachers,
            capture: CaptureConfig::default(),
        }
    }
}

impl Config {
    /// Reads `ATTEND_CONFIG` (or `./attendance.toml` when present), then
    /// applies environment overrides and validates the period list.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like [`Config::load`], with an explicit file taking precedence over
    /// `ATTEND_CONFIG`.
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let explicit = file
            .map(Path::to_path_buf)
            .or_else(|| env::var("ATTEND_CONFIG").ok().map(PathBuf::from));
        let path = explicit.or_else(|| {
            let local = PathBuf::from("attendance.toml");
            local.exists().then_some(local)
        });
        let mut cfg = match path {
            Some(p) => Self::from_file(&p)?,
            None => Self::default(),
        };
        cfg.apply_env();
        cfg.schedule()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml_str(&text).with_context(|| format!("Invalid config file {:?}", path))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    fn apply_env(&mut self) {
        if let Ok(data) = env::var("ATTEND_DATA") {
            self.data = PathBuf::from(data);
        }
        if let Some(port) = env::var("ATTEND_PORT").ok().and_then(|v| v.parse().ok()) {
            self.port = port;
        }
        if let Ok(device) = env::var("ATTEND_CAMERA_DEVICE") {
            self.capture.camera.device = device;
        }
    }

    pub fn schedule(&self) -> Result<Schedule> {
        Ok(Schedule::new(self.periods.clone())?)
    }

    pub fn registry_path(&self) -> PathBuf {
        resolve_under(&self.data, &self.registry_db)
    }

    pub fn student_images_dir(&self) -> PathBuf {
        resolve_under(&self.data, &self.capture.student_images)
    }

    pub fn teacher_images_dir(&self) -> PathBuf {
        resolve_under(&self.data, &self.capture.teacher_images)
    }

    pub fn models_dir(&self) -> PathBuf {
        resolve_under(&self.data, &self.capture.models_dir)
    }
}
