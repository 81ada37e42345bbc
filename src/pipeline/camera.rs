//! Webcam access.
//!
//! A camera is acquired for one capture cycle and released when the handle
//! is dropped, so every exit path of the session loop gives the device back.
//! The production source runs `ffmpeg` reading the device and streaming raw
//! RGB24 frames over a pipe. The pipe closing means the device is gone, which
//! is as fatal as failing to acquire it.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;

use image::{DynamicImage, RgbImage};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{AttendanceError, Result};
use crate::utils::config::CameraConfig;

const STDERR_TAIL_LINES: usize = 20;

/// An acquired device delivering frames. Dropping it releases the device.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<DynamicImage>;
}

pub trait Camera {
    type Handle: FrameSource;

    /// Open the device. Failure here is fatal for the capture run.
    fn acquire(&self) -> Result<Self::Handle>;
}

pub struct FfmpegCamera {
    config: CameraConfig,
    binary: Option<PathBuf>,
}

impl FfmpegCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self { config, binary: None }
    }

    /// Use a specific ffmpeg executable instead of the one on `PATH`.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    fn unavailable(&self, reason: impl Into<String>) -> AttendanceError {
        AttendanceError::DeviceUnavailable { device: self.config.device.clone(), reason: reason.into() }
    }

    fn ffmpeg_args(&self) -> Vec<String> {
        let c = &self.config;
        let size = format!("{}x{}", c.width, c.height);
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            c.input_format.clone(),
            "-framerate".into(),
            c.framerate.to_string(),
            "-video_size".into(),
            size.clone(),
            "-i".into(),
            c.device.clone(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "-s".into(),
            size,
            "pipe:1".into(),
        ]
    }

    fn ffmpeg(&self) -> Result<PathBuf> {
        match &self.binary {
            Some(path) => Ok(path.clone()),
            None => which::which("ffmpeg").map_err(|e| self.unavailable(format!("ffmpeg not found: {}", e))),
        }
    }
}

impl Camera for FfmpegCamera {
    type Handle = FfmpegStream;

    /// Starts ffmpeg and waits for the first frame, so a device ffmpeg cannot
    /// open is reported here rather than as endless empty reads.
    fn acquire(&self) -> Result<FfmpegStream> {
        let ffmpeg = self.ffmpeg()?;
        // v4l2/avfoundation indexes are not paths; only check real device nodes.
        if self.config.device.starts_with("/dev/") && !Path::new(&self.config.device).exists() {
            return Err(self.unavailable("device node does not exist"));
        }

        let mut child = Command::new(&ffmpeg)
            .args(self.ffmpeg_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.unavailable(format!("failed to start ffmpeg: {}", e)))?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(self.unavailable("ffmpeg pipes not captured"));
        };

        let stderr_tail = Arc::new(Mutex::new(VecDeque::new()));
        let stderr_reader = spawn_stderr_reader(stderr, self.config.device.clone(), stderr_tail.clone());
        let frame_len = (self.config.width as usize) * (self.config.height as usize) * 3;
        let mut stream = FfmpegStream {
            child,
            stdout,
            stderr_tail,
            stderr_reader: Some(stderr_reader),
            device: self.config.device.clone(),
            width: self.config.width,
            height: self.config.height,
            buf: vec![0u8; frame_len],
            pending: None,
        };

        let first = stream.read_raw()?;
        stream.pending = Some(first);
        info!(device = %self.config.device, width = self.config.width, height = self.config.height, "camera acquired");
        Ok(stream)
    }
}

// Keeps the last lines ffmpeg printed so a failure can say why.
fn spawn_stderr_reader(stderr: ChildStderr, device: String, tail: Arc<Mutex<VecDeque<String>>>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
            debug!(device = %device, "ffmpeg: {}", line);
            let mut tail = tail.lock();
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    })
}

pub struct FfmpegStream {
    child: Child,
    stdout: ChildStdout,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_reader: Option<JoinHandle<()>>,
    device: String,
    width: u32,
    height: u32,
    buf: Vec<u8>,
    pending: Option<DynamicImage>,
}

impl FfmpegStream {
    fn read_raw(&mut self) -> Result<DynamicImage> {
        if let Err(e) = self.stdout.read_exact(&mut self.buf) {
            if e.kind() == ErrorKind::UnexpectedEof {
                return Err(self.ended());
            }
            return Err(AttendanceError::CaptureFailure(format!("{}: {}", self.device, e)));
        }
        let img = RgbImage::from_raw(self.width, self.height, self.buf.clone())
            .ok_or_else(|| AttendanceError::CaptureFailure(format!("{}: short frame buffer", self.device)))?;
        Ok(DynamicImage::ImageRgb8(img))
    }

    /// The frame pipe closed: ffmpeg is gone and the device with it.
    fn ended(&mut self) -> AttendanceError {
        let status = match self.child.try_wait() {
            Ok(Some(status)) => status.to_string(),
            _ => {
                let _ = self.child.kill();
                match self.child.wait() {
                    Ok(status) => status.to_string(),
                    Err(e) => format!("unknown exit status ({})", e),
                }
            }
        };
        if let Some(reader) = self.stderr_reader.take() {
            let _ = reader.join();
        }
        let tail = self.stderr_tail.lock().iter().cloned().collect::<Vec<_>>().join("; ");
        let reason = if tail.is_empty() {
            format!("ffmpeg stopped streaming ({})", status)
        } else {
            format!("ffmpeg stopped streaming ({}): {}", status, tail)
        };
        AttendanceError::DeviceUnavailable { device: self.device.clone(), reason }
    }
}

impl FrameSource for FfmpegStream {
    fn read_frame(&mut self) -> Result<DynamicImage> {
        match self.pending.take() {
            Some(frame) => Ok(frame),
            None => self.read_raw(),
        }
    }
}

impl Drop for FfmpegStream {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            // Already exited (device error or unplugged).
            debug!(device = %self.device, "ffmpeg kill: {}", e);
        }
        match self.child.wait() {
            Ok(status) => debug!(device = %self.device, %status, "ffmpeg exited"),
            Err(e) => warn!(device = %self.device, "failed to reap ffmpeg: {}", e),
        }
        info!(device = %self.device, "camera released");
    }
}
