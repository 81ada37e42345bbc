use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::pipeline::session::SessionState;

/// Process-wide capture counters, shared by the session loop and the API.
pub struct CaptureStats {
    frames_captured: AtomicU64,
    capture_failures: AtomicU64,
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    unmapped_teachers: AtomicU64,
    attendance_recorded: AtomicU64,
    record_failures: AtomicU64,
    started: Instant,
    state: parking_lot::Mutex<SessionState>,
    last_session: parking_lot::Mutex<Option<LastSession>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastSession {
    pub period: usize,
    pub teacher: String,
    pub subject: String,
    pub students_recorded: usize,
    pub frames: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub state: SessionState,
    pub frames_captured: u64,
    pub capture_failures: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub unmapped_teachers: u64,
    pub attendance_recorded: u64,
    pub record_failures: u64,
    pub last_session: Option<LastSession>,
}

impl Default for CaptureStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureStats {
    pub fn new() -> Self {
        Self {
            frames_captured: AtomicU64::new(0),
            capture_failures: AtomicU64::new(0),
            sessions_opened: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            unmapped_teachers: AtomicU64::new(0),
            attendance_recorded: AtomicU64::new(0),
            record_failures: AtomicU64::new(0),
            started: Instant::now(),
            state: parking_lot::Mutex::new(SessionState::Idle),
            last_session: parking_lot::Mutex::new(None),
        }
    }
    pub fn inc_frames(&self) { self.frames_captured.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_capture_failures(&self) { self.capture_failures.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_sessions_opened(&self) { self.sessions_opened.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_unmapped_teachers(&self) { self.unmapped_teachers.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_attendance_recorded(&self) { self.attendance_recorded.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_record_failures(&self) { self.record_failures.fetch_add(1, Ordering::Relaxed); }

    pub fn finish_session(&self, last: LastSession) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
        *self.last_session.lock() = Some(last);
    }

    pub fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    pub fn state(&self) -> SessionState { *self.state.lock() }
    pub fn frames_captured(&self) -> u64 { self.frames_captured.load(Ordering::Relaxed) }
    pub fn capture_failures(&self) -> u64 { self.capture_failures.load(Ordering::Relaxed) }
    pub fn sessions_opened(&self) -> u64 { self.sessions_opened.load(Ordering::Relaxed) }
    pub fn sessions_closed(&self) -> u64 { self.sessions_closed.load(Ordering::Relaxed) }
    pub fn unmapped_teachers(&self) -> u64 { self.unmapped_teachers.load(Ordering::Relaxed) }
    pub fn attendance_recorded(&self) -> u64 { self.attendance_recorded.load(Ordering::Relaxed) }
    pub fn record_failures(&self) -> u64 { self.record_failures.load(Ordering::Relaxed) }
    pub fn uptime_secs(&self) -> u64 { self.started.elapsed().as_secs() }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_secs: self.uptime_secs(),
            state: self.state(),
            frames_captured: self.frames_captured(),
            capture_failures: self.capture_failures(),
            sessions_opened: self.sessions_opened(),
            sessions_closed: self.sessions_closed(),
            unmapped_teachers: self.unmapped_teachers(),
            attendance_recorded: self.attendance_recorded(),
            record_failures: self.record_failures(),
            last_session: self.last_session.lock().clone(),
        }
    }

    pub fn metrics_text(&self) -> String {
        let mut s = String::new();
        s.push_str(&format!("rollcall_uptime_seconds {}\n", self.uptime_secs()));
        s.push_str(&format!("rollcall_frames_captured_total {}\n", self.frames_captured()));
        s.push_str(&format!("rollcall_capture_failures_total {}\n", self.capture_failures()));
        s.push_str(&format!("rollcall_sessions_opened_total {}\n", self.sessions_opened()));
        s.push_str(&format!("rollcall_sessions_closed_total {}\n", self.sessions_closed()));
        s.push_str(&format!("rollcall_unmapped_teachers_total {}\n", self.unmapped_teachers()));
        s.push_str(&format!("rollcall_attendance_recorded_total {}\n", self.attendance_recorded()));
        s.push_str(&format!("rollcall_record_failures_total {}\n", self.record_failures()));
        s
    }
}
