//! The capture loop.
//!
//! `IDLE -> AWAITING_TEACHER -> IN_SESSION -> RELEASED`, then back to idle
//! until the session budget is spent. The camera handle lives on the stack of
//! one cycle, so it is released on every way out of it.
//!
//! Quit handling: a quit raised while a session is open closes that session
//! and is consumed. A quit raised at any other time stops the run.

use std::collections::{BTreeSet, HashSet};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::db::ledger::{LedgerSet, SubjectLedger};
use crate::error::{AttendanceError, Result};
use crate::pipeline::camera::{Camera, FrameSource};
use crate::pipeline::face::{Cohort, FaceMatcher};
use crate::pipeline::schedule::Schedule;
use crate::stats::{CaptureStats, LastSession};
use crate::utils::config::CaptureConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    AwaitingTeacher,
    InSession,
    Released,
}

/// Shared "stop" flag, raised by the operator.
#[derive(Debug, Clone, Default)]
pub struct QuitSignal(Arc<AtomicBool>);

impl QuitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Reads and clears the flag.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Raise the flag whenever a line reading `q` arrives on stdin.
    pub fn listen_stdin(&self) -> std::thread::JoinHandle<()> {
        let signal = self.clone();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().eq_ignore_ascii_case("q") {
                    info!("quit requested from console");
                    signal.raise();
                }
            }
        })
    }
}

/// Time source for the loop. Tests substitute a scripted clock.
pub trait Clock {
    /// Local time of day as zero-padded "HH:MM".
    fn time_of_day(&self) -> String;
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn time_of_day(&self) -> String {
        chrono::Local::now().format("%H:%M").to_string()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub frame_interval: Duration,
    pub poll_interval: Duration,
    pub max_sessions: usize,
    pub session_frame_limit: Option<usize>,
    pub end_with_period: bool,
}

impl From<&CaptureConfig> for ControllerSettings {
    fn from(c: &CaptureConfig) -> Self {
        Self {
            frame_interval: Duration::from_millis(c.frame_interval_ms),
            poll_interval: Duration::from_secs(c.poll_interval_secs),
            max_sessions: c.max_sessions,
            session_frame_limit: c.session_frame_limit,
            end_with_period: c.end_with_period,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub period: usize,
    pub teacher: String,
    pub subject: String,
    pub recorded: BTreeSet<String>,
    pub frames: usize,
    pub capture_failures: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The period ended or quit was raised before a mapped teacher showed up.
    NoTeacher,
    /// A teacher was confirmed but the class-taken write failed.
    Abandoned,
    Closed(SessionSummary),
}

pub struct SessionController<C, M, K> {
    camera: C,
    matcher: M,
    clock: K,
    schedule: Schedule,
    ledgers: LedgerSet,
    settings: ControllerSettings,
    quit: QuitSignal,
    stats: Arc<CaptureStats>,
    state: SessionState,
}

impl<C: Camera, M: FaceMatcher, K: Clock> SessionController<C, M, K> {
    pub fn new(camera: C, matcher: M, clock: K, schedule: Schedule, ledgers: LedgerSet, settings: ControllerSettings) -> Self {
        Self {
            camera,
            matcher,
            clock,
            schedule,
            ledgers,
            settings,
            quit: QuitSignal::new(),
            stats: Arc::new(CaptureStats::new()),
            state: SessionState::Idle,
        }
    }

    pub fn with_quit(mut self, quit: QuitSignal) -> Self {
        self.quit = quit;
        self
    }

    pub fn with_stats(mut self, stats: Arc<CaptureStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn quit_signal(&self) -> QuitSignal {
        self.quit.clone()
    }

    pub fn stats(&self) -> &Arc<CaptureStats> {
        &self.stats
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Poll the schedule and run capture cycles until the session budget is
    /// spent or quit is raised outside a session. Only fatal errors (camera
    /// acquisition, or the camera stream ending) end the run early.
    pub fn run(&mut self) -> Result<Vec<SessionSummary>> {
        let mut summaries = Vec::new();
        let mut opened = 0usize;
        info!(
            max_sessions = self.settings.max_sessions,
            periods = self.schedule.periods().len(),
            ledgers = self.ledgers.len(),
            "capture loop started"
        );
        while opened < self.settings.max_sessions {
            if self.quit.is_raised() {
                info!("quit requested, stopping capture loop");
                break;
            }
            self.set_state(SessionState::Idle);
            let now = self.clock.time_of_day();
            match self.schedule.current_period(&now) {
                None => debug!(time = %now, "no scheduled period"),
                Some(period) => match self.run_cycle(period)? {
                    CycleOutcome::Closed(summary) => {
                        opened += 1;
                        summaries.push(summary);
                    }
                    CycleOutcome::Abandoned => opened += 1,
                    CycleOutcome::NoTeacher => {}
                },
            }
            if opened < self.settings.max_sessions {
                self.clock.sleep(self.settings.poll_interval);
            }
        }
        self.set_state(SessionState::Idle);
        info!(sessions = summaries.len(), "capture loop finished");
        Ok(summaries)
    }

    /// One acquire-await-record-release cycle for `period`.
    pub fn run_cycle(&mut self, period: usize) -> Result<CycleOutcome> {
        let outcome = self.cycle(period);
        self.set_state(SessionState::Released);
        outcome
    }

    fn cycle(&mut self, period: usize) -> Result<CycleOutcome> {
        info!(period, "scheduled period active");
        let mut camera = self.camera.acquire()?;
        self.set_state(SessionState::AwaitingTeacher);

        let mut unmapped_seen = BTreeSet::new();
        let mut waiting_failures = 0usize;
        let entry = loop {
            if self.quit.is_raised() {
                info!(period, "quit requested before a teacher was detected");
                break None;
            }
            if !self.period_active(period) {
                info!(period, "period ended without a teacher");
                break None;
            }
            let names = self.sample(&mut camera, Cohort::Teachers, &mut waiting_failures)?;
            if let Some(entry) = self.select_teacher(&names, &mut unmapped_seen) {
                break Some(entry);
            }
            self.clock.sleep(self.settings.frame_interval);
        };
        let Some(entry) = entry else {
            return Ok(CycleOutcome::NoTeacher);
        };

        self.quit.clear();
        self.set_state(SessionState::InSession);
        info!(period, teacher = %entry.teacher, subject = %entry.subject, "teacher detected, session open");
        if let Err(e) = entry.ledger.record_class_taken(&entry.teacher, &entry.subject) {
            error!(teacher = %entry.teacher, subject = %entry.subject, "failed to record class taken, abandoning session: {}", e);
            return Ok(CycleOutcome::Abandoned);
        }
        self.stats.inc_sessions_opened();

        let mut recorded = BTreeSet::new();
        let mut frames = 0usize;
        let mut capture_failures = 0usize;
        loop {
            if self.quit.take() {
                info!(period, teacher = %entry.teacher, "quit requested, closing session");
                break;
            }
            if self.settings.session_frame_limit.is_some_and(|limit| frames >= limit) {
                info!(period, teacher = %entry.teacher, frames, "session frame budget exhausted");
                break;
            }
            if self.settings.end_with_period && !self.period_active(period) {
                info!(period, teacher = %entry.teacher, "period ended, closing session");
                break;
            }

            let names = self.sample(&mut camera, Cohort::Students, &mut capture_failures)?;
            frames += 1;
            let mut fresh: Vec<String> = names.into_iter().filter(|n| !recorded.contains(n)).collect();
            fresh.sort();
            for student in fresh {
                match entry.ledger.record_attendance(&student) {
                    Ok(row) => {
                        self.stats.inc_attendance_recorded();
                        info!(
                            student = %student,
                            subject = %entry.subject,
                            present = row.classes_present,
                            percentage = row.attendance_percentage,
                            "attendance recorded"
                        );
                        recorded.insert(student);
                    }
                    Err(e) => {
                        self.stats.inc_record_failures();
                        error!(student = %student, subject = %entry.subject, "failed to record attendance: {}", e);
                    }
                }
            }
            self.clock.sleep(self.settings.frame_interval);
        }
        drop(camera);

        let summary = SessionSummary {
            period,
            teacher: entry.teacher.clone(),
            subject: entry.subject.clone(),
            recorded,
            frames,
            capture_failures,
        };
        info!(
            period,
            teacher = %summary.teacher,
            subject = %summary.subject,
            students = summary.recorded.len(),
            frames,
            capture_failures,
            "session closed"
        );
        self.stats.finish_session(LastSession {
            period,
            teacher: summary.teacher.clone(),
            subject: summary.subject.clone(),
            students_recorded: summary.recorded.len(),
            frames,
        });
        Ok(CycleOutcome::Closed(summary))
    }

    /// Read one frame and match it. Capture and matcher errors are logged and
    /// count as an empty frame; only fatal errors propagate.
    fn sample(&self, camera: &mut C::Handle, cohort: Cohort, failures: &mut usize) -> Result<HashSet<String>> {
        let frame = match camera.read_frame() {
            Ok(frame) => frame,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("{}", e);
                self.stats.inc_capture_failures();
                *failures += 1;
                return Ok(HashSet::new());
            }
        };
        self.stats.inc_frames();
        match self.matcher.identify(&frame, cohort) {
            Ok(names) => {
                if !names.is_empty() {
                    debug!(?cohort, ?names, "faces recognized");
                }
                Ok(names)
            }
            Err(e) => {
                warn!(?cohort, "face matching failed: {:#}", e);
                Ok(HashSet::new())
            }
        }
    }

    /// The lexicographically smallest recognized teacher with a subject
    /// mapping. Unmapped teachers are reported once per cycle.
    fn select_teacher(&self, names: &HashSet<String>, unmapped_seen: &mut BTreeSet<String>) -> Option<SubjectLedger> {
        let mut sorted: Vec<&String> = names.iter().collect();
        sorted.sort();
        let mut selected = None;
        for name in sorted {
            match self.ledgers.for_teacher(name) {
                Some(entry) => {
                    if selected.is_none() {
                        selected = Some(entry.clone());
                    }
                }
                None => {
                    if unmapped_seen.insert(name.clone()) {
                        self.stats.inc_unmapped_teachers();
                        warn!("{}", AttendanceError::UnmappedTeacher(name.clone()));
                    }
                }
            }
        }
        selected
    }

    fn period_active(&self, period: usize) -> bool {
        self.schedule.current_period(&self.clock.time_of_day()) == Some(period)
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "session state");
        }
        self.state = state;
        self.stats.set_state(state);
    }
}
