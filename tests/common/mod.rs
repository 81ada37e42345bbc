#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::DynamicImage;
use rollcall_backend_sqlite::api::routes;
use rollcall_backend_sqlite::db::{self, ledger::LedgerSet};
use rollcall_backend_sqlite::error::{AttendanceError, Result};
use rollcall_backend_sqlite::pipeline::camera::{Camera, FrameSource};
use rollcall_backend_sqlite::pipeline::face::{Cohort, FaceMatcher};
use rollcall_backend_sqlite::pipeline::schedule::{Schedule, TeachingPeriod};
use rollcall_backend_sqlite::pipeline::session::{Clock, QuitSignal};
use rollcall_backend_sqlite::stats::CaptureStats;
use rollcall_backend_sqlite::utils::config::{Config, TeacherAssignment};
use rollcall_backend_sqlite::AppState;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Config rooted in `tmp` with the given (teacher, subject, database) mappings.
pub fn test_config(tmp: &TempDir, teachers: &[(&str, &str, &str)]) -> Config {
    let teachers: BTreeMap<String, TeacherAssignment> = teachers
        .iter()
        .map(|(t, s, d)| (t.to_string(), TeacherAssignment { subject: s.to_string(), database: d.to_string() }))
        .collect();
    Config {
        data: tmp.path().to_path_buf(),
        periods: vec![TeachingPeriod::new("09:00", "09:59"), TeachingPeriod::new("10:00", "10:59")],
        teachers,
        ..Config::default()
    }
}

pub fn ledgers_for(config: &Config) -> LedgerSet {
    let ledgers = LedgerSet::from_assignments(&config.data, &config.teachers);
    ledgers.initialize_all().unwrap();
    ledgers
}

/// Registry and ledgers created, ready to serve.
pub fn test_state(config: Config) -> Arc<AppState> {
    db::open_or_create(config.registry_path()).unwrap();
    let ledgers = ledgers_for(&config);
    Arc::new(AppState::new(config, ledgers, Arc::new(CaptureStats::new())))
}

pub struct TestClient {
    pub base: String,
    pub client: reqwest::Client,
}

impl TestClient {
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(format!("{}{}", self.base, path)).send().await.unwrap()
    }

    pub async fn post(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client.post(format!("{}{}", self.base, path)).json(&body).send().await.unwrap()
    }

    pub async fn delete(&self, path: &str) -> reqwest::Response {
        self.client.delete(format!("{}{}", self.base, path)).send().await.unwrap()
    }
}

pub async fn spawn_app(state: Arc<AppState>) -> TestClient {
    let app = routes::router(state);
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    TestClient { base: format!("http://127.0.0.1:{}", port), client: reqwest::Client::new() }
}

pub fn test_schedule() -> Schedule {
    Schedule::new(vec![TeachingPeriod::new("09:00", "09:59"), TeachingPeriod::new("10:00", "10:59")]).unwrap()
}

pub fn names(list: &[&str]) -> HashSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Camera that refuses a second acquisition while a handle is alive, so a
/// leaked handle shows up as `DeviceUnavailable` on the next cycle.
#[derive(Clone, Default)]
pub struct FakeCamera {
    pub acquisitions: Arc<AtomicUsize>,
    pub live: Arc<AtomicBool>,
    pub unavailable: bool,
    /// Per read, in order: `true` fails the read. Reads past the end succeed.
    pub failing_reads: Arc<Mutex<VecDeque<bool>>>,
    /// After this many reads the stream is gone for good.
    pub lost_after: Option<usize>,
    pub reads: Arc<AtomicUsize>,
}

impl FakeCamera {
    pub fn failing_reads(pattern: &[bool]) -> Self {
        Self { failing_reads: Arc::new(Mutex::new(pattern.iter().copied().collect())), ..Self::default() }
    }
}

pub struct FakeHandle {
    live: Arc<AtomicBool>,
    failing_reads: Arc<Mutex<VecDeque<bool>>>,
    lost_after: Option<usize>,
    reads: Arc<AtomicUsize>,
}

impl Camera for FakeCamera {
    type Handle = FakeHandle;

    fn acquire(&self) -> Result<FakeHandle> {
        if self.unavailable || self.live.swap(true, Ordering::SeqCst) {
            return Err(AttendanceError::DeviceUnavailable { device: "fake0".into(), reason: "busy".into() });
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(FakeHandle {
            live: self.live.clone(),
            failing_reads: self.failing_reads.clone(),
            lost_after: self.lost_after,
            reads: self.reads.clone(),
        })
    }
}

impl FrameSource for FakeHandle {
    fn read_frame(&mut self) -> Result<DynamicImage> {
        let done = self.reads.fetch_add(1, Ordering::SeqCst);
        if self.lost_after.is_some_and(|n| done >= n) {
            return Err(AttendanceError::DeviceUnavailable { device: "fake0".into(), reason: "stream ended".into() });
        }
        if self.failing_reads.lock().unwrap().pop_front().unwrap_or(false) {
            return Err(AttendanceError::CaptureFailure("fake0: read timed out".into()));
        }
        Ok(DynamicImage::new_rgb8(1, 1))
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

/// Scripted recognition results, one entry consumed per call and cohort.
#[derive(Default)]
pub struct FakeMatcher {
    teachers: Mutex<VecDeque<HashSet<String>>>,
    students: Mutex<VecDeque<HashSet<String>>>,
}

impl FakeMatcher {
    pub fn new(teachers: Vec<HashSet<String>>, students: Vec<HashSet<String>>) -> Self {
        Self { teachers: Mutex::new(teachers.into()), students: Mutex::new(students.into()) }
    }
}

impl FaceMatcher for FakeMatcher {
    fn identify(&self, _frame: &DynamicImage, cohort: Cohort) -> anyhow::Result<HashSet<String>> {
        let queue = match cohort {
            Cohort::Teachers => &self.teachers,
            Cohort::Students => &self.students,
        };
        Ok(queue.lock().unwrap().pop_front().unwrap_or_default())
    }
}

/// Time advances one script entry per `sleep`. Past the end of the script it
/// reads "23:59", outside every test period.
pub struct FakeClock {
    times: Vec<String>,
    step: AtomicUsize,
    quit_after: Option<(usize, QuitSignal)>,
}

impl FakeClock {
    pub fn new(times: &[&str]) -> Self {
        Self { times: times.iter().map(|t| t.to_string()).collect(), step: AtomicUsize::new(0), quit_after: None }
    }

    /// `n` copies of `time`.
    pub fn steady(time: &str, n: usize) -> Self {
        Self::new(&vec![time; n])
    }

    /// Raise `quit` once `sleeps` sleeps have happened.
    pub fn quit_after(mut self, sleeps: usize, quit: QuitSignal) -> Self {
        self.quit_after = Some((sleeps, quit));
        self
    }

    pub fn sleeps(&self) -> usize {
        self.step.load(Ordering::SeqCst)
    }
}

impl Clock for FakeClock {
    fn time_of_day(&self) -> String {
        let step = self.step.load(Ordering::SeqCst);
        self.times.get(step).cloned().unwrap_or_else(|| "23:59".to_string())
    }

    fn sleep(&self, _duration: Duration) {
        let step = self.step.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, quit)) = &self.quit_after {
            if step == *after {
                quit.raise();
            }
        }
    }
}

pub fn data_path(tmp: &TempDir, name: &str) -> PathBuf {
    tmp.path().join(name)
}
