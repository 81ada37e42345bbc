use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rollcall_backend_sqlite::db::{self, ledger::LedgerSet};
use rollcall_backend_sqlite::stats::CaptureStats;
use rollcall_backend_sqlite::utils::config::Config;
use rollcall_backend_sqlite::utils::logging;
use rollcall_backend_sqlite::{api, AppState};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "rollcall")]
#[command(about = "Face-recognition attendance capture and attendance ledger API")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "ATTEND_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Run the webcam capture loop
    Capture,
    /// Capture loop and HTTP API in one process
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let args = Args::parse();
    let cfg = Config::load_from(args.config.as_deref())?;

    std::fs::create_dir_all(&cfg.data).with_context(|| format!("Failed to create data directory {:?}", cfg.data))?;
    db::open_or_create(cfg.registry_path())?;
    let ledgers = LedgerSet::from_assignments(&cfg.data, &cfg.teachers);
    ledgers.initialize_all()?;
    let stats = Arc::new(CaptureStats::new());

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cfg, ledgers, stats).await,
        Command::Capture => capture(cfg, ledgers, stats).await,
        Command::Run => {
            let server = serve(cfg.clone(), ledgers.clone(), stats.clone());
            tokio::pin!(server);
            tokio::select! {
                r = &mut server => r,
                r = capture(cfg, ledgers, stats) => {
                    r?;
                    info!("capture finished; API keeps serving");
                    server.await
                }
            }
        }
    }
}

async fn serve(cfg: Config, ledgers: LedgerSet, stats: Arc<CaptureStats>) -> anyhow::Result<()> {
    let port = cfg.port;
    let state = Arc::new(AppState::new(cfg, ledgers, stats));
    let app = api::routes::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(feature = "facial-recognition")]
async fn capture(cfg: Config, ledgers: LedgerSet, stats: Arc<CaptureStats>) -> anyhow::Result<()> {
    use rollcall_backend_sqlite::pipeline::camera::FfmpegCamera;
    use rollcall_backend_sqlite::pipeline::face::Recognizer;
    use rollcall_backend_sqlite::pipeline::onnx::OnnxFaceEncoder;
    use rollcall_backend_sqlite::pipeline::session::{ControllerSettings, QuitSignal, SessionController, SystemClock};

    let schedule = cfg.schedule()?;
    let capture_cfg = cfg.capture.clone();
    let (teacher_dir, student_dir) = (cfg.teacher_images_dir(), cfg.student_images_dir());
    let mut encoder = OnnxFaceEncoder::new(cfg.models_dir());
    encoder.initialize().await?;

    let quit = QuitSignal::new();
    let _stdin = quit.listen_stdin();
    info!("type q and press Enter to close the current session");

    let summaries = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let recognizer = Recognizer::enroll(
            encoder,
            &teacher_dir,
            &student_dir,
            capture_cfg.tolerance,
        )?;
        let camera = FfmpegCamera::new(capture_cfg.camera.clone());
        let settings = ControllerSettings::from(&capture_cfg);
        let mut controller = SessionController::new(camera, recognizer, SystemClock, schedule, ledgers, settings)
            .with_quit(quit)
            .with_stats(stats);
        Ok(controller.run()?)
    })
    .await??;
    info!(sessions = summaries.len(), "capture run complete");
    Ok(())
}

#[cfg(not(feature = "facial-recognition"))]
async fn capture(_cfg: Config, _ledgers: LedgerSet, _stats: Arc<CaptureStats>) -> anyhow::Result<()> {
    anyhow::bail!("capture needs a build with `--features facial-recognition`")
}
