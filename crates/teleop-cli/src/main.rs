//! `teleop-cli` – operator entry point for a teleoperation session.
//!
//! This binary:
//!
//! 1. Loads `~/.teleop/config.toml` (or `--config`); runs a **First-Run
//!    Wizard** when the default file is absent.
//! 2. Offers to reuse the last persisted calibration.
//! 3. Connects the robot (WebSocket controller, or `--sim`) and opens the
//!    pose ingress endpoint for the headset.
//! 4. Runs the control loop with an operator console on stdin.
//! 5. Intercepts **Ctrl-C**: the first press leaves arm control gracefully,
//!    the second is an emergency stop.

mod config;
mod console;

use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use teleop_hal::{RobotSession, SimRobotSession};
use teleop_kernel::{EmergencyStopLatch, WorkspaceFrame};
use teleop_middleware::{
    EventBus, PoseIngestServer, Topic, WebSocketRobotSession, pose_channel,
};
use teleop_runtime::{CalibrationStore, ControlLoop, LoopSummary, TeleopConfig, init_tracing};
use teleop_types::{CalibrationOrigin, Event, EventPayload, LoopState, TeleopError};

const SOURCE: &str = "teleop-cli";

#[derive(Parser, Debug)]
#[command(name = "teleop", version, about = "Headset-to-robot teleoperation")]
struct Args {
    /// Config file to use instead of ~/.teleop/config.toml.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Drive an in-process simulated robot instead of the controller.
    #[arg(long)]
    sim: bool,

    /// Discard any stored calibration and capture a new one.
    #[arg(long, conflicts_with = "reuse_calibration")]
    fresh_calibration: bool,

    /// Reuse the stored calibration without asking.
    #[arg(long)]
    reuse_calibration: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Before the Tokio runtime: the OTLP exporter is a simple (blocking) one.
    let _guard = init_tracing("teleop");

    print_banner();

    let cfg = match load_config(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let store = CalibrationStore::new(
        cfg.calibration
            .path
            .clone()
            .unwrap_or_else(config::default_calibration_path),
    );
    let origin = choose_calibration(&args, &cfg, &store);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start async runtime".red(), e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run_session(&args, cfg, store, origin)) {
        Ok(summary) => {
            print_summary(&summary);
            if summary.final_state == LoopState::Stopped {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            println!("{}: {}", "Session could not start".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

async fn run_session(
    args: &Args,
    cfg: TeleopConfig,
    store: CalibrationStore,
    origin: Option<CalibrationOrigin>,
) -> Result<LoopSummary, TeleopError> {
    let bus = EventBus::default();
    let latch = EmergencyStopLatch::new();

    let session: Arc<dyn RobotSession> = if args.sim {
        println!("  Robot: {}", "simulated".yellow());
        Arc::new(SimRobotSession::new())
    } else {
        println!("  Connecting to robot at {} …", cfg.robot.url.dimmed());
        let link = WebSocketRobotSession::connect(cfg.robot.link_config(&cfg.control)).await?;
        println!("  Robot: {}", "online".green());
        Arc::new(link)
    };

    let (feed, poses) = pose_channel(cfg.pose_stale_after());
    let addr = cfg.pose_source.bind_addr()?;
    let listener = PoseIngestServer::bind(addr).await?;
    println!("  Pose stream: listening on {}", addr.to_string().bold());
    let server = PoseIngestServer::new(feed, bus.clone(), cfg.gripper.input);
    let ingest = tokio::spawn(async move {
        if let Err(e) = server.serve(listener).await {
            warn!(error = %e, "Pose ingress stopped");
        }
    });

    if cfg.video.enabled {
        info!("Video enabled: camera forwarding runs outside this process");
    }

    let mut control = ControlLoop::new(&cfg, session, Arc::new(poses), bus.clone(), latch.clone())?
        .with_calibration_store(store);
    if let Some(origin) = origin {
        control = control.with_origin(origin);
    }

    install_ctrlc(bus.clone(), latch);
    let alerts = spawn_alert_printer(&bus);

    let done = Arc::new(AtomicBool::new(false));
    {
        let bus = bus.clone();
        let done = done.clone();
        std::thread::spawn(move || console::run(bus, done));
    }
    console::print_help();

    let summary = control.run().await;
    done.store(true, Ordering::SeqCst);
    ingest.abort();
    alerts.abort();
    Ok(summary)
}

/// First Ctrl-C: graceful stop.  Second: emergency stop.
fn install_ctrlc(bus: EventBus, latch: EmergencyStopLatch) {
    let presses = AtomicUsize::new(0);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        if presses.fetch_add(1, Ordering::SeqCst) == 0 {
            println!(
                "{}",
                "⚠  Ctrl-C received – leaving arm control (press again to emergency stop) …"
                    .yellow()
                    .bold()
            );
            let event = Event::new(SOURCE, EventPayload::ShutdownRequested);
            if bus.publish_to(Topic::OperatorSignals, event).is_err() {
                latch.trigger("operator Ctrl-C");
            }
        } else {
            println!("{}", "⛔ Second Ctrl-C – EMERGENCY STOP".red().bold());
            latch.trigger("operator Ctrl-C (second press)");
        }
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use the console to stop");
    }
}

/// Print operator-relevant alerts as they happen.
fn spawn_alert_printer(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe_to(Topic::SystemAlerts);
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event.payload {
                EventPayload::TrackingLost { hand, detail } => {
                    println!("  {} {hand} hand: {detail}", "tracking lost".yellow());
                }
                EventPayload::WorkspaceClamped { hand, total } => {
                    println!(
                        "  {} {hand} arm at workspace limit ({total} clamps so far)",
                        "clamped".dimmed()
                    );
                }
                EventPayload::SessionFault { code, message } => {
                    println!("  {} [{code}] {message}", "FAULT".red().bold());
                }
                _ => {}
            }
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Config and calibration
// ─────────────────────────────────────────────────────────────────────────────

fn load_config(args: &Args) -> Result<TeleopConfig, String> {
    if let Some(path) = &args.config {
        let cfg = config::load_from(path)?
            .ok_or_else(|| format!("no config file at {}", path.display()))?;
        println!("  Config loaded from {}", path.display().to_string().bold());
        return Ok(cfg);
    }

    let path = config::config_path();
    match config::load_from(&path)? {
        Some(cfg) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            Ok(cfg)
        }
        None => {
            let mut cfg = run_first_run_wizard();
            match config::save_to(&cfg, &path) {
                Ok(()) => println!(
                    "\n  {} Config saved to {}\n",
                    "✓".green().bold(),
                    path.display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg.validate().map_err(|e| e.to_string())?;
            Ok(cfg)
        }
    }
}

fn choose_calibration(
    args: &Args,
    cfg: &TeleopConfig,
    store: &CalibrationStore,
) -> Option<CalibrationOrigin> {
    if args.fresh_calibration {
        if let Err(e) = store.discard() {
            warn!(error = %e, "Could not discard stored calibration");
        }
        return None;
    }

    let record = match store.peek() {
        Ok(Some(record)) => record,
        Ok(None) => return None,
        Err(e) => {
            println!("  {}: {}", "Stored calibration unreadable".yellow(), e);
            return None;
        }
    };

    let captured = record
        .captured_at
        .with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M:%S");
    let reuse = args.reuse_calibration || {
        let answer = prompt_line(
            &format!("  Reuse calibration captured {captured}? [Y/n]: "),
            "y",
        );
        !matches!(answer.to_ascii_lowercase().as_str(), "n" | "no")
    };
    if !reuse {
        return None;
    }

    match record.into_origin(&cfg.motion) {
        Ok(origin) => {
            println!("  Reusing calibration captured {captured}");
            Some(origin)
        }
        Err(e) => {
            println!("  {}: {}", "Stored calibration not usable".yellow(), e);
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> TeleopConfig {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║       Teleop First-Run Wizard        ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up a session.\n");

    let mut cfg = TeleopConfig::default();

    cfg.robot.url = prompt_line(
        &format!("  Robot controller URL [{}]: ", cfg.robot.url),
        &cfg.robot.url,
    );
    cfg.pose_source.bind = prompt_line(
        &format!("  Pose stream listen address [{}]: ", cfg.pose_source.bind),
        &cfg.pose_source.bind,
    );

    let scale = prompt_line(
        &format!("  Motion scale [{}]: ", cfg.motion.motion_scale),
        &cfg.motion.motion_scale.to_string(),
    );
    if let Ok(s) = scale.parse::<f32>() {
        cfg.motion.motion_scale = s;
    }

    println!("  Workspace frame?");
    println!("    1) Relative to the arm-control posture  (default)");
    println!("    2) Absolute robot base frame");
    if prompt_line("  Enter choice [1]: ", "1") == "2" {
        cfg.workspace.frame = WorkspaceFrame::Absolute;
    }

    println!("  Which hands drive the robot?");
    println!("    1) Both  (default)");
    println!("    2) Left only");
    println!("    3) Right only");
    match prompt_line("  Enter choice [1]: ", "1").as_str() {
        "2" => cfg.hands.right = false,
        "3" => cfg.hands.left = false,
        _ => {}
    }

    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner and summary
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"  __       __                "#.bold().cyan());
    println!("{}", r#" / /____  / /__ ___  ___    "#.bold().cyan());
    println!("{}", r#"/ __/ -_)/ / -_) _ \/ _ \   "#.bold().cyan());
    println!("{}", r#"\__/\__//_/\__/\___/ .__/   "#.bold().cyan());
    println!("{}", r#"                  /_/       "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "teleop".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Headset-to-robot teleoperation");
    println!();
}

fn print_summary(summary: &LoopSummary) {
    let state = match summary.final_state {
        LoopState::Stopped => summary.final_state.to_string().green(),
        LoopState::EmergencyStopped => summary.final_state.to_string().red().bold(),
        _ => summary.final_state.to_string().yellow(),
    };
    println!();
    println!("  Session {} ended: {}", summary.session_id.to_string().dimmed(), state);
    if let Some(reason) = &summary.stop_reason {
        println!("    stop reason        {reason}");
    }
    if let Some(fault) = &summary.fault {
        println!("    fault              {fault}");
    }
    println!("    ticks              {}", summary.ticks);
    println!("    commands sent      {}", summary.dispatched);
    println!("    held ticks         {}", summary.held_ticks);
    println!("    tracking dropouts  {}", summary.tracking_dropouts);
    println!("    dispatch failures  {}", summary.dispatch_failures);
    println!("    gate rejections    {}", summary.rejected_commands);
    println!("    workspace clamps   {}", summary.workspace_clamps);
    println!(
        "    calibrations       {} ({} failed attempts)",
        summary.calibrations, summary.calibration_failures
    );
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
