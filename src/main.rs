use std::fs;
use std::io::{self, BufRead};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::unbounded;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

use drive_endurance::config::{format_bytes, parse_size_with_suffix};
use drive_endurance::drive_info;
use drive_endurance::logger::current_timestamp;
use drive_endurance::naming;
use drive_endurance::{
    Actions, CapacityPlanner, DriveTestError, Logger, OsSpaceProbe, Result, RunController,
    RunState, SessionSummary, SpaceProbe, StatsSnapshot, TestConfig, TestEvent, TestSession,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Append the diagnostic log to this file as well as stderr.
    #[clap(long, global = true)]
    log_file: Option<PathBuf>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a test session. Without phase flags, writes then reads test data.
    Run {
        #[clap(long)] path: PathBuf,
        #[clap(long)] write: bool,
        #[clap(long)] read: bool,
        #[clap(long)] read_content: bool,
        #[clap(long)] max_files: Option<u32>,
        #[clap(long, default_value = "250")] progress_ms: u64,
        #[clap(long)] direct_io: bool,
        #[clap(long)] json: bool,
    },
    /// Show capacity, reserve and long file size for a device.
    Info {
        #[clap(long)] path: PathBuf,
    },
    /// Remove all test files, corrupted ones included.
    Clean {
        #[clap(long)] path: PathBuf,
    },
    /// Print how a size string is interpreted, e.g. "16M".
    Size {
        value: String,
    },
}

fn setup_signal_handler(controller: Arc<RunController>, logger: &Logger) {
    let log = logger.clone();
    let installed = ctrlc::set_handler(move || {
        log.info("Received Ctrl+C; stopping after the current buffer...");
        controller.request(RunState::Stop);
    });
    if let Err(e) = installed {
        logger.info(format!("Could not install Ctrl+C handler: {}", e));
    }
}

/// `p` pauses, `r` resumes, `s` or `q` stops. Runs until stdin closes.
fn spawn_key_listener(controller: Arc<RunController>, logger: Logger) {
    let thread_logger = logger.clone();
    let spawned = thread::Builder::new()
        .name("key-listener".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let (next, label) = match line.trim() {
                    "p" => (RunState::Pause, "pause"),
                    "r" => (RunState::Run, "resume"),
                    "s" | "q" => (RunState::Stop, "stop"),
                    _ => continue,
                };
                if controller.request(next) {
                    thread_logger.info(format!("Requested {}", label));
                } else {
                    thread_logger.info(format!("Cannot {} from {:?}", label, controller.state()));
                }
            }
        });
    if let Err(e) = spawned {
        logger.info(format!("Keyboard control unavailable: {}", e));
    }
}

fn progress_line(snapshot: &StatsSnapshot) -> String {
    let live = &snapshot.live;
    let (size, unit) = format_bytes(live.size_total);
    format!(
        "{}: {} files, {:.2} {}, {:.2} MiB/s, {} bad files",
        snapshot.phase.label(),
        live.file_count,
        size,
        unit,
        live.bytes_per_second() / (1024.0 * 1024.0),
        snapshot.done.total_error_files()
    )
}

fn report(summary: &SessionSummary, as_json: bool, logger: &Logger) {
    if as_json {
        println!(
            "{:#}",
            json!({
                "stopped": summary.stopped,
                "error_files": summary.done.total_error_files(),
                "phases": summary.done.to_json(),
            })
        );
        return;
    }
    logger.info("--- Endurance Test Summary ---");
    for info in summary.done.iter() {
        let (size, unit) = format_bytes(info.size_total);
        logger.info(format!(
            "  {:<13} {:>6} files {:>10.2} {:<5} {:>9.2} MiB/s  errors: {} files, {} bytes",
            info.phase.label(),
            info.file_count,
            size,
            unit,
            info.bytes_per_second() / (1024.0 * 1024.0),
            info.error_files,
            info.error_bytes
        ));
    }
    if summary.stopped {
        logger.info("Session was stopped before all phases finished.");
    }
}

#[allow(clippy::too_many_arguments)]
fn run_session(
    logger: &Logger,
    path: PathBuf,
    write: bool,
    read: bool,
    read_content: bool,
    max_files: Option<u32>,
    progress_ms: u64,
    direct_io: bool,
    as_json: bool,
) -> Result<i32> {
    let mut actions = Actions::NONE;
    if write {
        actions = actions | Actions::WRITE_TEST_DATA;
    }
    if read {
        actions = actions | Actions::READ_TEST_DATA;
    }
    if read_content {
        actions = actions | Actions::READ_CONTENT;
    }
    if actions.is_empty() {
        actions = Actions::WRITE_TEST_DATA | Actions::READ_TEST_DATA;
    }
    let config = TestConfig {
        root: path,
        actions,
        progress_interval: Duration::from_millis(progress_ms),
        max_new_files: max_files,
        direct_io,
        ..Default::default()
    };
    config.validate()?;
    match drive_info::describe(&config.root) {
        Ok(info) => logger.info(info),
        Err(e) => logger.info(format!(
            "Could not retrieve disk info for {}: {}",
            config.root.display(),
            e
        )),
    }

    let (tx, rx) = unbounded();
    let session = TestSession::new(config, Arc::new(OsSpaceProbe), Box::new(tx), logger.clone());
    setup_signal_handler(session.controller(), logger);
    spawn_key_listener(session.controller(), logger.clone());
    logger.info("Type p + Enter to pause, r to resume, s to stop.");
    let handle = session.spawn()?;

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("[{elapsed_precise}] {spinner} {wide_msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    logger.attach_progress(pb.clone());
    for event in rx.iter() {
        match event {
            TestEvent::PhaseStarted(phase) => logger.info(format!("Phase: {}", phase.label())),
            TestEvent::Progress(snapshot) => {
                let line = progress_line(&snapshot);
                if handle.is_stopping() {
                    pb.set_message(format!("stopping... {}", line));
                } else {
                    pb.set_message(line);
                }
            }
            TestEvent::FileCorrupted { path, error_bytes } => logger.info(format!(
                "Corrupted: {} ({} bad bytes)",
                path.display(),
                error_bytes
            )),
            TestEvent::Done(_) => break,
        }
    }
    pb.finish_and_clear();
    logger.detach_progress();

    let summary = handle.join()?;
    report(&summary, as_json, logger);
    Ok(if summary.done.total_error_files() > 0 { 2 } else { 0 })
}

fn show_info(logger: &Logger, path: &Path) -> Result<i32> {
    match drive_info::describe(path) {
        Ok(info) => println!("{}", info),
        Err(e) => logger.info(format!("Could not retrieve disk info: {}", e)),
    }
    let probe = OsSpaceProbe;
    let space = probe.space(path).map_err(|e| DriveTestError::io(path, e))?;
    let planner = CapacityPlanner::new(&probe, path).map_err(|e| DriveTestError::io(path, e))?;
    let dir = naming::test_dir(path);
    let files = naming::list_test_files(&dir).map_err(|e| DriveTestError::io(&dir, e))?;
    let corrupted = files.iter().filter(|(_, d)| d.corrupted).count();

    for (label, bytes) in [
        ("Total", planner.total()),
        ("Available", space.available),
        ("Reserve", planner.reserve()),
        ("Long file size", planner.long_file_length()),
    ] {
        let (value, unit) = format_bytes(bytes);
        println!("{:<15} {:.2} {} ({} bytes)", label, value, unit, bytes);
    }
    println!("Test files      {} ({} corrupted)", files.len(), corrupted);
    Ok(0)
}

fn clean(logger: &Logger, path: &Path) -> Result<i32> {
    let dir = naming::test_dir(path);
    let files = naming::list_test_files(&dir).map_err(|e| DriveTestError::io(&dir, e))?;
    let mut removed = 0usize;
    for (file, _) in &files {
        match fs::remove_file(file) {
            Ok(()) => removed += 1,
            Err(e) => logger.error("Remove Error", file, e.to_string()),
        }
    }
    // Only succeeds once nothing else is left in the directory.
    if dir.is_dir() && fs::remove_dir(&dir).is_ok() {
        logger.info(format!("Removed {}", dir.display()));
    }
    logger.info(format!("Removed {} of {} test files", removed, files.len()));
    Ok(if removed == files.len() { 0 } else { 1 })
}

fn main_logic(cli: Cli, logger: &Logger) -> Result<i32> {
    logger.info(format!("CLI Command: {:?}", cli.command));
    match cli.command {
        Commands::Run { path, write, read, read_content, max_files, progress_ms, direct_io, json } => {
            run_session(logger, path, write, read, read_content, max_files, progress_ms, direct_io, json)
        }
        Commands::Info { path } => show_info(logger, &path),
        Commands::Clean { path } => clean(logger, &path),
        Commands::Size { value } => {
            let bytes = parse_size_with_suffix(&value)?;
            let (scaled, unit) = format_bytes(bytes);
            println!("{} bytes ({:.2} {})", bytes, scaled, unit);
            Ok(0)
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let logger = match &cli.log_file {
        Some(path) => Logger::with_file(path).unwrap_or_else(|e| {
            eprintln!(
                "[{}] Failed to open log file '{}': {}. Further logs will only go to stderr.",
                current_timestamp(),
                path.display(),
                e
            );
            Logger::stderr()
        }),
        None => Logger::stderr(),
    };
    let main_result = panic::catch_unwind(AssertUnwindSafe(|| main_logic(cli, &logger)));
    let exit_code = match main_result {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            logger.info(format!("Failed: {}", e));
            1
        }
        Err(panic_payload) => {
            let mut panic_msg = String::from("A critical error occurred: panicked!");
            if let Some(s) = panic_payload.downcast_ref::<String>() {
                panic_msg.push_str(&format!("\nPanic message: {}", s));
            } else if let Some(s) = panic_payload.downcast_ref::<&str>() {
                panic_msg.push_str(&format!("\nPanic message: {}", s));
            }
            logger.info(panic_msg);
            101
        }
    };
    std::process::exit(exit_code);
}
