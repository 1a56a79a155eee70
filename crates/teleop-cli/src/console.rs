//! Operator console – single-key commands read from stdin while a session
//! runs.
//!
//! Supported commands:
//!   r | recal    – capture a new calibration origin
//!   s | stop     – emergency stop (damping, session ends)
//!   q | quit     – graceful stop (exit arm control, then damping)
//!   status       – print one status line
//!   h | help     – show this list

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use teleop_middleware::{EventBus, Topic};
use teleop_types::{Event, EventPayload};

const SOURCE: &str = "teleop-cli::console";

/// What a console line asks for.
#[derive(Debug, Clone)]
pub enum ConsoleCommand {
    Signal(EventPayload),
    Help,
}

/// Parse one console line.  `None` for blank or unknown input.
pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let payload = match line.trim().to_ascii_lowercase().as_str() {
        "r" | "recal" | "recalibrate" => EventPayload::RecalibrateRequested,
        "s" | "stop" => EventPayload::EmergencyStop {
            reason: "operator console stop".to_string(),
        },
        "q" | "quit" | "exit" => EventPayload::ShutdownRequested,
        "status" => EventPayload::StatusRequested,
        "h" | "help" | "?" => return Some(ConsoleCommand::Help),
        _ => return None,
    };
    Some(ConsoleCommand::Signal(payload))
}

/// Read commands until EOF or until `done` is set, publishing each one on
/// [`Topic::OperatorSignals`].  Blocking; run it on its own thread.
pub fn run(bus: EventBus, done: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if done.load(Ordering::SeqCst) {
            break;
        }
        print!("{} ", "teleop>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }
        if line.trim().is_empty() || done.load(Ordering::SeqCst) {
            continue;
        }

        match parse_command(&line) {
            Some(ConsoleCommand::Help) => print_help(),
            Some(ConsoleCommand::Signal(payload)) => {
                let quitting = matches!(
                    payload,
                    EventPayload::ShutdownRequested | EventPayload::EmergencyStop { .. }
                );
                if let Err(e) = bus.publish_to(Topic::OperatorSignals, Event::new(SOURCE, payload)) {
                    println!("{}: {}", "Signal not delivered".red(), e);
                }
                if quitting {
                    break;
                }
            }
            None => println!(
                "{} '{}'. Type {} for available commands.",
                "Unknown command:".red(),
                line.trim().yellow(),
                "help".bold()
            ),
        }
    }
}

pub fn print_help() {
    println!();
    println!("  {}", "Console commands".bold());
    println!("    {}  capture a new calibration origin", "r, recal ".cyan());
    println!("    {}  emergency stop", "s, stop  ".cyan());
    println!("    {}  leave arm control and stop", "q, quit  ".cyan());
    println!("    {}  print a status line", "status   ".cyan());
    println!();
}
