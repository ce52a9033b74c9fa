mod menu;

use std::net::UdpSocket;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use client::{Channel, ClientSession};
use common::logging::{init_logging, parse_level};
use common::{Command, LinkConfig, LinkError, LogSink};
use controller::{CommandServer, PidLaw, SharedStatus, SimulatedPendulum};

const DEFAULT_CONFIG: &str = "configs/link.toml";

/// Controller currently owned by the menu, if any. Ctrl-C terminates it.
type ActiveController = Arc<Mutex<Option<SharedStatus>>>;

fn main() {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = match LinkConfig::from_file_or_default(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load {config_path}: {err}");
            std::process::exit(1);
        }
    };

    let sink = LogSink::new(config.controller.log_capacity);
    init_logging(Some(&sink), parse_level(&config.controller.log_level));

    let active: ActiveController = Arc::new(Mutex::new(None));
    install_interrupt_handler(Arc::clone(&active));

    println!("===========================================");
    println!("Welcome to the Pendulum Controller Link");
    println!("===========================================");
    println!("Configuration: {config_path}");

    loop {
        menu::show_menu();

        match menu::get_user_choice() {
            Ok(1) => run_controller(&config, &sink, &active),
            Ok(2) => run_console_client(&config),
            Ok(3) => run_loopback_demo(&config, &sink, &active),
            Ok(4) => run_dashboard(&config_path),
            Ok(5) => {
                println!("Goodbye!");
                break;
            }
            _ => println!("Invalid choice. Please select 1-5."),
        }
    }
}

/// First Ctrl-C stops the running controller; a second one, or one with no
/// controller running, exits the process.
fn install_interrupt_handler(active: ActiveController) {
    let result = ctrlc::set_handler(move || {
        let guard = active.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(shared) if !shared.terminate_requested() => {
                warn!("Interrupt received, stopping controller (press again to exit).");
                shared.request_terminate();
            }
            _ => std::process::exit(130),
        }
    });
    if let Err(err) = result {
        warn!("Could not install Ctrl-C handler: {err}");
    }
}

fn set_active(active: &ActiveController, shared: Option<SharedStatus>) {
    *active.lock().unwrap_or_else(PoisonError::into_inner) = shared;
}

fn run_controller(config: &LinkConfig, sink: &LogSink, active: &ActiveController) {
    println!("\n=== Running Controller ===");
    println!(
        "Loop rate {} Hz, commands on {}, telemetry to {}",
        config.controller.loop_rate_hz, config.controller.command_addr, config.controller.telemetry_target
    );
    println!("Press Ctrl-C to stop.");

    let shared = SharedStatus::new();
    set_active(active, Some(shared.clone()));
    if let Err(err) = controller::run_controller(config, shared, sink.clone()) {
        error!("Controller stopped: {err}");
    }
    set_active(active, None);

    menu::wait_for_enter();
}

fn run_console_client(config: &LinkConfig) {
    println!("\n=== Console Client ===");
    let mut session = ClientSession::new(config.client.clone());
    if let Err(err) = session.connect() {
        println!("Failed to connect to {}: {err}", config.client.command_addr);
        menu::wait_for_enter();
        return;
    }

    println!("Commands: e=enable d=disable m=toggle mode z=zero p=status x=export s=shutdown q=quit");
    loop {
        let input = menu::prompt("> ");
        session.update();
        if !session.is_connected() {
            println!("Disconnected from controller.");
            break;
        }
        let command = match input.as_str() {
            "e" => Some(Command::Enable),
            "d" => Some(Command::Disable),
            "m" => Some(Command::ToggleMode),
            "z" => Some(Command::ZeroReference),
            "s" => Some(Command::Shutdown),
            "p" => {
                print_session(&session);
                None
            }
            "x" => {
                let path = menu::prompt("CSV path: ");
                match session.history().export_csv(&path) {
                    Ok(rows) => println!("Saved {rows} rows to {path}"),
                    Err(err) => println!("Export failed: {err}"),
                }
                None
            }
            "q" => break,
            _ => {
                println!("Unknown command.");
                None
            }
        };
        if let Some(command) = command {
            if let Err(err) = session.send(command) {
                println!("Command failed: {err}");
            }
        }
    }
    session.disconnect();
    menu::wait_for_enter();
}

fn print_session(session: &ClientSession) {
    let status = session.status();
    let stats = session.stats();
    println!(
        "running={} enabled={} mode={} frequency={:.1} Hz misses={} wait={:.1}%",
        status.running,
        status.enabled,
        status.mode,
        status.frequency,
        status.misses,
        status.wait_ratio * 100.0
    );
    println!(
        "sent={} received={} lost={} ({:.2}%) history={}",
        stats.messages_sent,
        stats.packets_received,
        stats.packets_lost,
        stats.loss_ratio() * 100.0,
        session.history().len()
    );
    for record in session.remote_logs().iter().rev().take(5).rev() {
        println!("  [{:?}] {}", record.severity, record.message);
    }
}

/// Runs a controller and a client in this process over localhost.
fn run_loopback_demo(config: &LinkConfig, sink: &LogSink, active: &ActiveController) {
    println!("\n=== Loopback Demo ===");
    if let Err(err) = loopback_demo(config, sink, active) {
        error!("Loopback demo failed: {err}");
    }
    set_active(active, None);
    menu::wait_for_enter();
}

fn loopback_demo(config: &LinkConfig, sink: &LogSink, active: &ActiveController) -> Result<(), LinkError> {
    let telemetry_port = UdpSocket::bind("127.0.0.1:0")?.local_addr()?.port();
    let mut link = config.clone();
    link.controller.command_addr = "127.0.0.1:0".to_string();
    link.controller.telemetry_bind = "127.0.0.1:0".to_string();
    link.controller.telemetry_target = format!("127.0.0.1:{telemetry_port}");
    link.client.telemetry_bind = format!("127.0.0.1:{telemetry_port}");

    let shared = SharedStatus::new();
    set_active(active, Some(shared.clone()));
    let mut server = CommandServer::bind(&link.controller, shared, sink.clone())?;
    link.client.command_addr = server.local_addr()?.to_string();

    let plant = SimulatedPendulum::new(link.controller.period()).with_initial_angle(0.2);
    let law = PidLaw::new(&link.control);
    let server_thread = thread::Builder::new()
        .name("command".to_string())
        .spawn(move || server.serve_session(plant, law))?;

    let mut session = ClientSession::new(link.client.clone());
    session.connect()?;
    session.send(Command::Enable)?;

    let started = Instant::now();
    let mut toggled = false;
    while started.elapsed() < Duration::from_secs(3) && session.is_connected() {
        thread::sleep(Duration::from_millis(250));
        session.update();
        if !toggled && started.elapsed() > Duration::from_millis(1500) {
            session.send(Command::ToggleMode)?;
            toggled = true;
        }
        print_session(&session);
    }

    session.send(Command::Shutdown)?;
    match server_thread.join() {
        Ok(Ok(outcome)) => info!(end = ?outcome.end, ticks = outcome.report.ticks, "Loopback session finished"),
        Ok(Err(err)) => error!("Controller session failed: {err}"),
        Err(_) => error!("Command thread panicked."),
    }
    thread::sleep(Duration::from_millis(200));
    session.drain_queue();

    let history = session.history();
    println!(
        "Collected {} samples, last enable={:?}, last command={:?}",
        history.len(),
        history.channel(Channel::Enable).back(),
        history.channel(Channel::Command).back()
    );
    print_session(&session);
    Ok(())
}

fn run_dashboard(config_path: &str) {
    println!("\n=== Launching Dashboard ===");
    println!("Note: Close the GUI window to return to menu");

    // the GUI owns its own event loop, so it runs as a separate process
    match std::process::Command::new("cargo")
        .args(["run", "--release", "--bin", "visualiser", config_path])
        .status()
    {
        Ok(status) if status.success() => {
            println!("Dashboard closed successfully.");
        }
        Ok(status) => {
            println!("Dashboard exited with status: {status}");
        }
        Err(e) => {
            println!("Failed to launch dashboard: {e}");
            println!("Make sure you have the visualiser binary available.");
        }
    }

    menu::wait_for_enter();
}
