use bytes::BytesMut;
use client::spsc;
use client::{Channel, ClientSession, GapDetector};
use common::config::LinkConfig;
use common::logging::init_logging;
use common::wire::{decode, encode, Wire};
use common::{Command, LinkError, LogRecord, LogSink, PingResponse, PlotPoint, Sample, Severity, Status};
use controller::{CommandServer, PidLaw, SessionOutcome, SharedStatus, SimulatedPendulum};
use criterion::{black_box, Criterion};
use std::env;
use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

struct SessionRun {
    outcome: SessionOutcome,
    final_status: Status,
    session: ClientSession,
    elapsed: Duration,
}

/// Runs the controller and a client over localhost for `duration`.
fn run_loopback_session(config: &LinkConfig, duration: Duration) -> Result<SessionRun, LinkError> {
    let telemetry_port = UdpSocket::bind("127.0.0.1:0")?.local_addr()?.port();
    let mut link = config.clone();
    link.controller.command_addr = "127.0.0.1:0".to_string();
    link.controller.telemetry_bind = "127.0.0.1:0".to_string();
    link.controller.telemetry_target = format!("127.0.0.1:{telemetry_port}");
    link.client.telemetry_bind = format!("127.0.0.1:{telemetry_port}");

    let mut server = CommandServer::bind(&link.controller, SharedStatus::new(), LogSink::new(100))?;
    link.client.command_addr = server.local_addr()?.to_string();
    let plant = SimulatedPendulum::new(link.controller.period()).with_initial_angle(0.2);
    let law = PidLaw::new(&link.control);
    let server_thread = thread::spawn(move || server.serve_session(plant, law));

    let mut session = ClientSession::new(link.client.clone());
    session.connect()?;
    session.send(Command::Enable)?;

    let start = Instant::now();
    let mut final_status = Status::default();
    while start.elapsed() < duration && session.is_connected() {
        thread::sleep(Duration::from_millis(20));
        session.update();
        final_status = session.status();
    }
    let elapsed = start.elapsed();

    session.send(Command::Shutdown)?;
    let outcome = match server_thread.join() {
        Ok(result) => result?,
        Err(_) => {
            error!("Command thread panicked.");
            return Err(LinkError::Disconnected);
        }
    };
    let deadline = Instant::now() + Duration::from_secs(2);
    while session.is_streaming() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    session.drain_queue();

    Ok(SessionRun {
        outcome,
        final_status,
        session,
        elapsed,
    })
}

fn analyze_session(run: &SessionRun, rate_hz: f64) {
    let report = run.outcome.report;
    let stats = run.session.stats();
    let history = run.session.history();

    println!("\n=== Loopback Session Analysis ===");
    println!("Session end: {:?}", run.outcome.end);
    println!("Wall time: {:.2}s", run.elapsed.as_secs_f64());
    println!("Ticks: {} (expected ~{:.0})", report.ticks, run.elapsed.as_secs_f64() * rate_hz);
    let miss_pct = if report.ticks > 0 {
        report.misses as f64 / report.ticks as f64 * 100.0
    } else {
        0.0
    };
    println!("Deadline misses: {} ({:.2}%)", report.misses, miss_pct);
    println!(
        "Measured rate: {:.1} Hz (target {:.1} Hz), idle {:.1}%",
        run.final_status.frequency,
        rate_hz,
        run.final_status.wait_ratio * 100.0
    );
    println!(
        "Telemetry: {} sent, {} dropped at send, {} received, {} lost ({:.3}%)",
        report.samples_sent,
        report.samples_dropped,
        stats.packets_received,
        stats.packets_lost,
        stats.loss_ratio() * 100.0
    );

    let times = history.time();
    if times.len() > 1 {
        let span = times.back().copied().unwrap_or(0.0) - times.front().copied().unwrap_or(0.0);
        println!("History: {} samples over {:.2}s of controller time", times.len(), span);
    }
    let commands = history.channel(Channel::Command);
    if !commands.is_empty() {
        let min = commands.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let max = commands.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        println!("Command range (V): min={min:.3}, max={max:.3}");
    }
}

fn benchmark_sample(plots: usize) -> Sample {
    Sample {
        tick: 123_456,
        time: 123.456,
        sense: 0.25,
        command: -1.5,
        midori: 2.7,
        encoder: 4096,
        enable: true,
        plots: (0..plots)
            .map(|i| PlotPoint {
                label: format!("plot{i}"),
                value: i as f64,
            })
            .collect(),
    }
}

fn benchmark_codec(c: &mut Criterion) {
    let sample = benchmark_sample(5);
    let encoded = encode(&sample);
    let mut scratch = BytesMut::with_capacity(256);

    c.bench_function("sample_encode", |b| {
        b.iter(|| {
            scratch.clear();
            black_box(&sample).encode(&mut scratch);
            black_box(scratch.len());
        });
    });
    c.bench_function("sample_decode", |b| {
        b.iter(|| black_box(decode::<Sample>(black_box(encoded.clone()))))
    });

    let response = PingResponse {
        status: Status::default(),
        logs: (0..100)
            .map(|i| LogRecord::new(Severity::Debug, format!("controller: log line {i}")))
            .collect(),
    };
    c.bench_function("ping_response_encode_100_logs", |b| {
        b.iter(|| black_box(encode(black_box(&response))))
    });
}

fn benchmark_queue(c: &mut Criterion) {
    let (producer, consumer) = spsc::channel::<Sample>(2000);
    let sample = benchmark_sample(2);
    c.bench_function("spsc_push_pop", |b| {
        b.iter(|| {
            let _ = producer.push(black_box(sample.clone()));
            black_box(consumer.pop());
        });
    });

    c.bench_function("gap_detector_observe", |b| {
        let mut detector = GapDetector::new();
        let mut tick = 0i32;
        b.iter(|| {
            tick = tick.wrapping_add(1) & i32::MAX;
            black_box(detector.observe(black_box(tick)));
        });
    });
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: benchmark_runner <config_file> [session|codec|all] [--criterion] [--seconds N]");
        eprintln!("Example: benchmark_runner configs/link.toml session --seconds 10");
        eprintln!("Example: benchmark_runner configs/link.toml codec --criterion");
        std::process::exit(1);
    }

    let config_path = &args[1];
    let mode = args.get(2).map(|s| s.as_str()).unwrap_or("all");
    let use_criterion = args.iter().any(|a| a == "--criterion");
    let seconds = args
        .iter()
        .position(|a| a == "--seconds")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(5);

    let config = match LinkConfig::from_file_or_default(config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load {config_path}: {err}");
            std::process::exit(1);
        }
    };

    // keep stderr quiet under criterion so timings are not skewed
    if !use_criterion {
        init_logging(None, tracing::Level::INFO);
    }

    println!("========================================");
    println!("Pendulum Link Benchmark");
    println!("========================================");
    println!("Config: {config_path}");
    println!("Loop rate: {} Hz", config.controller.loop_rate_hz);
    println!("Mode: {mode}");
    println!("========================================\n");

    if mode == "session" || mode == "all" {
        println!("Running loopback session for {seconds} seconds...");
        match run_loopback_session(&config, Duration::from_secs(seconds)) {
            Ok(run) => {
                analyze_session(&run, config.controller.loop_rate_hz);
                match run.session.history().export_csv("session_results.csv") {
                    Ok(rows) => println!("Saved {rows} samples to session_results.csv"),
                    Err(err) => eprintln!("Failed to save session CSV: {err}"),
                }
            }
            Err(err) => eprintln!("Loopback session failed: {err}"),
        }
    }

    if mode == "codec" || (use_criterion && mode == "all") {
        let mut criterion = Criterion::default()
            .sample_size(50)
            .measurement_time(Duration::from_secs(5));

        println!("\nRunning codec and queue benchmarks...");
        benchmark_codec(&mut criterion);
        benchmark_queue(&mut criterion);
        criterion.final_summary();

        println!("\n========================================");
        println!("Criterion statistical analysis complete!");
        println!("Check the target/criterion directory for detailed HTML reports.");
        println!("========================================");
    }

    info!("Benchmark complete.");
}
