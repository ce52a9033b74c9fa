use eframe::egui;
use egui_plot::{Legend, Line, Plot, PlotPoints};
use std::collections::VecDeque;
use std::env;
use std::time::{Duration, Instant};

use client::{Channel, ClientSession};
use common::logging::init_logging;
use common::{Command, LinkConfig, Severity, Status};
use tracing::{info, warn};

/// Newest samples drawn per plot.
const PLOT_WINDOW: usize = 5000;

/// Whether the button sending `command` is clickable. Enable and Disable are
/// greyed out when the controller is already in that state.
fn button_active(command: Command, connected: bool, status: &Status) -> bool {
    match command {
        Command::Enable => connected && !status.enabled,
        Command::Disable => connected && status.enabled,
        _ => connected,
    }
}

struct DashboardApp {
    session: ClientSession,
    connected_at: Option<Instant>,
    export_path: String,
    last_message: Option<String>,
}

impl DashboardApp {
    fn new(config: LinkConfig) -> Self {
        Self {
            session: ClientSession::new(config.client),
            connected_at: None,
            export_path: "pendulum_history.csv".to_string(),
            last_message: None,
        }
    }

    fn connect(&mut self) {
        match self.session.connect() {
            Ok(()) => {
                self.connected_at = Some(Instant::now());
                self.last_message = Some("Connected.".to_string());
            }
            Err(err) => {
                warn!("Connect failed: {err}");
                self.last_message = Some(format!("Connect failed: {err}"));
            }
        }
    }

    fn send(&mut self, command: Command) {
        if let Err(err) = self.session.send(command) {
            self.last_message = Some(format!("{command:?} failed: {err}"));
        }
    }

    fn export(&mut self) {
        self.last_message = Some(match self.session.history().export_csv(&self.export_path) {
            Ok(rows) => format!("Saved {rows} rows to {}", self.export_path),
            Err(err) => format!("Export failed: {err}"),
        });
    }

    fn control_panel(&mut self, ui: &mut egui::Ui) {
        let connected = self.session.is_connected();
        let status = self.session.status();
        ui.horizontal(|ui| {
            if ui
                .add_enabled(!connected, egui::Button::new("🔌 Connect"))
                .clicked()
            {
                self.connect();
            }
            if ui
                .add_enabled(button_active(Command::Enable, connected, &status), egui::Button::new("▶ Enable"))
                .clicked()
            {
                self.send(Command::Enable);
            }
            if ui
                .add_enabled(button_active(Command::Disable, connected, &status), egui::Button::new("⏸ Disable"))
                .clicked()
            {
                self.send(Command::Disable);
            }
            if ui
                .add_enabled(connected, egui::Button::new("🔁 Toggle Feedback"))
                .clicked()
            {
                self.send(Command::ToggleMode);
            }
            if ui.add_enabled(connected, egui::Button::new("🎯 Zero")).clicked() {
                self.send(Command::ZeroReference);
            }
            if ui
                .add_enabled(connected, egui::Button::new("⏹ Shutdown"))
                .clicked()
            {
                self.send(Command::Shutdown);
            }

            ui.separator();

            let status_text = if connected {
                egui::RichText::new("🟢 Connected").color(egui::Color32::GREEN)
            } else {
                egui::RichText::new("🔴 Disconnected").color(egui::Color32::RED)
            };
            ui.label(status_text);
            if let (true, Some(start)) = (connected, self.connected_at) {
                ui.label(format!("⏱ {}s", start.elapsed().as_secs()));
            }
        });

        ui.horizontal(|ui| {
            let mut paused = self.session.history().is_paused();
            if ui.checkbox(&mut paused, "Pause").changed() {
                self.session.history_mut().set_paused(paused);
            }
            if ui.button("🗑 Clear").clicked() {
                self.session.history_mut().clear();
                self.session.clear_remote_logs();
            }
            ui.separator();
            ui.label("CSV:");
            ui.text_edit_singleline(&mut self.export_path);
            if ui.button("💾 Export").clicked() {
                self.export();
            }
            if let Some(message) = &self.last_message {
                ui.label(message.as_str());
            }
        });
    }

    fn status_panel(&self, ui: &mut egui::Ui) {
        let status = self.session.status();
        let stats = self.session.stats();
        ui.horizontal(|ui| {
            egui::Frame::group(ui.style()).inner_margin(10.0).show(ui, |ui| {
                ui.set_min_width(300.0);
                ui.strong("📊 Controller");
                ui.separator();
                egui::Grid::new("status_grid")
                    .num_columns(2)
                    .spacing([40.0, 4.0])
                    .striped(true)
                    .show(ui, |ui| {
                        ui.label("Running:");
                        ui.label(status.running.to_string());
                        ui.end_row();

                        ui.label("Enabled:");
                        ui.label(status.enabled.to_string());
                        ui.end_row();

                        ui.label("Feedback:");
                        ui.label(status.mode.to_string());
                        ui.end_row();

                        ui.label("Loop Rate:");
                        ui.label(format!("{:.1} Hz", status.frequency));
                        ui.end_row();

                        ui.label("Missed Deadlines:");
                        ui.label(status.misses.to_string());
                        ui.end_row();

                        ui.label("Idle Time:");
                        ui.label(format!("{:.1}%", status.wait_ratio * 100.0));
                        ui.end_row();
                    });
            });

            egui::Frame::group(ui.style()).inner_margin(10.0).show(ui, |ui| {
                ui.set_min_width(300.0);
                ui.strong("📡 Network");
                ui.separator();
                egui::Grid::new("network_grid")
                    .num_columns(2)
                    .spacing([40.0, 4.0])
                    .striped(true)
                    .show(ui, |ui| {
                        ui.label("Messages Sent:");
                        ui.label(stats.messages_sent.to_string());
                        ui.end_row();

                        ui.label("Packets Received:");
                        ui.label(stats.packets_received.to_string());
                        ui.end_row();

                        ui.label("Packets Lost:");
                        ui.label(format!(
                            "{} ({:.2}%)",
                            stats.packets_lost,
                            stats.loss_ratio() * 100.0
                        ));
                        ui.end_row();

                        ui.label("History:");
                        ui.label(format!(
                            "{} / {}",
                            self.session.history().len(),
                            self.session.history().capacity()
                        ));
                        ui.end_row();
                    });
            });
        });
    }

    fn plots(&self, ui: &mut egui::Ui) {
        let history = self.session.history();
        let window = |values: &VecDeque<f64>| -> Vec<[f64; 2]> {
            let points = history.points(values);
            let skip = points.len().saturating_sub(PLOT_WINDOW);
            points[skip..].to_vec()
        };

        ui.heading("📈 Telemetry");
        ui.columns(2, |columns| {
            columns[0].group(|ui| {
                ui.strong("Amplifier [V]");
                Plot::new("amplifier_plot")
                    .height(200.0)
                    .legend(Legend::default())
                    .show(ui, |plot_ui| {
                        plot_ui.line(
                            Line::new(PlotPoints::new(window(history.channel(Channel::Command))))
                                .name("command")
                                .color(egui::Color32::from_rgb(231, 76, 60)),
                        );
                        plot_ui.line(
                            Line::new(PlotPoints::new(window(history.channel(Channel::Sense))))
                                .name("sense")
                                .color(egui::Color32::from_rgb(52, 152, 219)),
                        );
                    });
            });
            columns[1].group(|ui| {
                ui.strong("Position");
                Plot::new("position_plot")
                    .height(200.0)
                    .legend(Legend::default())
                    .show(ui, |plot_ui| {
                        plot_ui.line(
                            Line::new(PlotPoints::new(window(history.channel(Channel::Midori))))
                                .name("midori [V]")
                                .color(egui::Color32::from_rgb(46, 204, 113)),
                        );
                        let counts: VecDeque<f64> = history
                            .channel(Channel::Encoder)
                            .iter()
                            .map(|c| c / 100.0)
                            .collect();
                        plot_ui.line(
                            Line::new(PlotPoints::new(window(&counts)))
                                .name("encoder [100 counts]")
                                .color(egui::Color32::from_rgb(155, 89, 182)),
                        );
                    });
            });
        });

        ui.add_space(10.0);
        ui.group(|ui| {
            ui.strong("User Plots");
            Plot::new("user_plot")
                .height(200.0)
                .legend(Legend::default())
                .show(ui, |plot_ui| {
                    for label in history.plot_labels() {
                        if let Some(values) = history.plot(label) {
                            plot_ui.line(Line::new(PlotPoints::new(window(values))).name(label));
                        }
                    }
                    plot_ui.line(
                        Line::new(PlotPoints::new(window(history.channel(Channel::Enable))))
                            .name("enable")
                            .color(egui::Color32::GRAY),
                    );
                });
        });
    }

    fn log_panel(&self, ui: &mut egui::Ui) {
        ui.strong("📝 Controller Log");
        ui.separator();
        egui::ScrollArea::vertical()
            .id_source("log_scroll")
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for record in self.session.remote_logs() {
                    let color = match record.severity {
                        Severity::Error => egui::Color32::from_rgb(231, 76, 60),
                        Severity::Warning => egui::Color32::from_rgb(230, 126, 34),
                        Severity::Info => ui.visuals().text_color(),
                        Severity::Debug | Severity::Verbose => egui::Color32::GRAY,
                    };
                    ui.label(egui::RichText::new(&record.message).color(color).monospace());
                }
            });
    }
}

impl eframe::App for DashboardApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.session.update();
        ctx.request_repaint_after(Duration::from_millis(50));

        egui::SidePanel::right("log_panel")
            .min_width(320.0)
            .show(ctx, |ui| self.log_panel(ui));

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical()
                .auto_shrink([false; 2])
                .show(ui, |ui| {
                    ui.heading("🎛️ Pendulum Controller Dashboard");
                    ui.add_space(10.0);

                    egui::Frame::group(ui.style())
                        .inner_margin(10.0)
                        .show(ui, |ui| self.control_panel(ui));
                    ui.add_space(10.0);

                    self.status_panel(ui);
                    ui.add_space(10.0);
                    ui.separator();

                    self.plots(ui);
                    ui.add_space(20.0);
                });
        });
    }
}

fn main() -> Result<(), eframe::Error> {
    init_logging(None, tracing::Level::INFO);

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "configs/link.toml".to_string());
    let config = LinkConfig::from_file_or_default(&config_path).unwrap_or_else(|err| {
        warn!("Failed to load {config_path}: {err}; using defaults");
        LinkConfig::default()
    });

    info!("Dashboard using controller at {}", config.client.command_addr);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1400.0, 900.0])
            .with_title("Pendulum Controller Dashboard"),
        ..Default::default()
    };

    eframe::run_native(
        "Pendulum Dashboard",
        options,
        Box::new(move |_cc| Box::new(DashboardApp::new(config))),
    )
}
