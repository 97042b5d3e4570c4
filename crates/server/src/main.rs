mod config;
mod events;
mod tui;

use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use arena::ArenaServer;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use trailsync::{PacketLossSimulation, Transport, UdpTransport};

use config::ServerConfig;
use events::LogLevel;
use tui::{Dashboard, PeerRow, TuiState};

#[derive(Parser)]
#[command(name = "trailsync-server")]
#[command(about = "Authoritative server for the TrailSync arena")]
struct Args {
    #[arg(short, long, help = "TOML config file")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    bind: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    tick_rate: Option<u32>,

    #[arg(short, long)]
    max_clients: Option<usize>,

    #[arg(long, help = "Asteroids spawned at start")]
    asteroids: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, help = "Outgoing packet loss percentage (0-100)")]
    loss_percent: Option<f32>,

    #[arg(long)]
    headless: bool,
}

impl Args {
    fn into_config(self) -> Result<(ServerConfig, bool)> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(tick_rate) = self.tick_rate {
            config.sync.tick_rate = tick_rate;
        }
        if let Some(max_clients) = self.max_clients {
            config.sync.max_clients = max_clients;
        }
        if let Some(asteroids) = self.asteroids {
            config.asteroids = asteroids;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(loss_percent) = self.loss_percent {
            config.loss_percent = loss_percent;
        }
        Ok((config, self.headless))
    }
}

fn main() -> Result<()> {
    let (config, headless) = Args::parse().into_config()?;

    if headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let mut transport = UdpTransport::bind(config.bind_addr())?;
    if config.loss_percent > 0.0 {
        transport.set_loss_simulation(PacketLossSimulation::new(config.loss_percent));
    }
    let local_addr = transport.local_addr();

    let frame_duration = config.sync.frame_duration();
    let mut server = ArenaServer::new(config.sync.clone(), transport, config.asteroids, config.seed)?;

    if headless {
        log::info!("Server started on {}", local_addr);
        run_headless(&mut server, frame_duration)
    } else {
        run_with_tui(&mut server, frame_duration, local_addr.to_string())
    }
}

fn run_headless(server: &mut ArenaServer<UdpTransport>, frame_duration: Duration) -> Result<()> {
    let mut last = Instant::now();
    let mut last_report = Instant::now();

    loop {
        let now = Instant::now();
        server.update(now - last)?;
        last = now;

        if last_report.elapsed() >= Duration::from_secs(10) {
            last_report = Instant::now();
            let controller = server.controller();
            log::info!(
                "Frame {} (trailing {}), {} players, {} entities",
                controller.current_frame(),
                controller.tss().trailing_frame(),
                controller.registry().len(),
                controller.tss().leading_state().entity_count()
            );
        }

        thread::sleep(frame_duration.saturating_sub(last.elapsed()));
    }
}

fn run_with_tui(
    server: &mut ArenaServer<UdpTransport>,
    frame_duration: Duration,
    local_addr: String,
) -> Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut tui_state = TuiState::new();
    tui_state
        .log
        .push(Duration::ZERO, LogLevel::Info, format!("Server started on {}", local_addr));

    let result = tui_loop(server, &mut terminal, &mut tui_state, frame_duration);

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;
    result?;

    let players: Vec<_> = server.controller().registry().iter().map(|peer| peer.player).collect();
    for player in players {
        server.controller_mut().kick(player)?;
    }
    server.update(Duration::ZERO)?;
    Ok(())
}

fn tui_loop(
    server: &mut ArenaServer<UdpTransport>,
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    tui_state: &mut TuiState,
    frame_duration: Duration,
) -> Result<()> {
    let mut last = Instant::now();

    loop {
        let now = Instant::now();
        let session_events = server.update(now - last)?;
        last = now;

        let session_time = server.controller().now();
        for event in &session_events {
            tui_state.log.record(session_time, event);
        }

        if let Some(player) = tui_state.take_pending_kick() {
            if !server.controller_mut().kick(player)? {
                tui_state
                    .log
                    .push(session_time, LogLevel::Warn, format!("No player {}", player));
            }
        }

        let dashboard = dashboard(server);

        if event::poll(frame_duration.saturating_sub(last.elapsed()))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                        KeyCode::Up => tui_state.select_prev(),
                        KeyCode::Down => tui_state.select_next(dashboard.peers.len()),
                        KeyCode::Char('k') | KeyCode::Char('K') => {
                            tui_state.request_kick(&dashboard.peers)
                        }
                        _ => {}
                    }
                }
            }
        }

        terminal.draw(|frame| tui::render(frame, tui_state, &dashboard))?;
    }
}

fn dashboard(server: &ArenaServer<UdpTransport>) -> Dashboard {
    let controller = server.controller();
    let now = controller.now();
    let peers = controller
        .registry()
        .iter()
        .map(|peer| PeerRow {
            player: peer.player,
            name: peer.name.clone(),
            addr: peer.addr,
            silent_for: now.saturating_sub(peer.last_receive),
            ship: server.ship_of(peer.player),
        })
        .collect();

    Dashboard {
        uptime: now,
        frame: controller.current_frame(),
        trailing_frame: controller.tss().trailing_frame(),
        delays: controller.tss().delays().to_vec(),
        entity_count: controller.tss().leading_state().entity_count(),
        max_clients: controller.registry().max_players(),
        peers,
        network: controller.transport().stats().clone(),
    }
}
