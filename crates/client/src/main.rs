use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use arena::{ArenaCommand, ArenaEntity, BotPilot, find_ship};
use clap::Parser;
use trailsync::{
    ClientController, ConnectionState, ControllerEvent, PacketLossSimulation, SyncConfig,
    UdpTransport,
};

type Client = ClientController<ArenaEntity, UdpTransport>;

#[derive(Parser)]
#[command(name = "trailsync-client")]
#[command(about = "Headless bot that joins a TrailSync arena and flies a ship")]
struct Args {
    #[arg(short, long, default_value_t = format!("127.0.0.1:{}", trailsync::DEFAULT_PORT))]
    server: String,

    #[arg(short, long, default_value = "bot")]
    name: String,

    #[arg(short, long, help = "TOML file with session settings; must match the server's")]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 30, help = "Frames between control changes")]
    interval: u64,

    #[arg(long, help = "Leave after this many seconds")]
    duration: Option<u64>,

    #[arg(long, help = "Outgoing packet loss percentage (0-100)")]
    loss_percent: Option<f32>,
}

fn load_config(path: Option<&PathBuf>) -> Result<SyncConfig> {
    let Some(path) = path else {
        return Ok(SyncConfig::default());
    };
    let text =
        fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    let mut transport = UdpTransport::connect(&args.server)?;
    if let Some(loss_percent) = args.loss_percent {
        transport.set_loss_simulation(PacketLossSimulation::new(loss_percent));
    }
    let server_addr = transport
        .remote_addr()
        .context("server address did not resolve")?;

    let frame_duration = config.frame_duration();
    let mut client = Client::new(config, transport, server_addr, args.name)?;
    client.connect()?;

    let deadline = args.duration.map(Duration::from_secs);
    let result = run(&mut client, args.interval, frame_duration, deadline);

    client.disconnect()?;
    result
}

fn run(
    client: &mut Client,
    interval: u64,
    frame_duration: Duration,
    deadline: Option<Duration>,
) -> Result<()> {
    let started = Instant::now();
    let mut pilot: Option<BotPilot> = None;
    let mut last = Instant::now();
    let mut last_report = Instant::now();

    while deadline.is_none_or(|deadline| started.elapsed() < deadline) {
        let now = Instant::now();
        client.update(now - last)?;
        last = now;

        let events: Vec<ControllerEvent> = client.drain_events().collect();
        for event in events {
            match event {
                ControllerEvent::Connected { player, frame } => {
                    log::info!("Joined as player {} at frame {}", player, frame);
                    pilot = Some(BotPilot::new(player, interval));
                }
                ControllerEvent::Disconnected { reason } => {
                    bail!("disconnected: {:?}", reason);
                }
                ControllerEvent::JoinDenied { reason } => {
                    bail!("join denied: {}", reason);
                }
                ControllerEvent::HashMismatch {
                    frame,
                    local,
                    remote,
                } => {
                    log::warn!(
                        "Desync at frame {}: local {:016x}, server {:016x}",
                        frame,
                        local,
                        remote
                    );
                }
                other => log::debug!("{:?}", other),
            }
        }

        if let Some(pilot) = pilot.as_mut() {
            if !client.is_waiting_for_synchronization() {
                if let Some(controls) = pilot.poll(client.current_frame()) {
                    client.issue_command(ArenaCommand::SetControls(controls))?;
                }
            }
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            report(client);
        }

        thread::sleep(frame_duration.saturating_sub(last.elapsed()));
    }

    Ok(())
}

fn report(client: &Client) {
    if client.connection_state() != ConnectionState::Connected {
        log::info!("{:?}", client.connection_state());
        return;
    }

    let tss = client.tss();
    let ship = client
        .player()
        .and_then(|player| find_ship(tss.leading_state(), player))
        .map(|ship| format!("{:?}", ship.position));

    log::info!(
        "Frame {} (trailing {}), {} entities, {} pending, {}, ship at {}",
        tss.current_frame(),
        tss.trailing_frame(),
        tss.leading_state().entity_count(),
        client.pending_commands(),
        if client.is_waiting_for_synchronization() {
            "waiting for snapshot"
        } else {
            "synchronized"
        },
        ship.as_deref().unwrap_or("-")
    );
}
