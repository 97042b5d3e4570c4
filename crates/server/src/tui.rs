use std::net::SocketAddr;
use std::time::Duration;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, List, ListItem, Paragraph};
use trailsync::{NetworkStats, PlayerId};

use crate::events::{EventLog, LogLevel};

pub struct PeerRow {
    pub player: PlayerId,
    pub name: String,
    pub addr: SocketAddr,
    pub silent_for: Duration,
    pub ship: Option<u64>,
}

/// Everything the dashboard draws for one frame, collected from the running server.
pub struct Dashboard {
    pub uptime: Duration,
    pub frame: u64,
    pub trailing_frame: u64,
    pub delays: Vec<u64>,
    pub entity_count: usize,
    pub max_clients: usize,
    pub peers: Vec<PeerRow>,
    pub network: NetworkStats,
}

pub struct TuiState {
    pub log: EventLog,
    selected: usize,
    pending_kick: Option<PlayerId>,
}

impl TuiState {
    pub fn new() -> Self {
        Self {
            log: EventLog::new(200),
            selected: 0,
            pending_kick: None,
        }
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn select_next(&mut self, count: usize) {
        if count > 0 {
            self.selected = (self.selected + 1).min(count - 1);
        }
    }

    pub fn request_kick(&mut self, peers: &[PeerRow]) {
        if let Some(peer) = peers.get(self.clamp_selection(peers.len())) {
            self.pending_kick = Some(peer.player);
        }
    }

    pub fn take_pending_kick(&mut self) -> Option<PlayerId> {
        self.pending_kick.take()
    }

    fn clamp_selection(&self, count: usize) -> usize {
        self.selected.min(count.saturating_sub(1))
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, dashboard: &Dashboard) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Min(6),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], dashboard);
    render_capacity(frame, chunks[1], dashboard);
    render_network(frame, chunks[2], &dashboard.network);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(chunks[3]);
    render_peers(frame, body[0], state, dashboard);
    render_log(frame, body[1], state);
    render_help(frame, chunks[4]);
}

fn render_header(frame: &mut Frame, area: Rect, dashboard: &Dashboard) {
    let title = format!(
        " TrailSync Server - Uptime: {} ",
        format_duration(dashboard.uptime.as_secs())
    );

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let text = format!(
        "Frame: {}  |  Trailing: {}  |  Delays: {:?}  |  Entities: {}",
        dashboard.frame, dashboard.trailing_frame, dashboard.delays, dashboard.entity_count
    );

    let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::White));

    frame.render_widget(paragraph, area);
}

fn render_capacity(frame: &mut Frame, area: Rect, dashboard: &Dashboard) {
    let block = Block::default()
        .title(" Players ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let count = dashboard.peers.len();
    let ratio = count as f64 / dashboard.max_clients.max(1) as f64;
    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio.min(1.0))
        .label(format!("{}/{} players", count, dashboard.max_clients));

    frame.render_widget(gauge, area);
}

fn render_network(frame: &mut Frame, area: Rect, net: &NetworkStats) {
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let lines = vec![
        Line::from(vec![
            Span::styled("Packets: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{} sent / {} recv", net.packets_sent, net.packets_received),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Bytes: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} sent / {} recv",
                    format_bytes(net.bytes_sent),
                    format_bytes(net.bytes_received)
                ),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Dropped: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{} simulated / {} malformed", net.packets_dropped, net.malformed_packets),
                Style::default().fg(if net.malformed_packets > 0 {
                    Color::Red
                } else {
                    Color::White
                }),
            ),
        ]),
    ];

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

fn render_peers(frame: &mut Frame, area: Rect, state: &TuiState, dashboard: &Dashboard) {
    let block = Block::default()
        .title(" Connections ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));

    let selected = state.clamp_selection(dashboard.peers.len());
    let items: Vec<ListItem> = dashboard
        .peers
        .iter()
        .enumerate()
        .map(|(index, peer)| {
            let ship = peer
                .ship
                .map_or_else(|| String::from("-"), |id| id.to_string());
            let text = format!(
                "#{:<3} {:<12} {:<21} ship {:<4} {}ms",
                peer.player,
                peer.name,
                peer.addr,
                ship,
                peer.silent_for.as_millis()
            );
            let style = if index == selected {
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::Magenta)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::White)
            };
            ListItem::new(text).style(style)
        })
        .collect();

    frame.render_widget(List::new(items).block(block), area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Events ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let visible = area.height.saturating_sub(2) as usize;
    let mut lines: Vec<Line> = state
        .log
        .entries()
        .rev()
        .take(visible)
        .map(|entry| {
            let color = match entry.level {
                LogLevel::Info => Color::White,
                LogLevel::Warn => Color::Yellow,
                LogLevel::Error => Color::Red,
            };
            Line::from(vec![
                Span::styled(
                    format!("[{}] ", format_duration(entry.at.as_secs())),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(entry.message.clone(), Style::default().fg(color)),
            ])
        })
        .collect();
    lines.reverse();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new("q/ESC quit  |  Up/Down select  |  k kick selected player")
        .block(block)
        .style(
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        );

    frame.render_widget(text, area);
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
