use std::{
    io::stdout,
    sync::{mpsc, Mutex},
    thread::spawn,
    time::Duration,
};

use crate::{
    frame::{BoundingBox, FrameDimension},
    gui::{
        dispatcher::{Command, Dispatcher, MonitorStatus, MonitorSummary},
        error::MonitorError,
    },
    session_machine::{Event, StateKind},
};

use crossterm::{
    event::{self, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};

use ratatui::{
    prelude::*,
    widgets::{
        block::{Position, Title},
        canvas::{Canvas, Rectangle},
        *,
    },
    Terminal,
};

/// Degrees the rig turns per arrow key press outside of tracking.
const NUDGE_STEP: f64 = 1.0;
/// Pixels the pending region moves per arrow key press.
const ROI_STEP: i64 = 8;

/// The region the user is about to select.
#[derive(Debug, Clone)]
pub struct RoiCursor {
    initial: Option<BoundingBox>,
    size: (u32, u32),
    current: Option<BoundingBox>,
}

impl RoiCursor {
    /// Starts at `initial` when given, otherwise at a `size` box centered in
    /// the frame.
    pub fn new(initial: Option<BoundingBox>, size: (u32, u32)) -> Self {
        Self {
            initial,
            size,
            current: initial,
        }
    }

    pub fn current(&self) -> Option<BoundingBox> {
        self.current
    }

    fn reset(&mut self, dimension: Option<FrameDimension>) {
        self.current = self.initial.or_else(|| {
            dimension.map(|dim| BoundingBox::centered_in(dim, self.size.0, self.size.1))
        });
    }

    fn shift(&mut self, dx: i64, dy: i64, dimension: Option<FrameDimension>) {
        let (Some(bbox), Some(dim)) = (self.current, dimension) else {
            return;
        };
        let max_x = dim.width.saturating_sub(bbox.width) as i64;
        let max_y = dim.height.saturating_sub(bbox.height) as i64;
        self.current = Some(BoundingBox::new(
            (bbox.x as i64 + dx).clamp(0, max_x) as u32,
            (bbox.y as i64 + dy).clamp(0, max_y) as u32,
            bbox.width,
            bbox.height,
        ));
    }
}

#[derive(Debug)]
enum KeyAction {
    Send(Command),
    Quit,
    Nothing,
}

fn key_action(key: KeyCode, status: &MonitorStatus, roi: &mut RoiCursor) -> KeyAction {
    let selecting = status.state == StateKind::SelectingRoi;
    let arrow = match key {
        KeyCode::Left => Some((-1, 0)),
        KeyCode::Right => Some((1, 0)),
        KeyCode::Up => Some((0, 1)),
        KeyCode::Down => Some((0, -1)),
        _ => None,
    };

    if let Some((x, y)) = arrow {
        if selecting {
            // Screen rows grow downwards, degrees of phi upwards.
            roi.shift(x * ROI_STEP, -y * ROI_STEP, status.dimension);
            return KeyAction::Nothing;
        }
        return KeyAction::Send(Command::Nudge(
            x as f64 * NUDGE_STEP,
            y as f64 * NUDGE_STEP,
        ));
    }

    match key {
        KeyCode::Char('q') => KeyAction::Quit,
        KeyCode::Char('s') => {
            roi.reset(status.dimension);
            KeyAction::Send(Command::Session(Event::SelectRoi))
        }
        KeyCode::Enter if selecting => match roi.current() {
            Some(bbox) => KeyAction::Send(Command::Session(Event::RoiSelected(bbox))),
            None => KeyAction::Nothing,
        },
        KeyCode::Char('t') if status.state == StateKind::Tracking => {
            KeyAction::Send(Command::Session(Event::StopTracking))
        }
        KeyCode::Char('t') => KeyAction::Send(Command::Session(Event::StartTracking)),
        KeyCode::Esc => KeyAction::Send(Command::Session(Event::Cancel)),
        KeyCode::Char('c') => KeyAction::Send(Command::Calibrate),
        _ => KeyAction::Nothing,
    }
}

/// Shows the tracking pipeline and turns key presses into commands until the
/// user quits.
///
/// The `dispatcher` is moved to its own thread for the duration of the
/// monitor and fed with `events` from the frame worker. When the user quits,
/// any running session is ended the usual way and the summary of all
/// sessions is returned.
pub fn tracking_monitor(
    dispatcher: Dispatcher,
    events: mpsc::Receiver<Event>,
    roi: RoiCursor,
) -> Result<MonitorSummary, MonitorError> {
    let status = dispatcher.status_handle();
    let (command_tx, command_rx) = mpsc::channel();
    let th = spawn(move || dispatcher.run(events, command_rx));

    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let ui_result = ui_loop(&status, &command_tx, roi);
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    // The dispatcher may already be gone if it panicked, joining tells.
    let _ = command_tx.send(Command::Stop);
    let summary = th.join().map_err(|_| MonitorError::JoinError)?;
    ui_result?;
    Ok(summary)
}

fn ui_loop(
    status: &Mutex<MonitorStatus>,
    commands: &mpsc::Sender<Command>,
    mut roi: RoiCursor,
) -> Result<(), MonitorError> {
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    loop {
        let snapshot = status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        terminal.draw(|f| ui(f, &snapshot, roi.current()))?;

        if event::poll(Duration::from_millis(16))? {
            if let event::Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key_action(key.code, &snapshot, &mut roi) {
                        KeyAction::Send(command) => commands.send(command)?,
                        KeyAction::Quit => return Ok(()),
                        KeyAction::Nothing => {}
                    }
                }
            }
        }
    }
}

fn ui(f: &mut Frame, status: &MonitorStatus, roi: Option<BoundingBox>) {
    let title = Title::from(" OptiSphere ".magenta().bold());
    let instructions = Title::from(Line::from(vec![
        " Select ".into(),
        "<S>".magenta().bold(),
        " Track ".into(),
        "<T>".magenta().bold(),
        " Cancel ".into(),
        "<Esc>".magenta().bold(),
        " Move ".into(),
        "<Arrows>".magenta().bold(),
        " Calibrate ".into(),
        "<C>".magenta().bold(),
        " Quit ".into(),
        "<Q> ".magenta().bold(),
    ]));
    let outer = Block::default()
        .title(title.alignment(Alignment::Center))
        .title(
            instructions
                .alignment(Alignment::Center)
                .position(Position::Bottom),
        )
        .borders(Borders::ALL);
    let area = outer.inner(f.size());
    f.render_widget(outer, f.size());

    let panes = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(area);

    f.render_widget(status_text(status), panes[0]);
    draw_frame_view(f, panes[1], status, roi);
}

fn status_text(status: &MonitorStatus) -> Paragraph<'static> {
    let bbox = status
        .bbox
        .map(|b| b.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut lines = vec![
        Line::from(vec![
            "State     ".into(),
            Span::styled(
                status.state.to_string(),
                Style::default().add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(format!("Workflow  {}", status.workflow)),
        Line::from(format!("Rotation  {}", status.rotation)),
        Line::from(format!("Samples   {}", status.samples)),
        Line::from(format!(
            "Frames    {} ({} lost, {} corrections)",
            status.frames, status.lost_frames, status.corrections
        )),
        Line::from(format!("Box       {}", bbox)),
        Line::from(""),
        Line::from(Span::styled(
            status.message.clone(),
            Style::default().fg(Color::Yellow),
        )),
    ];
    if !status.saved.is_empty() {
        lines.push(Line::from(""));
        lines.push(Line::from("Saved".bold()));
        lines.extend(status.saved.iter().map(|s| Line::from(s.clone())));
    }
    Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().title(" Status ").borders(Borders::ALL))
}

fn draw_frame_view(f: &mut Frame, area: Rect, status: &MonitorStatus, roi: Option<BoundingBox>) {
    let dim = status.dimension.unwrap_or(FrameDimension::new(640, 480));
    let (w, h) = (dim.width as f64, dim.height as f64);
    let pending = match status.state {
        StateKind::SelectingRoi | StateKind::Armed => roi,
        _ => None,
    };

    // Canvas y grows upwards, image rows downwards.
    let rect = |b: BoundingBox, color: Color| Rectangle {
        x: b.x as f64,
        y: h - (b.y + b.height) as f64,
        width: b.width as f64,
        height: b.height as f64,
        color,
    };

    let canvas = Canvas::default()
        .block(
            Block::default()
                .title(format!(" Camera {} ", dim))
                .borders(Borders::ALL),
        )
        .marker(ratatui::symbols::Marker::Braille)
        .x_bounds([0.0, w])
        .y_bounds([0.0, h])
        .paint(|ctx| {
            if let Some(band) = status.deadband {
                ctx.draw(&Rectangle {
                    x: w / 2.0 - band.horizontal,
                    y: h / 2.0 - band.vertical,
                    width: band.horizontal * 2.0,
                    height: band.vertical * 2.0,
                    color: Color::DarkGray,
                });
            }
            if let Some(b) = pending {
                ctx.draw(&rect(b, Color::Magenta));
            }
            if let Some(b) = status.bbox {
                ctx.draw(&rect(b, Color::Green));
            }
        });
    f.render_widget(canvas, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(state: StateKind) -> MonitorStatus {
        MonitorStatus {
            state,
            dimension: Some(FrameDimension::new(640, 480)),
            ..MonitorStatus::default()
        }
    }

    #[test]
    fn select_centers_the_pending_region() {
        let mut roi = RoiCursor::new(None, (64, 48));
        let action = key_action(KeyCode::Char('s'), &status(StateKind::Idle), &mut roi);

        assert!(matches!(
            action,
            KeyAction::Send(Command::Session(Event::SelectRoi))
        ));
        assert_eq!(roi.current(), Some(BoundingBox::new(288, 216, 64, 48)));
    }

    #[test]
    fn arrows_move_the_region_while_selecting() {
        let selecting = status(StateKind::SelectingRoi);
        let mut roi = RoiCursor::new(Some(BoundingBox::new(0, 8, 64, 48)), (64, 48));

        key_action(KeyCode::Left, &selecting, &mut roi);
        key_action(KeyCode::Up, &selecting, &mut roi);
        assert_eq!(roi.current(), Some(BoundingBox::new(0, 0, 64, 48)));

        let action = key_action(KeyCode::Enter, &selecting, &mut roi);
        assert!(matches!(
            action,
            KeyAction::Send(Command::Session(Event::RoiSelected(b))) if b == BoundingBox::new(0, 0, 64, 48)
        ));
    }

    #[test]
    fn arrows_nudge_the_rig_otherwise() {
        let mut roi = RoiCursor::new(None, (64, 48));
        assert!(matches!(
            key_action(KeyCode::Up, &status(StateKind::Idle), &mut roi),
            KeyAction::Send(Command::Nudge(t, p)) if t == 0.0 && p == 1.0
        ));
        assert!(matches!(
            key_action(KeyCode::Enter, &status(StateKind::Idle), &mut roi),
            KeyAction::Nothing
        ));
    }

    #[test]
    fn t_toggles_tracking() {
        let mut roi = RoiCursor::new(None, (64, 48));
        assert!(matches!(
            key_action(KeyCode::Char('t'), &status(StateKind::Armed), &mut roi),
            KeyAction::Send(Command::Session(Event::StartTracking))
        ));
        assert!(matches!(
            key_action(KeyCode::Char('t'), &status(StateKind::Tracking), &mut roi),
            KeyAction::Send(Command::Session(Event::StopTracking))
        ));
        assert!(matches!(
            key_action(KeyCode::Esc, &status(StateKind::Tracking), &mut roi),
            KeyAction::Send(Command::Session(Event::Cancel))
        ));
        assert!(matches!(
            key_action(KeyCode::Char('q'), &status(StateKind::Tracking), &mut roi),
            KeyAction::Quit
        ));
    }
}
