use std::{fmt, io::stdout, path::PathBuf, time::Duration};

use crate::gui::error::MonitorError;

use crossterm::{
    event::{self, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{
        block::{Position, Title},
        *,
    },
    Terminal,
};

/// Something that can move the sphere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RigDevice {
    /// A controller on a serial port.
    Serial(PathBuf),
    /// The built-in simulated rig.
    Simulated,
}

impl fmt::Display for RigDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RigDevice::Serial(path) => write!(f, "{}", path.display()),
            RigDevice::Simulated => write!(f, "simulated rig"),
        }
    }
}

/// Lists the serial ports, followed by the simulated rig.
pub fn rig_choices(ports: Vec<PathBuf>) -> Vec<RigDevice> {
    ports
        .into_iter()
        .map(RigDevice::Serial)
        .chain(std::iter::once(RigDevice::Simulated))
        .collect()
}

/// Where the cursor lands after pressing `key` on a list of `len` entries.
fn move_cursor(cursor: usize, len: usize, key: KeyCode) -> usize {
    match key {
        KeyCode::Down if len > 0 => (cursor + 1) % len,
        KeyCode::Up if len > 0 => (cursor + len - 1) % len,
        _ => cursor,
    }
}

/// Lets the user pick the rig to drive. `None` when they quit instead.
pub fn device_selector(mut choices: Vec<RigDevice>) -> Result<Option<RigDevice>, MonitorError> {
    if choices.is_empty() {
        return Ok(None);
    }

    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let result = select_loop(&choices);
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(result?.map(|i| choices.swap_remove(i)))
}

fn select_loop(choices: &[RigDevice]) -> Result<Option<usize>, MonitorError> {
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let mut cursor = 0;
    let mut list_state = ListState::default().with_selected(Some(cursor));
    loop {
        let title = Title::from(" Rig Selector ".magenta().bold());
        let instructions = Title::from(Line::from(vec![
            " Navigate ".into(),
            "<Up>/<Down>".magenta().bold(),
            " Select ".into(),
            "<Enter>".magenta().bold(),
            " Quit ".into(),
            "<Q> ".magenta().bold(),
        ]));
        let block = Block::default()
            .title(title.alignment(Alignment::Center))
            .title(
                instructions
                    .alignment(Alignment::Center)
                    .position(Position::Bottom),
            )
            .borders(Borders::ALL);
        let names = choices.iter().map(|c| c.to_string());
        let list = List::new(names)
            .style(Style::default().fg(Color::White))
            .highlight_symbol(">>")
            .highlight_style(Style::default().fg(Color::Magenta))
            .block(block);
        list_state.select(Some(cursor));
        terminal.draw(|frame| {
            let area = frame.size();
            frame.render_stateful_widget(list, area, &mut list_state);
        })?;

        if event::poll(Duration::from_millis(16))? {
            if let event::Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Enter => return Ok(Some(cursor)),
                        KeyCode::Char('q') | KeyCode::Esc => return Ok(None),
                        code => cursor = move_cursor(cursor, choices.len(), code),
                    }
                }
            }
        }
    }
}
