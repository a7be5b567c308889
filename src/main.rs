/*
 * This file is part of Foodlog.
 *
 * Copyright (C) 2025 Foodlog contributors
 *
 * Foodlog is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Foodlog is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Foodlog. If not, see <https://www.gnu.org/licenses/>.
 */

use std::io::stdout;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::Terminal;

use foodlog::app::App;
use foodlog::cli::{Cli, Commands};
use foodlog::client::DaemonClient;
use foodlog::events::handle_key_event;
use foodlog::report::{format_recent, format_status};
use foodlog::ui::ui;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let socket_path = cli.socket_path();
    run_command(&socket_path, cli.command)
}

fn run_command(socket_path: &Path, command: Commands) -> anyhow::Result<()> {
    let connect = || DaemonClient::connect(socket_path);

    match command {
        Commands::Status => println!("{}", format_status(&connect()?.status()?)),
        Commands::Start => {
            connect()?.start()?;
            println!("Sensor loop started");
        }
        Commands::Stop => match connect()?.stop()? {
            Some(note) => println!("Sensor loop {}", note),
            None => println!("Sensor loop stopping"),
        },
        Commands::Calibrate { known_distance_mm } => {
            let offset = connect()?.calibrate(known_distance_mm)?;
            println!("Calibration complete. Offset set to {} mm.", offset);
        }
        Commands::Recent { json } => {
            let entries = connect()?.recent()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                println!("{}", format_recent(&entries));
            }
        }
        Commands::Watch { interval_ms } => {
            run_watch(socket_path, Duration::from_millis(interval_ms.max(100)))?;
        }
    }
    Ok(())
}

fn run_watch(socket_path: &Path, interval: Duration) -> anyhow::Result<()> {
    // Fail fast before touching the terminal
    DaemonClient::connect(socket_path)?.ping()?;

    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, App::new(socket_path.to_path_buf(), interval));

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

fn run_app(
    terminal: &mut Terminal<ratatui::backend::CrosstermBackend<std::io::Stdout>>,
    mut app: App,
) -> anyhow::Result<()> {
    app.refresh();

    loop {
        terminal.draw(|f| ui(f, &app))?;

        let timeout = app.refresh_interval.saturating_sub(app.last_refresh.elapsed());
        if event::poll(timeout).unwrap_or(false) {
            if let Event::Key(key_event) = event::read()? {
                if key_event.kind == KeyEventKind::Press && handle_key_event(&mut app, key_event) {
                    return Ok(());
                }
            }
        }

        if app.last_refresh.elapsed() >= app.refresh_interval {
            app.refresh();
        }
    }
}
