use crate::app::App;
use crate::audio::{AudioEngine, MAX_VOLUME};
use crate::controller::SessionSnapshot;
use crate::model::SessionState;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};
use std::rc::Rc;
use std::time::Duration;

const APP_TITLE: &str = "SonicWave  ";

struct Palette {
    bg: Color,
    panel_bg: Color,
    panel_alt_bg: Color,
    border: Color,
    text: Color,
    muted: Color,
    accent: Color,
    alert: Color,
    favorite: Color,
    selected_bg: Color,
}

const PALETTE: Palette = Palette {
    bg: Color::Rgb(10, 15, 24),
    panel_bg: Color::Rgb(19, 29, 43),
    panel_alt_bg: Color::Rgb(24, 38, 58),
    border: Color::Rgb(69, 121, 176),
    text: Color::Rgb(214, 228, 248),
    muted: Color::Rgb(149, 173, 204),
    accent: Color::Rgb(100, 203, 184),
    alert: Color::Rgb(249, 174, 88),
    favorite: Color::Rgb(255, 122, 165),
    selected_bg: Color::Rgb(34, 55, 82),
};

fn layout(area: Rect) -> (Rc<[Rect]>, Rc<[Rect]>) {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(area);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(66), Constraint::Percentage(34)])
        .split(vertical[1]);

    (vertical, body)
}

pub fn track_list_rect(area: Rect) -> Rect {
    layout(area).1[0]
}

pub fn draw<E: AudioEngine>(frame: &mut Frame, app: &App<E>) {
    let colors = &PALETTE;
    let controller = app.controller();
    let snapshot = controller.snapshot();

    frame.render_widget(
        Block::default().style(Style::default().bg(colors.bg)),
        frame.area(),
    );
    let (vertical, body) = layout(frame.area());

    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            APP_TITLE,
            Style::default()
                .fg(colors.accent)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("Tracks {}", snapshot.queue_len),
            Style::default().fg(colors.text),
        ),
        Span::styled("  |  ", Style::default().fg(colors.muted)),
        Span::styled(
            format!("Repeat {}", snapshot.repeat.label()),
            Style::default().fg(colors.alert),
        ),
        Span::styled("  |  ", Style::default().fg(colors.muted)),
        Span::styled(
            if snapshot.shuffled {
                "Shuffle on"
            } else {
                "Shuffle off"
            },
            Style::default().fg(colors.alert),
        ),
        Span::styled("  |  ", Style::default().fg(colors.muted)),
        Span::styled(
            controller.engine().output_name(),
            Style::default().fg(colors.muted),
        ),
    ]))
    .block(panel_block("Status", colors.panel_bg, colors.text, colors.border));
    frame.render_widget(header, vertical[0]);

    let tracks = app.visible_tracks();
    let playing = controller.current_track();
    let items: Vec<ListItem> = tracks
        .iter()
        .map(|path| {
            let info = controller.track_info(path);
            let marker = if playing == Some(path.as_path()) {
                "  > "
            } else {
                "    "
            };
            let heart = if controller.is_favorite(path) { "* " } else { "  " };
            ListItem::new(Line::from(vec![
                Span::styled(marker, Style::default().fg(colors.muted)),
                Span::styled(heart, Style::default().fg(colors.favorite)),
                Span::styled(info.title, Style::default().fg(colors.text)),
                Span::styled(
                    format!("  {}", info.artist),
                    Style::default().fg(colors.muted),
                ),
            ]))
        })
        .collect();

    let mut state = ListState::default();
    let selected = app.selected().min(tracks.len().saturating_sub(1));
    state.select((!tracks.is_empty()).then_some(selected));

    let list_title = match app.filter() {
        Some(term) => format!("Queue / search \"{term}\""),
        None => String::from("Queue"),
    };
    let list = List::new(items)
        .block(panel_block(
            &list_title,
            colors.panel_bg,
            colors.text,
            colors.border,
        ))
        .highlight_style(
            Style::default()
                .bg(colors.selected_bg)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("-> ");
    frame.render_stateful_widget(list, body[0], &mut state);

    let info_block = Paragraph::new(now_playing_lines(&snapshot, colors))
        .block(panel_block(
            "Now Playing",
            colors.panel_alt_bg,
            colors.text,
            colors.border,
        ))
        .wrap(Wrap { trim: true });
    frame.render_widget(info_block, body[1]);

    let timeline = Paragraph::new(Span::styled(
        timeline_line(&snapshot, 26, 14),
        Style::default().fg(colors.text),
    ))
    .block(panel_block(
        "Timeline",
        colors.panel_bg,
        colors.text,
        colors.border,
    ));
    frame.render_widget(timeline, vertical[2]);

    let footer = match app.prompt() {
        Some(buffer) => Line::from(vec![
            Span::styled(":", Style::default().fg(colors.accent)),
            Span::styled(buffer, Style::default().fg(colors.text)),
        ]),
        None => Line::from(vec![
            Span::styled(
                "Enter play, Space pause, n/b next/prev, s stop, r repeat, z shuffle, f fav, : command",
                Style::default().fg(colors.muted),
            ),
            Span::styled("  |  ", Style::default().fg(colors.muted)),
            Span::styled(app.status(), Style::default().fg(colors.text)),
        ]),
    };
    frame.render_widget(
        Paragraph::new(footer).block(panel_block(
            "Message",
            colors.panel_bg,
            colors.text,
            colors.border,
        )),
        vertical[3],
    );
}

fn now_playing_lines(snapshot: &SessionSnapshot, colors: &Palette) -> Vec<Line<'static>> {
    let (title, artist) = snapshot
        .track
        .as_ref()
        .map(|info| (info.title.clone(), info.artist.clone()))
        .unwrap_or_else(|| (String::from("-"), String::from("-")));
    let state = match snapshot.state {
        SessionState::Playing => "Playing",
        SessionState::Paused => "Paused",
        SessionState::Stopped => "Stopped",
    };
    let queue_position = snapshot
        .queue_index
        .map(|idx| format!("{}/{}", idx + 1, snapshot.queue_len))
        .unwrap_or_else(|| format!("-/{}", snapshot.queue_len));

    vec![
        Line::from(vec![
            Span::styled(
                "Now",
                Style::default()
                    .fg(colors.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!("  {title}"), Style::default().fg(colors.text)),
        ]),
        Line::from(Span::styled(
            format!("Artist  {artist}"),
            Style::default().fg(colors.muted),
        )),
        Line::from(Span::styled(
            format!("State   {state}"),
            Style::default().fg(colors.muted),
        )),
        Line::from(Span::styled(
            format!("Queue   {queue_position}"),
            Style::default().fg(colors.alert),
        )),
    ]
}

fn panel_block(title: &str, bg: Color, text: Color, border: Color) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(
            format!(" {title} "),
            Style::default().fg(text).add_modifier(Modifier::BOLD),
        ))
        .border_style(Style::default().fg(border))
        .style(Style::default().bg(bg))
}

fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
}

fn progress_bar(ratio: Option<f64>, width: usize) -> String {
    let clamped = ratio.unwrap_or(0.0).clamp(0.0, 1.0);
    let filled = (clamped * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width.saturating_sub(filled)))
}

fn timeline_line(snapshot: &SessionSnapshot, bar_width: usize, volume_width: usize) -> String {
    let elapsed = snapshot.position.unwrap_or_default();
    let ratio = snapshot.duration.and_then(|duration| {
        let total = duration.as_secs_f64();
        (total > 0.0).then(|| elapsed.as_secs_f64() / total)
    });
    let volume_ratio = f64::from(snapshot.volume) / f64::from(MAX_VOLUME);

    format!(
        "{} / {} {}  |  Vol {} {:>3}%  <-/-> seek  +/- volume",
        format_duration(elapsed),
        snapshot
            .duration
            .map(format_duration)
            .unwrap_or_else(|| String::from("--:--")),
        progress_bar(ratio, bar_width),
        progress_bar(Some(volume_ratio), volume_width),
        snapshot.volume
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RepeatMode;

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            state: SessionState::Playing,
            track: None,
            position: Some(Duration::from_secs(90)),
            duration: Some(Duration::from_secs(180)),
            volume: 50,
            repeat: RepeatMode::Off,
            shuffled: false,
            queue_index: Some(0),
            queue_len: 1,
            generation: 1,
        }
    }

    #[test]
    fn durations_render_as_minutes_and_seconds() {
        assert_eq!(format_duration(Duration::from_secs(0)), "00:00");
        assert_eq!(format_duration(Duration::from_secs(754)), "12:34");
    }

    #[test]
    fn progress_bar_clamps_ratio() {
        assert_eq!(progress_bar(Some(0.5), 4), "[##--]");
        assert_eq!(progress_bar(Some(3.0), 3), "[###]");
        assert_eq!(progress_bar(None, 2), "[--]");
    }

    #[test]
    fn timeline_shows_position_duration_and_volume() {
        let line = timeline_line(&snapshot(), 4, 2);
        assert!(line.starts_with("01:30 / 03:00 [##--]"), "{line}");
        assert!(line.contains("Vol [#-]  50%"), "{line}");

        let unknown = timeline_line(
            &SessionSnapshot {
                duration: None,
                position: None,
                ..snapshot()
            },
            4,
            2,
        );
        assert!(unknown.starts_with("00:00 / --:-- [----]"), "{unknown}");
    }
}
