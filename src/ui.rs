use std::collections::{HashMap, HashSet};
use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, BorderType, Borders, Clear, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use tracing::{debug, warn};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::catalog::MediaCatalog;
use crate::config::SourceConfig;
use crate::drive;
use crate::item::{MediaItem, MediaKind, Reaction};
use crate::media::{self, Completion, SaveOutcome};
use crate::navigator::GalleryNavigator;
use crate::player;
use crate::sort::SortMode;
use crate::viewport::{Effect, LoadState, LoaderSet, Shape, Surface, Viewport};

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

/// Full-view image candidates in the order the lightbox tries them.
pub fn lightbox_sources(item: &MediaItem) -> Vec<String> {
    let mut sources = vec![item.source_url.clone(), item.preview_url.clone()];
    if item.origin_link.is_some() {
        sources.push(drive::thumbnail_url(&item.id));
    }
    let mut seen = HashSet::new();
    sources
        .into_iter()
        .filter(|url| !url.trim().is_empty())
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

pub fn format_bytes(bytes: Option<u64>) -> String {
    let Some(bytes) = bytes else {
        return "-".to_string();
    };
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn format_date(created_at: Option<i64>) -> String {
    created_at
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn reaction_glyph(reaction: Reaction) -> &'static str {
    match reaction {
        Reaction::Like => "♥",
        Reaction::Dislike => "✗",
        Reaction::None => " ",
    }
}

fn state_glyph(kind: MediaKind, state: Option<LoadState>) -> &'static str {
    match (kind, state) {
        (_, None | Some(LoadState::Unloaded)) => "·",
        (_, Some(LoadState::Loading)) => "…",
        (MediaKind::Image, Some(_)) => "■",
        (MediaKind::Video, Some(LoadState::Ready)) => "▷",
        (MediaKind::Video, Some(LoadState::Playing)) => "▶",
        (MediaKind::Video, Some(LoadState::Paused)) => "⏸",
        (MediaKind::Video, Some(LoadState::Errored)) => "⧉",
    }
}

fn shape_label(shape: Shape) -> &'static str {
    match shape {
        Shape::Square => "square",
        Shape::Landscape => "landscape",
        Shape::Portrait => "portrait",
    }
}

fn truncate_to_width(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push('…');
    out
}

pub struct Options {
    pub catalog: MediaCatalog,
    pub source: SourceConfig,
    pub default_sort: SortMode,
    pub viewport_margin: usize,
    pub media_handle: Option<media::Handle>,
    pub player_command: Vec<String>,
    pub config_path: String,
}

pub struct Model {
    catalog: MediaCatalog,
    source: SourceConfig,
    sort: SortMode,
    view: Vec<MediaItem>,
    selected: usize,
    offset: usize,
    list_height: usize,
    margin: usize,
    navigator: GalleryNavigator,
    loaders: LoaderSet,
    media_handle: Option<media::Handle>,
    preview_paths: HashMap<String, String>,
    player_command: Vec<String>,
    config_path: String,
    status_message: String,
    spinner: Spinner,
    needs_redraw: bool,
}

impl Model {
    pub fn new(options: Options) -> Self {
        let mut model = Self {
            catalog: options.catalog,
            source: options.source,
            sort: options.default_sort,
            view: Vec::new(),
            selected: 0,
            offset: 0,
            list_height: 0,
            margin: options.viewport_margin,
            navigator: GalleryNavigator::default(),
            loaders: LoaderSet::default(),
            media_handle: options.media_handle,
            preview_paths: HashMap::new(),
            player_command: options.player_command,
            config_path: options.config_path,
            status_message: String::new(),
            spinner: Spinner::new(),
            needs_redraw: true,
        };
        model.catalog.set_unlocked(true, &model.source);
        model.refresh_view();
        model.status_message = model.catalog.report().summary();
        model
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        self.catalog.set_unlocked(false, &self.source);
        self.catalog.flush();
        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
                self.sync_viewport();
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.status_message = format!("Error: {err}");
                                self.mark_dirty();
                            }
                        }
                    }
                } else {
                    self.mark_dirty();
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.is_loading() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn is_loading(&self) -> bool {
        self.catalog.is_loading()
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        if self.catalog.poll() {
            self.refresh_view();
            self.status_message = self.catalog.report().summary();
            changed = true;
        }
        let completions = self
            .media_handle
            .as_ref()
            .map(|handle| handle.completions())
            .unwrap_or_default();
        for completion in completions {
            self.handle_completion(completion);
            changed = true;
        }
        changed
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Preview { id, result } => match result {
                Ok(preview) => {
                    self.preview_paths
                        .insert(id.clone(), preview.entry.file_path.clone());
                    self.finish_load(&id, preview.width, preview.height);
                }
                Err(err) => {
                    debug!(%id, error = %format!("{err:#}"), "preview unavailable");
                    let effects = self
                        .loaders
                        .get_mut(&id)
                        .map(|loader| loader.load_failed())
                        .unwrap_or_default();
                    self.apply_effects(&id, effects);
                }
            },
            Completion::Save { id, result } => {
                let name = self
                    .catalog
                    .get(&id)
                    .map(|item| item.display_name().to_string())
                    .unwrap_or(id);
                self.status_message = match result {
                    Ok(SaveOutcome::Written(path)) => {
                        format!("Saved {name} to {}", path.display())
                    }
                    Ok(SaveOutcome::OpenedLink(_)) => {
                        format!("Opened {name} in your browser to download.")
                    }
                    Err(err) => format!("Failed to save {name}: {err:#}"),
                };
            }
        }
    }

    fn is_video(&self, id: &str) -> bool {
        self.catalog.get(id).map(MediaItem::is_video).unwrap_or(false)
    }

    fn finish_load(&mut self, id: &str, width: u32, height: u32) {
        let video = self.is_video(id);
        let effects = match self.loaders.get_mut(id) {
            Some(loader) if video => loader.metadata_ready(width, height),
            Some(loader) => loader.load_complete(width, height),
            None => Vec::new(),
        };
        self.apply_effects(id, effects);
    }

    fn apply_effects(&mut self, id: &str, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Load => {
                    let Some(url) = self.catalog.get(id).map(|item| item.preview_url.clone())
                    else {
                        continue;
                    };
                    if let Some(handle) = &self.media_handle {
                        handle.enqueue(media::Request::Preview {
                            id: id.to_string(),
                            url,
                            ttl: None,
                            force: false,
                        });
                    } else {
                        self.finish_load(id, 1, 1);
                    }
                }
                Effect::ShowEmbed(url) => {
                    debug!(%id, %url, "switched to embedded preview");
                }
                other => debug!(%id, effect = ?other, "card effect"),
            }
        }
        self.mark_dirty();
    }

    /// Re-derives the sorted view and keeps the selection on the same item.
    fn refresh_view(&mut self) {
        let selected_id = self.view.get(self.selected).map(|item| item.id.clone());
        self.view = self.catalog.sorted(self.sort);
        self.loaders.retain_items(&self.view);
        self.navigator.resync(&self.view);
        self.selected = selected_id
            .and_then(|id| self.view.iter().position(|item| item.id == id))
            .unwrap_or(0);
        if let Some(index) = self.navigator.index() {
            self.selected = index;
        }
        self.selected = self.selected.min(self.view.len().saturating_sub(1));
        self.mark_dirty();
    }

    fn sync_viewport(&mut self) {
        let viewport = Viewport {
            top: self.offset,
            height: self.list_height.max(1),
            margin: self.margin,
        };
        let mut visible: HashSet<String> = self
            .view
            .iter()
            .enumerate()
            .filter(|(row, _)| viewport.contains(*row, row + 1))
            .map(|(_, item)| item.id.clone())
            .collect();
        if let Some(item) = self.navigator.current(&self.view) {
            visible.insert(item.id.clone());
        }
        for (id, effect) in self.loaders.update_visibility(&visible) {
            self.apply_effects(&id, vec![effect]);
        }
    }

    fn current(&self) -> Option<&MediaItem> {
        self.navigator
            .current(&self.view)
            .or_else(|| self.view.get(self.selected))
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        match code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char(' ') => self.toggle_lightbox(),
            KeyCode::Esc => self.navigator.close(),
            KeyCode::Left if self.navigator.is_open() => {
                self.navigator.prev(&self.view);
                self.follow_navigator();
            }
            KeyCode::Right if self.navigator.is_open() => {
                self.navigator.next(&self.view);
                self.follow_navigator();
            }
            KeyCode::Up | KeyCode::Char('k') if !self.navigator.is_open() => {
                self.move_selection(-1)
            }
            KeyCode::Down | KeyCode::Char('j') if !self.navigator.is_open() => {
                self.move_selection(1)
            }
            KeyCode::PageUp if !self.navigator.is_open() => {
                self.move_selection(-(self.list_height.max(1) as isize))
            }
            KeyCode::PageDown if !self.navigator.is_open() => {
                self.move_selection(self.list_height.max(1) as isize)
            }
            KeyCode::Char('l') => self.react(Reaction::Like),
            KeyCode::Char('d') => self.react(Reaction::Dislike),
            KeyCode::Char('s') => self.cycle_sort(1),
            KeyCode::Char('S') => self.cycle_sort(-1),
            KeyCode::Char('w') => self.save_current(),
            KeyCode::Char('o') => self.open_current(),
            KeyCode::Char('p') => self.toggle_playback(),
            KeyCode::Char('v') => self.play_external(),
            KeyCode::Char('y') => self.copy_link(),
            _ => return Ok(false),
        }
        self.mark_dirty();
        Ok(false)
    }

    fn toggle_lightbox(&mut self) {
        if self.navigator.is_open() {
            self.navigator.close();
        } else if !self.navigator.open(self.selected, &self.view) {
            self.status_message = "Nothing to show yet.".to_string();
        }
    }

    fn follow_navigator(&mut self) {
        if let Some(index) = self.navigator.index() {
            self.selected = index;
            self.ensure_visible();
        }
    }

    fn move_selection(&mut self, delta: isize) {
        if self.view.is_empty() {
            return;
        }
        let last = self.view.len() as isize - 1;
        self.selected = (self.selected as isize + delta).clamp(0, last) as usize;
        self.ensure_visible();
    }

    fn ensure_visible(&mut self) {
        let height = self.list_height.max(1);
        if self.selected < self.offset {
            self.offset = self.selected;
        } else if self.selected >= self.offset + height {
            self.offset = self.selected + 1 - height;
        }
    }

    fn react(&mut self, requested: Reaction) {
        let Some(item) = self.current() else {
            return;
        };
        let id = item.id.clone();
        let name = item.display_name().to_string();
        let next = Reaction::toggled(item.reaction, requested);
        if self.navigator.react(&mut self.catalog, &id, next) {
            self.status_message = match next {
                Reaction::Like => format!("Liked {name}"),
                Reaction::Dislike => format!("Disliked {name}"),
                Reaction::None => format!("Cleared reaction on {name}"),
            };
            self.refresh_view();
        }
    }

    fn cycle_sort(&mut self, delta: isize) {
        self.sort = self.sort.shift(delta);
        self.refresh_view();
        self.ensure_visible();
        self.status_message = format!("Sorted by {}", self.sort.label());
    }

    fn save_current(&mut self) {
        let Some(item) = self.current().cloned() else {
            return;
        };
        match &self.media_handle {
            Some(handle) => {
                self.status_message = format!("Saving {}…", item.display_name());
                handle.enqueue(media::Request::Save(item));
            }
            None => self.status_message = "Downloads are unavailable.".to_string(),
        }
    }

    fn open_current(&mut self) {
        let Some(item) = self.current() else {
            return;
        };
        let embed = match self.loaders.get(&item.id).map(|loader| loader.surface()) {
            Some(Surface::EmbeddedPreview(url)) => Some(url.clone()),
            _ => None,
        };
        let url = embed
            .or_else(|| item.origin_link.clone())
            .unwrap_or_else(|| item.source_url.clone());
        let name = item.display_name().to_string();
        self.status_message = match webbrowser::open(&url) {
            Ok(_) => format!("Opened {name} in your browser."),
            Err(err) => {
                warn!(error = %err, "browser launch failed");
                format!("Failed to open {name}: {err} (URL: {url})")
            }
        };
    }

    fn toggle_playback(&mut self) {
        let Some(id) = self.current().map(|item| item.id.clone()) else {
            return;
        };
        let effects = match self.loaders.get_mut(&id) {
            Some(loader) => loader.toggle_playback(),
            None => Vec::new(),
        };
        if effects.is_empty() {
            self.status_message = "Nothing to play here.".to_string();
            return;
        }
        self.status_message = if effects.contains(&Effect::Pause) {
            "Paused".to_string()
        } else {
            "Playing".to_string()
        };
        self.apply_effects(&id, effects);
    }

    fn play_external(&mut self) {
        let Some(item) = self.current() else {
            return;
        };
        if !item.is_video() {
            self.status_message = "Not a video.".to_string();
            return;
        }
        let name = item.display_name().to_string();
        let id = item.id.clone();
        let url = item.source_url.clone();
        let spawned = player::spawn_external_player(&self.player_command, &url);
        match spawned {
            Ok(()) => self.status_message = format!("Playing {name} externally."),
            Err(err) => {
                warn!(%id, error = %format!("{err:#}"), "native playback failed");
                self.status_message = format!("Failed to play {name}: {err:#}");
                let effects = self
                    .loaders
                    .get_mut(&id)
                    .map(|loader| loader.playback_error())
                    .unwrap_or_default();
                self.apply_effects(&id, effects);
            }
        }
    }

    fn copy_link(&mut self) {
        let Some(item) = self.current() else {
            return;
        };
        let link = item
            .origin_link
            .clone()
            .unwrap_or_else(|| item.source_url.clone());
        let copied = arboard::Clipboard::new()
            .and_then(|mut clipboard| clipboard.set_text(link.clone()))
            .context("copy to clipboard");
        self.status_message = match copied {
            Ok(()) => format!("Copied {link}"),
            Err(err) => format!("{err:#}"),
        };
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let status_text = if self.is_loading() {
            format!("{} {}", self.spinner.frame(), self.status_message)
        } else {
            self.status_message.clone()
        };
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        self.draw_grid(frame, layout[1]);

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center);
        frame.render_widget(footer, layout[2]);

        if self.navigator.is_open() {
            self.draw_lightbox(frame, layout[1]);
        }
    }

    fn draw_grid(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let totals = self.catalog.totals();
        let title = format!(
            " Gallery · {} items · ♥ {} ✗ {} · {} ",
            self.view.len(),
            totals.likes,
            totals.dislikes,
            self.sort.label()
        );
        let block = Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
            .style(Style::default().bg(COLOR_PANEL_BG));
        let inner = block.inner(area);
        frame.render_widget(block, area);

        self.list_height = inner.height as usize;
        self.ensure_visible();

        if self.view.is_empty() {
            let message = if self.is_loading() {
                "Loading…".to_string()
            } else {
                format!("No media. Configure a folder in {}", self.config_path)
            };
            let empty = Paragraph::new(message)
                .style(Style::default().fg(COLOR_TEXT_SECONDARY))
                .alignment(Alignment::Center);
            frame.render_widget(empty, inner);
            return;
        }

        let name_width = (inner.width as usize).saturating_sub(36).max(8);
        let lines: Vec<Line> = self
            .view
            .iter()
            .enumerate()
            .skip(self.offset)
            .take(self.list_height)
            .map(|(idx, item)| {
                let state = self.loaders.get(&item.id).map(|loader| loader.state());
                let reaction_color = match item.reaction {
                    Reaction::Like => COLOR_SUCCESS,
                    Reaction::Dislike => COLOR_ERROR,
                    Reaction::None => COLOR_TEXT_SECONDARY,
                };
                let name = truncate_to_width(item.display_name(), name_width);
                let pad = name_width.saturating_sub(name.width());
                let mut style = Style::default().fg(COLOR_TEXT_PRIMARY);
                if idx == self.selected {
                    style = style.bg(COLOR_PANEL_SELECTED_BG).add_modifier(Modifier::BOLD);
                }
                Line::from(vec![
                    Span::styled(
                        format!(" {} ", state_glyph(item.kind, state)),
                        Style::default().fg(COLOR_ACCENT),
                    ),
                    Span::styled(
                        format!("{} ", reaction_glyph(item.reaction)),
                        Style::default().fg(reaction_color),
                    ),
                    Span::styled(format!("{name}{}", " ".repeat(pad)), style),
                    Span::styled(
                        format!(
                            " {:<5} {:>9} {:>10}",
                            item.kind.label(),
                            format_bytes(item.size_bytes),
                            format_date(item.created_at)
                        ),
                        Style::default().fg(COLOR_TEXT_SECONDARY),
                    ),
                ])
            })
            .collect();
        frame.render_widget(Paragraph::new(Text::from(lines)), inner);
    }

    fn draw_lightbox(&self, frame: &mut Frame<'_>, area: Rect) {
        let Some(item) = self.navigator.current(&self.view) else {
            return;
        };
        let popup = centered_rect(80, 70, area);
        frame.render_widget(Clear, popup);

        let position = self.navigator.index().map(|i| i + 1).unwrap_or(0);
        let block = Block::default()
            .title(format!(" {} ({}/{}) ", item.display_name(), position, self.view.len()))
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(COLOR_ACCENT))
            .style(Style::default().bg(COLOR_PANEL_FOCUSED_BG));

        let loader = self.loaders.get(&item.id);
        let label = |text: &str| Span::styled(format!("{text:<10}"), Style::default().fg(COLOR_TEXT_SECONDARY));
        let mut lines = vec![
            Line::from(vec![
                label("Kind"),
                Span::raw(format!(
                    "{} · {} · {}",
                    item.kind.label(),
                    format_bytes(item.size_bytes),
                    format_date(item.created_at)
                )),
            ]),
            Line::from(vec![
                label("Reaction"),
                Span::raw(match item.reaction {
                    Reaction::Like => "♥ liked",
                    Reaction::Dislike => "✗ disliked",
                    Reaction::None => "none",
                }),
            ]),
        ];
        if let Some(loader) = loader {
            lines.push(Line::from(vec![
                label("Shape"),
                Span::raw(shape_label(loader.shape())),
            ]));
        }
        if let Some(path) = self.preview_paths.get(&item.id) {
            lines.push(Line::from(vec![label("Preview"), Span::raw(path.clone())]));
        }
        lines.push(Line::default());

        match (item.kind, loader.map(|loader| loader.surface())) {
            (MediaKind::Video, Some(Surface::EmbeddedPreview(url))) => {
                lines.push(Line::from(vec![label("Embedded"), Span::raw(url.clone())]));
            }
            (MediaKind::Video, _) => {
                lines.push(Line::from(vec![label("Video"), Span::raw(item.source_url.clone())]));
                lines.push(Line::from(vec![
                    label(""),
                    Span::styled("v: external player · p: play/pause", Style::default().fg(COLOR_TEXT_SECONDARY)),
                ]));
            }
            (MediaKind::Image, _) => {
                for (idx, url) in lightbox_sources(item).into_iter().enumerate() {
                    let heading = if idx == 0 { "Sources" } else { "" };
                    lines.push(Line::from(vec![label(heading), Span::raw(url)]));
                }
            }
        }
        if let Some(link) = &item.origin_link {
            lines.push(Line::from(vec![label("Origin"), Span::raw(link.clone())]));
        }

        let body = Paragraph::new(Text::from(lines))
            .block(block)
            .style(Style::default().fg(COLOR_TEXT_PRIMARY))
            .wrap(Wrap { trim: false });
        frame.render_widget(body, popup);
    }

    fn footer_text(&self) -> &'static str {
        if self.navigator.is_open() {
            "←/→ navigate · l/d react · w save · o open · p play/pause · v player · Esc close · q quit"
        } else {
            "j/k move · Space view · l/d react · s/S sort · w save · o open · y copy link · q quit"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive_item() -> MediaItem {
        MediaItem {
            id: "abc".into(),
            kind: MediaKind::Image,
            source_url: "https://content/abc".into(),
            preview_url: "https://thumb/abc=s1200".into(),
            name: Some("abc.jpg".into()),
            size_bytes: Some(2048),
            created_at: Some(0),
            reaction: Reaction::None,
            origin_link: Some("https://drive/abc".into()),
        }
    }

    #[test]
    fn lightbox_tries_source_then_preview_then_thumbnail() {
        let sources = lightbox_sources(&drive_item());
        assert_eq!(
            sources,
            vec![
                "https://content/abc".to_string(),
                "https://thumb/abc=s1200".to_string(),
                drive::thumbnail_url("abc"),
            ]
        );
    }

    #[test]
    fn static_items_have_a_single_source() {
        let seed = MediaItem::seed(0, "https://example.com/a.jpg");
        assert_eq!(lightbox_sources(&seed), vec!["https://example.com/a.jpg".to_string()]);
    }

    #[test]
    fn byte_formatting() {
        assert_eq!(format_bytes(None), "-");
        assert_eq!(format_bytes(Some(512)), "512 B");
        assert_eq!(format_bytes(Some(2048)), "2.0 KB");
        assert_eq!(format_bytes(Some(5 * 1024 * 1024)), "5.0 MB");
    }

    #[test]
    fn dates_render_as_days() {
        assert_eq!(format_date(Some(0)), "1970-01-01");
        assert_eq!(format_date(None), "-");
    }

    fn video_model(player_command: Vec<String>) -> Model {
        let mut clip = MediaItem::seed(0, "https://example.com/clip.mp4");
        clip.kind = MediaKind::Video;
        let store = crate::storage::Store::open_in_memory().unwrap();
        let reactions = std::sync::Arc::new(crate::reactions::ReactionStore::new(store));
        let mut model = Model::new(Options {
            catalog: MediaCatalog::new(None, reactions),
            source: SourceConfig {
                folder: String::new(),
                credential: String::new(),
                fallback_items: vec![clip],
            },
            default_sort: SortMode::NameAsc,
            viewport_margin: 2,
            media_handle: None,
            player_command,
            config_path: String::new(),
        });
        model.sync_viewport();
        model
    }

    #[test]
    fn preview_failure_does_not_embed_a_video() {
        let mut model = video_model(Vec::new());
        assert_eq!(
            model.loaders.get("seed-0").map(|l| l.state()),
            Some(LoadState::Playing)
        );
        model.handle_completion(Completion::Preview {
            id: "seed-0".into(),
            result: Err(anyhow::anyhow!("timed out")),
        });
        let loader = model.loaders.get("seed-0").unwrap();
        assert_eq!(loader.state(), LoadState::Playing);
        assert_eq!(loader.surface(), &Surface::Native);
    }

    #[test]
    fn failed_native_playback_switches_to_embed() {
        let mut model = video_model(Vec::new());
        model.play_external();
        assert!(model.status_message.starts_with("Failed to play"));
        let loader = model.loaders.get("seed-0").unwrap();
        assert_eq!(loader.state(), LoadState::Errored);
        assert!(matches!(loader.surface(), Surface::EmbeddedPreview(_)));
    }

    #[test]
    fn truncation_respects_width() {
        assert_eq!(truncate_to_width("short", 10), "short");
        let cut = truncate_to_width("a-very-long-file-name.jpg", 8);
        assert!(cut.width() <= 8);
        assert!(cut.ends_with('…'));
    }
}
