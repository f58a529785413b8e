#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Row, Table, TableState, Wrap};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::scan::api::{ApiClient, ScanApi as _};
use crate::scan::model::{ScanRequest, Task};
use crate::scan::poller::{PollCommand, PollEvent, PollPolicy, Poller, PollerHandle};
use crate::scan::render::{self, Badge, TaskAction};
use crate::scan::validate;
use crate::tools::theme::{Palette, Theme};
use crate::tui::log_viewer::{self, LogView};
use crate::tui::{self, centered_rect};

#[derive(Debug, Clone)]
pub struct DashboardOptions {
    pub cfg: Config,
    /// Where downloaded screenshots land.
    pub download_dir: PathBuf,
}

pub async fn run(opts: DashboardOptions) -> anyhow::Result<()> {
    let cfg = &opts.cfg;
    let api = Arc::new(ApiClient::from_config(cfg)?);
    let store = crate::scan::open_store(cfg)?;
    let initial = store.load().tasks;
    let (poller, mut events, join) = Poller::spawn(
        Arc::clone(&api),
        store,
        PollPolicy::from_config(&cfg.poll),
        Duration::from_millis(cfg.store.debounce_ms),
    );
    let (mut net_rx, probe_task) =
        spawn_connectivity_probe(Arc::clone(&api), cfg.poll.ping_interval());

    let mut app = AppState::new(cfg, api.base_url().to_string(), initial);
    let result = run_loop(&opts, &api, &poller, &mut events, &mut net_rx, &mut app).await;

    probe_task.abort();
    poller.shutdown();
    if let Err(e) = join.await {
        tracing::warn!(error = %e, "poller task ended abnormally");
    }
    result
}

async fn run_loop(
    opts: &DashboardOptions,
    api: &ApiClient,
    poller: &PollerHandle,
    events: &mut mpsc::UnboundedReceiver<PollEvent>,
    net_rx: &mut mpsc::UnboundedReceiver<bool>,
    app: &mut AppState,
) -> anyhow::Result<()> {
    let terminal = tui::init_terminal()?;
    let mut guard = tui::TerminalGuard::new(terminal);

    loop {
        while let Ok(ev) = events.try_recv() {
            app.apply_event(ev);
        }
        while let Ok(online) = net_rx.try_recv() {
            app.set_online(online);
        }
        sync_pause(app, poller);
        app.expire_toast(Instant::now());

        guard.terminal()?.draw(|f| draw(f, app))?;

        if event::poll(Duration::from_millis(50))? {
            let effect = match event::read()? {
                Event::Key(key) => handle_key(key, app),
                Event::FocusLost => {
                    app.focused = false;
                    Effect::None
                }
                Event::FocusGained => {
                    app.focused = true;
                    Effect::None
                }
                _ => Effect::None,
            };
            if matches!(effect, Effect::Quit) {
                break;
            }
            perform(effect, opts, api, poller, app).await;
        }
    }

    Ok(())
}

/// Sends pause/resume to the poller when the combined state flips.
fn sync_pause(app: &mut AppState, poller: &PollerHandle) {
    let want = app.wants_pause();
    if want == app.pause_sent {
        return;
    }
    app.pause_sent = want;
    if want {
        tracing::debug!(
            focused = app.focused,
            online = app.online,
            manual = app.manual_pause,
            "pausing poller"
        );
        poller.pause();
    } else {
        tracing::debug!("resuming poller");
        poller.resume();
    }
}

fn spawn_connectivity_probe(
    api: Arc<ApiClient>,
    every: Duration,
) -> (mpsc::UnboundedReceiver<bool>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let online = match api.ping().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(error = %e, "ping failed");
                    false
                }
            };
            if tx.send(online).is_err() {
                return;
            }
        }
    });
    (rx, task)
}

async fn perform(
    effect: Effect,
    opts: &DashboardOptions,
    api: &ApiClient,
    poller: &PollerHandle,
    app: &mut AppState,
) {
    match effect {
        Effect::None | Effect::Quit => {}
        Effect::Submit(req) => match api.submit(&req).await {
            Ok(resp) => {
                let task = Task::queued(&resp, &req);
                app.toast = Some(Toast::info(format!(
                    "Scan queued: {}",
                    resp.message
                        .as_deref()
                        .unwrap_or(task.short_id().as_str())
                )));
                app.upsert(task.clone());
                app.table_state.select(Some(0));
                poller.track(task);
                app.form = None;
                app.mode = Mode::Normal;
            }
            Err(e) => {
                tracing::warn!(error = %e, repo = %req.repo_url, "scan submission failed");
                if let Some(form) = app.form.as_mut() {
                    form.error = Some(e.to_string());
                }
            }
        },
        Effect::FetchLog(id) => match api.get_status(&id, true).await {
            Ok(update) => {
                let log = update.log.flatten().unwrap_or_default();
                let title = app
                    .task(&id)
                    .map_or_else(|| format!("Log {id}"), |t| format!("Log {}", t.short_id()));
                app.log_view = Some(LogView::new(title, &log));
                app.mode = Mode::Log;
            }
            Err(e) => app.toast = Some(Toast::error(format!("Log unavailable: {e}"))),
        },
        Effect::Download(filename) => {
            let target = opts.download_dir.join(&filename);
            let outcome = match api.download_screenshot(&filename).await {
                Ok(bytes) => tokio::fs::write(&target, bytes)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            app.toast = Some(match outcome {
                Ok(()) => Toast::info(format!("Saved {}", target.display())),
                Err(e) => Toast::error(format!("Download failed: {e}")),
            });
        }
        Effect::Remove(id) => {
            app.remove(&id);
            poller.send(PollCommand::Remove(id));
        }
        Effect::Clear => {
            app.tasks.clear();
            app.clamp_selection();
            poller.send(PollCommand::Clear);
        }
        Effect::ToggleTheme => {
            app.theme = app.theme.toggle();
            let theme = app.theme;
            let saved = tokio::task::spawn_blocking(move || {
                crate::config::set_value_string("ui.theme", theme.as_str())
            })
            .await;
            app.toast = Some(match saved {
                Ok(Ok(())) => Toast::info(format!("Theme: {theme}")),
                Ok(Err(e)) => Toast::error(format!("Theme not saved: {e}")),
                Err(e) => Toast::error(format!("Theme not saved: {e}")),
            });
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Effect {
    None,
    Quit,
    Submit(ScanRequest),
    FetchLog(String),
    Download(String),
    Remove(String),
    Clear,
    ToggleTheme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Form,
    Confirm,
    Log,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConfirmAction {
    Remove(String),
    Clear,
}

#[derive(Debug, Clone)]
struct Toast {
    message: String,
    error: bool,
    until: Instant,
}

impl Toast {
    fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error: false,
            until: Instant::now() + Duration::from_secs(3),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error: true,
            until: Instant::now() + Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct TextInput {
    text: String,
    cursor: usize,
}

impl TextInput {
    fn new(initial: impl Into<String>) -> Self {
        let text = initial.into();
        let cursor = text.chars().count();
        Self { text, cursor }
    }

    fn as_str(&self) -> &str {
        &self.text
    }

    fn insert_char(&mut self, c: char) {
        let mut chars: Vec<char> = self.text.chars().collect();
        let cur = self.cursor.min(chars.len());
        chars.insert(cur, c);
        self.text = chars.into_iter().collect();
        self.cursor = cur + 1;
    }

    fn backspace(&mut self) {
        let mut chars: Vec<char> = self.text.chars().collect();
        let cur = self.cursor.min(chars.len());
        if cur == 0 {
            return;
        }
        chars.remove(cur - 1);
        self.text = chars.into_iter().collect();
        self.cursor = cur - 1;
    }

    fn delete(&mut self) {
        let mut chars: Vec<char> = self.text.chars().collect();
        let cur = self.cursor.min(chars.len());
        if cur >= chars.len() {
            return;
        }
        chars.remove(cur);
        self.text = chars.into_iter().collect();
    }

    fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    fn move_right(&mut self) {
        let len = self.text.chars().count();
        self.cursor = (self.cursor + 1).min(len);
    }

    fn move_home(&mut self) {
        self.cursor = 0;
    }

    fn move_end(&mut self) {
        self.cursor = self.text.chars().count();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormField {
    Repo,
    Branch,
    ProjectKey,
    Exclusions,
    Inclusions,
}

impl FormField {
    const ALL: [Self; 5] = [
        Self::Repo,
        Self::Branch,
        Self::ProjectKey,
        Self::Exclusions,
        Self::Inclusions,
    ];

    fn label(self) -> &'static str {
        match self {
            Self::Repo => "Repository: ",
            Self::Branch => "Branch:     ",
            Self::ProjectKey => "Project key:",
            Self::Exclusions => "Exclusions: ",
            Self::Inclusions => "Inclusions: ",
        }
    }

    fn step(self, delta: isize) -> Self {
        let idx = Self::ALL.iter().position(|f| *f == self).unwrap_or(0);
        let len = Self::ALL.len() as isize;
        let next = (idx as isize + delta).rem_euclid(len);
        Self::ALL[usize::try_from(next).unwrap_or(0)]
    }
}

#[derive(Debug, Clone)]
struct ScanForm {
    repo: TextInput,
    branch: TextInput,
    project_key: TextInput,
    exclusions: TextInput,
    inclusions: TextInput,
    field: FormField,
    error: Option<String>,
}

impl ScanForm {
    fn new() -> Self {
        Self {
            repo: TextInput::default(),
            branch: TextInput::new("main"),
            project_key: TextInput::default(),
            exclusions: TextInput::default(),
            inclusions: TextInput::default(),
            field: FormField::Repo,
            error: None,
        }
    }

    fn input(&self, field: FormField) -> &TextInput {
        match field {
            FormField::Repo => &self.repo,
            FormField::Branch => &self.branch,
            FormField::ProjectKey => &self.project_key,
            FormField::Exclusions => &self.exclusions,
            FormField::Inclusions => &self.inclusions,
        }
    }

    fn input_mut(&mut self) -> &mut TextInput {
        match self.field {
            FormField::Repo => &mut self.repo,
            FormField::Branch => &mut self.branch,
            FormField::ProjectKey => &mut self.project_key,
            FormField::Exclusions => &mut self.exclusions,
            FormField::Inclusions => &mut self.inclusions,
        }
    }

    /// Leaving the repository field fills an empty project key from it.
    fn move_field(&mut self, delta: isize) {
        if self.field == FormField::Repo
            && self.project_key.as_str().trim().is_empty()
            && let Some(key) = validate::default_project_key(self.repo.as_str())
        {
            self.project_key = TextInput::new(key);
        }
        self.field = self.field.step(delta);
    }

    fn request(&self) -> ScanRequest {
        let project_key = if self.project_key.as_str().trim().is_empty() {
            validate::default_project_key(self.repo.as_str()).unwrap_or_default()
        } else {
            self.project_key.as_str().to_owned()
        };
        ScanRequest {
            repo_url: self.repo.as_str().to_owned(),
            branch_name: self.branch.as_str().to_owned(),
            project_key,
            sonar_exclusions: self.exclusions.as_str().to_owned(),
            sonar_inclusions: self.inclusions.as_str().to_owned(),
        }
    }
}

#[allow(clippy::struct_excessive_bools)]
#[derive(Debug)]
struct AppState {
    base_url: String,
    theme: Theme,
    icons: bool,

    mode: Mode,
    tasks: Vec<Task>,
    table_state: TableState,
    backoff: BTreeMap<String, Duration>,

    form: Option<ScanForm>,
    confirm: Option<ConfirmAction>,
    log_view: Option<LogView>,
    toast: Option<Toast>,
    show_detail: bool,

    focused: bool,
    online: bool,
    manual_pause: bool,
    pause_sent: bool,
    poller_paused: bool,
}

impl AppState {
    fn new(cfg: &Config, base_url: String, tasks: Vec<Task>) -> Self {
        let mut table_state = TableState::default();
        table_state.select(Some(0));
        Self {
            base_url,
            theme: cfg.ui.theme,
            icons: cfg.ui.icons,
            mode: Mode::Normal,
            tasks,
            table_state,
            backoff: BTreeMap::new(),
            form: None,
            confirm: None,
            log_view: None,
            toast: None,
            show_detail: false,
            focused: true,
            online: true,
            manual_pause: false,
            pause_sent: false,
            poller_paused: false,
        }
    }

    fn wants_pause(&self) -> bool {
        self.manual_pause || !self.focused || !self.online
    }

    fn set_online(&mut self, online: bool) {
        if online == self.online {
            return;
        }
        self.online = online;
        self.toast = Some(if online {
            Toast::info("Back online; polling resumed")
        } else {
            Toast::error("Server unreachable; polling paused")
        });
    }

    fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    fn selected(&self) -> Option<&Task> {
        self.tasks.get(self.selected_index())
    }

    fn selected_index(&self) -> usize {
        self.table_state.selected().unwrap_or(0)
    }

    fn clamp_selection(&mut self) {
        if self.tasks.is_empty() {
            self.table_state.select(Some(0));
            return;
        }
        let idx = self.selected_index().min(self.tasks.len() - 1);
        self.table_state.select(Some(idx));
    }

    fn move_selection(&mut self, delta: i64) {
        if self.tasks.is_empty() {
            return;
        }
        let cur = i64::try_from(self.selected_index()).unwrap_or(i64::MAX);
        let max = i64::try_from(self.tasks.len().saturating_sub(1)).unwrap_or(i64::MAX);
        let next = (cur + delta).clamp(0, max);
        let next = usize::try_from(next).unwrap_or(0);
        self.table_state.select(Some(next));
    }

    /// Patches a row in place, or adds it at the top.
    fn upsert(&mut self, task: Task) {
        if let Some(slot) = self.tasks.iter_mut().find(|t| t.id == task.id) {
            *slot = task;
        } else {
            self.tasks.insert(0, task);
        }
    }

    fn remove(&mut self, id: &str) {
        self.tasks.retain(|t| t.id != id);
        self.backoff.remove(id);
        self.clamp_selection();
    }

    fn apply_event(&mut self, ev: PollEvent) {
        match ev {
            PollEvent::Updated(task) => {
                self.backoff.remove(&task.id);
                self.upsert(task);
            }
            PollEvent::Backoff { id, interval } => {
                self.backoff.insert(id, interval);
            }
            PollEvent::Removed(id) => self.remove(&id),
            PollEvent::Reloaded(tasks) => {
                self.tasks = tasks;
                self.backoff.clear();
                self.clamp_selection();
            }
            PollEvent::Paused => self.poller_paused = true,
            PollEvent::Resumed { .. } => self.poller_paused = false,
        }
    }

    fn expire_toast(&mut self, now: Instant) {
        if self.toast.as_ref().is_some_and(|t| now >= t.until) {
            self.toast = None;
        }
    }

    fn selected_action(&self, key: char) -> Option<TaskAction> {
        let task = self.selected()?;
        render::actions(task, &self.base_url)
            .into_iter()
            .find(|a| a.key() == key)
    }
}

fn handle_key(key: KeyEvent, app: &mut AppState) -> Effect {
    if key.modifiers.contains(KeyModifiers::CONTROL) && matches!(key.code, KeyCode::Char('c')) {
        return Effect::Quit;
    }

    match app.mode {
        Mode::Normal => handle_normal_key(key, app),
        Mode::Form => handle_form_key(key, app),
        Mode::Confirm => handle_confirm_key(key, app),
        Mode::Log => {
            if let Some(view) = app.log_view.as_mut() {
                match view.handle_key(key) {
                    log_viewer::KeyAction::Continue => return Effect::None,
                    log_viewer::KeyAction::Cancelled => return Effect::Quit,
                    log_viewer::KeyAction::Quit => {}
                }
            }
            app.log_view = None;
            app.mode = Mode::Normal;
            Effect::None
        }
    }
}

fn handle_normal_key(key: KeyEvent, app: &mut AppState) -> Effect {
    match key.code {
        KeyCode::Esc if app.show_detail => app.show_detail = false,
        KeyCode::Esc | KeyCode::Char('q') => return Effect::Quit,
        KeyCode::Up | KeyCode::Char('k') => app.move_selection(-1),
        KeyCode::Down | KeyCode::Char('j') => app.move_selection(1),
        KeyCode::PageUp => app.move_selection(-10),
        KeyCode::PageDown => app.move_selection(10),
        KeyCode::Enter => app.show_detail = !app.show_detail,
        KeyCode::Char('n') => {
            app.form = Some(ScanForm::new());
            app.mode = Mode::Form;
        }
        KeyCode::Char('p') => {
            app.manual_pause = !app.manual_pause;
            app.toast = Some(Toast::info(if app.manual_pause {
                "Polling paused"
            } else {
                "Polling resumed"
            }));
        }
        KeyCode::Char('t') => return Effect::ToggleTheme,
        KeyCode::Char('d') => {
            if let Some(task) = app.selected() {
                app.confirm = Some(ConfirmAction::Remove(task.id.clone()));
                app.mode = Mode::Confirm;
            }
        }
        KeyCode::Char('C') => {
            if !app.tasks.is_empty() {
                app.confirm = Some(ConfirmAction::Clear);
                app.mode = Mode::Confirm;
            }
        }
        KeyCode::Char(c @ ('o' | 'v' | 'D' | 'l')) => match app.selected_action(c) {
            Some(TaskAction::OpenReport(url)) => {
                app.toast = Some(Toast::info(format!("Report: {url}")));
            }
            Some(TaskAction::ViewScreenshot(url)) => {
                app.toast = Some(Toast::info(format!("Screenshot: {url}")));
            }
            Some(TaskAction::DownloadScreenshot(name)) => return Effect::Download(name),
            Some(TaskAction::ViewLog) => {
                if let Some(task) = app.selected() {
                    return Effect::FetchLog(task.id.clone());
                }
            }
            None => {
                if app.selected().is_some() {
                    app.toast = Some(Toast::error("Not available for this scan"));
                }
            }
        },
        _ => {}
    }
    Effect::None
}

fn handle_form_key(key: KeyEvent, app: &mut AppState) -> Effect {
    let Some(form) = app.form.as_mut() else {
        app.mode = Mode::Normal;
        return Effect::None;
    };

    match key.code {
        KeyCode::Esc => {
            app.form = None;
            app.mode = Mode::Normal;
        }
        KeyCode::Tab | KeyCode::Down => form.move_field(1),
        KeyCode::BackTab | KeyCode::Up => form.move_field(-1),
        KeyCode::Enter => match validate::normalize(form.request()) {
            Ok(req) => {
                form.error = None;
                return Effect::Submit(req);
            }
            Err(e) => form.error = Some(e.to_string()),
        },
        KeyCode::Left => form.input_mut().move_left(),
        KeyCode::Right => form.input_mut().move_right(),
        KeyCode::Home => form.input_mut().move_home(),
        KeyCode::End => form.input_mut().move_end(),
        KeyCode::Backspace => form.input_mut().backspace(),
        KeyCode::Delete => form.input_mut().delete(),
        KeyCode::Char(c)
            if !key.modifiers.contains(KeyModifiers::CONTROL)
                && !key.modifiers.contains(KeyModifiers::ALT) =>
        {
            form.input_mut().insert_char(c);
        }
        _ => {}
    }
    Effect::None
}

fn handle_confirm_key(key: KeyEvent, app: &mut AppState) -> Effect {
    let effect = match key.code {
        KeyCode::Char('y' | 'Y') | KeyCode::Enter => match app.confirm.take() {
            Some(ConfirmAction::Remove(id)) => Effect::Remove(id),
            Some(ConfirmAction::Clear) => Effect::Clear,
            None => Effect::None,
        },
        KeyCode::Char('n' | 'N') | KeyCode::Esc => Effect::None,
        _ => return Effect::None,
    };
    app.confirm = None;
    app.mode = Mode::Normal;
    effect
}

fn draw(f: &mut Frame<'_>, app: &mut AppState) {
    let palette = app.theme.palette();
    let area = f.area();
    let title = format!("toolhub scans • {}", app.base_url);
    let outer = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.accent))
        .style(Style::default().fg(palette.fg).bg(palette.bg));
    let inner = outer.inner(area);
    f.render_widget(outer, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(3)])
        .split(inner);

    draw_table(f, chunks[0], app, palette);
    draw_footer(f, chunks[1], app, palette);

    if app.show_detail {
        draw_detail_popup(f, app, palette);
    }
    match app.mode {
        Mode::Form => draw_form_popup(f, app, palette),
        Mode::Confirm => draw_confirm_popup(f, app, palette),
        Mode::Log => {
            let theme = app.theme;
            if let Some(view) = app.log_view.as_mut() {
                let popup = centered_rect(90, 85, area);
                view.draw(f, popup, theme);
            }
        }
        Mode::Normal => {}
    }
}

fn badge_color(badge: Badge, palette: Palette) -> Color {
    match badge {
        Badge::Info => palette.info,
        Badge::Progress => palette.progress,
        Badge::Success => palette.success,
        Badge::Danger => palette.danger,
        Badge::Muted => palette.muted,
    }
}

fn draw_table(f: &mut Frame<'_>, area: Rect, app: &mut AppState, palette: Palette) {
    let headers = Row::new(vec!["", "ID", "REPOSITORY", "BRANCH", "STATUS", "ACTIONS"])
        .style(Style::default().add_modifier(Modifier::BOLD));

    let rows = app.tasks.iter().map(|t| {
        let card = render::card(t, &app.base_url);
        let icon = if app.icons { card.icon } else { "" };
        let mut status = card.label;
        if let Some(wait) = app.backoff.get(&t.id) {
            status = format!("{status} (retry {}s)", wait.as_secs());
        }
        let actions = card
            .actions
            .iter()
            .map(|a| format!("{} {}", a.key(), a.label()))
            .collect::<Vec<_>>()
            .join(" • ");
        Row::new(vec![
            icon.to_owned(),
            t.short_id(),
            t.repo_url.clone(),
            t.branch_name.clone(),
            status,
            actions,
        ])
        .style(Style::default().fg(badge_color(card.badge, palette)))
    });

    let widths = vec![
        Constraint::Length(2),
        Constraint::Length(9),
        Constraint::Percentage(35),
        Constraint::Length(14),
        Constraint::Percentage(25),
        Constraint::Percentage(30),
    ];

    let title = if app.poller_paused {
        format!("Scans ({}) • paused", app.tasks.len())
    } else {
        format!("Scans ({})", app.tasks.len())
    };
    let table = Table::new(rows, widths)
        .header(headers)
        .block(Block::default().borders(Borders::ALL).title(title))
        .row_highlight_style(
            Style::default()
                .fg(palette.highlight_fg)
                .bg(palette.accent)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol(">");

    f.render_stateful_widget(table, area, &mut app.table_state);
}

fn draw_footer(f: &mut Frame<'_>, area: Rect, app: &AppState, palette: Palette) {
    let keys = match app.mode {
        Mode::Normal => {
            "q quit • n new scan • o report • v/D screenshot • l log • d remove • C clear • p pause • t theme • Enter details"
        }
        Mode::Form => "Tab/↑↓ field • Enter submit • Esc cancel",
        Mode::Confirm => "y confirm • n cancel",
        Mode::Log => "q/Esc close log",
    };

    let state = if !app.online {
        Span::styled("offline", Style::default().fg(palette.danger))
    } else if app.poller_paused {
        Span::styled("paused", Style::default().fg(palette.progress))
    } else {
        Span::styled("live", Style::default().fg(palette.success))
    };

    let mut lines = vec![Line::from(vec![
        Span::styled("Polling: ", Style::default().add_modifier(Modifier::BOLD)),
        state,
        Span::raw("   "),
        Span::styled("Theme: ", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(app.theme.as_str()),
    ])];
    if let Some(toast) = &app.toast {
        let color = if toast.error {
            palette.danger
        } else {
            palette.accent
        };
        lines.push(Line::from(Span::styled(
            toast.message.as_str(),
            Style::default().fg(color),
        )));
    } else {
        lines.push(Line::from(Span::styled(
            keys,
            Style::default().fg(palette.muted),
        )));
    }

    let p = Paragraph::new(lines).wrap(Wrap { trim: true });
    f.render_widget(p, area);
}

fn draw_detail_popup(f: &mut Frame<'_>, app: &AppState, palette: Palette) {
    let Some(t) = app.selected() else {
        return;
    };

    let popup_area = centered_rect(80, 70, f.area());
    f.render_widget(Clear, popup_area);

    let mut lines = vec![
        Line::from(format!("Task: {}", t.id)),
        Line::from(format!("Repository: {}", t.repo_url)),
        Line::from(format!("Branch: {}", t.branch_name)),
        Line::from(format!("Project key: {}", t.project_key)),
        Line::from(format!("Submitted: {}", t.created_at)),
        Line::from(""),
        Line::from(format!("Status: {}", t.status)),
    ];
    if let Some(url) = &t.report_url {
        lines.push(Line::from(format!("Report: {url}")));
    }
    if let Some(shot) = &t.screenshot {
        lines.push(Line::from(format!("Screenshot: {}", shot.filename)));
    }
    if t.has_log {
        lines.push(Line::from(format!(
            "Log: {}",
            render::format_size(t.log_size)
        )));
    }
    lines.push(Line::from(""));
    lines.push(Line::from("Press Enter to close."));

    let p = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Details")
                .border_style(Style::default().fg(palette.accent)),
        )
        .style(Style::default().fg(palette.fg).bg(palette.bg))
        .wrap(Wrap { trim: false });
    f.render_widget(p, popup_area);
}

fn draw_form_popup(f: &mut Frame<'_>, app: &AppState, palette: Palette) {
    let Some(form) = &app.form else {
        return;
    };
    let popup = centered_rect(80, 45, f.area());
    f.render_widget(Clear, popup);
    let block = Block::default()
        .borders(Borders::ALL)
        .title("New scan")
        .border_style(Style::default().fg(palette.accent))
        .style(Style::default().fg(palette.fg).bg(palette.bg));
    let inner = block.inner(popup);
    f.render_widget(block, popup);

    let mut lines: Vec<Line> = FormField::ALL
        .iter()
        .map(|field| {
            let style = if *field == form.field {
                Style::default().fg(palette.highlight_fg).bg(palette.accent)
            } else {
                Style::default()
            };
            let value = form.input(*field).as_str();
            let value = if value.is_empty() {
                Span::styled("(optional)", style.add_modifier(Modifier::DIM))
            } else {
                Span::styled(value, style)
            };
            Line::from(vec![
                Span::styled(field.label(), Style::default().add_modifier(Modifier::BOLD)),
                Span::raw(" "),
                value,
            ])
        })
        .collect();
    lines.push(Line::from(""));
    if let Some(err) = &form.error {
        lines.push(Line::from(Span::styled(
            err.as_str(),
            Style::default().fg(palette.danger),
        )));
    }

    f.render_widget(Paragraph::new(lines), inner);

    let line_idx = FormField::ALL
        .iter()
        .position(|fld| *fld == form.field)
        .unwrap_or(0);
    let input = form.input(form.field);
    let prefix_len = form.field.label().chars().count() + 1;
    let x = inner.x
        + u16::try_from(prefix_len).unwrap_or(0)
        + cursor_x_for_text(input.as_str(), input.cursor);
    let y = inner.y + u16::try_from(line_idx).unwrap_or(0);
    f.set_cursor_position((x, y));
}

fn draw_confirm_popup(f: &mut Frame<'_>, app: &AppState, palette: Palette) {
    let message = match &app.confirm {
        Some(ConfirmAction::Remove(id)) => {
            let short: String = id.chars().take(8).collect();
            format!("Remove scan {short} from the list?")
        }
        Some(ConfirmAction::Clear) => format!("Remove all {} scans?", app.tasks.len()),
        None => return,
    };
    let popup = centered_rect(50, 20, f.area());
    f.render_widget(Clear, popup);
    let p = Paragraph::new(vec![
        Line::from(message),
        Line::from(""),
        Line::from(Span::styled(
            "y: yes • n: no",
            Style::default().fg(palette.muted),
        )),
    ])
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("Confirm")
            .border_style(Style::default().fg(palette.danger)),
    )
    .style(Style::default().fg(palette.fg).bg(palette.bg))
    .wrap(Wrap { trim: false });
    f.render_widget(p, popup);
}

fn cursor_x_for_text(text: &str, cursor: usize) -> u16 {
    u16::try_from(text.chars().take(cursor).count()).unwrap_or(0)
}
