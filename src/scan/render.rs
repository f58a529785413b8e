#![forbid(unsafe_code)]

//! Pure mapping from a task to what a card (dashboard row, table row) shows.

use crate::scan::model::{Task, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Badge {
    Info,
    Progress,
    Success,
    Danger,
    Muted,
}

impl Badge {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Progress => "progress",
            Self::Success => "success",
            Self::Danger => "danger",
            Self::Muted => "muted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskAction {
    OpenReport(String),
    ViewScreenshot(String),
    DownloadScreenshot(String),
    ViewLog,
}

impl TaskAction {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::OpenReport(_) => "report",
            Self::ViewScreenshot(_) => "view screenshot",
            Self::DownloadScreenshot(_) => "download screenshot",
            Self::ViewLog => "log",
        }
    }

    /// Dashboard key bound to the action.
    #[must_use]
    pub fn key(&self) -> char {
        match self {
            Self::OpenReport(_) => 'o',
            Self::ViewScreenshot(_) => 'v',
            Self::DownloadScreenshot(_) => 'D',
            Self::ViewLog => 'l',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCard {
    pub icon: &'static str,
    pub badge: Badge,
    pub label: String,
    pub actions: Vec<TaskAction>,
}

#[must_use]
pub fn status_icon(status: &TaskStatus) -> &'static str {
    match status {
        TaskStatus::Queued => "○",
        TaskStatus::Running => "●",
        TaskStatus::GeneratingScreenshot => "◐",
        TaskStatus::Completed(_) => "✓",
        TaskStatus::Failed(_) => "✗",
        TaskStatus::NotFound => "?",
        TaskStatus::Unknown(_) => "·",
    }
}

#[must_use]
pub fn badge(status: &TaskStatus) -> Badge {
    match status {
        TaskStatus::Queued => Badge::Info,
        TaskStatus::Running | TaskStatus::GeneratingScreenshot => Badge::Progress,
        TaskStatus::Completed(_) => Badge::Success,
        TaskStatus::Failed(_) => Badge::Danger,
        TaskStatus::NotFound | TaskStatus::Unknown(_) => Badge::Muted,
    }
}

#[must_use]
pub fn actions(task: &Task, base_url: &str) -> Vec<TaskAction> {
    let mut out = Vec::new();
    if let Some(url) = task.report_url.as_deref()
        && !url.trim().is_empty()
    {
        out.push(TaskAction::OpenReport(url.to_owned()));
    }
    if let Some(shot) = &task.screenshot
        && !shot.filename.is_empty()
    {
        let view = match shot.display_url.as_deref() {
            Some(u) if u.starts_with("http://") || u.starts_with("https://") => u.to_owned(),
            Some(u) if !u.is_empty() => join_url(base_url, u),
            _ => join_url(
                base_url,
                &format!("/static/screenshots/{}", shot.filename),
            ),
        };
        out.push(TaskAction::ViewScreenshot(view));
        out.push(TaskAction::DownloadScreenshot(shot.filename.clone()));
    }
    if task.has_log {
        out.push(TaskAction::ViewLog);
    }
    out
}

#[must_use]
pub fn card(task: &Task, base_url: &str) -> TaskCard {
    TaskCard {
        icon: status_icon(&task.status),
        badge: badge(&task.status),
        label: task.status.to_string(),
        actions: actions(task, base_url),
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Human readable byte count for the log size column.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::model::ScreenshotInfo;

    fn task(status: &str) -> Task {
        Task {
            id: "t1".to_owned(),
            repo_url: "https://github.com/acme/widgets".to_owned(),
            branch_name: "main".to_owned(),
            project_key: "widgets".to_owned(),
            status: TaskStatus::parse(status),
            report_url: None,
            screenshot: None,
            has_log: false,
            log_size: 0,
            log: None,
            created_at: String::new(),
        }
    }

    #[test]
    fn queued_task_has_no_actions() {
        let c = card(&task("Queued"), "http://hub");
        assert_eq!(c.badge, Badge::Info);
        assert_eq!(c.icon, "○");
        assert!(c.actions.is_empty());
    }

    #[test]
    fn completed_task_offers_report_screenshot_and_log() {
        let mut t = task("Completed");
        t.report_url = Some("https://sonar/dashboard?id=widgets".to_owned());
        t.screenshot = Some(ScreenshotInfo {
            filename: "widgets.png".to_owned(),
            display_url: Some("/static/screenshots/widgets.png".to_owned()),
            extra: serde_json::Map::new(),
        });
        t.has_log = true;

        let c = card(&t, "http://hub:5000/");
        assert_eq!(c.badge, Badge::Success);
        assert_eq!(
            c.actions,
            vec![
                TaskAction::OpenReport("https://sonar/dashboard?id=widgets".to_owned()),
                TaskAction::ViewScreenshot(
                    "http://hub:5000/static/screenshots/widgets.png".to_owned()
                ),
                TaskAction::DownloadScreenshot("widgets.png".to_owned()),
                TaskAction::ViewLog,
            ]
        );
    }

    #[test]
    fn failure_detail_is_kept_in_label() {
        let c = card(&task("Failed: Quality Gate"), "http://hub");
        assert_eq!(c.badge, Badge::Danger);
        assert_eq!(c.label, "Failed: Quality Gate");
    }

    #[test]
    fn sizes() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MiB");
    }
}
