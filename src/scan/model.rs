#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Lifecycle of a scan as reported by the hub server.
///
/// The server speaks free-form strings and appends detail to the terminal
/// states (`"Failed: Quality Gate"`), so parsing is by prefix. The suffix is
/// kept exactly as sent, separator included, so it serializes back unchanged.
/// Anything unrecognised lands in `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Running,
    GeneratingScreenshot,
    Completed(Option<String>),
    Failed(Option<String>),
    NotFound,
    Unknown(String),
}

impl TaskStatus {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let s = raw.trim();
        if s.eq_ignore_ascii_case("queued") {
            return Self::Queued;
        }
        if s.eq_ignore_ascii_case("running") {
            return Self::Running;
        }
        if s.eq_ignore_ascii_case("generating screenshot") {
            return Self::GeneratingScreenshot;
        }
        if s.eq_ignore_ascii_case("not found") {
            return Self::NotFound;
        }
        if let Some(rest) = strip_prefix_ignore_case(s, "completed") {
            return Self::Completed(suffix(rest));
        }
        if let Some(rest) = strip_prefix_ignore_case(s, "failed") {
            return Self::Failed(suffix(rest));
        }
        Self::Unknown(s.to_owned())
    }

    /// Detail appended to a terminal state, without its separator.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Completed(Some(rest)) | Self::Failed(Some(rest)) => {
                let d = rest.trim_start_matches(':').trim();
                (!d.is_empty()).then_some(d)
            }
            _ => None,
        }
    }

    /// Completed, failed and not-found scans never change again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed(_) | Self::Failed(_) | Self::NotFound
        )
    }

    /// Short lowercase name, used for filtering and CSV output.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::GeneratingScreenshot => "screenshot",
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
            Self::NotFound => "notfound",
            Self::Unknown(_) => "unknown",
        }
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

fn suffix(rest: &str) -> Option<String> {
    (!rest.is_empty()).then(|| rest.to_owned())
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => f.write_str("Queued"),
            Self::Running => f.write_str("Running"),
            Self::GeneratingScreenshot => f.write_str("Generating Screenshot"),
            Self::Completed(rest) => write!(f, "Completed{}", rest.as_deref().unwrap_or("")),
            Self::Failed(rest) => write!(f, "Failed{}", rest.as_deref().unwrap_or("")),
            Self::NotFound => f.write_str("Not Found"),
            Self::Unknown(s) => f.write_str(s),
        }
    }
}

impl Serialize for TaskStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreenshotInfo {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_url: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    #[serde(alias = "task_id")]
    pub id: String,
    pub repo_url: String,
    #[serde(default)]
    pub branch_name: String,
    #[serde(default)]
    pub project_key: String,
    pub status: TaskStatus,
    #[serde(default, alias = "sonar_url")]
    pub report_url: Option<String>,
    #[serde(default, alias = "screenshot_info")]
    pub screenshot: Option<ScreenshotInfo>,
    #[serde(default)]
    pub has_log: bool,
    #[serde(default)]
    pub log_size: u64,
    /// Only present in memory right after an `include_log` fetch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    #[serde(default)]
    pub created_at: String,
}

impl Task {
    /// A freshly queued task built from the server's submission reply.
    #[must_use]
    pub fn queued(resp: &SubmitResponse, req: &ScanRequest) -> Self {
        Self {
            id: resp.task_id.clone(),
            repo_url: resp.repo_url.clone().unwrap_or_else(|| req.repo_url.clone()),
            branch_name: req.branch_name.clone(),
            project_key: req.project_key.clone(),
            status: TaskStatus::Queued,
            report_url: None,
            screenshot: None,
            has_log: false,
            log_size: 0,
            log: None,
            created_at: now_rfc3339(),
        }
    }

    /// Shallow overwrite: every field the server sent replaces ours.
    pub fn apply(&mut self, update: StatusUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(url) = update.sonar_url {
            self.report_url = url;
        }
        if let Some(shot) = update.screenshot_info {
            self.screenshot = shot;
        }
        if let Some(has_log) = update.has_log {
            self.has_log = has_log;
        }
        if let Some(size) = update.log_size {
            self.log_size = size;
        }
        if let Some(log) = update.log {
            self.log = log;
        }
    }

    #[must_use]
    pub fn short_id(&self) -> String {
        self.id.chars().take(8).collect()
    }
}

/// Body of `GET /status/{id}`.
///
/// Nullable fields use a double `Option`: the outer one records whether the
/// key was present at all, so a present `null` still clears the stored value.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct StatusUpdate {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default, deserialize_with = "present")]
    pub sonar_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub screenshot_info: Option<Option<ScreenshotInfo>>,
    #[serde(default)]
    pub has_log: Option<bool>,
    #[serde(default)]
    pub log_size: Option<u64>,
    #[serde(default, deserialize_with = "present")]
    pub log: Option<Option<String>>,
}

impl StatusUpdate {
    #[must_use]
    pub fn not_found() -> Self {
        Self {
            status: Some(TaskStatus::NotFound),
            ..Self::default()
        }
    }
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Form body of `POST /repo-scan`.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ScanRequest {
    pub repo_url: String,
    pub branch_name: String,
    pub project_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sonar_exclusions: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sonar_inclusions: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SubmitResponse {
    #[serde(default)]
    pub message: Option<String>,
    pub task_id: String,
    #[serde(default)]
    pub repo_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CsrfTokenBody {
    pub csrf_token: String,
}

#[must_use]
pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_matched_by_prefix() {
        let failed = TaskStatus::parse("Failed: build error");
        assert_eq!(failed.detail(), Some("build error"));
        assert!(failed.is_terminal());

        assert_eq!(TaskStatus::parse("completed"), TaskStatus::Completed(None));
        assert!(TaskStatus::parse("FAILED: timeout").is_terminal());
        assert_eq!(TaskStatus::parse("Completed").detail(), None);

        assert!(TaskStatus::parse("Completed").is_terminal());
        assert!(TaskStatus::parse("Completed with warnings").is_terminal());
        assert!(TaskStatus::parse("Not Found").is_terminal());

        assert!(!TaskStatus::parse("Queued").is_terminal());
        assert!(!TaskStatus::parse("Running").is_terminal());
        assert!(!TaskStatus::parse("Generating Screenshot").is_terminal());
        assert!(!TaskStatus::parse("Cloning").is_terminal());
    }

    #[test]
    fn status_keeps_server_wording_on_round_trip() {
        for raw in [
            "Queued",
            "Running",
            "Generating Screenshot",
            "Completed",
            "Completed with warnings",
            "Failed: Quality Gate",
            "Failed - timeout",
            "Not Found",
            "Cloning repository",
        ] {
            let json = serde_json::to_string(&TaskStatus::parse(raw)).unwrap();
            assert_eq!(json, format!("\"{raw}\""));
        }
    }

    fn sample_task() -> Task {
        Task {
            id: "abc".to_owned(),
            repo_url: "https://github.com/o/r".to_owned(),
            branch_name: "main".to_owned(),
            project_key: "r".to_owned(),
            status: TaskStatus::Running,
            report_url: Some("https://sonar/old".to_owned()),
            screenshot: None,
            has_log: false,
            log_size: 0,
            log: None,
            created_at: String::new(),
        }
    }

    #[test]
    fn apply_overwrites_only_present_fields() {
        let mut task = sample_task();
        let update: StatusUpdate = serde_json::from_str(
            r#"{"task_id":"abc","status":"Completed","has_log":true,"log_size":42}"#,
        )
        .unwrap();
        task.apply(update);

        assert_eq!(task.status, TaskStatus::Completed(None));
        assert_eq!(task.report_url.as_deref(), Some("https://sonar/old"));
        assert!(task.has_log);
        assert_eq!(task.log_size, 42);
    }

    #[test]
    fn apply_clears_fields_sent_as_null() {
        let mut task = sample_task();
        let update: StatusUpdate =
            serde_json::from_str(r#"{"status":"Running","sonar_url":null,"log":null}"#).unwrap();
        task.apply(update);
        assert_eq!(task.report_url, None);
    }

    #[test]
    fn screenshot_info_keeps_extra_fields() {
        let update: StatusUpdate = serde_json::from_str(
            r#"{"screenshot_info":{"filename":"p.png","display_url":"/static/screenshots/p.png","project_key":"p"}}"#,
        )
        .unwrap();
        let shot = update.screenshot_info.flatten().unwrap();
        assert_eq!(shot.filename, "p.png");
        assert_eq!(
            shot.extra.get("project_key").and_then(|v| v.as_str()),
            Some("p")
        );
    }
}
