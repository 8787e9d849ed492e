use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use gemini_live_types::tools::FunctionDeclaration;

use super::ToolHandler;

const WORDS_PER_MINUTE: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("report store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("report store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("report {0} not found")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportCategory {
    Fitness,
    Analysis,
    Summary,
    Technical,
    Business,
    Project,
    #[default]
    Other,
}

impl ReportCategory {
    /// Unrecognised names fall into [`ReportCategory::Other`].
    pub fn parse(name: &str) -> Self {
        serde_json::from_value(Value::String(name.trim().to_lowercase())).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Generating,
    #[default]
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSource {
    #[default]
    Conversation,
    DataAnalysis,
    UserRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub word_count: usize,
    /// Minutes.
    pub estimated_read_time: usize,
    pub source: ReportSource,
}

impl ReportMetadata {
    fn measure(content: &str, source: ReportSource) -> Self {
        let word_count = content.split_whitespace().count();
        Self {
            word_count,
            estimated_read_time: word_count.div_ceil(WORDS_PER_MINUTE).max(1),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub title: String,
    pub content: String,
    pub category: ReportCategory,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub status: ReportStatus,
    pub metadata: ReportMetadata,
}

impl Report {
    pub fn new(title: &str, content: &str, category: ReportCategory, tags: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("report_{}", uuid::Uuid::new_v4().simple()),
            title: title.to_string(),
            content: content.to_string(),
            category,
            tags,
            created_at: now,
            updated_at: now,
            status: ReportStatus::Completed,
            metadata: ReportMetadata::measure(content, ReportSource::Conversation),
        }
    }

    pub fn set_content(&mut self, content: &str) {
        self.content = content.to_string();
        self.metadata = ReportMetadata::measure(content, self.metadata.source);
        self.updated_at = Utc::now();
    }

    /// Markdown with a YAML front matter header.
    pub fn to_markdown(&self) -> String {
        let category = serde_json::to_value(self.category)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        format!(
            "---\ntitle: {}\ncategory: {}\ntags: {}\ncreated: {}\nupdated: {}\n---\n\n{}",
            self.title,
            category,
            self.tags.join(", "),
            self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.updated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.content
        )
    }

    fn summary(&self) -> Value {
        json!({
            "id": self.id,
            "title": self.title,
            "category": self.category,
            "tags": self.tags,
            "createdAt": self.created_at,
            "wordCount": self.metadata.word_count,
        })
    }
}

/// Persistence for generated reports.
#[cfg_attr(test, automock)]
pub trait ReportStore: Send + Sync {
    /// Inserts or replaces by id.
    fn save(&self, report: Report) -> Result<(), ReportError>;

    fn get(&self, id: &str) -> Result<Option<Report>, ReportError>;

    /// Newest first.
    fn list(&self) -> Result<Vec<Report>, ReportError>;

    fn delete(&self, id: &str) -> Result<bool, ReportError>;
}

fn upsert(reports: &mut Vec<Report>, report: Report) {
    match reports.iter_mut().find(|r| r.id == report.id) {
        Some(existing) => *existing = report,
        None => reports.push(report),
    }
}

fn newest_first(mut reports: Vec<Report>) -> Vec<Report> {
    reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    reports
}

#[derive(Debug, Default)]
pub struct InMemoryReportStore {
    reports: Mutex<Vec<Report>>,
}

impl InMemoryReportStore {
    fn reports(&self) -> std::sync::MutexGuard<'_, Vec<Report>> {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ReportStore for InMemoryReportStore {
    fn save(&self, report: Report) -> Result<(), ReportError> {
        upsert(&mut self.reports(), report);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Report>, ReportError> {
        Ok(self.reports().iter().find(|r| r.id == id).cloned())
    }

    fn list(&self) -> Result<Vec<Report>, ReportError> {
        Ok(newest_first(self.reports().clone()))
    }

    fn delete(&self, id: &str) -> Result<bool, ReportError> {
        let mut reports = self.reports();
        let before = reports.len();
        reports.retain(|r| r.id != id);
        Ok(reports.len() != before)
    }
}

/// All reports in one JSON array on disk, rewritten through a temp file on every change.
#[derive(Debug)]
pub struct JsonFileReportStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileReportStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<Report>, ReportError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        // an unreadable file is never overwritten
        serde_json::from_str(&raw).map_err(|e| {
            tracing::error!("report file {} is not valid JSON: {}", self.path.display(), e);
            ReportError::Json(e)
        })
    }

    fn store(&self, reports: &[Report]) -> Result<(), ReportError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(reports)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ReportStore for JsonFileReportStore {
    fn save(&self, report: Report) -> Result<(), ReportError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut reports = self.load()?;
        upsert(&mut reports, report);
        self.store(&reports)
    }

    fn get(&self, id: &str) -> Result<Option<Report>, ReportError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.into_iter().find(|r| r.id == id))
    }

    fn list(&self) -> Result<Vec<Report>, ReportError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(newest_first(self.load()?))
    }

    fn delete(&self, id: &str) -> Result<bool, ReportError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut reports = self.load()?;
        let before = reports.len();
        reports.retain(|r| r.id != id);
        if reports.len() == before {
            return Ok(false);
        }
        self.store(&reports)?;
        Ok(true)
    }
}

fn category_names() -> Value {
    json!(["fitness", "analysis", "summary", "technical", "business", "project", "other"])
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateArgs {
    title: String,
    content: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    user_info: Option<Value>,
}

pub struct GenerateReport {
    store: Arc<dyn ReportStore>,
}

impl GenerateReport {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for GenerateReport {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration::new(
            "generateFitnessReport",
            "Create and save a personalised fitness report, workout plan or supplement guide from the conversation.",
            json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Report title" },
                    "content": { "type": "string", "description": "Full report body in Markdown" },
                    "category": { "type": "string", "enum": category_names() },
                    "tags": { "type": "array", "items": { "type": "string" } },
                    "userInfo": {
                        "type": "object",
                        "description": "What the user told you about themselves",
                        "properties": {
                            "fitnessLevel": { "type": "string" },
                            "goals": { "type": "array", "items": { "type": "string" } },
                            "equipment": { "type": "array", "items": { "type": "string" } },
                            "timeAvailable": { "type": "string" },
                            "healthConditions": { "type": "array", "items": { "type": "string" } }
                        }
                    }
                },
                "required": ["title", "content", "category"]
            }),
        )
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let args: GenerateArgs =
            serde_json::from_value(args).context("invalid generateFitnessReport arguments")?;
        if args.title.trim().is_empty() || args.content.trim().is_empty() {
            anyhow::bail!("title and content must not be empty");
        }
        let category = args
            .category
            .as_deref()
            .map(ReportCategory::parse)
            .unwrap_or(ReportCategory::Fitness);
        let report = Report::new(args.title.trim(), &args.content, category, args.tags);
        if let Some(user_info) = &args.user_info {
            tracing::debug!("report {} generated with user info {}", report.id, user_info);
        }
        self.store.save(report.clone())?;
        tracing::info!("saved report {} ({})", report.id, report.title);

        Ok(json!({
            "reportId": report.id,
            "title": report.title,
            "category": report.category,
            "wordCount": report.metadata.word_count,
            "estimatedReadTime": report.metadata.estimated_read_time,
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ListArgs {
    #[serde(default)]
    category: Option<String>,
}

pub struct ListReports {
    store: Arc<dyn ReportStore>,
}

impl ListReports {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for ListReports {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration::new(
            "listReports",
            "List saved reports, newest first, optionally filtered by category.",
            json!({
                "type": "object",
                "properties": {
                    "category": { "type": "string", "enum": category_names() }
                }
            }),
        )
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let args: ListArgs = if args.is_null() {
            ListArgs::default()
        } else {
            serde_json::from_value(args).context("invalid listReports arguments")?
        };
        let filter = args.category.as_deref().map(ReportCategory::parse);
        let reports: Vec<Value> = self
            .store
            .list()?
            .iter()
            .filter(|r| filter.is_none_or(|c| r.category == c))
            .map(Report::summary)
            .collect();
        Ok(json!({ "count": reports.len(), "reports": reports }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetArgs {
    #[serde(default)]
    report_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

/// Looks a report up by id, falling back to a case-insensitive title match.
fn find(store: &dyn ReportStore, id: Option<&str>, title: Option<&str>) -> Result<Report> {
    if let Some(id) = id {
        if let Some(report) = store.get(id)? {
            return Ok(report);
        }
    }
    if let Some(title) = title {
        let wanted = title.trim().to_lowercase();
        if let Some(report) = store
            .list()?
            .into_iter()
            .find(|r| r.title.to_lowercase() == wanted)
        {
            return Ok(report);
        }
    }
    let key = id.or(title).unwrap_or("<none>");
    Err(ReportError::NotFound(key.to_string()).into())
}

pub struct GetReport {
    store: Arc<dyn ReportStore>,
}

impl GetReport {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for GetReport {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration::new(
            "getReport",
            "Fetch a saved report by id or title.",
            json!({
                "type": "object",
                "properties": {
                    "reportId": { "type": "string" },
                    "title": { "type": "string" }
                }
            }),
        )
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let args: GetArgs = serde_json::from_value(args).context("invalid getReport arguments")?;
        if args.report_id.is_none() && args.title.is_none() {
            anyhow::bail!("either reportId or title is required");
        }
        let report = find(
            self.store.as_ref(),
            args.report_id.as_deref(),
            args.title.as_deref(),
        )?;
        Ok(json!({ "report": report, "markdown": report.to_markdown() }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateArgs {
    report_id: String,
    content: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

pub struct UpdateReport {
    store: Arc<dyn ReportStore>,
}

impl UpdateReport {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for UpdateReport {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration::new(
            "updateReport",
            "Replace the content of a saved report, optionally changing its title, category or tags.",
            json!({
                "type": "object",
                "properties": {
                    "reportId": { "type": "string" },
                    "content": { "type": "string" },
                    "title": { "type": "string" },
                    "category": { "type": "string", "enum": category_names() },
                    "tags": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["reportId", "content"]
            }),
        )
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let args: UpdateArgs =
            serde_json::from_value(args).context("invalid updateReport arguments")?;
        let mut report = self
            .store
            .get(&args.report_id)?
            .ok_or_else(|| ReportError::NotFound(args.report_id.clone()))?;

        report.set_content(&args.content);
        if let Some(title) = args.title.filter(|t| !t.trim().is_empty()) {
            report.title = title.trim().to_string();
        }
        if let Some(category) = args.category {
            report.category = ReportCategory::parse(&category);
        }
        if let Some(tags) = args.tags {
            report.tags = tags;
        }
        self.store.save(report.clone())?;
        tracing::info!("updated report {}", report.id);

        Ok(json!({
            "reportId": report.id,
            "title": report.title,
            "wordCount": report.metadata.word_count,
            "updatedAt": report.updated_at,
        }))
    }
}
