use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use gemini_live_types::tools::FunctionDeclaration;

use super::ToolHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Section {
    FitnessConsultation,
    WorkoutPlans,
    SupplementGuidance,
    HealthCalculators,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SectionMode {
    Info,
    AiGeneration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InfoType {
    FitnessLevel,
    Goals,
    Equipment,
    TimeAvailable,
    HealthConditions,
    DietPreferences,
}

/// Requests from the model for the host UI to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum UiCommand {
    ScrollToSection(Section),
    SwitchSectionMode { section: Section, mode: SectionMode },
    CollectUserInfo { info_type: InfoType, question: String },
}

fn section_names() -> Value {
    json!(["fitness-consultation", "workout-plans", "supplement-guidance", "health-calculators"])
}

async fn forward(ui: &mpsc::Sender<UiCommand>, command: UiCommand) -> Result<()> {
    tracing::debug!("ui command {:?}", command);
    ui.send(command)
        .await
        .map_err(|_| anyhow::anyhow!("the user interface is not listening"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScrollArgs {
    section_id: Section,
}

pub struct ScrollToSection {
    ui: mpsc::Sender<UiCommand>,
}

impl ScrollToSection {
    pub fn new(ui: mpsc::Sender<UiCommand>) -> Self {
        Self { ui }
    }
}

#[async_trait]
impl ToolHandler for ScrollToSection {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration::new(
            "scrollToSection",
            "Scroll the page to one of the app sections.",
            json!({
                "type": "object",
                "properties": {
                    "sectionId": { "type": "string", "enum": section_names() }
                },
                "required": ["sectionId"]
            }),
        )
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let args: ScrollArgs =
            serde_json::from_value(args).context("invalid scrollToSection arguments")?;
        forward(&self.ui, UiCommand::ScrollToSection(args.section_id)).await?;
        Ok(json!({ "scrolledTo": args.section_id }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwitchModeArgs {
    section_id: Section,
    mode: SectionMode,
}

pub struct SwitchSectionMode {
    ui: mpsc::Sender<UiCommand>,
}

impl SwitchSectionMode {
    pub fn new(ui: mpsc::Sender<UiCommand>) -> Self {
        Self { ui }
    }
}

#[async_trait]
impl ToolHandler for SwitchSectionMode {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration::new(
            "switchSectionMode",
            "Switch a section between its information view and AI generation view.",
            json!({
                "type": "object",
                "properties": {
                    "sectionId": { "type": "string", "enum": section_names() },
                    "mode": { "type": "string", "enum": ["info", "ai-generation"] }
                },
                "required": ["sectionId", "mode"]
            }),
        )
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let args: SwitchModeArgs =
            serde_json::from_value(args).context("invalid switchSectionMode arguments")?;
        forward(
            &self.ui,
            UiCommand::SwitchSectionMode {
                section: args.section_id,
                mode: args.mode,
            },
        )
        .await?;
        Ok(json!({ "sectionId": args.section_id, "mode": args.mode }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectArgs {
    info_type: InfoType,
    question: String,
}

/// Shows a question to the user; the answer comes back as their next message.
pub struct CollectUserInfo {
    ui: mpsc::Sender<UiCommand>,
}

impl CollectUserInfo {
    pub fn new(ui: mpsc::Sender<UiCommand>) -> Self {
        Self { ui }
    }
}

#[async_trait]
impl ToolHandler for CollectUserInfo {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration::new(
            "collectUserInfo",
            "Ask the user for a specific piece of information needed for their plan.",
            json!({
                "type": "object",
                "properties": {
                    "infoType": {
                        "type": "string",
                        "enum": [
                            "fitness-level",
                            "goals",
                            "equipment",
                            "time-available",
                            "health-conditions",
                            "diet-preferences"
                        ]
                    },
                    "question": { "type": "string" }
                },
                "required": ["infoType", "question"]
            }),
        )
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let args: CollectArgs =
            serde_json::from_value(args).context("invalid collectUserInfo arguments")?;
        if args.question.trim().is_empty() {
            anyhow::bail!("question must not be empty");
        }
        forward(
            &self.ui,
            UiCommand::CollectUserInfo {
                info_type: args.info_type,
                question: args.question.clone(),
            },
        )
        .await?;
        Ok(json!({ "status": "question_presented", "infoType": args.info_type }))
    }
}
