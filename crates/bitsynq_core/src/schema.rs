use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Allocation result keyed by user id.
pub type Distribution = BTreeMap<String, ContributorBalance>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Meeting,
    Manual,
    Import,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Meeting => "meeting",
            SourceType::Manual => "manual",
            SourceType::Import => "import",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "meeting" => Ok(SourceType::Meeting),
            "manual" => Ok(SourceType::Manual),
            "import" => Ok(SourceType::Import),
            _ => Err(Error::Validation(format!("Unknown source type: {value}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ContributionRecord {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub ratio: f64, // free-form weight, never negative
    pub source_type: SourceType,
    pub source_id: Option<String>, // meeting id for meeting-sourced rows
    pub description: Option<String>,
    pub created_by: String,
    pub created_at: String, // RFC 3339, UTC
}

/// A ratio assignment as submitted for a manual entry, an import or a processed meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContributionEntry {
    pub user_id: String,
    pub ratio: f64,
    #[serde(default)]
    pub description: Option<String>,
}

/// The slice of a contribution record the allocator needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContributionShare {
    pub user_id: String,
    pub ratio: f64,
}

impl ContributionShare {
    pub fn new(user_id: impl Into<String>, ratio: f64) -> Self {
        Self {
            user_id: user_id.into(),
            ratio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ParsedParticipant {
    pub name: String,
    pub matched_user_id: Option<String>,
    pub speak_count: u32, // attributed action items
    pub estimated_duration_seconds: u64,
    pub keywords_found: Vec<String>,
    pub score: f64,
    pub suggested_ratio: f64, // 0..=100, two decimals
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ParsedMeetingData {
    pub participants: Vec<ParsedParticipant>,
    pub meeting_title: Option<String>,
    pub meeting_date: Option<String>,
    pub total_duration_seconds: u64,
    pub parse_confidence: u32, // 0..=100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContributorBalance {
    pub user_id: String,
    pub total_ratio: f64,
    pub percentage: f64, // four decimals
    pub token_amount: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DistributionStatus {
    Pending,
    Confirmed,
}

impl DistributionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionStatus::Pending => "pending",
            DistributionStatus::Confirmed => "confirmed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(DistributionStatus::Pending),
            "confirmed" => Ok(DistributionStatus::Confirmed),
            _ => Err(Error::Validation(format!("Unknown distribution status: {value}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TokenDistribution {
    pub id: String,
    pub project_id: String,
    pub milestone_name: Option<String>,
    pub total_tokens: u64,
    pub distribution_data: Distribution, // snapshot, never a live view
    pub tx_hash: Option<String>,
    pub status: DistributionStatus,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub aliases: Vec<String>,
    pub wallet_address: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "active" => Ok(ProjectStatus::Active),
            "archived" => Ok(ProjectStatus::Archived),
            _ => Err(Error::Validation(format!("Unknown project status: {value}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: String,
    pub token_symbol: Option<String>,
    pub status: ProjectStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Admin => "admin",
            MemberRole::Member => "member",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "admin" => Ok(MemberRole::Admin),
            "member" => Ok(MemberRole::Member),
            _ => Err(Error::Validation(format!("Unknown member role: {value}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MeetingStatus {
    Pending,
    Processed,
}

impl MeetingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingStatus::Pending => "pending",
            MeetingStatus::Processed => "processed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(MeetingStatus::Pending),
            "processed" => Ok(MeetingStatus::Processed),
            _ => Err(Error::Validation(format!("Unknown meeting status: {value}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Meeting {
    pub id: String,
    pub project_id: String,
    pub title: Option<String>,
    pub meeting_date: Option<String>,
    pub raw_transcript: String,
    pub parsed_data: ParsedMeetingData,
    pub status: MeetingStatus,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UserBalance {
    pub user_id: String,
    pub project_id: String,
    pub display_name: String,
    pub balance: u64,
    pub total_contributed: f64,
    pub last_updated: String,
}

/// One row of the per-user contribution rollup.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ContributionSummary {
    pub user_id: String,
    pub display_name: String,
    pub total_ratio: f64,
    pub contribution_count: u32,
    pub last_contribution: String,
    pub percentage: f64, // share of the grand total, two decimals
}

/// Aliases arrive either as a real list or as a JSON-encoded string column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Aliases {
    List(Vec<String>),
    Encoded(String),
}

impl Aliases {
    /// Malformed JSON means "no aliases", never an error.
    pub fn resolve(&self) -> Vec<String> {
        match self {
            Aliases::List(list) => list.clone(),
            Aliases::Encoded(raw) => serde_json::from_str(raw).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RosterMember {
    pub id: String,
    pub display_name: String,
    pub email: String,
    #[serde(default)]
    pub aliases: Option<Aliases>,
}
