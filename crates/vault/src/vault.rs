use bitsynq_core::db;
use bitsynq_core::schema::{ContributionSummary, Meeting, Project, TokenDistribution};
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::info;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error(transparent)]
    Ledger(#[from] bitsynq_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timestamp formatting error: {0}")]
    Time(#[from] time::error::Format),
}

pub type Result<T> = std::result::Result<T, VaultError>;

pub struct VaultPaths {
    pub root: PathBuf,
    pub index_dir: PathBuf,
    pub meetings_dir: PathBuf,
    pub distributions_dir: PathBuf,
}

impl VaultPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            index_dir: root.join("00_Index"),
            meetings_dir: root.join("Meetings"),
            distributions_dir: root.join("Distributions"),
            root,
        }
    }

    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.index_dir)?;
        fs::create_dir_all(&self.meetings_dir)?;
        fs::create_dir_all(&self.distributions_dir)?;
        Ok(())
    }
}

/// What a build wrote, for the caller to report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaultReport {
    pub meetings: usize,
    pub distributions: usize,
    pub contributors: usize,
}

/// Render one project of the ledger as markdown notes under `vault_root`.
/// Existing notes with the same ids are overwritten.
pub fn build_vault(conn: &Connection, project_id: &str, actor: &str, vault_root: &Path) -> Result<VaultReport> {
    db::require_member(conn, project_id, actor)?;
    let project = db::get_project(conn, project_id)?;
    let paths = VaultPaths::new(vault_root);
    paths.ensure()?;

    let generated = OffsetDateTime::now_utc()
        .format(format_description!("[year]-[month]-[day] [hour]:[minute] UTC"))?;

    // 1) Meeting notes + MOC
    let meetings = db::list_meetings(conn, project_id)?;
    let mut meeting_index = index_header("MOC - Meetings", &project, &generated);
    if meetings.is_empty() {
        meeting_index.push("_No meetings uploaded._".to_string());
    }
    for meeting in &meetings {
        write_meeting_note(&paths, meeting)?;
        meeting_index.push(format!(
            "- [[Meetings/{}|{}]] ({})",
            meeting.id,
            meeting_title(meeting),
            meeting.status.as_str()
        ));
    }
    fs::write(paths.index_dir.join("MOC - Meetings.md"), meeting_index.join("\n"))?;

    // 2) Distribution notes + MOC
    let distributions = db::list_distributions(conn, project_id)?;
    let mut distribution_index = index_header("MOC - Distributions", &project, &generated);
    if distributions.is_empty() {
        distribution_index.push("_No distributions yet._".to_string());
    }
    for distribution in &distributions {
        write_distribution_note(conn, &paths, distribution)?;
        distribution_index.push(format!(
            "- [[Distributions/{}|{}]] ({} tokens)",
            distribution.id,
            distribution_title(distribution),
            distribution.total_tokens
        ));
    }
    distribution_index.push(String::new());
    distribution_index.push(format!(
        "Total confirmed: {} {}",
        db::total_distributed(conn, project_id)?,
        project.token_symbol.as_deref().unwrap_or("tokens")
    ));
    fs::write(
        paths.index_dir.join("MOC - Distributions.md"),
        distribution_index.join("\n"),
    )?;

    // 3) Contribution summary
    let summary = db::contribution_summary(conn, project_id, actor)?;
    write_contributions_note(&paths, &project, &summary, &generated)?;

    let report = VaultReport {
        meetings: meetings.len(),
        distributions: distributions.len(),
        contributors: summary.len(),
    };
    info!(
        project_id,
        meetings = report.meetings,
        distributions = report.distributions,
        "built vault at {}",
        paths.root.display()
    );
    Ok(report)
}

fn index_header(title: &str, project: &Project, generated: &str) -> Vec<String> {
    vec![
        format!("# {title}"),
        String::new(),
        format!("Project: **{}**", project.name),
        String::new(),
        format!("This index is generated ({generated}). Do not edit manually."),
        String::new(),
    ]
}

fn meeting_title(meeting: &Meeting) -> String {
    meeting.title.clone().unwrap_or_else(|| meeting.id.clone())
}

fn distribution_title(distribution: &TokenDistribution) -> String {
    distribution
        .milestone_name
        .clone()
        .unwrap_or_else(|| format!("Distribution {}", distribution.created_at))
}

fn write_meeting_note(paths: &VaultPaths, meeting: &Meeting) -> Result<()> {
    let note_path = paths.meetings_dir.join(format!("{}.md", meeting.id));
    let parsed = &meeting.parsed_data;

    let mut md = String::new();
    md.push_str("---\n");
    md.push_str(&format!("id: {}\n", meeting.id));
    md.push_str(&format!("status: {}\n", meeting.status.as_str()));
    if let Some(date) = &meeting.meeting_date {
        md.push_str(&format!("meeting_date: {date}\n"));
    }
    md.push_str(&format!("created_at: {}\n", meeting.created_at));
    md.push_str(&format!("parse_confidence: {}\n", parsed.parse_confidence));
    md.push_str("participants_json: |\n");
    md.push_str(&indent_yaml_block(&serde_json::to_string_pretty(&parsed.participants)?));
    md.push_str("---\n\n");

    md.push_str(&format!("# {}\n\n", meeting_title(meeting)));

    md.push_str("## Participants\n");
    if parsed.participants.is_empty() {
        md.push_str("_No participants detected._\n");
    } else {
        md.push_str("| Name | Matched user | Actions | Suggested % | Keywords |\n");
        md.push_str("|---|---|---|---|---|\n");
        for participant in &parsed.participants {
            md.push_str(&format!(
                "| {} | {} | {} | {:.2} | {} |\n",
                participant.name,
                participant.matched_user_id.as_deref().unwrap_or("_unmatched_"),
                participant.speak_count,
                participant.suggested_ratio,
                participant.keywords_found.join(", ")
            ));
        }
    }
    md.push('\n');

    md.push_str("## Transcript\n");
    md.push_str(meeting.raw_transcript.trim_end());
    md.push('\n');

    fs::write(note_path, md)?;
    Ok(())
}

fn write_distribution_note(conn: &Connection, paths: &VaultPaths, distribution: &TokenDistribution) -> Result<()> {
    let note_path = paths.distributions_dir.join(format!("{}.md", distribution.id));

    let mut md = String::new();
    md.push_str("---\n");
    md.push_str(&format!("id: {}\n", distribution.id));
    md.push_str(&format!("total_tokens: {}\n", distribution.total_tokens));
    md.push_str(&format!("status: {}\n", distribution.status.as_str()));
    if let Some(tx_hash) = &distribution.tx_hash {
        md.push_str(&format!("tx_hash: {tx_hash}\n"));
    }
    md.push_str(&format!("created_at: {}\n", distribution.created_at));
    md.push_str("distribution_json: |\n");
    md.push_str(&indent_yaml_block(&serde_json::to_string_pretty(
        &distribution.distribution_data,
    )?));
    md.push_str("---\n\n");

    md.push_str(&format!("# {}\n\n", distribution_title(distribution)));

    let mut entries: Vec<_> = distribution.distribution_data.values().collect();
    entries.sort_by(|a, b| b.token_amount.cmp(&a.token_amount));

    md.push_str("| Contributor | Ratio | Share % | Tokens |\n");
    md.push_str("|---|---|---|---|\n");
    for entry in entries {
        let name = db::get_user(conn, &entry.user_id)
            .map(|user| user.display_name)
            .unwrap_or_else(|_| entry.user_id.clone());
        md.push_str(&format!(
            "| {} | {} | {:.4} | {} |\n",
            name, entry.total_ratio, entry.percentage, entry.token_amount
        ));
    }

    fs::write(note_path, md)?;
    Ok(())
}

fn write_contributions_note(
    paths: &VaultPaths,
    project: &Project,
    summary: &[ContributionSummary],
    generated: &str,
) -> Result<()> {
    let mut lines = index_header("Contributions", project, generated);
    if summary.is_empty() {
        lines.push("_No contributions recorded._".to_string());
    } else {
        lines.push("| Contributor | Total ratio | Records | Share % | Last |".to_string());
        lines.push("|---|---|---|---|---|".to_string());
        for row in summary {
            lines.push(format!(
                "| {} | {} | {} | {:.2} | {} |",
                row.display_name,
                row.total_ratio,
                row.contribution_count,
                row.percentage,
                row.last_contribution
            ));
        }
    }
    fs::write(paths.index_dir.join("Contributions.md"), lines.join("\n"))?;
    Ok(())
}

/// Indent every line so the text sits inside a YAML `|` block scalar.
fn indent_yaml_block(s: &str) -> String {
    let mut out = String::new();
    for line in s.lines() {
        out.push_str("  ");
        out.push_str(line);
        out.push('\n');
    }
    out
}
