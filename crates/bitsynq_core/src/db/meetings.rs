use super::contributions::{check_ratio, insert_contribution};
use super::{membership_role, new_id, now, require_admin, require_member, roster};
use crate::error::{Error, Result};
use crate::lexicon::Lexicon;
use crate::matcher::match_participants;
use crate::parser::parse_transcript_with;
use crate::schema::{
    ContributionEntry, ContributionRecord, Meeting, MeetingStatus, MemberRole, ParsedMeetingData,
    SourceType,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{info, warn};

/// Meeting-sourced ratios must add up to roughly one hundred.
const MEETING_RATIO_MIN: f64 = 99.0;
const MEETING_RATIO_MAX: f64 = 101.0;

#[derive(Debug, Clone, Default)]
pub struct MeetingUpload {
    pub title: Option<String>,
    pub meeting_date: Option<String>,
    pub raw_transcript: String,
}

/// Parse the transcript, match participants against the project roster and
/// store the meeting as pending review.
pub fn create_meeting(
    conn: &Connection,
    project_id: &str,
    actor: &str,
    upload: &MeetingUpload,
    lexicon: &Lexicon,
) -> Result<Meeting> {
    require_member(conn, project_id, actor)?;
    if upload.raw_transcript.trim().is_empty() {
        return Err(Error::Validation("raw_transcript is required".to_string()));
    }

    let mut parsed = parse_transcript_with(&upload.raw_transcript, lexicon);
    parsed.participants = match_participants(&parsed.participants, &roster(conn, project_id)?);
    let unmatched = parsed
        .participants
        .iter()
        .filter(|participant| participant.matched_user_id.is_none())
        .count();
    if unmatched > 0 {
        warn!(project_id, unmatched, "participants need manual resolution");
    }

    let title = upload.title.clone().or_else(|| parsed.meeting_title.clone());
    let meeting_date = upload
        .meeting_date
        .clone()
        .or_else(|| parsed.meeting_date.clone());
    let id = new_id();
    let created_at = now(conn)?;

    conn.execute(
        r#"
        INSERT INTO meetings (
          id, project_id, title, meeting_date, raw_transcript, parsed_json,
          status, created_by, created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            id,
            project_id,
            title,
            meeting_date,
            upload.raw_transcript,
            serde_json::to_string(&parsed)?,
            MeetingStatus::Pending.as_str(),
            actor,
            created_at
        ],
    )?;

    info!(
        meeting_id = %id,
        participants = parsed.participants.len(),
        confidence = parsed.parse_confidence,
        "stored meeting transcript"
    );

    Ok(Meeting {
        id,
        project_id: project_id.to_string(),
        title,
        meeting_date,
        raw_transcript: upload.raw_transcript.clone(),
        parsed_data: parsed,
        status: MeetingStatus::Pending,
        created_by: actor.to_string(),
        created_at,
    })
}

pub fn get_meeting(conn: &Connection, project_id: &str, meeting_id: &str) -> Result<Meeting> {
    let row = conn
        .query_row(
            r#"
            SELECT id, project_id, title, meeting_date, raw_transcript, parsed_json,
                   status, created_by, created_at
            FROM meetings WHERE id = ?1 AND project_id = ?2
            "#,
            params![meeting_id, project_id],
            meeting_row,
        )
        .optional()?;
    row.ok_or_else(|| Error::NotFound(format!("meeting {meeting_id}")))?
        .into_meeting()
}

/// Newest first.
pub fn list_meetings(conn: &Connection, project_id: &str) -> Result<Vec<Meeting>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, project_id, title, meeting_date, raw_transcript, parsed_json,
               status, created_by, created_at
        FROM meetings
        WHERE project_id = ?1
        ORDER BY created_at DESC, rowid DESC
        "#,
    )?;
    let rows = stmt.query_map(params![project_id], meeting_row)?;

    let mut meetings = Vec::new();
    for r in rows {
        meetings.push(r?.into_meeting()?);
    }
    Ok(meetings)
}

/// Only pending meetings can be deleted, by an admin or by their uploader.
pub fn delete_meeting(conn: &Connection, project_id: &str, meeting_id: &str, actor: &str) -> Result<()> {
    let role = require_member(conn, project_id, actor)?;
    let meeting = get_meeting(conn, project_id, meeting_id)?;

    if role != MemberRole::Admin && meeting.created_by != actor {
        return Err(Error::Forbidden(
            "only admins or the uploader can delete meetings".to_string(),
        ));
    }
    if meeting.status == MeetingStatus::Processed {
        return Err(Error::Validation("cannot delete a processed meeting".to_string()));
    }

    conn.execute("DELETE FROM meetings WHERE id = ?1", params![meeting_id])?;
    info!(meeting_id, "deleted meeting");
    Ok(())
}

/// Turn a reviewed meeting into contribution records and mark it processed.
pub fn process_meeting(
    conn: &Connection,
    project_id: &str,
    meeting_id: &str,
    actor: &str,
    entries: &[ContributionEntry],
) -> Result<Vec<ContributionRecord>> {
    require_admin(conn, project_id, actor, "process meetings")?;
    let meeting = get_meeting(conn, project_id, meeting_id)?;
    if meeting.status == MeetingStatus::Processed {
        return Err(Error::Validation("meeting has already been processed".to_string()));
    }
    if entries.is_empty() {
        return Err(Error::Validation("contributions are required".to_string()));
    }
    for entry in entries {
        check_ratio(entry.ratio, f64::INFINITY)?;
    }

    let total: f64 = entries.iter().map(|entry| entry.ratio).sum();
    if !(MEETING_RATIO_MIN..=MEETING_RATIO_MAX).contains(&total) {
        return Err(Error::Validation(format!(
            "total ratio should be approximately 100%, got {total:.2}%"
        )));
    }
    for entry in entries {
        if membership_role(conn, project_id, &entry.user_id)?.is_none() {
            return Err(Error::Validation(format!(
                "user {} is not a project member",
                entry.user_id
            )));
        }
    }

    let default_description = format!(
        "From meeting: {}",
        meeting.title.as_deref().unwrap_or(meeting_id)
    );
    let tx = conn.unchecked_transaction()?;
    let now = now(&tx)?;
    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        let description = entry
            .description
            .clone()
            .unwrap_or_else(|| default_description.clone());
        records.push(insert_contribution(
            &tx,
            project_id,
            &entry.user_id,
            entry.ratio,
            SourceType::Meeting,
            Some(meeting_id),
            Some(&description),
            actor,
            &now,
        )?);
    }
    tx.execute(
        "UPDATE meetings SET status = ?1 WHERE id = ?2",
        params![MeetingStatus::Processed.as_str(), meeting_id],
    )?;
    tx.commit()?;

    info!(meeting_id, contributions = records.len(), "processed meeting");
    Ok(records)
}

#[derive(Debug)]
struct MeetingRow {
    id: String,
    project_id: String,
    title: Option<String>,
    meeting_date: Option<String>,
    raw_transcript: String,
    parsed_json: String,
    status: String,
    created_by: String,
    created_at: String,
}

impl MeetingRow {
    fn into_meeting(self) -> Result<Meeting> {
        let parsed_data: ParsedMeetingData = serde_json::from_str(&self.parsed_json)?;
        Ok(Meeting {
            id: self.id,
            project_id: self.project_id,
            title: self.title,
            meeting_date: self.meeting_date,
            raw_transcript: self.raw_transcript,
            parsed_data,
            status: MeetingStatus::parse(&self.status)?,
            created_by: self.created_by,
            created_at: self.created_at,
        })
    }
}

fn meeting_row(row: &Row<'_>) -> rusqlite::Result<MeetingRow> {
    Ok(MeetingRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        meeting_date: row.get(3)?,
        raw_transcript: row.get(4)?,
        parsed_json: row.get(5)?,
        status: row.get(6)?,
        created_by: row.get(7)?,
        created_at: row.get(8)?,
    })
}
