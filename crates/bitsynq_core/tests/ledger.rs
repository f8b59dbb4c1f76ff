use bitsynq_core::db::{self, MeetingUpload};
use bitsynq_core::lexicon::Lexicon;
use bitsynq_core::schema::{ContributionEntry, MeetingStatus, MemberRole, SourceType, User};
use bitsynq_core::Error;
use pretty_assertions::assert_eq;
use rusqlite::Connection;
use tempfile::TempDir;

const TRANSCRIPT: &str = "Meeting summary with AI Companion\n\
Weekly Sync\n\
Quick recap\n\
The team reviewed progress.\n\
Next steps\n\
John Doe: implement the login page\n\
Mike Smith: review the PR\n\
Johnny: fix the flaky test\n\
Summary\n\
The team discussed the roadmap.\n";

struct Fixture {
    _dir: TempDir,
    conn: Connection,
    admin: User,
    member: User,
    project_id: String,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let conn = db::open(&dir.path().join("ledger.db")).unwrap();

    let admin = db::create_user(&conn, "john@example.com", "John Doe").unwrap();
    let member = db::create_user(&conn, "mike@example.com", "Mike Smith").unwrap();
    db::set_aliases(&conn, &admin.id, &["Johnny".to_string()]).unwrap();

    let project = db::create_project(&conn, &admin.id, "Bitsynq", Some("ledger"), Some("BTS")).unwrap();
    db::add_member(&conn, &project.id, &admin.id, &member.id, MemberRole::Member).unwrap();

    Fixture {
        _dir: dir,
        conn,
        admin,
        member,
        project_id: project.id,
    }
}

fn entry(user_id: &str, ratio: f64) -> ContributionEntry {
    ContributionEntry {
        user_id: user_id.to_string(),
        ratio,
        description: None,
    }
}

fn upload(fx: &Fixture) -> bitsynq_core::schema::Meeting {
    db::create_meeting(
        &fx.conn,
        &fx.project_id,
        &fx.member.id,
        &MeetingUpload {
            raw_transcript: TRANSCRIPT.to_string(),
            ..Default::default()
        },
        Lexicon::builtin(),
    )
    .unwrap()
}

#[test]
fn project_owner_is_admin_with_zero_balance() {
    let fx = fixture();
    assert_eq!(
        db::membership_role(&fx.conn, &fx.project_id, &fx.admin.id).unwrap(),
        Some(MemberRole::Admin)
    );
    let balance = db::balance_of(&fx.conn, &fx.project_id, &fx.admin.id).unwrap();
    assert_eq!(balance.balance, 0);
    assert_eq!(balance.total_contributed, 0.0);

    let projects = db::list_projects(&fx.conn, &fx.member.id).unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].token_symbol.as_deref(), Some("BTS"));
}

#[test]
fn duplicate_members_and_emails_are_rejected() {
    let fx = fixture();
    let err = db::add_member(&fx.conn, &fx.project_id, &fx.admin.id, &fx.member.id, MemberRole::Member)
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = db::create_user(&fx.conn, "JOHN@example.com", "Another John").unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn only_admins_add_members() {
    let fx = fixture();
    let outsider = db::create_user(&fx.conn, "sarah@example.com", "Sarah").unwrap();
    let err = db::add_member(&fx.conn, &fx.project_id, &fx.member.id, &outsider.id, MemberRole::Member)
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
}

#[test]
fn roster_keeps_join_order_and_encoded_aliases() {
    let fx = fixture();
    let roster = db::roster(&fx.conn, &fx.project_id).unwrap();
    let ids: Vec<&str> = roster.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec![fx.admin.id.as_str(), fx.member.id.as_str()]);
    assert_eq!(roster[0].aliases.as_ref().unwrap().resolve(), vec!["Johnny".to_string()]);
}

#[test]
fn uploaded_meeting_is_parsed_and_matched() {
    let fx = fixture();
    let meeting = upload(&fx);

    assert_eq!(meeting.status, MeetingStatus::Pending);
    assert_eq!(meeting.title.as_deref(), Some("Weekly Sync"));

    let matched: Vec<(&str, Option<&str>)> = meeting
        .parsed_data
        .participants
        .iter()
        .map(|p| (p.name.as_str(), p.matched_user_id.as_deref()))
        .collect();
    assert!(matched.contains(&("John Doe", Some(fx.admin.id.as_str()))));
    assert!(matched.contains(&("Mike Smith", Some(fx.member.id.as_str()))));
    assert!(matched.contains(&("Johnny", Some(fx.admin.id.as_str()))));

    let stored = db::get_meeting(&fx.conn, &fx.project_id, &meeting.id).unwrap();
    assert_eq!(stored.parsed_data, meeting.parsed_data);
    assert_eq!(db::list_meetings(&fx.conn, &fx.project_id).unwrap().len(), 1);
}

#[test]
fn outsiders_cannot_upload_and_empty_transcripts_are_rejected() {
    let fx = fixture();
    let outsider = db::create_user(&fx.conn, "sarah@example.com", "Sarah").unwrap();
    let err = db::create_meeting(
        &fx.conn,
        &fx.project_id,
        &outsider.id,
        &MeetingUpload {
            raw_transcript: TRANSCRIPT.to_string(),
            ..Default::default()
        },
        Lexicon::builtin(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let err = db::create_meeting(
        &fx.conn,
        &fx.project_id,
        &fx.admin.id,
        &MeetingUpload {
            raw_transcript: "   \n".to_string(),
            ..Default::default()
        },
        Lexicon::builtin(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn processing_a_meeting_records_contributions_once() {
    let fx = fixture();
    let meeting = upload(&fx);
    let entries = vec![entry(&fx.admin.id, 60.0), entry(&fx.member.id, 40.0)];

    let records = db::process_meeting(&fx.conn, &fx.project_id, &meeting.id, &fx.admin.id, &entries).unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.source_type == SourceType::Meeting));
    assert!(records.iter().all(|r| r.source_id.as_deref() == Some(meeting.id.as_str())));
    assert_eq!(records[0].description.as_deref(), Some("From meeting: Weekly Sync"));

    let stored = db::get_meeting(&fx.conn, &fx.project_id, &meeting.id).unwrap();
    assert_eq!(stored.status, MeetingStatus::Processed);
    let balance = db::balance_of(&fx.conn, &fx.project_id, &fx.admin.id).unwrap();
    assert_eq!(balance.total_contributed, 60.0);

    let err = db::process_meeting(&fx.conn, &fx.project_id, &meeting.id, &fx.admin.id, &entries).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(db::contribution_shares(&fx.conn, &fx.project_id).unwrap().len(), 2);

    let err = db::delete_meeting(&fx.conn, &fx.project_id, &meeting.id, &fx.admin.id).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn processing_rejects_bad_totals_and_non_members() {
    let fx = fixture();
    let meeting = upload(&fx);

    let err = db::process_meeting(
        &fx.conn,
        &fx.project_id,
        &meeting.id,
        &fx.admin.id,
        &[entry(&fx.admin.id, 50.0), entry(&fx.member.id, 30.0)],
    )
    .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let outsider = db::create_user(&fx.conn, "sarah@example.com", "Sarah").unwrap();
    let err = db::process_meeting(
        &fx.conn,
        &fx.project_id,
        &meeting.id,
        &fx.admin.id,
        &[entry(&fx.admin.id, 50.0), entry(&outsider.id, 50.0)],
    )
    .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = db::process_meeting(&fx.conn, &fx.project_id, &meeting.id, &fx.member.id, &[entry(&fx.member.id, 100.0)])
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));

    assert!(db::contribution_shares(&fx.conn, &fx.project_id).unwrap().is_empty());
    let stored = db::get_meeting(&fx.conn, &fx.project_id, &meeting.id).unwrap();
    assert_eq!(stored.status, MeetingStatus::Pending);
}

#[test]
fn uploader_may_delete_a_pending_meeting() {
    let fx = fixture();
    let meeting = upload(&fx);
    db::delete_meeting(&fx.conn, &fx.project_id, &meeting.id, &fx.member.id).unwrap();
    let err = db::get_meeting(&fx.conn, &fx.project_id, &meeting.id).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn manual_contributions_are_bounded_and_reversible() {
    let fx = fixture();
    let err = db::add_contribution(&fx.conn, &fx.project_id, &fx.admin.id, &entry(&fx.member.id, 120.0))
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let record = db::add_contribution(&fx.conn, &fx.project_id, &fx.admin.id, &entry(&fx.member.id, 25.0)).unwrap();
    assert_eq!(record.source_type, SourceType::Manual);
    assert_eq!(
        db::balance_of(&fx.conn, &fx.project_id, &fx.member.id).unwrap().total_contributed,
        25.0
    );

    db::delete_contribution(&fx.conn, &fx.project_id, &record.id, &fx.admin.id).unwrap();
    assert_eq!(
        db::balance_of(&fx.conn, &fx.project_id, &fx.member.id).unwrap().total_contributed,
        0.0
    );
    assert!(db::contribution_shares(&fx.conn, &fx.project_id).unwrap().is_empty());
}

#[test]
fn summary_and_pages_cover_every_record() {
    let fx = fixture();
    db::import_contributions(
        &fx.conn,
        &fx.project_id,
        &fx.admin.id,
        Some("sprint-12.csv"),
        &[
            entry(&fx.admin.id, 30.0),
            entry(&fx.member.id, 10.0),
            entry(&fx.admin.id, 20.0),
        ],
    )
    .unwrap();

    let summary = db::contribution_summary(&fx.conn, &fx.project_id, &fx.member.id).unwrap();
    assert_eq!(summary.len(), 2);
    assert_eq!(summary[0].user_id, fx.admin.id);
    assert_eq!(summary[0].total_ratio, 50.0);
    assert_eq!(summary[0].contribution_count, 2);
    assert_eq!(summary[0].percentage, 83.33);
    assert_eq!(summary[1].percentage, 16.67);

    let first = db::list_contributions(&fx.conn, &fx.project_id, &fx.admin.id, 1, 2).unwrap();
    let second = db::list_contributions(&fx.conn, &fx.project_id, &fx.admin.id, 2, 2).unwrap();
    assert_eq!(first.total, 3);
    assert_eq!(first.contributions.len(), 2);
    assert_eq!(second.contributions.len(), 1);
    assert!(first
        .contributions
        .iter()
        .chain(&second.contributions)
        .all(|r| r.source_type == SourceType::Import));

    let clamped = db::list_contributions(&fx.conn, &fx.project_id, &fx.admin.id, 0, 500).unwrap();
    assert_eq!(clamped.page, 1);
    assert_eq!(clamped.limit, db::MAX_PAGE_SIZE);
}

#[test]
fn wallets_are_validated_and_normalized() {
    let fx = fixture();
    let err = db::set_wallet(&fx.conn, &fx.member.id, "0x1234").unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    db::set_wallet(&fx.conn, &fx.member.id, "0x52908400098527886E0F7030069857D2E4169EE7").unwrap();
    let user = db::get_user(&fx.conn, &fx.member.id).unwrap();
    assert_eq!(
        user.wallet_address.as_deref(),
        Some("0x52908400098527886e0f7030069857d2e4169ee7")
    );
}
