//! Best-effort extraction of participants from AI-generated meeting summaries.
//!
//! The expected layout is the Zoom-style summary: a `Quick recap`, a
//! `Next steps` list of `Name: task` lines and a free-text `Summary`.
//! Action items carry most of the weight; names mentioned in the summary
//! earn a small bonus. Nothing here fails: unrecognized input simply yields
//! fewer participants and a lower confidence.

use crate::lexicon::Lexicon;
use crate::schema::{ParsedMeetingData, ParsedParticipant};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

static SECTION_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^(?:#{1,3}[ \t]+)?(quick recap|next steps|summary|meeting summary)[ \t\r]*$")
        .expect("section header pattern")
});

static ACTION_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^:：]+)[:：]\s*(.+)$").expect("action line pattern"));

static LATIN_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)\b").expect("latin name pattern")
});

static MEETING_SUMMARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)meeting summary").expect("meeting summary pattern"));

static SECTION_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(quick recap|next steps|summary)").expect("section prefix pattern")
});

static TITLE_CANDIDATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Za-z0-9_\s]+$").expect("title pattern"));

const ACTION_BASE_SCORE: f64 = 1.0;
const MENTION_BONUS: f64 = 0.5;
const SECONDS_PER_ACTION: u64 = 60;
const MAX_NAME_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Section {
    QuickRecap,
    NextSteps,
    Summary,
    MeetingSummary,
}

impl Section {
    fn from_header(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "quick recap" => Some(Section::QuickRecap),
            "next steps" => Some(Section::NextSteps),
            "summary" => Some(Section::Summary),
            "meeting summary" => Some(Section::MeetingSummary),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    actions: u32,
    score: f64,
    keywords: Vec<String>,
}

/// Parse a transcript with the built-in lexicon.
pub fn parse_transcript(transcript: &str) -> ParsedMeetingData {
    parse_transcript_with(transcript, Lexicon::builtin())
}

pub fn parse_transcript_with(transcript: &str, lexicon: &Lexicon) -> ParsedMeetingData {
    let sections = split_sections(transcript);
    let next_steps = sections.get(&Section::NextSteps).copied().unwrap_or("");
    let summary = sections.get(&Section::Summary).copied().unwrap_or("");

    let mut tallies: IndexMap<String, Tally> = IndexMap::new();

    for (name, task) in extract_actions(next_steps, lexicon) {
        let tally = tallies.entry(name).or_default();
        tally.actions += 1;
        tally.score += ACTION_BASE_SCORE;
        for rule in lexicon.keywords() {
            if rule.pattern.is_match(task) {
                tally.score += f64::from(rule.weight);
                if !tally.keywords.contains(&rule.category) {
                    tally.keywords.push(rule.category.clone());
                }
            }
        }
    }

    for (name, mentions) in count_mentions(summary, lexicon) {
        let tally = tallies.entry(name).or_default();
        tally.score += f64::from(mentions) * MENTION_BONUS;
    }

    let total_score: f64 = tallies.values().map(|tally| tally.score).sum();
    let mut participants: Vec<ParsedParticipant> = tallies
        .into_iter()
        .map(|(name, tally)| ParsedParticipant {
            name,
            matched_user_id: None,
            speak_count: tally.actions,
            estimated_duration_seconds: u64::from(tally.actions) * SECONDS_PER_ACTION,
            keywords_found: tally.keywords,
            score: tally.score,
            suggested_ratio: if total_score > 0.0 {
                round2(tally.score / total_score * 100.0)
            } else {
                0.0
            },
        })
        .collect();
    participants.sort_by(|a, b| b.suggested_ratio.total_cmp(&a.suggested_ratio));

    let parse_confidence = confidence(&participants, next_steps, summary);
    let total_duration_seconds = participants
        .iter()
        .map(|participant| participant.estimated_duration_seconds)
        .sum();

    debug!(
        participants = participants.len(),
        confidence = parse_confidence,
        "parsed meeting transcript"
    );

    ParsedMeetingData {
        participants,
        meeting_title: extract_title(transcript),
        meeting_date: None,
        total_duration_seconds,
        parse_confidence,
    }
}

/// Body text per recognized header; the first occurrence of a header wins.
fn split_sections(transcript: &str) -> HashMap<Section, &str> {
    let headers: Vec<(Section, usize, usize)> = SECTION_HEADER
        .captures_iter(transcript)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let section = Section::from_header(caps.get(1)?.as_str())?;
            Some((section, whole.start(), whole.end()))
        })
        .collect();

    let mut sections = HashMap::new();
    for (index, (section, _, body_start)) in headers.iter().enumerate() {
        let body_end = headers
            .get(index + 1)
            .map(|(_, next_start, _)| *next_start)
            .unwrap_or(transcript.len());
        sections
            .entry(*section)
            .or_insert_with(|| transcript[*body_start..body_end].trim());
    }
    sections
}

/// `(assignee, task)` pairs; a line naming several people yields one pair each.
fn extract_actions<'a>(next_steps: &'a str, lexicon: &Lexicon) -> Vec<(String, &'a str)> {
    let mut actions = Vec::new();
    for line in next_steps.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some(caps) = ACTION_LINE.captures(trimmed) else {
            continue;
        };
        let (Some(name), Some(task)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let name = name.as_str().trim();
        let task = task.as_str().trim();
        if name.is_empty() || lexicon.is_header_keyword(name) {
            continue;
        }
        for assignee in split_assignees(name) {
            if is_plausible_name(assignee, lexicon) {
                actions.push((assignee.to_string(), task));
            } else {
                debug!(fragment = assignee, "discarded assignee fragment");
            }
        }
    }
    actions
}

fn split_assignees(name: &str) -> Vec<&str> {
    name.split(" and ")
        .flat_map(|part| part.split(" & "))
        .flat_map(|part| part.split(','))
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}

fn is_plausible_name(fragment: &str, lexicon: &Lexicon) -> bool {
    if lexicon.is_stopword(fragment) {
        return false;
    }
    let length = fragment.chars().count();
    if length < 2 && !contains_cjk(fragment) {
        return false;
    }
    length <= MAX_NAME_CHARS
}

pub(crate) fn contains_cjk(text: &str) -> bool {
    text.chars().any(|ch| ('\u{4e00}'..='\u{9fff}').contains(&ch))
}

/// Raw mention counts in the summary, CJK names first, then Latin names.
fn count_mentions(summary: &str, lexicon: &Lexicon) -> IndexMap<String, u32> {
    let mut mentions: IndexMap<String, u32> = IndexMap::new();

    for caps in lexicon.surname_mention().captures_iter(summary) {
        if let Some(name) = caps.get(1) {
            *mentions.entry(name.as_str().to_string()).or_insert(0) += 1;
        }
    }

    for caps in LATIN_NAME.captures_iter(summary) {
        if let Some(name) = caps.get(1) {
            if !lexicon.is_stopword(name.as_str()) {
                *mentions.entry(name.as_str().to_string()).or_insert(0) += 1;
            }
        }
    }

    mentions
}

fn extract_title(transcript: &str) -> Option<String> {
    let lines: Vec<&str> = transcript
        .split('\n')
        .filter(|line| !line.trim().is_empty())
        .collect();

    if let Some(first) = lines.first() {
        if MEETING_SUMMARY.is_match(first) {
            let title = lines
                .iter()
                .skip(1)
                .take(4)
                .map(|line| line.trim())
                .find(|line| !SECTION_PREFIX.is_match(line));
            if let Some(title) = title {
                return Some(title.to_string());
            }
        }
    }

    lines
        .iter()
        .find(|line| TITLE_CANDIDATE.is_match(line))
        .map(|line| line.trim().to_string())
}

fn confidence(participants: &[ParsedParticipant], next_steps: &str, summary: &str) -> u32 {
    if participants.is_empty() {
        return 0;
    }

    let with_actions = participants
        .iter()
        .filter(|participant| participant.speak_count > 0)
        .count() as u32;
    let total_actions: u32 = participants
        .iter()
        .map(|participant| participant.speak_count)
        .sum();

    let mut score = (with_actions * 15).min(40) + (total_actions * 5).min(30);
    if next_steps.chars().count() > 50 {
        score += 20;
    }
    if summary.chars().count() > 100 {
        score += 10;
    }
    score.min(100)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn find<'a>(data: &'a ParsedMeetingData, name: &str) -> &'a ParsedParticipant {
        data.participants
            .iter()
            .find(|participant| participant.name == name)
            .unwrap_or_else(|| panic!("participant {name} missing"))
    }

    #[test]
    fn parses_zoom_summary_layout() {
        let transcript = "
Meeting summary

Quick recap
A brief recap of the meeting.

Next steps
John: Complete the project documentation
Sarah: Review the code changes
Mike: Contact the client

Summary
The team discussed project progress.
";
        let data = parse_transcript(transcript);

        let names: Vec<&str> = data.participants.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["John", "Mike", "Sarah"]);
        assert_eq!(find(&data, "John").score, 4.0);
        assert_eq!(find(&data, "Mike").score, 3.0);
        assert_eq!(find(&data, "Sarah").score, 1.0);
        assert_eq!(find(&data, "John").suggested_ratio, 50.0);
        assert_eq!(find(&data, "Mike").keywords_found, vec!["coordination"]);
        assert_eq!(data.meeting_title.as_deref(), Some("A brief recap of the meeting."));
        assert_eq!(data.total_duration_seconds, 180);
        assert_eq!(data.parse_confidence, 75);
        assert_eq!(data.meeting_date, None);
    }

    #[test]
    fn suggested_ratios_sum_to_one_hundred() {
        let data = parse_transcript("Next steps\nAlice: task\nBob: task\nCharlie: task");
        assert_eq!(data.participants.len(), 3);
        let total: f64 = data.participants.iter().map(|p| p.suggested_ratio).sum();
        assert!((total - 100.0).abs() <= 0.01 + 1e-9, "total was {total}");
    }

    #[test]
    fn uneven_ratios_still_sum_within_tolerance() {
        let data = parse_transcript(
            "Next steps\nAlice: Implement feature A\nBob: Implement feature B\nCharlie: Write tests",
        );
        let total: f64 = data.participants.iter().map(|p| p.suggested_ratio).sum();
        assert!((total - 100.0).abs() <= 0.01 + 1e-9, "total was {total}");
        assert_eq!(find(&data, "Charlie").suggested_ratio, 11.11);
    }

    #[test]
    fn splits_combined_assignees() {
        let data = parse_transcript("Next steps\nSaad and Sunny: Discuss the implementation details");
        assert_eq!(data.participants.len(), 2);
        let saad = find(&data, "Saad");
        let sunny = find(&data, "Sunny");
        assert_eq!(saad.speak_count, 1);
        assert_eq!(saad.score, sunny.score);
        assert_eq!(saad.keywords_found, vec!["implementation", "ongoing"]);
    }

    #[test]
    fn splits_on_ampersand_and_comma() {
        let data = parse_transcript("Next steps\nAmy & Ben, Cleo: Share the notes");
        let mut names: Vec<&str> = data.participants.iter().map(|p| p.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["Amy", "Ben", "Cleo"]);
    }

    #[test]
    fn handles_cjk_names_and_full_width_colon() {
        let data = parse_transcript("\nNext steps\n和融：完成 token sender 設計\n胡舜元：取得 Mohammad 的評估\n");
        assert_eq!(data.participants.len(), 2);
        assert_eq!(find(&data, "和融").keywords_found, vec!["decision"]);
        assert_eq!(find(&data, "胡舜元").keywords_found, vec!["proposal"]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        let data = parse_transcript("");
        assert!(data.participants.is_empty());
        assert_eq!(data.parse_confidence, 0);
        assert_eq!(data.total_duration_seconds, 0);
        assert_eq!(data.meeting_title, None);
    }

    #[test]
    fn implementation_keywords_outscore_plain_tasks() {
        let data = parse_transcript(
            "Next steps\nDeveloper: Implement and build the new feature\nReviewer: Review the document",
        );
        assert!(find(&data, "Developer").score > find(&data, "Reviewer").score);
        assert_eq!(find(&data, "Developer").score, 4.0);
    }

    #[test]
    fn first_colon_separates_name_from_task() {
        let data = parse_transcript("Next steps\nDana: Check https://example.com: then report");
        assert_eq!(data.participants.len(), 1);
        assert_eq!(data.participants[0].name, "Dana");
    }

    #[test]
    fn rejects_header_keywords_and_noise() {
        let long_name = "x".repeat(41);
        let transcript = format!(
            "Next steps\nAction items: follow up\nMonday, Alice: Build it\nB: do this\n{long_name}: noise"
        );
        let data = parse_transcript(&transcript);
        let names: Vec<&str> = data.participants.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Alice"]);
    }

    #[test]
    fn summary_mentions_add_bonus_and_create_participants() {
        let transcript = "Next steps\nAlice: Build the dashboard\n\nSummary\nAlice presented the roadmap. Bob asked about Alice's estimates. 李小龍 提出 建議.";
        let data = parse_transcript(transcript);

        assert_eq!(find(&data, "Alice").score, 5.0);
        assert_eq!(find(&data, "Bob").score, 0.5);
        assert_eq!(find(&data, "Bob").speak_count, 0);
        assert_eq!(find(&data, "李小龍").score, 0.5);
        assert_eq!(data.participants[0].name, "Alice");
    }

    #[test]
    fn adjacent_cjk_names_need_more_than_one_separator() {
        // the delimiter after a matched name is consumed with it
        let single = count_mentions("李小龍 王大明", Lexicon::builtin());
        assert_eq!(single.keys().map(String::as_str).collect::<Vec<_>>(), vec!["李小龍"]);

        let double = count_mentions("李小龍  王大明", Lexicon::builtin());
        assert_eq!(double.keys().map(String::as_str).collect::<Vec<_>>(), vec!["李小龍", "王大明"]);
    }

    #[test]
    fn summary_alone_still_yields_participants() {
        let data = parse_transcript("Summary\nCarol reviewed the plan with Dave.");
        assert_eq!(data.participants.len(), 2);
        assert_eq!(find(&data, "Dave").suggested_ratio, 50.0);
        assert_eq!(data.parse_confidence, 0);
    }

    #[test]
    fn markdown_headers_are_recognized() {
        let data = parse_transcript("## Next steps\nEve: Design the schema\n### Summary\nshort notes only.");
        assert_eq!(data.participants.len(), 1);
        assert_eq!(find(&data, "Eve").keywords_found, vec!["implementation"]);
    }

    #[test]
    fn title_falls_back_to_capitalized_line() {
        let data = parse_transcript("Weekly Sync\nNext steps\nAlice: Build it");
        assert_eq!(data.meeting_title.as_deref(), Some("Weekly Sync"));
    }

    #[test]
    fn names_are_case_sensitive_keys() {
        let data = parse_transcript("Next steps\nalice: task one\nAlice: task two");
        assert_eq!(data.participants.len(), 2);
    }
}
