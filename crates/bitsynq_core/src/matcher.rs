use crate::parser::contains_cjk;
use crate::schema::{ParsedParticipant, RosterMember};
use tracing::debug;

/// Annotate each participant with the first roster member that matches it.
///
/// Roster order decides ties. A member matches when any of these hold,
/// comparing lowercased, trimmed text:
/// 1. the name equals the display name or the email local part;
/// 2. the name equals one of the member's aliases;
/// 3. the name is longer than 3 characters and is contained in (or contains)
///    the display name, or is contained in the email local part;
/// 4. the name has a CJK ideograph, is at least 2 characters, and is
///    contained in the display name.
///
/// Unmatched participants keep `matched_user_id` unset.
pub fn match_participants(
    participants: &[ParsedParticipant],
    roster: &[RosterMember],
) -> Vec<ParsedParticipant> {
    let candidates: Vec<Candidate> = roster.iter().map(Candidate::from_member).collect();

    participants
        .iter()
        .map(|participant| {
            let name = participant.name.trim().to_lowercase();
            let matched = candidates
                .iter()
                .find(|candidate| candidate.matches(&name))
                .map(|candidate| candidate.id.to_string());
            if matched.is_none() {
                debug!(name = %participant.name, "no roster member matched");
            }
            ParsedParticipant {
                matched_user_id: matched,
                ..participant.clone()
            }
        })
        .collect()
}

struct Candidate<'a> {
    id: &'a str,
    display_name: String,
    email_local: String,
    aliases: Vec<String>,
}

impl<'a> Candidate<'a> {
    fn from_member(member: &'a RosterMember) -> Self {
        let email_local = member
            .email
            .split('@')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        let aliases = member
            .aliases
            .as_ref()
            .map(|aliases| aliases.resolve())
            .unwrap_or_default()
            .into_iter()
            .map(|alias| alias.trim().to_lowercase())
            .filter(|alias| !alias.is_empty())
            .collect();

        Self {
            id: &member.id,
            display_name: member.display_name.trim().to_lowercase(),
            email_local,
            aliases,
        }
    }

    fn matches(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }

        if name == self.display_name || name == self.email_local {
            return true;
        }

        if self.aliases.iter().any(|alias| alias == name) {
            return true;
        }

        let length = name.chars().count();
        if length > 3 {
            let display_hit = !self.display_name.is_empty()
                && (self.display_name.contains(name) || name.contains(self.display_name.as_str()));
            let email_hit = !self.email_local.is_empty() && self.email_local.contains(name);
            if display_hit || email_hit {
                return true;
            }
        }

        length >= 2 && contains_cjk(name) && self.display_name.contains(name)
    }
}
