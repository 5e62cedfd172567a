//! Markdown projections of the structured session artifacts.
//!
//! `learnings.md` and `augmented_turns.md` are regenerated from scratch on
//! every write, so a summary section can never land between turn bullets.

use chrono::{DateTime, Utc};

use crate::schema::{AugmentationRecord, Gap, JournalNote, SessionId, Summary};

pub const SUMMARY_HEADING: &str = "## Session Summary";
const HIGHLIGHTS_HEADING: &str = "### Timeline Highlights";
const GAPS_HEADING: &str = "### Unresolved Questions";
const NEXT_STEPS_HEADING: &str = "### Suggested Next Reps";

/// Render the whole learnings journal.
///
/// Bullets are sorted by turn index; summaries keep their chronological order.
pub fn render_learnings(
    session_id: &SessionId,
    started_at: DateTime<Utc>,
    notes: &[JournalNote],
    summaries: &[Summary],
) -> String {
    let mut out = format!(
        "# Session {} — {}\n\n## Turn Log\n",
        session_id,
        started_at.to_rfc3339()
    );

    let mut sorted: Vec<&JournalNote> = notes.iter().collect();
    sorted.sort_by_key(|n| n.turn);
    for note in sorted {
        out.push_str(&render_note(note));
        out.push('\n');
    }

    for summary in summaries {
        out.push('\n');
        out.push_str(&render_summary(summary));
    }
    out
}

/// `- Turn N – **Role**: content`, with multi-line content indented under the bullet.
pub fn render_note(note: &JournalNote) -> String {
    let content = note.content.trim();
    let content = if content.is_empty() {
        "(no content)".to_string()
    } else {
        content.lines().collect::<Vec<_>>().join("\n  ")
    };
    format!("- Turn {} – **{}**: {}", note.turn, note.speaker, content)
}

/// One `## Session Summary` section.
pub fn render_summary(summary: &Summary) -> String {
    let mut out = format!(
        "{SUMMARY_HEADING}\n_Generated {}_\n\n",
        summary.created_at.to_rfc3339()
    );

    out.push_str(HIGHLIGHTS_HEADING);
    out.push('\n');
    push_bullets(&mut out, &summary.highlights);

    out.push('\n');
    out.push_str(GAPS_HEADING);
    out.push('\n');
    if summary.gaps.is_empty() {
        out.push_str("- None\n");
    }
    for gap in &summary.gaps {
        let mark = if gap.resolved { "x" } else { " " };
        out.push_str(&format!("- [{mark}] {}\n", gap.description.trim()));
    }

    out.push('\n');
    out.push_str(NEXT_STEPS_HEADING);
    out.push('\n');
    push_bullets(&mut out, &summary.next_steps);
    out
}

fn push_bullets(out: &mut String, items: &[String]) {
    if items.is_empty() {
        out.push_str("- None\n");
    }
    for item in items {
        out.push_str(&format!("- {}\n", item.trim()));
    }
}

/// Parse the last `## Session Summary` section of a journal.
///
/// Used for journals written before structured summaries existed. Plain
/// bullets under "Unresolved Questions" count as open gaps; `- [x]` marks a
/// resolved one. `fallback_time` is used when the section carries no
/// `_Generated ..._` line.
pub fn parse_latest_summary(markdown: &str, fallback_time: DateTime<Utc>) -> Option<Summary> {
    let start = markdown.rfind(SUMMARY_HEADING)?;
    let section = &markdown[start + SUMMARY_HEADING.len()..];

    let mut summary = Summary {
        created_at: fallback_time,
        highlights: Vec::new(),
        gaps: Vec::new(),
        next_steps: Vec::new(),
    };

    #[derive(PartialEq)]
    enum Part {
        None,
        Highlights,
        Gaps,
        NextSteps,
    }
    let mut part = Part::None;

    for line in section.lines() {
        let trimmed = line.trim();
        if let Some(stamp) = trimmed
            .strip_prefix("_Generated ")
            .and_then(|s| s.strip_suffix('_'))
        {
            if let Ok(ts) = DateTime::parse_from_rfc3339(stamp) {
                summary.created_at = ts.with_timezone(&Utc);
            }
            continue;
        }
        if let Some(heading) = trimmed.strip_prefix('#') {
            let heading = heading.trim_start_matches('#').trim().to_lowercase();
            part = if heading.contains("highlight") {
                Part::Highlights
            } else if heading.contains("unresolved") || heading.contains("gap") {
                Part::Gaps
            } else if heading.contains("next") {
                Part::NextSteps
            } else {
                Part::None
            };
            continue;
        }
        let Some(item) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
        else {
            continue;
        };
        let item = item.trim();
        if item.is_empty() || item.eq_ignore_ascii_case("none") {
            continue;
        }
        match part {
            Part::Highlights => summary.highlights.push(item.to_string()),
            Part::NextSteps => summary.next_steps.push(item.to_string()),
            Part::Gaps => summary.gaps.push(parse_gap(item)),
            Part::None => {}
        }
    }

    if summary.is_empty() {
        None
    } else {
        Some(summary)
    }
}

fn parse_gap(item: &str) -> Gap {
    if let Some(rest) = item
        .strip_prefix("[x]")
        .or_else(|| item.strip_prefix("[X]"))
    {
        Gap::resolved(rest.trim())
    } else if let Some(rest) = item.strip_prefix("[ ]") {
        Gap::open(rest.trim())
    } else {
        Gap::open(item)
    }
}

/// Render every augmentation record for human review.
pub fn render_augmentations(records: &[AugmentationRecord]) -> String {
    let mut out = String::from("# Augmented Turns\n");
    for record in records {
        out.push('\n');
        out.push_str(&render_augmentation(record));
    }
    out
}

fn fenced(lang: &str, body: &str, empty: &str) -> String {
    let body = body.trim();
    let body = if body.is_empty() { empty } else { body };
    format!("```{lang}\n{body}\n```\n")
}

pub fn render_augmentation(record: &AugmentationRecord) -> String {
    let mut out = format!(
        "## Turn {} — {}\n\n",
        record.turn,
        record.recorded_at.to_rfc3339()
    );

    out.push_str("**Original**\n");
    out.push_str(&fenced("", &record.original, "(empty)"));
    out.push_str("\n**Suggested Augmentation**\n");
    out.push_str(&fenced("", &record.suggestion, "(empty)"));
    out.push_str("\n**Final Prompt Sent**\n");
    out.push_str(&fenced("", &record.final_text, "(empty)"));
    out.push_str("\n**Diff (original vs. suggestion)**\n");
    out.push_str(&fenced("diff", &record.suggestion_diff, "(no diff)"));

    if record.final_text.trim() != record.suggestion.trim() {
        out.push_str("\n**Diff (original vs. final prompt)**\n");
        out.push_str(&fenced("diff", &record.final_diff, "(no diff)"));
    }

    out.push_str("\n**Why it changed**\n");
    if record.justification.is_empty() {
        out.push_str("- (not provided)\n");
    }
    for reason in &record.justification {
        out.push_str(&format!("- {}\n", reason.trim()));
    }

    out.push_str("\n**Human decision**\n");
    out.push_str(&format!("- {}\n", record.decision));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Decision;

    fn note(turn: u64, speaker: &str, content: &str) -> JournalNote {
        JournalNote {
            turn,
            speaker: speaker.into(),
            content: content.into(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn empty_note_renders_placeholder() {
        assert_eq!(
            render_note(&note(4, "Agent", "   ")),
            "- Turn 4 – **Agent**: (no content)"
        );
    }

    #[test]
    fn summaries_follow_all_bullets() {
        let id = SessionId::parse("s1").unwrap();
        let summary = Summary::new(vec!["Learned hooks".into()], vec![], vec![]);
        let doc = render_learnings(
            &id,
            Utc::now(),
            &[note(2, "Agent", "two"), note(1, "User", "one")],
            &[summary],
        );
        let one = doc.find("Turn 1").unwrap();
        let two = doc.find("Turn 2").unwrap();
        let heading = doc.find(SUMMARY_HEADING).unwrap();
        assert!(one < two && two < heading);
        assert!(doc.starts_with("# Session s1 — "));
    }

    #[test]
    fn rendered_summary_parses_back() {
        let summary = Summary::new(
            vec!["Explored effects".into()],
            vec![Gap::open("useEffect lifecycle"), Gap::resolved("state batching")],
            vec!["Write a cleanup example".into()],
        );
        let md = render_summary(&summary);
        let parsed = parse_latest_summary(&md, Utc::now()).unwrap();
        assert_eq!(parsed.highlights, summary.highlights);
        assert_eq!(parsed.gaps, summary.gaps);
        assert_eq!(parsed.next_steps, summary.next_steps);
        assert_eq!(parsed.created_at, summary.created_at);
    }

    #[test]
    fn parses_free_form_legacy_summary() {
        let md = "# Session x\n\n## Turn Log\n- Turn 1 – **User**: hi\n\n\
                  ## Session Summary\n\n## Timeline Highlights\n- Set up router\n\n\
                  ## Unresolved Questions\n- Why does the effect run twice?\n\n\
                  ## Suggested Next Reps\n- Read StrictMode docs\n";
        let parsed = parse_latest_summary(md, Utc::now()).unwrap();
        assert_eq!(parsed.highlights, vec!["Set up router".to_string()]);
        assert_eq!(parsed.gaps, vec![Gap::open("Why does the effect run twice?")]);
        assert_eq!(parsed.next_steps.len(), 1);
    }

    #[test]
    fn parse_without_summary_is_none() {
        assert!(parse_latest_summary("# Session\n\n## Turn Log\n", Utc::now()).is_none());
    }

    #[test]
    fn final_diff_only_when_final_differs() {
        let mut record = AugmentationRecord {
            turn: 1,
            original: "fix bug".into(),
            suggestion: "fix bug in effect cleanup".into(),
            final_text: "fix bug in effect cleanup".into(),
            justification: vec!["prior gap".into()],
            suggestion_diff: "-fix bug\n+fix bug in effect cleanup".into(),
            final_diff: "-fix bug\n+fix bug in effect cleanup".into(),
            decision: Decision::Accepted,
            recorded_at: Utc::now(),
        };
        assert!(!render_augmentation(&record).contains("original vs. final prompt"));

        record.final_text = "fix bug".into();
        record.final_diff = String::new();
        record.decision = Decision::Rejected;
        let md = render_augmentation(&record);
        assert!(md.contains("original vs. final prompt"));
        assert!(md.contains("- rejected"));
    }
}
