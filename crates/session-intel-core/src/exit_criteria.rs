//! Exit criteria for learn mode.
//!
//! Learn mode is entered by an external toggle and left when the latest
//! summary shows every gap closed or the user types a completion token.
//! [`ExitCriteria::evaluate`] is pure; persisting the new mode is the
//! caller's job.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use session_state::{SessionMode, Summary};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// What a summary with no gaps at all means for learn mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZeroGapPolicy {
    /// Nothing was learned yet; keep learning.
    #[default]
    StayInLearn,
    /// Nothing is left to learn; leave.
    ExitLearn,
}

impl FromStr for ZeroGapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stay" | "stay-in-learn" => Ok(Self::StayInLearn),
            "exit" | "exit-learn" => Ok(Self::ExitLearn),
            other => Err(format!(
                "unknown zero-gap policy '{other}' (expected 'stay' or 'exit')"
            )),
        }
    }
}

/// Completion tokens plus the zero-gap policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitCriteria {
    /// Lowercase tokens; a user turn equal to one of them ends learn mode.
    pub completion_tokens: Vec<String>,
    pub zero_gap_policy: ZeroGapPolicy,
}

impl Default for ExitCriteria {
    fn default() -> Self {
        Self {
            completion_tokens: vec!["done".to_string()],
            zero_gap_policy: ZeroGapPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Why learn mode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    AllGapsResolved,
    CompletionToken,
    NoGaps,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExitReason::AllGapsResolved => "all gaps resolved",
            ExitReason::CompletionToken => "completion token",
            ExitReason::NoGaps => "no gaps recorded",
        })
    }
}

/// The mode to run next, and the reason when it changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: SessionMode,
    pub reason: Option<ExitReason>,
}

impl Transition {
    fn stay(mode: SessionMode) -> Self {
        Self {
            next: mode,
            reason: None,
        }
    }

    fn exit(reason: ExitReason) -> Self {
        Self {
            next: SessionMode::GapCapture,
            reason: Some(reason),
        }
    }

    pub fn changed(&self) -> bool {
        self.reason.is_some()
    }
}

impl ExitCriteria {
    /// Whether `user_input`, trimmed and case-folded, is a completion token.
    pub fn is_completion_token(&self, user_input: &str) -> bool {
        let folded = user_input.trim().to_lowercase();
        !folded.is_empty() && self.completion_tokens.iter().any(|t| *t == folded)
    }

    /// Decide the next mode.
    ///
    /// Gap capture never leaves on its own. In learn mode a completion token
    /// wins first, then the latest summary's gap list is consulted.
    pub fn evaluate(
        &self,
        mode: SessionMode,
        latest_summary: Option<&Summary>,
        user_input: Option<&str>,
    ) -> Transition {
        if mode != SessionMode::Learn {
            return Transition::stay(mode);
        }

        if user_input.is_some_and(|input| self.is_completion_token(input)) {
            return Transition::exit(ExitReason::CompletionToken);
        }

        match latest_summary {
            Some(summary) if summary.all_gaps_resolved() => {
                Transition::exit(ExitReason::AllGapsResolved)
            }
            Some(summary)
                if summary.gaps.is_empty()
                    && self.zero_gap_policy == ZeroGapPolicy::ExitLearn =>
            {
                Transition::exit(ExitReason::NoGaps)
            }
            _ => Transition::stay(mode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_state::Gap;

    fn summary(gaps: Vec<Gap>) -> Summary {
        Summary::new(vec!["walked through hooks".into()], gaps, vec![])
    }

    #[test]
    fn all_resolved_gaps_exit() {
        let s = summary(vec![
            Gap::resolved("useEffect lifecycle"),
            Gap::resolved("dependency arrays"),
        ]);
        let t = ExitCriteria::default().evaluate(SessionMode::Learn, Some(&s), None);
        assert_eq!(t.next, SessionMode::GapCapture);
        assert_eq!(t.reason, Some(ExitReason::AllGapsResolved));
        assert!(t.changed());
    }

    #[test]
    fn mixed_gaps_stay() {
        let s = summary(vec![
            Gap::resolved("useEffect lifecycle"),
            Gap::open("cleanup functions"),
        ]);
        let t = ExitCriteria::default().evaluate(SessionMode::Learn, Some(&s), None);
        assert_eq!(t.next, SessionMode::Learn);
        assert!(!t.changed());
    }

    #[test]
    fn done_token_exits_case_insensitively() {
        let criteria = ExitCriteria::default();
        for input in ["Done", "  done  ", "DONE"] {
            let t = criteria.evaluate(SessionMode::Learn, None, Some(input));
            assert_eq!(t.reason, Some(ExitReason::CompletionToken), "{input}");
        }
        let t = criteria.evaluate(SessionMode::Learn, None, Some("done yet?"));
        assert!(!t.changed());
    }

    #[test]
    fn zero_gaps_follow_policy() {
        let s = summary(vec![]);
        let stay = ExitCriteria::default().evaluate(SessionMode::Learn, Some(&s), None);
        assert_eq!(stay.next, SessionMode::Learn);

        let criteria = ExitCriteria {
            zero_gap_policy: ZeroGapPolicy::ExitLearn,
            ..ExitCriteria::default()
        };
        let exit = criteria.evaluate(SessionMode::Learn, Some(&s), None);
        assert_eq!(exit.reason, Some(ExitReason::NoGaps));
    }

    #[test]
    fn gap_capture_never_transitions() {
        let s = summary(vec![Gap::resolved("x")]);
        let t = ExitCriteria::default().evaluate(SessionMode::GapCapture, Some(&s), Some("done"));
        assert_eq!(t.next, SessionMode::GapCapture);
        assert!(!t.changed());
    }

    #[test]
    fn missing_summary_stays() {
        let t = ExitCriteria::default().evaluate(SessionMode::Learn, None, Some("next question"));
        assert_eq!(t.next, SessionMode::Learn);
    }

    #[test]
    fn custom_tokens() {
        let criteria = ExitCriteria {
            completion_tokens: vec!["finished".into(), "ship it".into()],
            ..ExitCriteria::default()
        };
        assert!(criteria.is_completion_token("Ship It"));
        assert!(!criteria.is_completion_token("done"));
        assert!(!criteria.is_completion_token("   "));
    }

    #[test]
    fn policy_parsing() {
        assert_eq!("stay".parse::<ZeroGapPolicy>(), Ok(ZeroGapPolicy::StayInLearn));
        assert_eq!("EXIT".parse::<ZeroGapPolicy>(), Ok(ZeroGapPolicy::ExitLearn));
        assert!("maybe".parse::<ZeroGapPolicy>().is_err());
    }
}
