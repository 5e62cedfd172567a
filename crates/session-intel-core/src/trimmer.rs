//! Context trimming for the working window handed to the next model request.
//!
//! Trimming is pure: it takes a slice of turns and returns the kept subset.
//! The raw turn log is never touched.

use session_state::Turn;

const DEFAULT_CONTEXT_LIMIT: usize = 6;
const DEFAULT_KEEP_LAST_N_TURNS: usize = 3;

/// How many user exchanges the working window may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimPolicy {
    context_limit: usize,
    keep_last_n_turns: usize,
}

impl TrimPolicy {
    /// `keep_last_n_turns` must be in `1..=context_limit`.
    pub fn new(context_limit: usize, keep_last_n_turns: usize) -> Result<Self, String> {
        if keep_last_n_turns == 0 {
            return Err("keep_last_n_turns must be at least 1".to_string());
        }
        if keep_last_n_turns > context_limit {
            return Err(format!(
                "keep_last_n_turns ({keep_last_n_turns}) must not exceed context_limit ({context_limit})"
            ));
        }
        Ok(Self {
            context_limit,
            keep_last_n_turns,
        })
    }

    pub fn context_limit(&self) -> usize {
        self.context_limit
    }

    pub fn keep_last_n_turns(&self) -> usize {
        self.keep_last_n_turns
    }
}

impl Default for TrimPolicy {
    fn default() -> Self {
        Self {
            context_limit: DEFAULT_CONTEXT_LIMIT,
            keep_last_n_turns: DEFAULT_KEEP_LAST_N_TURNS,
        }
    }
}

/// Bound `turns` to the policy.
///
/// When the user turns reach `context_limit`, the oldest exchanges (a user
/// turn plus the agent/tool turns after it) are dropped until exactly
/// `keep_last_n_turns` user turns remain. System turns always survive, and
/// non-system turns before the first user turn are dropped along with the
/// trimmed exchanges.
pub fn trim(turns: &[Turn], policy: &TrimPolicy) -> Vec<Turn> {
    let user_positions: Vec<usize> = turns
        .iter()
        .enumerate()
        .filter(|(_, t)| t.is_user())
        .map(|(i, _)| i)
        .collect();

    if user_positions.len() < policy.context_limit {
        return turns.to_vec();
    }

    let cut = user_positions[user_positions.len() - policy.keep_last_n_turns];
    turns
        .iter()
        .enumerate()
        .filter(|(i, t)| *i >= cut || t.is_system())
        .map(|(_, t)| t.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(n: u64) -> Vec<Turn> {
        (1..=n)
            .flat_map(|i| {
                vec![
                    Turn::user(2 * i - 1, format!("question {i}")),
                    Turn::agent(2 * i, format!("answer {i}")),
                ]
            })
            .collect()
    }

    fn contents(turns: &[Turn]) -> Vec<&str> {
        turns.iter().map(|t| t.content.as_str()).collect()
    }

    #[test]
    fn six_pairs_at_limit_keep_last_three() {
        let kept = trim(&pairs(6), &TrimPolicy::default());
        assert_eq!(kept.iter().filter(|t| t.is_user()).count(), 3);
        assert_eq!(
            contents(&kept),
            vec![
                "question 4",
                "answer 4",
                "question 5",
                "answer 5",
                "question 6",
                "answer 6"
            ]
        );
    }

    #[test]
    fn below_limit_is_untouched() {
        let turns = pairs(5);
        let kept = trim(&turns, &TrimPolicy::default());
        assert_eq!(kept, turns);
    }

    #[test]
    fn seven_pairs_keep_last_three() {
        let turns = pairs(7);
        let kept = trim(&turns, &TrimPolicy::default());
        assert_eq!(
            contents(&kept),
            vec![
                "question 5",
                "answer 5",
                "question 6",
                "answer 6",
                "question 7",
                "answer 7"
            ]
        );
    }

    #[test]
    fn six_pairs_with_lower_limit_keep_last_three_pairs() {
        let policy = TrimPolicy::new(5, 3).unwrap();
        let kept = trim(&pairs(6), &policy);
        assert_eq!(kept.len(), 6);
        assert_eq!(kept[0].content, "question 4");
        assert_eq!(kept[5].content, "answer 6");
    }

    #[test]
    fn system_turns_survive_and_leading_agent_turns_drop() {
        let mut turns = vec![
            Turn::system("recap: open gaps"),
            Turn::agent(1, "welcome back"),
        ];
        turns.extend(pairs(3).into_iter().map(|mut t| {
            t.turn += 1;
            t
        }));
        let policy = TrimPolicy::new(2, 1).unwrap();
        let kept = trim(&turns, &policy);
        assert_eq!(
            contents(&kept),
            vec!["recap: open gaps", "question 3", "answer 3"]
        );
    }

    #[test]
    fn tool_turns_follow_their_exchange() {
        let turns = vec![
            Turn::user(1, "q1"),
            Turn::tool(2, "shell", serde_json::json!({"cmd": "ls"}), "ran ls", None),
            Turn::user(3, "q2"),
            Turn::tool(4, "shell", serde_json::json!({}), "ran tests", None),
            Turn::agent(5, "a2"),
        ];
        let kept = trim(&turns, &TrimPolicy::new(1, 1).unwrap());
        assert_eq!(contents(&kept), vec!["q2", "ran tests", "a2"]);
    }

    #[test]
    fn order_is_preserved() {
        let kept = trim(&pairs(10), &TrimPolicy::new(4, 2).unwrap());
        let indices: Vec<u64> = kept.iter().map(|t| t.turn).collect();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        assert_eq!(indices, sorted);
        assert_eq!(kept.iter().filter(|t| t.is_user()).count(), 2);
    }

    #[test]
    fn policy_validation() {
        assert!(TrimPolicy::new(3, 0).is_err());
        assert!(TrimPolicy::new(2, 3).is_err());
        let policy = TrimPolicy::new(3, 3).unwrap();
        assert_eq!(policy.context_limit(), 3);
        assert_eq!(policy.keep_last_n_turns(), 3);
    }
}
