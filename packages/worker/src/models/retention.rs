//! Pruning a student's attempt history for one assessment.

use chrono::{DateTime, Utc};
use common::Points;
use common::entity::{AssessmentAttempt, AttemptId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionDecision {
    /// Most recent first.
    pub keep: Vec<AttemptId>,
    pub delete: Vec<AttemptId>,
}

/// Decide which attempts of one (assessment, student) history survive.
///
/// Scanning from the most recent attempt, an attempt is kept if it is the
/// first with the best score overall, the first created before `due_by`
/// with the best score before the deadline, or among the `keep_latest` most
/// recent. `keep_latest == 0` keeps everything. Unmarked attempts rank below
/// every score.
pub fn select(
    history: &[AssessmentAttempt],
    due_by: Option<DateTime<Utc>>,
    keep_latest: usize,
) -> RetentionDecision {
    let mut ordered: Vec<&AssessmentAttempt> = history.iter().collect();
    ordered.sort_by(|a, b| b.attempt.cmp(&a.attempt));

    if keep_latest == 0 {
        return RetentionDecision {
            keep: ordered.iter().map(|a| a.id).collect(),
            delete: Vec::new(),
        };
    }

    let before_deadline = |a: &AssessmentAttempt| due_by.is_some_and(|due| a.created_at < due);

    let best_overall: Option<&Option<Points>> = ordered.iter().map(|a| &a.points).max();
    let best_before_deadline: Option<&Option<Points>> = ordered
        .iter()
        .filter(|a| before_deadline(a))
        .map(|a| &a.points)
        .max();

    let mut kept_best = false;
    let mut kept_deadline_best = false;
    let mut decision = RetentionDecision::default();

    for (position, attempt) in ordered.iter().enumerate() {
        let mut keep = position < keep_latest;

        if !kept_best && best_overall == Some(&attempt.points) {
            kept_best = true;
            keep = true;
        }
        if !kept_deadline_best
            && before_deadline(attempt)
            && best_before_deadline == Some(&attempt.points)
        {
            kept_deadline_best = true;
            keep = true;
        }

        if keep {
            decision.keep.push(attempt.id);
        } else {
            decision.delete.push(attempt.id);
        }
    }
    decision
}
