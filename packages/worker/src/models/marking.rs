//! Scoring parsed test results against an assessment's rubric.

use std::collections::{HashMap, HashSet};

use common::Points;
use common::entity::{AttemptCounts, RubricEntry, RubricKey};
use serde::Serialize;
use tracing::{debug, warn};

use super::junit::{self, CaseStatus, ParsedTestSuite};

pub const UNASSIGNED_TASK: &str = "Not assigned to a task";
pub const NOT_IN_MODEL_SOLUTION: &str = "Not in model solution";

/// One test case after marking.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MarkedCase {
    pub key: RubricKey,
    pub status: CaseStatus,
    /// Rubric weight; `None` when the test has no rubric entry.
    pub available: Option<Points>,
    pub awarded: Points,
    pub task: Option<String>,
    /// Rendered rubric feedback for failed, errored and missing tests.
    pub feedback: Option<String>,
    /// Failure message reported by the test runner.
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MarkingOutcome {
    pub points: Points,
    pub counts: AttemptCounts,
    pub cases: Vec<MarkedCase>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TaskGroup {
    pub name: String,
    pub awarded: Points,
    pub available: Points,
    pub cases: Vec<MarkedCase>,
}

/// Parse every report, skipping (and logging) the ones that fail.
pub fn parse_reports<I, P>(reports: I) -> Vec<ParsedTestSuite>
where
    I: IntoIterator<Item = (P, Vec<u8>)>,
    P: AsRef<str>,
{
    let mut suites = Vec::new();
    for (path, xml) in reports {
        match junit::parse_suites(&xml) {
            Ok(parsed) => suites.extend(parsed),
            Err(e) => warn!(report = path.as_ref(), error = %e, "Skipping unparseable JUnit report"),
        }
    }
    suites
}

pub fn render_feedback(template: &str, key: &RubricKey) -> String {
    template
        .replace("{class}", &key.class_name)
        .replace("{test}", &key.name)
}

fn feedback_for(entry: &RubricEntry, status: CaseStatus) -> Option<String> {
    let shown = matches!(
        status,
        CaseStatus::Failed | CaseStatus::Error | CaseStatus::Missing
    );
    (shown && !entry.feedback.is_empty()).then(|| render_feedback(&entry.feedback, &entry.key))
}

fn count(counts: &mut AttemptCounts, status: CaseStatus) {
    match status {
        CaseStatus::Passed => counts.passed += 1,
        CaseStatus::Failed => counts.failed += 1,
        CaseStatus::Error => counts.errored += 1,
        CaseStatus::Skipped => counts.skipped += 1,
        CaseStatus::Missing => counts.missing += 1,
    }
}

/// Mark a submission from scratch.
///
/// Every parsed case is counted; a passed case with a rubric entry earns that
/// entry's points. Rubric entries no report mentions become `Missing` cases.
/// If the same test appears more than once, its first occurrence counts.
pub fn mark(rubric: &[RubricEntry], suites: &[ParsedTestSuite]) -> MarkingOutcome {
    let entries: HashMap<&RubricKey, &RubricEntry> = rubric.iter().map(|e| (&e.key, e)).collect();
    let mut seen: HashSet<RubricKey> = HashSet::new();
    let mut counts = AttemptCounts::default();
    let mut cases = Vec::new();

    for case in suites.iter().flat_map(|s| s.cases.iter()) {
        let key = RubricKey::new(&case.class_name, &case.name);
        if !seen.insert(key.clone()) {
            debug!(test = %key, "Ignoring repeated test case");
            continue;
        }
        count(&mut counts, case.status);

        let entry = entries.get(&key).copied();
        let awarded = match entry {
            Some(entry) if case.status == CaseStatus::Passed => entry.points.clone(),
            _ => Points::zero(),
        };
        cases.push(MarkedCase {
            status: case.status,
            available: entry.map(|e| e.points.clone()),
            awarded,
            task: entry.and_then(|e| e.task.clone()),
            feedback: entry.and_then(|e| feedback_for(e, case.status)),
            message: case.message.clone(),
            key,
        });
    }

    for entry in rubric.iter().filter(|e| !seen.contains(&e.key)) {
        count(&mut counts, CaseStatus::Missing);
        cases.push(MarkedCase {
            key: entry.key.clone(),
            status: CaseStatus::Missing,
            available: Some(entry.points.clone()),
            awarded: Points::zero(),
            task: entry.task.clone(),
            feedback: feedback_for(entry, CaseStatus::Missing),
            message: None,
        });
    }

    let points = cases.iter().map(|c| &c.awarded).sum();
    MarkingOutcome {
        points,
        counts,
        cases,
    }
}

/// Group marked cases by rubric task, in order of first appearance. Cases
/// with a rubric entry but no task, and cases without a rubric entry, go to
/// two trailing groups.
pub fn group_by_task(outcome: &MarkingOutcome) -> Vec<TaskGroup> {
    let mut named: Vec<TaskGroup> = Vec::new();
    let mut unassigned = Vec::new();
    let mut unknown = Vec::new();

    for case in &outcome.cases {
        match (&case.available, &case.task) {
            (None, _) => unknown.push(case.clone()),
            (Some(_), None) => unassigned.push(case.clone()),
            (Some(_), Some(task)) => match named.iter_mut().find(|g| &g.name == task) {
                Some(group) => group.cases.push(case.clone()),
                None => named.push(TaskGroup {
                    name: task.clone(),
                    awarded: Points::zero(),
                    available: Points::zero(),
                    cases: vec![case.clone()],
                }),
            },
        }
    }

    for (name, cases) in [(UNASSIGNED_TASK, unassigned), (NOT_IN_MODEL_SOLUTION, unknown)] {
        if !cases.is_empty() {
            named.push(TaskGroup {
                name: name.to_string(),
                awarded: Points::zero(),
                available: Points::zero(),
                cases,
            });
        }
    }

    for group in &mut named {
        group.awarded = group.cases.iter().map(|c| &c.awarded).sum();
        group.available = group.cases.iter().filter_map(|c| c.available.as_ref()).sum();
    }
    named
}
