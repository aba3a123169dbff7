use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use common::entity::{
    ArtifactSource, Assessment, AssessmentAttempt, AttemptId, FileOverride, NewAssessment,
    NewRubricEntry, RubricKey, StudentId, SubmissionId, UserId,
};
use common::notification::{Notifier, PipelineEvent};
use common::storage::ContentHash;
use common::storage::filesystem::FilesystemBlobStore;
use common::store::{MemoryStore, Store};
use common::{Points, SubmissionStatus};
use mq::{MqError, MqQueue};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use worker::config::BuildConfig;
use worker::{Pipeline, PipelineError, Upload, WorkerAppConfig};

/// Stands in for Maven: copies the canned reports into place and exits with
/// the code in `exit_code`, if present.
const BUILD_SCRIPT: &str = r#"echo "[INFO] Building"
echo "settings: $1" >&2
mkdir -p target/surefire-reports target/site/jacoco
if [ -d reports ]; then cp reports/*.xml target/surefire-reports/; fi
echo "<html>coverage</html>" > target/site/jacoco/index.html
if [ -f sleep ]; then exec sleep "$(cat sleep)"; fi
exit "$(cat exit_code 2>/dev/null || echo 0)"
"#;

fn report(class: &str, cases: &[(&str, &str)]) -> String {
    let mut xml = format!(r#"<?xml version="1.0" encoding="UTF-8"?><testsuite name="{class}">"#);
    for (name, outcome) in cases {
        let body = match *outcome {
            "fail" => r#"<failure message="assertion failed"/>"#,
            "error" => r#"<error message="boom"/>"#,
            "skip" => "<skipped/>",
            _ => "",
        };
        xml.push_str(&format!(
            r#"<testcase name="{name}" classname="{class}">{body}</testcase>"#
        ));
    }
    xml.push_str("</testsuite>");
    xml
}

/// A project archive. `extra` paths are relative to the project directory.
fn project(extra: &[(&str, String)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);

    let mut files = vec![
        ("pom.xml".to_string(), "<project/>".to_string()),
        ("build.sh".to_string(), BUILD_SCRIPT.to_string()),
    ];
    files.extend(extra.iter().map(|(p, c)| (p.to_string(), c.clone())));

    for (path, content) in files {
        writer
            .start_file(format!("project/{path}"), options)
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn upload(archive: Vec<u8>) -> Upload {
    Upload {
        author_id: UserId(1),
        submitter_id: UserId(1),
        archive,
    }
}

fn p(s: &str) -> Points {
    s.parse().unwrap()
}

struct Harness {
    _dir: tempfile::TempDir,
    pipeline: Arc<Pipeline>,
    store: Arc<MemoryStore>,
    events: broadcast::Receiver<PipelineEvent>,
    consumer: JoinHandle<Result<(), MqError>>,
}

impl Harness {
    async fn new(configure: impl FnOnce(&mut WorkerAppConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("settings.xml");
        let policy = dir.path().join("security.policy");
        std::fs::write(&settings, "<settings/>").unwrap();
        std::fs::write(&policy, "grant {};").unwrap();

        let mut config = WorkerAppConfig::default();
        config.build = BuildConfig {
            program: "/bin/sh".into(),
            args: vec!["build.sh".into(), "{settings}".into(), "{policy}".into()],
            settings_file: Some(settings),
            policy_file: Some(policy),
            inherited_env: vec!["PATH".into()],
            poll_interval_ms: 20,
            ..BuildConfig::default()
        };
        config.storage.blob_path = dir.path().join("blobs");
        configure(&mut config);

        let store = Arc::new(MemoryStore::new());
        let blobs = FilesystemBlobStore::new(config.storage.blob_path.clone(), config.storage.max_blob_size)
            .await
            .unwrap();
        let notifier = Notifier::default();
        let events = notifier.subscribe();

        let pipeline = Arc::new(Pipeline::new(
            store.clone(),
            Arc::new(blobs),
            MqQueue::local(64),
            notifier,
            config,
        ));
        let consumer = tokio::spawn(Arc::clone(&pipeline).run());

        Self {
            _dir: dir,
            pipeline,
            store,
            events,
            consumer,
        }
    }

    async fn assessment(&self, new: NewAssessment) -> Assessment {
        self.store.create_assessment(new).await.unwrap()
    }

    async fn rubric(&self, assessment: &Assessment, entries: &[(&str, &str, &str)]) {
        for (class, name, points) in entries {
            let mut entry = NewRubricEntry::unweighted(RubricKey::new(*class, *name));
            entry.points = p(points);
            self.store
                .add_rubric_entry(assessment.id, entry)
                .await
                .unwrap();
        }
    }

    async fn submit(&self, assessment: &Assessment, student: i64, archive: Vec<u8>) -> AssessmentAttempt {
        self.pipeline
            .submit_attempt(assessment.id, StudentId(student), upload(archive))
            .await
            .unwrap()
    }

    async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(30), self.pipeline.wait_idle())
            .await
            .expect("pipeline did not settle")
            .unwrap();
    }

    async fn attempt(&self, id: AttemptId) -> AssessmentAttempt {
        self.store.attempt(id).await.unwrap().expect("attempt exists")
    }

    async fn status(&self, id: SubmissionId) -> Option<SubmissionStatus> {
        self.store.submission(id).await.unwrap().map(|s| s.status)
    }

    fn drain_events(&mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    async fn finish(self) {
        self.pipeline.shutdown();
        self.consumer.await.unwrap().unwrap();
    }
}

fn statuses_of(events: &[PipelineEvent], submission_id: SubmissionId) -> Vec<SubmissionStatus> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::SubmissionStatusChanged {
                submission_id: id,
                status,
            } if *id == submission_id => Some(*status),
            _ => None,
        })
        .collect()
}

fn marks_updates(events: &[PipelineEvent], attempt_id: AttemptId) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::AttemptMarksUpdated { attempt_id: id } if *id == attempt_id))
        .count()
}

#[tokio::test]
async fn attempt_is_built_marked_and_checksummed() {
    let mut h = Harness::new(|_| {}).await;
    let assessment = h.assessment(NewAssessment::default()).await;
    h.rubric(&assessment, &[("ClassX", "testA", "10.00"), ("ClassX", "testB", "5.00")])
        .await;

    let archive = project(&[(
        "reports/TEST-ClassX.xml",
        report("ClassX", &[("testA", "pass"), ("testB", "fail")]),
    )]);
    let attempt = h.submit(&assessment, 1, archive.clone()).await;
    assert_eq!(attempt.attempt, 1);
    assert!(!attempt.is_marked());
    h.settle().await;

    let marked = h.attempt(attempt.id).await;
    assert_eq!(marked.points, Some(p("10.00")));
    assert_eq!(marked.counts.passed, 1);
    assert_eq!(marked.counts.failed, 1);
    assert_eq!(marked.counts.missing, 0);

    let submission = h.store.submission(attempt.submission_id).await.unwrap().unwrap();
    assert_eq!(submission.status, SubmissionStatus::Completed);
    assert_eq!(submission.exit_code, Some(0));
    assert_eq!(submission.checksum, Some(ContentHash::compute(&archive).to_hex()));

    let artifacts = h.store.artifacts(attempt.submission_id).await.unwrap();
    let mut sources: Vec<_> = artifacts
        .iter()
        .map(|a| (a.source.as_str(), a.path.as_str()))
        .collect();
    sources.sort();
    assert_eq!(
        sources,
        vec![
            ("coverage", "target/site/jacoco/index.html"),
            ("junit", "target/surefire-reports/TEST-ClassX.xml"),
            ("stderr", "stderr.txt"),
            ("stdout", "stdout.txt"),
        ]
    );

    let stdout = artifacts.iter().find(|a| a.source == ArtifactSource::Stdout).unwrap();
    let (_, content) = h.pipeline.read_artifact(stdout.id).await.unwrap();
    assert_eq!(String::from_utf8(content).unwrap(), "[INFO] Building\n");

    let events = h.drain_events();
    assert_eq!(
        statuses_of(&events, attempt.submission_id),
        vec![SubmissionStatus::Running, SubmissionStatus::Completed]
    );
    assert_eq!(marks_updates(&events, attempt.id), 1);
    h.finish().await;
}

#[tokio::test]
async fn unreported_rubric_test_counts_as_missing() {
    let h = Harness::new(|_| {}).await;
    let assessment = h.assessment(NewAssessment::default()).await;
    h.rubric(&assessment, &[("ClassX", "testA", "10.00"), ("ClassY", "testC", "7.00")])
        .await;

    let attempt = h
        .submit(
            &assessment,
            1,
            project(&[("reports/TEST-ClassX.xml", report("ClassX", &[("testA", "pass")]))]),
        )
        .await;
    h.settle().await;

    let marked = h.attempt(attempt.id).await;
    assert_eq!(marked.points, Some(p("10.00")));
    assert_eq!(marked.counts.passed, 1);
    assert_eq!(marked.counts.missing, 1);
    h.finish().await;
}

#[tokio::test]
async fn failing_build_is_still_marked() {
    let h = Harness::new(|_| {}).await;
    let assessment = h.assessment(NewAssessment::default()).await;
    h.rubric(&assessment, &[("ClassX", "testA", "2.50")]).await;

    let attempt = h
        .submit(
            &assessment,
            1,
            project(&[
                ("reports/TEST-ClassX.xml", report("ClassX", &[("testA", "pass"), ("testB", "error")])),
                ("exit_code", "1".to_string()),
            ]),
        )
        .await;
    h.settle().await;

    let submission = h.store.submission(attempt.submission_id).await.unwrap().unwrap();
    assert_eq!(submission.status, SubmissionStatus::Failed);
    assert_eq!(submission.exit_code, Some(1));

    let marked = h.attempt(attempt.id).await;
    assert_eq!(marked.points, Some(p("2.50")));
    assert_eq!(marked.counts.errored, 1);
    h.finish().await;
}

#[tokio::test]
async fn deleting_the_attempt_cancels_its_build() {
    let mut h = Harness::new(|_| {}).await;
    let assessment = h.assessment(NewAssessment::default()).await;
    h.rubric(&assessment, &[("ClassX", "testA", "1.00")]).await;

    let attempt = h
        .submit(
            &assessment,
            1,
            project(&[
                ("reports/TEST-ClassX.xml", report("ClassX", &[("testA", "pass")])),
                ("sleep", "30".to_string()),
            ]),
        )
        .await;

    let started = tokio::time::Instant::now();
    while h.status(attempt.submission_id).await != Some(SubmissionStatus::Running) {
        assert!(started.elapsed() < Duration::from_secs(10), "build never started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // Let the build process start.
    tokio::time::sleep(Duration::from_millis(300)).await;

    h.pipeline.delete_attempt(attempt.id).await.unwrap();
    h.settle().await;
    assert!(started.elapsed() < Duration::from_secs(20));

    let events = h.drain_events();
    assert_eq!(
        statuses_of(&events, attempt.submission_id).last(),
        Some(&SubmissionStatus::Aborted)
    );
    assert_eq!(marks_updates(&events, attempt.id), 0);
    assert!(h.store.artifacts(attempt.submission_id).await.unwrap().is_empty());
    assert!(h.store.submission(attempt.submission_id).await.unwrap().is_none());
    h.finish().await;
}

#[tokio::test]
async fn corrupt_report_does_not_block_marking() {
    let h = Harness::new(|_| {}).await;
    let assessment = h.assessment(NewAssessment::default()).await;
    h.rubric(&assessment, &[("ClassX", "testA", "4.00"), ("ClassY", "testB", "3.00")])
        .await;

    let corrupt = r#"<testsuite name="ClassY"><testcase name="testB" classname="ClassY">"#;
    let attempt = h
        .submit(
            &assessment,
            1,
            project(&[
                ("reports/TEST-ClassX.xml", report("ClassX", &[("testA", "pass")])),
                ("reports/TEST-ClassY.xml", corrupt.to_string()),
            ]),
        )
        .await;
    h.settle().await;

    let marked = h.attempt(attempt.id).await;
    assert_eq!(marked.points, Some(p("4.00")));
    assert_eq!(marked.counts.passed, 1);
    assert_eq!(marked.counts.missing, 1);
    h.finish().await;
}

#[tokio::test]
async fn build_failures_abort_the_chain() {
    struct Case {
        name: &'static str,
        archive: Vec<u8>,
    }
    let no_descriptor = {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("src/Main.java", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"class Main {}").unwrap();
        writer.finish().unwrap().into_inner()
    };
    let cases = [
        Case {
            name: "missing descriptor",
            archive: no_descriptor,
        },
        Case {
            name: "timeout",
            archive: project(&[("sleep", "30".to_string())]),
        },
    ];

    let mut h = Harness::new(|_| {}).await;
    let assessment = h
        .assessment(NewAssessment {
            timeout_secs: Some(1),
            ..NewAssessment::default()
        })
        .await;

    for case in cases {
        let attempt = h.submit(&assessment, 1, case.archive).await;
        h.settle().await;

        assert_eq!(
            h.status(attempt.submission_id).await,
            Some(SubmissionStatus::Aborted),
            "{}",
            case.name
        );
        assert!(!h.attempt(attempt.id).await.is_marked(), "{}", case.name);
        let events = h.drain_events();
        assert_eq!(
            statuses_of(&events, attempt.submission_id).last(),
            Some(&SubmissionStatus::Aborted),
            "{}",
            case.name
        );
    }
    h.finish().await;
}

#[tokio::test]
async fn missing_settings_file_aborts_before_spawning() {
    let h = Harness::new(|config| config.build.settings_file = None).await;
    let assessment = h.assessment(NewAssessment::default()).await;

    let attempt = h.submit(&assessment, 1, project(&[])).await;
    h.settle().await;

    assert_eq!(h.status(attempt.submission_id).await, Some(SubmissionStatus::Aborted));
    assert!(h.store.artifacts(attempt.submission_id).await.unwrap().is_empty());
    assert!(!h.attempt(attempt.id).await.is_marked());
    h.finish().await;
}

#[tokio::test]
async fn model_solution_defines_rubric_and_overrides() {
    let h = Harness::new(|_| {}).await;
    let assessment = h
        .assessment(NewAssessment {
            overrides: vec![FileOverride {
                path: "project/reports/TEST-ClassX.xml".into(),
            }],
            ..NewAssessment::default()
        })
        .await;

    let model = h
        .pipeline
        .submit_model_solution(
            assessment.id,
            upload(project(&[(
                "reports/TEST-ClassX.xml",
                report("ClassX", &[("testA", "pass"), ("testB", "fail")]),
            )])),
        )
        .await
        .unwrap();
    assert_eq!(model.version, 1);
    h.settle().await;

    let rubric = h.store.rubric(assessment.id).await.unwrap();
    let mut keys: Vec<_> = rubric.iter().map(|r| r.key.to_string()).collect();
    keys.sort();
    assert_eq!(keys, vec!["ClassX#testA", "ClassX#testB"]);
    assert!(rubric.iter().all(|r| r.points == Points::zero()));

    let weights: Vec<_> = rubric
        .iter()
        .map(|r| {
            let points = if r.key.name == "testA" { "10.00" } else { "5.00" };
            (r.id, p(points))
        })
        .collect();
    h.pipeline
        .update_rubric_points(assessment.id, &weights)
        .await
        .unwrap();

    // The student's copy claims both tests pass; the model solution's copy wins.
    let attempt = h
        .submit(
            &assessment,
            1,
            project(&[(
                "reports/TEST-ClassX.xml",
                report("ClassX", &[("testA", "pass"), ("testB", "pass")]),
            )]),
        )
        .await;
    h.settle().await;

    let marked = h.attempt(attempt.id).await;
    assert_eq!(marked.points, Some(p("10.00")));
    assert_eq!(marked.model_solution_version, Some(1));

    let test_a = rubric.iter().find(|r| r.key.name == "testA").unwrap();
    h.pipeline
        .update_rubric_points(assessment.id, &[(test_a.id, p("7.25"))])
        .await
        .unwrap();
    h.settle().await;
    assert_eq!(h.attempt(attempt.id).await.points, Some(p("7.25")));
    h.finish().await;
}

#[tokio::test]
async fn invalid_rubric_update_changes_nothing() {
    let h = Harness::new(|_| {}).await;
    let assessment = h.assessment(NewAssessment::default()).await;
    h.rubric(&assessment, &[("ClassX", "testA", "1.00"), ("ClassX", "testB", "1.00")])
        .await;
    let rubric = h.store.rubric(assessment.id).await.unwrap();

    let err = h
        .pipeline
        .update_rubric_points(
            assessment.id,
            &[(rubric[0].id, p("3.00")), (rubric[1].id, p("10000.00"))],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Store(_)));

    let unchanged = h.store.rubric(assessment.id).await.unwrap();
    assert!(unchanged.iter().all(|r| r.points == p("1.00")));
    h.finish().await;
}

#[tokio::test]
async fn outdated_attempts_are_rerun_against_new_model_solution() {
    let h = Harness::new(|_| {}).await;
    let assessment = h.assessment(NewAssessment::default()).await;
    let reports = || {
        project(&[(
            "reports/TEST-ClassX.xml",
            report("ClassX", &[("testA", "pass")]),
        )])
    };

    let first = h.submit(&assessment, 1, reports()).await;
    h.settle().await;
    assert_eq!(h.attempt(first.id).await.model_solution_version, None);

    h.pipeline
        .submit_model_solution(assessment.id, upload(reports()))
        .await
        .unwrap();
    h.settle().await;

    let rerun = h.pipeline.rerun_outdated(assessment.id).await.unwrap();
    assert_eq!(rerun.len(), 1);
    assert_eq!(rerun[0].attempt, 2);
    h.settle().await;

    assert_eq!(h.attempt(rerun[0].id).await.model_solution_version, Some(1));
    assert!(h.pipeline.rerun_outdated(assessment.id).await.unwrap().is_empty());
    h.finish().await;
}

#[tokio::test]
async fn retention_prunes_history_on_submit() {
    let mut h = Harness::new(|config| config.retention.keep_latest = 1).await;
    let assessment = h.assessment(NewAssessment::default()).await;
    h.rubric(&assessment, &[("ClassX", "testA", "10.00"), ("ClassX", "testB", "5.00")])
        .await;

    let scored = |a: &str, b: &str| {
        project(&[(
            "reports/TEST-ClassX.xml",
            report("ClassX", &[("testA", a), ("testB", b)]),
        )])
    };

    let best = h.submit(&assessment, 1, scored("pass", "pass")).await;
    h.settle().await;
    let worst = h.submit(&assessment, 1, scored("fail", "fail")).await;
    h.settle().await;
    let latest = h.submit(&assessment, 1, scored("fail", "pass")).await;
    h.settle().await;

    let history = h.store.attempts(assessment.id, StudentId(1)).await.unwrap();
    let numbers: Vec<_> = history.iter().map(|a| a.attempt).collect();
    assert_eq!(numbers, vec![3, 1]);
    assert_eq!(history[0].id, latest.id);
    assert_eq!(history[0].points, Some(p("5.00")));
    assert_eq!(history[1].id, best.id);

    assert!(h.store.submission(worst.submission_id).await.unwrap().is_none());
    let events = h.drain_events();
    assert_eq!(
        statuses_of(&events, worst.submission_id).last(),
        Some(&SubmissionStatus::Aborted)
    );

    // Nothing more to prune.
    assert!(h
        .pipeline
        .apply_retention_for_assessment(assessment.id)
        .await
        .unwrap()
        .is_empty());
    h.finish().await;
}

#[tokio::test]
async fn reruns_continue_attempt_numbering() {
    let h = Harness::new(|_| {}).await;
    let assessment = h.assessment(NewAssessment::default()).await;

    let first = h.submit(&assessment, 7, project(&[])).await;
    let second = h.pipeline.rerun_attempt(first.id).await.unwrap();
    let third = h.pipeline.rerun_attempt(second.id).await.unwrap();
    let other = h.submit(&assessment, 8, project(&[])).await;
    h.settle().await;

    assert_eq!((first.attempt, second.attempt, third.attempt), (1, 2, 3));
    assert_eq!(other.attempt, 1);
    let numbers: Vec<_> = h
        .store
        .attempts(assessment.id, StudentId(7))
        .await
        .unwrap()
        .iter()
        .map(|a| a.attempt)
        .collect();
    assert_eq!(numbers, vec![3, 2, 1]);

    // Reruns share the original archive; deleting one attempt keeps it for the others.
    h.pipeline.delete_attempt(first.id).await.unwrap();
    let fourth = h.pipeline.rerun_attempt(third.id).await.unwrap();
    h.settle().await;
    assert_eq!(fourth.attempt, 4);
    assert_eq!(h.status(fourth.submission_id).await, Some(SubmissionStatus::Completed));
    h.finish().await;
}

#[tokio::test]
async fn large_artifacts_are_compressed_transparently() {
    let h = Harness::new(|config| config.storage.compress_threshold = 8).await;
    let assessment = h.assessment(NewAssessment::default()).await;

    let attempt = h.submit(&assessment, 1, project(&[])).await;
    h.settle().await;

    let artifacts = h.store.artifacts(attempt.submission_id).await.unwrap();
    let stdout = artifacts.iter().find(|a| a.source == ArtifactSource::Stdout).unwrap();
    assert!(stdout.compressed);
    assert_eq!(stdout.mime_type, "text/plain");

    let (_, content) = h.pipeline.read_artifact(stdout.id).await.unwrap();
    assert_eq!(content, b"[INFO] Building\n");
    h.finish().await;
}

#[tokio::test]
async fn rejects_bad_uploads() {
    let h = Harness::new(|_| {}).await;
    let assessment = h.assessment(NewAssessment::default()).await;

    let err = h
        .pipeline
        .submit_attempt(assessment.id, StudentId(1), upload(b"not a zip".to_vec()))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Archive(_)));

    let err = h
        .pipeline
        .submit_attempt(common::entity::AssessmentId(999), StudentId(1), upload(project(&[])))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotFound { entity: "assessment", .. }));
    assert!(h.store.attempts(assessment.id, StudentId(1)).await.unwrap().is_empty());
    h.finish().await;
}

#[tokio::test]
async fn reports_shipped_in_the_archive_earn_nothing() {
    let h = Harness::new(|_| {}).await;
    let assessment = h.assessment(NewAssessment::default()).await;
    h.rubric(&assessment, &[("ClassX", "testA", "10.00")]).await;

    // No `reports/` directory, so the build itself produces no test results.
    let attempt = h
        .submit(
            &assessment,
            1,
            project(&[
                (
                    "target/surefire-reports/TEST-ClassX.xml",
                    report("ClassX", &[("testA", "pass")]),
                ),
                ("target/pit-reports/index.html", "<html>100%</html>".to_string()),
            ]),
        )
        .await;
    h.settle().await;

    let marked = h.attempt(attempt.id).await;
    assert_eq!(marked.points, Some(p("0.00")));
    assert_eq!(marked.counts.passed, 0);
    assert_eq!(marked.counts.missing, 1);

    let artifacts = h.store.artifacts(attempt.submission_id).await.unwrap();
    assert!(artifacts.iter().all(|a| a.source != ArtifactSource::Junit));
    assert!(artifacts.iter().all(|a| a.source != ArtifactSource::Mutation));
    h.finish().await;
}
