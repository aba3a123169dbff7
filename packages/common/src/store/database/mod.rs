//! [`Store`] persisted through sea-orm.

mod entity;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use tracing::{debug, info};

use self::entity::{
    assessment, assessment_attempt, model_solution, model_solution_counter, result_artifact,
    rubric_entry, signed, submission,
};
use super::error::StoreError;
use super::traits::{Reclaimed, RubricSync, Store};
use crate::entity::{
    ArtifactId, Assessment, AssessmentAttempt, AssessmentId, AttemptCounts, AttemptId,
    ModelSolution, ModelSolutionId, NewAssessment, NewAttempt, NewResultArtifact, NewRubricEntry,
    NewSubmission, ResultArtifact, RubricEntry, RubricEntryId, RubricKey, StudentId, Submission,
    SubmissionId,
};
use crate::storage::BlobKey;
use crate::{Points, SubmissionStatus};

/// Tries before giving up on a number taken by a concurrent writer.
const NUMBERING_RETRIES: usize = 5;

impl From<DbErr> for StoreError {
    fn from(e: DbErr) -> Self {
        StoreError::Database(e.to_string())
    }
}

fn is_unique_violation(e: &DbErr) -> bool {
    matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn convert<M, T>(rows: Vec<M>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<M, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

async fn require_assessment<C: ConnectionTrait>(
    conn: &C,
    id: AssessmentId,
) -> Result<assessment::Model, StoreError> {
    assessment::Entity::find_by_id(id.0)
        .one(conn)
        .await?
        .ok_or_else(|| StoreError::not_found("assessment", id))
}

async fn require_submission<C: ConnectionTrait>(
    conn: &C,
    id: SubmissionId,
) -> Result<submission::Model, StoreError> {
    submission::Entity::find_by_id(id.0)
        .one(conn)
        .await?
        .ok_or_else(|| StoreError::not_found("submission", id))
}

async fn require_attempt<C: ConnectionTrait>(
    conn: &C,
    id: AttemptId,
) -> Result<assessment_attempt::Model, StoreError> {
    assessment_attempt::Entity::find_by_id(id.0)
        .one(conn)
        .await?
        .ok_or_else(|| StoreError::not_found("attempt", id))
}

async fn is_owned<C: ConnectionTrait>(conn: &C, id: SubmissionId) -> Result<bool, StoreError> {
    let attempts = assessment_attempt::Entity::find()
        .filter(assessment_attempt::Column::SubmissionId.eq(id.0))
        .count(conn)
        .await?;
    let model_solutions = model_solution::Entity::find()
        .filter(model_solution::Column::SubmissionId.eq(id.0))
        .count(conn)
        .await?;
    Ok(attempts + model_solutions > 0)
}

async fn take_artifacts<C: ConnectionTrait>(
    conn: &C,
    submission_id: SubmissionId,
) -> Result<Vec<BlobKey>, StoreError> {
    let rows = result_artifact::Entity::find()
        .filter(result_artifact::Column::SubmissionId.eq(submission_id.0))
        .all(conn)
        .await?;
    result_artifact::Entity::delete_many()
        .filter(result_artifact::Column::SubmissionId.eq(submission_id.0))
        .exec(conn)
        .await?;
    rows.into_iter()
        .map(|row| entity::blob_key(row.blob))
        .collect()
}

/// Remove a submission with its artifacts. The archive blob is reclaimed
/// only when no other submission (a rerun) still points at it.
async fn remove_submission<C: ConnectionTrait>(
    conn: &C,
    id: SubmissionId,
) -> Result<Reclaimed, StoreError> {
    let mut reclaimed = Reclaimed {
        submissions: Vec::new(),
        blobs: take_artifacts(conn, id).await?,
    };
    let Some(row) = submission::Entity::find_by_id(id.0).one(conn).await? else {
        return Ok(reclaimed);
    };
    submission::Entity::delete_by_id(id.0).exec(conn).await?;

    let sharing = submission::Entity::find()
        .filter(submission::Column::Archive.eq(row.archive.clone()))
        .count(conn)
        .await?;
    if sharing == 0 {
        reclaimed.blobs.push(entity::blob_key(row.archive)?);
    }
    reclaimed.submissions.push(id);
    Ok(reclaimed)
}

fn validate_points(points: &Points) -> Result<(), StoreError> {
    points
        .validate_rubric_range()
        .map_err(|e| StoreError::Validation(e.to_string()))
}

/// [`Store`] over any database sea-orm connects to. Tables are created or
/// migrated on [`connect`](Self::connect).
pub struct DatabaseStore {
    db: DatabaseConnection,
}

impl DatabaseStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let mut opt = ConnectOptions::new(url.to_owned());
        opt.connect_timeout(Duration::from_secs(8))
            .acquire_timeout(Duration::from_secs(8))
            .sqlx_logging(false);

        let db = Database::connect(opt).await?;
        db.get_schema_registry("common::store::database::entity::*")
            .sync(&db)
            .await?;
        info!("Database schema synchronized");
        Ok(Self { db })
    }

    /// One numbering round. `None` when a concurrent writer took the number.
    async fn try_create_attempt(
        &self,
        new: &NewAttempt,
    ) -> Result<Option<AssessmentAttempt>, StoreError> {
        let txn = self.db.begin().await?;
        require_assessment(&txn, new.assessment_id).await?;
        require_submission(&txn, new.submission_id).await?;
        if is_owned(&txn, new.submission_id).await? {
            return Err(StoreError::Conflict(format!(
                "submission {} already has an owner",
                new.submission_id
            )));
        }

        let last = assessment_attempt::Entity::find()
            .filter(assessment_attempt::Column::AssessmentId.eq(new.assessment_id.0))
            .filter(assessment_attempt::Column::StudentId.eq(new.student_id.0))
            .order_by_desc(assessment_attempt::Column::Attempt)
            .one(&txn)
            .await?;
        let number = last.map_or(0, |row| row.attempt) + 1;

        let inserted = assessment_attempt::ActiveModel {
            assessment_id: Set(new.assessment_id.0),
            student_id: Set(new.student_id.0),
            attempt: Set(number),
            submission_id: Set(new.submission_id.0),
            points: Set(None),
            passed: Set(0),
            failed: Set(0),
            errored: Set(0),
            skipped: Set(0),
            missing: Set(0),
            model_solution_version: Set(None),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await;
        let row = match inserted {
            Ok(row) => row,
            Err(e) if is_unique_violation(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        txn.commit().await?;
        AssessmentAttempt::try_from(row).map(Some)
    }

    async fn try_create_model_solution(
        &self,
        assessment_id: AssessmentId,
        submission_id: SubmissionId,
    ) -> Result<Option<ModelSolution>, StoreError> {
        let txn = self.db.begin().await?;
        require_assessment(&txn, assessment_id).await?;
        require_submission(&txn, submission_id).await?;
        if is_owned(&txn, submission_id).await? {
            return Err(StoreError::Conflict(format!(
                "submission {submission_id} already has an owner"
            )));
        }

        let counter = model_solution_counter::Entity::find_by_id(assessment_id.0)
            .one(&txn)
            .await?;
        let version = counter.as_ref().map_or(0, |c| c.latest) + 1;
        let bumped = match counter {
            Some(counter) => {
                let mut active: model_solution_counter::ActiveModel = counter.into();
                active.latest = Set(version);
                active.update(&txn).await.map(|_| ())
            }
            None => model_solution_counter::ActiveModel {
                assessment_id: Set(assessment_id.0),
                latest: Set(version),
            }
            .insert(&txn)
            .await
            .map(|_| ()),
        };

        let inserted = match bumped {
            Ok(()) => {
                model_solution::ActiveModel {
                    assessment_id: Set(assessment_id.0),
                    version: Set(version),
                    submission_id: Set(submission_id.0),
                    ..Default::default()
                }
                .insert(&txn)
                .await
            }
            Err(e) => Err(e),
        };
        let row = match inserted {
            Ok(row) => row,
            Err(e) if is_unique_violation(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        txn.commit().await?;
        ModelSolution::try_from(row).map(Some)
    }
}

#[async_trait]
impl Store for DatabaseStore {
    async fn create_assessment(&self, new: NewAssessment) -> Result<Assessment, StoreError> {
        let overrides = serde_json::to_string(&new.overrides)
            .map_err(|e| StoreError::Validation(e.to_string()))?;
        let timeout_secs = new
            .timeout_secs
            .map(i64::try_from)
            .transpose()
            .map_err(|_| StoreError::Validation("timeout_secs is too large".into()))?;

        assessment::ActiveModel {
            name: Set(new.name),
            due_by: Set(new.due_by),
            overrides: Set(overrides),
            timeout_secs: Set(timeout_secs),
            ..Default::default()
        }
        .insert(&self.db)
        .await?
        .try_into()
    }

    async fn assessment(&self, id: AssessmentId) -> Result<Option<Assessment>, StoreError> {
        assessment::Entity::find_by_id(id.0)
            .one(&self.db)
            .await?
            .map(Assessment::try_from)
            .transpose()
    }

    async fn create_submission(&self, new: NewSubmission) -> Result<Submission, StoreError> {
        submission::ActiveModel {
            archive: Set(new.archive.into()),
            author_id: Set(new.author_id.0),
            submitter_id: Set(new.submitter_id.0),
            status: Set(SubmissionStatus::Pending),
            exit_code: Set(None),
            checksum: Set(None),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.db)
        .await?
        .try_into()
    }

    async fn submission(&self, id: SubmissionId) -> Result<Option<Submission>, StoreError> {
        submission::Entity::find_by_id(id.0)
            .one(&self.db)
            .await?
            .map(Submission::try_from)
            .transpose()
    }

    async fn set_submission_status(
        &self,
        id: SubmissionId,
        status: SubmissionStatus,
        exit_code: Option<i32>,
    ) -> Result<Submission, StoreError> {
        let txn = self.db.begin().await?;
        let mut active: submission::ActiveModel = require_submission(&txn, id).await?.into();
        active.status = Set(status);
        active.exit_code = Set(exit_code);
        let row = active.update(&txn).await?;
        txn.commit().await?;
        row.try_into()
    }

    async fn set_submission_checksum(
        &self,
        id: SubmissionId,
        checksum: String,
    ) -> Result<Submission, StoreError> {
        let txn = self.db.begin().await?;
        let mut active: submission::ActiveModel = require_submission(&txn, id).await?.into();
        active.checksum = Set(Some(checksum));
        let row = active.update(&txn).await?;
        txn.commit().await?;
        row.try_into()
    }

    async fn delete_submission(&self, id: SubmissionId) -> Result<Reclaimed, StoreError> {
        let txn = self.db.begin().await?;
        require_submission(&txn, id).await?;
        if is_owned(&txn, id).await? {
            return Err(StoreError::Protected(id));
        }
        let reclaimed = remove_submission(&txn, id).await?;
        txn.commit().await?;
        Ok(reclaimed)
    }

    async fn add_artifacts(
        &self,
        submission_id: SubmissionId,
        artifacts: Vec<NewResultArtifact>,
    ) -> Result<Vec<ResultArtifact>, StoreError> {
        let txn = self.db.begin().await?;
        require_submission(&txn, submission_id).await?;

        let mut created = Vec::with_capacity(artifacts.len());
        for new in artifacts {
            let size = i64::try_from(new.size)
                .map_err(|_| StoreError::Validation(format!("artifact {} is too large", new.path)))?;
            let row = result_artifact::ActiveModel {
                submission_id: Set(submission_id.0),
                source: Set(new.source),
                path: Set(new.path),
                compressed: Set(new.compressed),
                mime_type: Set(new.mime_type),
                blob: Set(new.blob.into()),
                size: Set(size),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            created.push(ResultArtifact::try_from(row)?);
        }
        txn.commit().await?;
        Ok(created)
    }

    async fn artifacts(&self, submission_id: SubmissionId) -> Result<Vec<ResultArtifact>, StoreError> {
        let rows = result_artifact::Entity::find()
            .filter(result_artifact::Column::SubmissionId.eq(submission_id.0))
            .order_by_asc(result_artifact::Column::Id)
            .all(&self.db)
            .await?;
        convert(rows)
    }

    async fn artifact(&self, id: ArtifactId) -> Result<Option<ResultArtifact>, StoreError> {
        result_artifact::Entity::find_by_id(id.0)
            .one(&self.db)
            .await?
            .map(ResultArtifact::try_from)
            .transpose()
    }

    async fn clear_artifacts(&self, submission_id: SubmissionId) -> Result<Vec<BlobKey>, StoreError> {
        let txn = self.db.begin().await?;
        let blobs = take_artifacts(&txn, submission_id).await?;
        txn.commit().await?;
        Ok(blobs)
    }

    async fn rubric(&self, assessment_id: AssessmentId) -> Result<Vec<RubricEntry>, StoreError> {
        let rows = rubric_entry::Entity::find()
            .filter(rubric_entry::Column::AssessmentId.eq(assessment_id.0))
            .order_by_asc(rubric_entry::Column::Id)
            .all(&self.db)
            .await?;
        convert(rows)
    }

    async fn add_rubric_entry(
        &self,
        assessment_id: AssessmentId,
        new: NewRubricEntry,
    ) -> Result<RubricEntry, StoreError> {
        validate_points(&new.points)?;
        let txn = self.db.begin().await?;
        require_assessment(&txn, assessment_id).await?;

        let inserted = rubric_entry::ActiveModel {
            assessment_id: Set(assessment_id.0),
            class_name: Set(new.key.class_name.clone()),
            name: Set(new.key.name.clone()),
            points: Set(new.points.to_string()),
            feedback: Set(new.feedback),
            task: Set(new.task),
            ..Default::default()
        }
        .insert(&txn)
        .await;
        let row = match inserted {
            Ok(row) => row,
            Err(e) if is_unique_violation(&e) => {
                return Err(StoreError::Conflict(format!(
                    "rubric entry {} already exists",
                    new.key
                )));
            }
            Err(e) => return Err(e.into()),
        };
        txn.commit().await?;
        row.try_into()
    }

    async fn sync_rubric(
        &self,
        assessment_id: AssessmentId,
        keys: &[RubricKey],
    ) -> Result<RubricSync, StoreError> {
        let txn = self.db.begin().await?;
        require_assessment(&txn, assessment_id).await?;

        let existing = rubric_entry::Entity::find()
            .filter(rubric_entry::Column::AssessmentId.eq(assessment_id.0))
            .order_by_asc(rubric_entry::Column::Id)
            .all(&txn)
            .await?;

        let mut sync = RubricSync::default();
        let mut present = HashSet::new();
        let mut stale = Vec::new();
        for row in existing {
            let key = RubricKey::new(row.class_name, row.name);
            if keys.contains(&key) {
                present.insert(key);
            } else {
                stale.push(row.id);
                sync.removed.push(key);
            }
        }
        if !stale.is_empty() {
            rubric_entry::Entity::delete_many()
                .filter(rubric_entry::Column::Id.is_in(stale))
                .exec(&txn)
                .await?;
        }

        for key in keys {
            if !present.insert(key.clone()) {
                continue;
            }
            let new = NewRubricEntry::unweighted(key.clone());
            rubric_entry::ActiveModel {
                assessment_id: Set(assessment_id.0),
                class_name: Set(new.key.class_name),
                name: Set(new.key.name),
                points: Set(new.points.to_string()),
                feedback: Set(new.feedback),
                task: Set(new.task),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            sync.added.push(key.clone());
        }

        txn.commit().await?;
        if !sync.is_unchanged() {
            debug!(%assessment_id, added = sync.added.len(), removed = sync.removed.len(), "Rubric synchronized");
        }
        Ok(sync)
    }

    async fn update_rubric_points(
        &self,
        assessment_id: AssessmentId,
        updates: &[(RubricEntryId, Points)],
    ) -> Result<Vec<RubricEntry>, StoreError> {
        let txn = self.db.begin().await?;
        require_assessment(&txn, assessment_id).await?;

        let mut rows = Vec::with_capacity(updates.len());
        for (id, points) in updates {
            let row = rubric_entry::Entity::find_by_id(id.0).one(&txn).await?;
            match row {
                Some(row) if row.assessment_id == assessment_id.0 => rows.push(row),
                Some(_) => {
                    return Err(StoreError::Validation(format!(
                        "rubric entry {id} does not belong to assessment {assessment_id}"
                    )));
                }
                None => {
                    return Err(StoreError::Validation(format!(
                        "rubric entry {id} does not exist"
                    )));
                }
            }
            validate_points(points)?;
        }

        let mut updated = Vec::with_capacity(rows.len());
        for (row, (_, points)) in rows.into_iter().zip(updates) {
            let mut active: rubric_entry::ActiveModel = row.into();
            active.points = Set(points.to_string());
            updated.push(RubricEntry::try_from(active.update(&txn).await?)?);
        }
        txn.commit().await?;
        Ok(updated)
    }

    async fn create_attempt(&self, new: NewAttempt) -> Result<AssessmentAttempt, StoreError> {
        for _ in 0..NUMBERING_RETRIES {
            if let Some(attempt) = self.try_create_attempt(&new).await? {
                return Ok(attempt);
            }
            debug!(student_id = %new.student_id, "Attempt number taken concurrently, retrying");
        }
        Err(StoreError::Conflict(format!(
            "could not number attempt of student {} for assessment {}",
            new.student_id, new.assessment_id
        )))
    }

    async fn attempt(&self, id: AttemptId) -> Result<Option<AssessmentAttempt>, StoreError> {
        assessment_attempt::Entity::find_by_id(id.0)
            .one(&self.db)
            .await?
            .map(AssessmentAttempt::try_from)
            .transpose()
    }

    async fn attempt_for_submission(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Option<AssessmentAttempt>, StoreError> {
        assessment_attempt::Entity::find()
            .filter(assessment_attempt::Column::SubmissionId.eq(submission_id.0))
            .one(&self.db)
            .await?
            .map(AssessmentAttempt::try_from)
            .transpose()
    }

    async fn attempts(
        &self,
        assessment_id: AssessmentId,
        student_id: StudentId,
    ) -> Result<Vec<AssessmentAttempt>, StoreError> {
        let rows = assessment_attempt::Entity::find()
            .filter(assessment_attempt::Column::AssessmentId.eq(assessment_id.0))
            .filter(assessment_attempt::Column::StudentId.eq(student_id.0))
            .order_by_desc(assessment_attempt::Column::Attempt)
            .all(&self.db)
            .await?;
        convert(rows)
    }

    async fn assessment_attempts(
        &self,
        assessment_id: AssessmentId,
    ) -> Result<Vec<AssessmentAttempt>, StoreError> {
        let rows = assessment_attempt::Entity::find()
            .filter(assessment_attempt::Column::AssessmentId.eq(assessment_id.0))
            .order_by_asc(assessment_attempt::Column::Id)
            .all(&self.db)
            .await?;
        convert(rows)
    }

    async fn record_marks(
        &self,
        attempt_id: AttemptId,
        points: Points,
        counts: AttemptCounts,
    ) -> Result<AssessmentAttempt, StoreError> {
        let txn = self.db.begin().await?;
        let mut active: assessment_attempt::ActiveModel =
            require_attempt(&txn, attempt_id).await?.into();
        active.points = Set(Some(points.to_string()));
        active.passed = Set(signed(counts.passed, "passed")?);
        active.failed = Set(signed(counts.failed, "failed")?);
        active.errored = Set(signed(counts.errored, "errored")?);
        active.skipped = Set(signed(counts.skipped, "skipped")?);
        active.missing = Set(signed(counts.missing, "missing")?);
        let row = active.update(&txn).await?;
        txn.commit().await?;
        row.try_into()
    }

    async fn record_model_solution_version(
        &self,
        attempt_id: AttemptId,
        version: Option<u32>,
    ) -> Result<AssessmentAttempt, StoreError> {
        let version = version
            .map(|v| signed(v, "model_solution_version"))
            .transpose()?;
        let txn = self.db.begin().await?;
        let mut active: assessment_attempt::ActiveModel =
            require_attempt(&txn, attempt_id).await?.into();
        active.model_solution_version = Set(version);
        let row = active.update(&txn).await?;
        txn.commit().await?;
        row.try_into()
    }

    async fn delete_attempt(&self, id: AttemptId) -> Result<Reclaimed, StoreError> {
        let txn = self.db.begin().await?;
        let row = require_attempt(&txn, id).await?;
        assessment_attempt::Entity::delete_by_id(row.id)
            .exec(&txn)
            .await?;
        let reclaimed = remove_submission(&txn, SubmissionId(row.submission_id)).await?;
        txn.commit().await?;
        Ok(reclaimed)
    }

    async fn create_model_solution(
        &self,
        assessment_id: AssessmentId,
        submission_id: SubmissionId,
    ) -> Result<ModelSolution, StoreError> {
        for _ in 0..NUMBERING_RETRIES {
            if let Some(solution) = self
                .try_create_model_solution(assessment_id, submission_id)
                .await?
            {
                return Ok(solution);
            }
            debug!(%assessment_id, "Model solution version taken concurrently, retrying");
        }
        Err(StoreError::Conflict(format!(
            "could not version model solution for assessment {assessment_id}"
        )))
    }

    async fn model_solution(&self, id: ModelSolutionId) -> Result<Option<ModelSolution>, StoreError> {
        model_solution::Entity::find_by_id(id.0)
            .one(&self.db)
            .await?
            .map(ModelSolution::try_from)
            .transpose()
    }

    async fn model_solution_for_submission(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Option<ModelSolution>, StoreError> {
        model_solution::Entity::find()
            .filter(model_solution::Column::SubmissionId.eq(submission_id.0))
            .one(&self.db)
            .await?
            .map(ModelSolution::try_from)
            .transpose()
    }

    async fn latest_model_solution(
        &self,
        assessment_id: AssessmentId,
    ) -> Result<Option<ModelSolution>, StoreError> {
        model_solution::Entity::find()
            .filter(model_solution::Column::AssessmentId.eq(assessment_id.0))
            .order_by_desc(model_solution::Column::Version)
            .one(&self.db)
            .await?
            .map(ModelSolution::try_from)
            .transpose()
    }

    async fn delete_model_solution(&self, id: ModelSolutionId) -> Result<Reclaimed, StoreError> {
        let txn = self.db.begin().await?;
        let row = model_solution::Entity::find_by_id(id.0)
            .one(&txn)
            .await?
            .ok_or_else(|| StoreError::not_found("model solution", id))?;
        model_solution::Entity::delete_by_id(row.id).exec(&txn).await?;
        let reclaimed = remove_submission(&txn, SubmissionId(row.submission_id)).await?;
        txn.commit().await?;
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ArtifactSource, FileOverride, UserId};

    struct TestDb {
        _dir: tempfile::TempDir,
        store: DatabaseStore,
    }

    async fn open(dir: tempfile::TempDir) -> TestDb {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("store.db").display());
        let store = DatabaseStore::connect(&url).await.unwrap();
        TestDb { _dir: dir, store }
    }

    async fn test_db() -> TestDb {
        open(tempfile::tempdir().unwrap()).await
    }

    fn key(s: &str) -> BlobKey {
        BlobKey::new(s).unwrap()
    }

    async fn assessment(store: &DatabaseStore) -> Assessment {
        store
            .create_assessment(NewAssessment {
                name: "Lab 1".into(),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    async fn submission(store: &DatabaseStore, archive: &str) -> Submission {
        store
            .create_submission(NewSubmission::new(key(archive), UserId(1), UserId(2)))
            .await
            .unwrap()
    }

    async fn attempt(store: &DatabaseStore, a: &Assessment, student: i64, archive: &str) -> AssessmentAttempt {
        let s = submission(store, archive).await;
        store
            .create_attempt(NewAttempt {
                assessment_id: a.id,
                student_id: StudentId(student),
                submission_id: s.id,
            })
            .await
            .unwrap()
    }

    fn artifact(blob: &str) -> NewResultArtifact {
        NewResultArtifact {
            source: ArtifactSource::Junit,
            path: "target/surefire-reports/TEST-ClassX.xml".into(),
            compressed: true,
            mime_type: "application/xml".into(),
            blob: key(blob),
            size: 42,
        }
    }

    #[tokio::test]
    async fn records_survive_reconnect() {
        let db = test_db().await;
        let created = db
            .store
            .create_assessment(NewAssessment {
                name: "Lab 2".into(),
                due_by: None,
                overrides: vec![FileOverride {
                    path: "project/src/test/java/GradingTest.java".into(),
                }],
                timeout_secs: Some(90),
            })
            .await
            .unwrap();
        let a = attempt(&db.store, &created, 1, "s/1.zip").await;
        db.store
            .set_submission_status(a.submission_id, SubmissionStatus::Failed, Some(1))
            .await
            .unwrap();
        db.store
            .record_marks(
                a.id,
                "7.50".parse().unwrap(),
                AttemptCounts {
                    passed: 3,
                    failed: 1,
                    errored: 0,
                    skipped: 2,
                    missing: 1,
                },
            )
            .await
            .unwrap();

        let TestDb { _dir: dir, store } = db;
        drop(store);
        let db = open(dir).await;

        assert_eq!(db.store.assessment(created.id).await.unwrap(), Some(created));
        let reloaded = db.store.attempt(a.id).await.unwrap().unwrap();
        assert_eq!(reloaded.points.unwrap().to_string(), "7.50");
        assert_eq!(reloaded.counts.skipped, 2);
        assert_eq!(reloaded.counts.missing, 1);

        let submission = db.store.submission(a.submission_id).await.unwrap().unwrap();
        assert_eq!(submission.status, SubmissionStatus::Failed);
        assert_eq!(submission.exit_code, Some(1));
        assert_eq!(submission.author_id, UserId(1));
        assert_eq!(submission.submitter_id, UserId(2));
    }

    #[tokio::test]
    async fn owned_submission_is_protected() {
        let db = test_db().await;
        let a = assessment(&db.store).await;
        let owned = attempt(&db.store, &a, 1, "s/1.zip").await;

        assert!(matches!(
            db.store.delete_submission(owned.submission_id).await,
            Err(StoreError::Protected(_))
        ));
        assert!(db.store.submission(owned.submission_id).await.unwrap().is_some());

        let err = db
            .store
            .create_model_solution(a.id, owned.submission_id)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn attempt_delete_cascades() {
        let db = test_db().await;
        let a = assessment(&db.store).await;
        let owned = attempt(&db.store, &a, 1, "s/1.zip").await;
        let stored = db
            .store
            .add_artifacts(owned.submission_id, vec![artifact("art/1"), artifact("art/2")])
            .await
            .unwrap();
        assert_eq!(stored[0].source, ArtifactSource::Junit);
        assert_eq!(stored[0].size, 42);
        assert!(stored[0].compressed);

        let reclaimed = db.store.delete_attempt(owned.id).await.unwrap();
        assert_eq!(reclaimed.submissions, vec![owned.submission_id]);
        assert_eq!(reclaimed.blobs.len(), 3);
        assert!(reclaimed.blobs.contains(&key("s/1.zip")));
        assert!(db.store.submission(owned.submission_id).await.unwrap().is_none());
        assert!(db.store.artifacts(owned.submission_id).await.unwrap().is_empty());
        assert!(db.store.delete_attempt(owned.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn shared_archive_survives_cascade() {
        let db = test_db().await;
        let first = submission(&db.store, "s/shared.zip").await;
        let _rerun = submission(&db.store, "s/shared.zip").await;

        let reclaimed = db.store.delete_submission(first.id).await.unwrap();
        assert_eq!(reclaimed.submissions, vec![first.id]);
        assert!(reclaimed.blobs.is_empty());
    }

    #[tokio::test]
    async fn artifacts_rejected_for_deleted_submission() {
        let db = test_db().await;
        let s = submission(&db.store, "s/1.zip").await;
        db.store.delete_submission(s.id).await.unwrap();

        let err = db
            .store
            .add_artifacts(s.id, vec![artifact("art/x")])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(db.store.clear_artifacts(s.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn attempts_are_numbered_per_student() {
        let db = test_db().await;
        let a = assessment(&db.store).await;
        for i in 0..3 {
            attempt(&db.store, &a, 7, &format!("s/{i}.zip")).await;
        }
        let other = attempt(&db.store, &a, 8, "s/other.zip").await;
        assert_eq!(other.attempt, 1);

        let history = db.store.attempts(a.id, StudentId(7)).await.unwrap();
        let numbers: Vec<u32> = history.iter().map(|a| a.attempt).collect();
        assert_eq!(numbers, vec![3, 2, 1]);
        assert_eq!(db.store.assessment_attempts(a.id).await.unwrap().len(), 4);

        let found = db
            .store
            .attempt_for_submission(history[0].submission_id)
            .await
            .unwrap();
        assert_eq!(found, Some(history[0].clone()));
    }

    #[tokio::test]
    async fn model_solution_versions_increase() {
        let db = test_db().await;
        let a = assessment(&db.store).await;

        let s1 = submission(&db.store, "m/1.zip").await;
        let v1 = db.store.create_model_solution(a.id, s1.id).await.unwrap();
        let s2 = submission(&db.store, "m/2.zip").await;
        let v2 = db.store.create_model_solution(a.id, s2.id).await.unwrap();
        assert_eq!((v1.version, v2.version), (1, 2));
        assert_eq!(db.store.latest_model_solution(a.id).await.unwrap(), Some(v2.clone()));
        assert_eq!(
            db.store.model_solution_for_submission(s1.id).await.unwrap(),
            Some(v1.clone())
        );

        let reclaimed = db.store.delete_model_solution(v2.id).await.unwrap();
        assert_eq!(reclaimed.blobs, vec![key("m/2.zip")]);
        assert_eq!(db.store.latest_model_solution(a.id).await.unwrap(), Some(v1));
        assert!(db.store.model_solution(v2.id).await.unwrap().is_none());

        let s3 = submission(&db.store, "m/3.zip").await;
        let v3 = db.store.create_model_solution(a.id, s3.id).await.unwrap();
        assert_eq!(v3.version, 3);
    }

    #[tokio::test]
    async fn rubric_sync_adds_and_removes() {
        let db = test_db().await;
        let a = assessment(&db.store).await;
        let kept = db
            .store
            .add_rubric_entry(
                a.id,
                NewRubricEntry {
                    key: RubricKey::new("ClassX", "testA"),
                    points: "10.00".parse().unwrap(),
                    feedback: "check {test}".into(),
                    task: Some("Task 1".into()),
                },
            )
            .await
            .unwrap();
        db.store
            .add_rubric_entry(a.id, NewRubricEntry::unweighted(RubricKey::new("ClassX", "gone")))
            .await
            .unwrap();
        let err = db
            .store
            .add_rubric_entry(a.id, NewRubricEntry::unweighted(RubricKey::new("ClassX", "gone")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let sync = db
            .store
            .sync_rubric(
                a.id,
                &[RubricKey::new("ClassX", "testA"), RubricKey::new("ClassX", "testB")],
            )
            .await
            .unwrap();
        assert_eq!(sync.added, vec![RubricKey::new("ClassX", "testB")]);
        assert_eq!(sync.removed, vec![RubricKey::new("ClassX", "gone")]);

        let rubric = db.store.rubric(a.id).await.unwrap();
        assert_eq!(rubric.len(), 2);
        assert!(rubric.contains(&kept));
        let added = rubric.iter().find(|r| r.key.name == "testB").unwrap();
        assert_eq!(added.points, Points::zero());
        assert!(db.store.sync_rubric(a.id, &[kept.key.clone(), added.key.clone()]).await.unwrap().is_unchanged());
    }

    #[tokio::test]
    async fn rubric_update_is_all_or_nothing() {
        let db = test_db().await;
        let a = assessment(&db.store).await;
        let other = assessment(&db.store).await;
        let mine = db
            .store
            .add_rubric_entry(a.id, NewRubricEntry::unweighted(RubricKey::new("C", "t1")))
            .await
            .unwrap();
        let foreign = db
            .store
            .add_rubric_entry(other.id, NewRubricEntry::unweighted(RubricKey::new("C", "t1")))
            .await
            .unwrap();

        let err = db
            .store
            .update_rubric_points(a.id, &[(mine.id, Points::from(5)), (foreign.id, Points::from(5))])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let err = db
            .store
            .update_rubric_points(a.id, &[(mine.id, "10000.00".parse().unwrap())])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(db.store.rubric(a.id).await.unwrap()[0].points, Points::zero());

        let updated = db
            .store
            .update_rubric_points(a.id, &[(mine.id, "2.25".parse().unwrap())])
            .await
            .unwrap();
        assert_eq!(updated[0].points.to_string(), "2.25");
        assert_eq!(db.store.rubric(a.id).await.unwrap()[0].points.to_string(), "2.25");
    }
}
