//! Durable evaluation workflow.
//!
//! Each job is driven through [`WorkflowState`] one step at a time. After
//! every transition the state is checkpointed, so a job delivered again after
//! a crash resumes from its last completed step instead of starting over.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::fetcher::PageFetcher;
use super::queue::{JobHandler, JobOutcome};
use super::renderer::PageRenderer;
use super::scorer::ContentScorer;
use super::{EvaluationError, backoff_delay};
use crate::domain::entities::{
    Checkpoint, EvaluationJob, EvaluationRecord, FetchedPage, RenderedPage, WorkflowState,
};
use crate::domain::job_queue::JobQueue;
use crate::domain::repositories::{CheckpointRepository, EvaluationRepository, LinkRepository};
use crate::infrastructure::Repositories;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Fetch attempts per run before the destination is declared dead.
    pub fetch_max_attempts: u32,
    pub fetch_backoff: Duration,
    pub render_timeout: Duration,
    /// Hard ceiling for one run; exceeding it forces `Failed`.
    pub job_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            fetch_max_attempts: 3,
            fetch_backoff: Duration::from_millis(500),
            render_timeout: Duration::from_secs(30),
            job_timeout: Duration::from_secs(120),
        }
    }
}

pub struct EvaluationEngine {
    fetcher: Arc<dyn PageFetcher>,
    renderer: Option<Arc<dyn PageRenderer>>,
    scorer: ContentScorer,
    links: Arc<dyn LinkRepository>,
    evaluations: Arc<dyn EvaluationRepository>,
    checkpoints: Arc<dyn CheckpointRepository>,
    settings: EngineSettings,
}

impl EvaluationEngine {
    /// `renderer = None` skips the render step entirely.
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        renderer: Option<Arc<dyn PageRenderer>>,
        scorer: ContentScorer,
        repositories: &Repositories,
        settings: EngineSettings,
    ) -> Self {
        Self {
            fetcher,
            renderer,
            scorer,
            links: repositories.links.clone(),
            evaluations: repositories.evaluations.clone(),
            checkpoints: repositories.checkpoints.clone(),
            settings,
        }
    }

    /// Runs a job to a terminal state under the job timeout.
    ///
    /// Resumes from a stored checkpoint when one exists.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationError::Store`] when a repository call fails; the
    /// checkpoint is left in place so a redelivery resumes from it.
    pub async fn run(&self, job: &EvaluationJob) -> Result<WorkflowState, EvaluationError> {
        match tokio::time::timeout(self.settings.job_timeout, self.drive(job)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    url = %job.destination_url,
                    link_id = job.link_id,
                    timeout = ?self.settings.job_timeout,
                    "Evaluation exceeded job timeout"
                );
                metrics::counter!("evaluation_jobs_timed_out_total").increment(1);
                self.force_fail(job, format!("job exceeded {:?}", self.settings.job_timeout))
                    .await
            }
        }
    }

    async fn drive(&self, job: &EvaluationJob) -> Result<WorkflowState, EvaluationError> {
        let key = job.key();
        let mut state = match self.checkpoints.load(&key).await? {
            Some(checkpoint) if !checkpoint.state.is_terminal() => {
                info!(key = %key, step = checkpoint.state.name(), "Resuming evaluation from checkpoint");
                checkpoint.state
            }
            _ => WorkflowState::initial(),
        };

        loop {
            let from = state.name();
            state = self.step(job, state).await?;
            debug!(key = %key, from, to = state.name(), "Workflow transition");

            if state.is_terminal() {
                self.checkpoints.delete(&key).await?;
                metrics::counter!("evaluation_jobs_total", "outcome" => state.name()).increment(1);
                return Ok(state);
            }

            self.checkpoints
                .save(&Checkpoint::new(job.clone(), state.clone()))
                .await?;
        }
    }

    /// Executes exactly one transition.
    ///
    /// Every step may be repeated: fetch, render and score have no side
    /// effects, and both writes store a record fixed by the previous step.
    pub async fn step(
        &self,
        job: &EvaluationJob,
        state: WorkflowState,
    ) -> Result<WorkflowState, EvaluationError> {
        match state {
            WorkflowState::Fetching { failures } => self.fetch(job, failures).await,
            WorkflowState::Rendering { page } => Ok(self.render(page).await),
            WorkflowState::Scoring { page, rendered } => Ok(self.score(job, page, rendered).await),
            WorkflowState::Persisting { record } => self.persist(job, record).await,
            WorkflowState::Failing { record, reason } => self.write_dead(job, record, reason).await,
            terminal => Ok(terminal),
        }
    }

    async fn fetch(
        &self,
        job: &EvaluationJob,
        failures: u32,
    ) -> Result<WorkflowState, EvaluationError> {
        if failures > 0 {
            tokio::time::sleep(backoff_delay(self.settings.fetch_backoff, failures)).await;
        }

        match self.fetcher.fetch(&job.destination_url).await {
            Ok(page) if self.renderer.is_some() => Ok(WorkflowState::Rendering { page }),
            Ok(page) => Ok(WorkflowState::Scoring {
                page,
                rendered: None,
            }),
            Err(e) => {
                let failures = failures + 1;
                metrics::counter!("evaluation_fetch_failures_total").increment(1);

                if failures >= self.settings.fetch_max_attempts {
                    warn!(
                        url = %job.destination_url,
                        failures,
                        error = %e,
                        "Fetch retry budget exhausted"
                    );
                    self.fail(job, failures, format!("fetch failed {failures} times: {e}"))
                        .await
                } else {
                    debug!(url = %job.destination_url, failures, error = %e, "Fetch failed, will retry");
                    Ok(WorkflowState::Fetching { failures })
                }
            }
        }
    }

    async fn render(&self, page: FetchedPage) -> WorkflowState {
        let rendered = match &self.renderer {
            None => None,
            Some(renderer) => {
                match tokio::time::timeout(self.settings.render_timeout, renderer.render(&page))
                    .await
                {
                    Ok(Ok(rendered)) => Some(rendered),
                    Ok(Err(e)) => {
                        warn!(url = %page.final_url, error = %e, "Render failed, scoring fetched content only");
                        metrics::counter!("evaluation_partial_runs_total").increment(1);
                        None
                    }
                    Err(_) => {
                        warn!(
                            url = %page.final_url,
                            timeout = ?self.settings.render_timeout,
                            "Render timed out, scoring fetched content only"
                        );
                        metrics::counter!("evaluation_partial_runs_total").increment(1);
                        None
                    }
                }
            }
        };

        WorkflowState::Scoring { page, rendered }
    }

    async fn score(
        &self,
        job: &EvaluationJob,
        page: FetchedPage,
        rendered: Option<RenderedPage>,
    ) -> WorkflowState {
        let score = self.scorer.score(&page, rendered.as_ref()).await;

        WorkflowState::Persisting {
            record: EvaluationRecord {
                destination_url: job.destination_url.clone(),
                link_id: job.link_id,
                verdict: score.verdict,
                quality_score: score.quality_score,
                last_checked_at: Utc::now(),
                failure_streak: 0,
            },
        }
    }

    async fn persist(
        &self,
        job: &EvaluationJob,
        mut record: EvaluationRecord,
    ) -> Result<WorkflowState, EvaluationError> {
        if !self.link_exists(job).await? {
            info!(link_id = job.link_id, url = %job.destination_url, "Link deleted, abandoning evaluation");
            return Ok(WorkflowState::Abandoned);
        }

        record.last_checked_at = Utc::now();
        let stored = self.evaluations.upsert(record).await?;
        info!(
            url = %stored.destination_url,
            verdict = %stored.verdict,
            score = stored.quality_score,
            "Evaluation persisted"
        );

        Ok(WorkflowState::Done)
    }

    /// Fixes the `dead` record for this run: the stored streak plus `failures`.
    ///
    /// Nothing is written here; the returned `Failing` state is checkpointed
    /// first, so the streak is read exactly once per run.
    async fn fail(
        &self,
        job: &EvaluationJob,
        failures: u32,
        reason: String,
    ) -> Result<WorkflowState, EvaluationError> {
        let prior = self
            .evaluations
            .get(&job.destination_url)
            .await?
            .map(|r| r.failure_streak)
            .unwrap_or(0);

        Ok(WorkflowState::Failing {
            record: EvaluationRecord::dead(
                &job.destination_url,
                job.link_id,
                prior.saturating_add(failures),
            ),
            reason,
        })
    }

    async fn write_dead(
        &self,
        job: &EvaluationJob,
        mut record: EvaluationRecord,
        reason: String,
    ) -> Result<WorkflowState, EvaluationError> {
        if !self.link_exists(job).await? {
            info!(link_id = job.link_id, url = %job.destination_url, "Link deleted, abandoning evaluation");
            return Ok(WorkflowState::Abandoned);
        }

        record.last_checked_at = Utc::now();
        let stored = self.evaluations.upsert(record).await?;

        Ok(WorkflowState::Failed {
            record: stored,
            reason,
        })
    }

    /// Terminates a run that cannot continue and records the destination as dead.
    ///
    /// A run already in `Failing` keeps the record it fixed; otherwise the
    /// interruption counts as one failure.
    async fn force_fail(
        &self,
        job: &EvaluationJob,
        reason: String,
    ) -> Result<WorkflowState, EvaluationError> {
        let key = job.key();
        let failing = match self.checkpoints.load(&key).await? {
            Some(Checkpoint {
                state: state @ WorkflowState::Failing { .. },
                ..
            }) => state,
            _ => {
                let failing = self.fail(job, 1, reason).await?;
                self.checkpoints
                    .save(&Checkpoint::new(job.clone(), failing.clone()))
                    .await?;
                failing
            }
        };

        let state = self.step(job, failing).await?;
        self.checkpoints.delete(&key).await?;
        metrics::counter!("evaluation_jobs_total", "outcome" => state.name()).increment(1);
        Ok(state)
    }

    async fn link_exists(&self, job: &EvaluationJob) -> Result<bool, EvaluationError> {
        Ok(self.links.find_by_id(job.link_id).await?.is_some())
    }

    /// Re-enqueues jobs whose checkpoints survived a restart.
    ///
    /// Checkpoints already in a terminal state are removed.
    pub async fn resume_pending(&self, queue: &dyn JobQueue) -> Result<usize, EvaluationError> {
        let mut resumed = 0;
        for checkpoint in self.checkpoints.list_pending().await? {
            if checkpoint.state.is_terminal() {
                self.checkpoints.delete(&checkpoint.key).await?;
                continue;
            }
            if queue.enqueue(checkpoint.job) {
                resumed += 1;
            }
        }

        if resumed > 0 {
            info!(resumed, "Re-enqueued interrupted evaluations");
        }
        Ok(resumed)
    }
}

#[async_trait]
impl JobHandler for EvaluationEngine {
    async fn on_job(&self, job: &EvaluationJob) -> JobOutcome {
        match self.run(job).await {
            Ok(state) => {
                debug!(key = %job.key(), outcome = state.name(), "Evaluation finished");
                JobOutcome::Ack
            }
            Err(e) => {
                warn!(key = %job.key(), attempt = job.attempt, error = %e, "Evaluation interrupted");
                JobOutcome::Retry(e.to_string())
            }
        }
    }

    async fn on_exhausted(&self, job: &EvaluationJob, reason: &str) {
        let fatal = EvaluationError::Fatal {
            destination_url: job.destination_url.clone(),
            deliveries: job.attempt + 1,
            reason: reason.to_string(),
        };
        error!(key = %job.key(), error = %fatal, "Evaluation failed permanently");

        if let Err(e) = self.force_fail(job, fatal.to_string()).await {
            error!(key = %job.key(), error = %e, "Could not record permanent evaluation failure");
        }
    }
}
