//! Deferred-response jobs.
//!
//! Interactive callers must answer quickly, but a full-history scan can take
//! minutes. A job is validated synchronously, acknowledged immediately, and
//! then runs on a background task that reports its outcome over a oneshot
//! channel. Each job owns a cancellation token the engine honours between
//! steps.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::commands::{self, MoveRequest, PurgeRequest};
use crate::error::{ParseError, PolicyError};
use crate::migration::MigrationEngine;
use crate::model::ChannelId;
use crate::purge::RetentionPurger;
use crate::source::ChannelDataSource;

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Everything requested was done.
    Completed,
    /// Some work was done before the job stopped.
    Partial,
    /// The job stopped before changing anything.
    Failed,
}

/// Immediate reply sent when a job is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub job_id: Uuid,
    pub message: String,
}

/// Final report of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub status: JobStatus,
    /// Messages moved or deleted.
    pub count: usize,
    pub summary: String,
}

/// Handle to a running job.
pub struct JobHandle {
    pub ack: Ack,
    cancel: CancellationToken,
    outcome: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub fn job_id(&self) -> Uuid {
        self.ack.job_id
    }

    /// Ask the job to stop at its next safe point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this job, for wiring into signal handlers.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the job's final report.
    pub async fn wait(self) -> JobOutcome {
        let job_id = self.ack.job_id;
        self.outcome.await.unwrap_or_else(|_| JobOutcome {
            job_id,
            status: JobStatus::Failed,
            count: 0,
            summary: "Job ended without reporting an outcome.".to_string(),
        })
    }
}

/// Starts move and purge jobs against one data source.
#[derive(Clone)]
pub struct JobRunner {
    source: Arc<dyn ChannelDataSource>,
    migration: MigrationEngine,
    purger: RetentionPurger,
}

impl JobRunner {
    pub fn new(source: Arc<dyn ChannelDataSource>, page_size: usize) -> Self {
        Self {
            migration: MigrationEngine::new(Arc::clone(&source), page_size),
            purger: RetentionPurger::new(Arc::clone(&source), page_size),
            source,
        }
    }

    /// Validate and start a move job.
    pub fn spawn_move(&self, request: MoveRequest) -> Result<JobHandle, PolicyError> {
        let policy = request.policy()?;
        let job_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();

        tracing::info!(
            %job_id,
            source = %request.source_channel,
            destination = %request.destination_channel,
            "Move job accepted"
        );

        let runner = self.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            let from = request.source_channel;
            let to = request.destination_channel;
            let result = runner.migration.migrate(from, to, &policy, &token).await;
            let from_name = runner.display_name(from).await;
            let to_name = runner.display_name(to).await;

            let outcome = match result {
                Ok(done) => JobOutcome {
                    job_id,
                    status: JobStatus::Completed,
                    count: done.moved_count,
                    summary: commands::move_summary(done.moved_count, &from_name, &to_name),
                },
                Err(err) => JobOutcome {
                    job_id,
                    status: if err.moved() == 0 {
                        JobStatus::Failed
                    } else {
                        JobStatus::Partial
                    },
                    count: err.moved(),
                    summary: commands::move_failure_summary(&err, &from_name, &to_name),
                },
            };
            tracing::info!(%job_id, status = ?outcome.status, count = outcome.count, "Move job finished");
            let _ = tx.send(outcome);
        });

        Ok(JobHandle {
            ack: Ack {
                job_id,
                message: "Moving messages; this may take a while.".to_string(),
            },
            cancel,
            outcome: rx,
        })
    }

    /// Validate and start a purge job.
    pub fn spawn_purge(&self, request: PurgeRequest) -> Result<JobHandle, ParseError> {
        request.validate()?;
        let job_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();

        tracing::info!(%job_id, channel = %request.channel, "Purge job accepted");

        let runner = self.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            let result = runner
                .purger
                .purge(request.channel, &request.time_period, &token)
                .await;
            let name = runner.display_name(request.channel).await;

            let outcome = match result {
                Ok(report) => JobOutcome {
                    job_id,
                    status: if report.is_complete() {
                        JobStatus::Completed
                    } else {
                        JobStatus::Partial
                    },
                    count: report.deleted_count,
                    summary: commands::purge_summary(&report, &name, &request.time_period),
                },
                Err(err) => JobOutcome {
                    job_id,
                    status: if err.deleted() == 0 {
                        JobStatus::Failed
                    } else {
                        JobStatus::Partial
                    },
                    count: err.deleted(),
                    summary: commands::purge_failure_summary(&err, &name),
                },
            };
            tracing::info!(%job_id, status = ?outcome.status, count = outcome.count, "Purge job finished");
            let _ = tx.send(outcome);
        });

        Ok(JobHandle {
            ack: Ack {
                job_id,
                message: "Deleting messages; this may take a while.".to_string(),
            },
            cancel,
            outcome: rx,
        })
    }

    /// Channel name for summaries, falling back to the raw id.
    async fn display_name(&self, channel: ChannelId) -> String {
        match self.source.channel_name(channel).await {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!(channel = %channel, error = %e, "Could not resolve channel name");
                channel.to_string()
            }
        }
    }
}
