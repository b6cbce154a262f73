use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::admission::{AdmissionDecision, AdmissionGate};
use crate::error::AppError;
use crate::fanout::{FanoutQueue, QueueEntry};
use crate::models::FanoutMessage;
use crate::state_store::StateStore;
use crate::traits::{PostingSink, SourceConnector};

/// Events emitted by the worker for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
    },
    Polling,
    MessageReceived {
        entry_id: &'a str,
        sources: usize,
    },
    SourceSkipped {
        source: &'a str,
        decision: AdmissionDecision,
    },
    SourceCompleted {
        source: &'a str,
        postings: usize,
    },
    SourceFailed {
        source: &'a str,
        error: &'a str,
    },
    MessageAcked {
        entry_id: &'a str,
    },
    StaleClaimed {
        count: usize,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                tracing::info!(%worker_id, "Worker started");
            }
            WorkerEvent::Polling => {
                tracing::debug!("Polling for fanout messages");
            }
            WorkerEvent::MessageReceived { entry_id, sources } => {
                tracing::info!(%entry_id, %sources, "Fanout message received");
            }
            WorkerEvent::SourceSkipped { source, decision } => {
                tracing::info!(%source, %decision, "Source skipped");
            }
            WorkerEvent::SourceCompleted { source, postings } => {
                tracing::info!(%source, %postings, "Source fetch completed");
            }
            WorkerEvent::SourceFailed { source, error } => {
                tracing::warn!(%source, %error, "Source fetch failed");
            }
            WorkerEvent::MessageAcked { entry_id } => {
                tracing::debug!(%entry_id, "Fanout message acknowledged");
            }
            WorkerEvent::StaleClaimed { count } => {
                tracing::info!(%count, "Claimed stale entries from crashed consumer");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// Configuration for one fanout worker task.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// How long one read waits for new messages before returning empty.
    pub read_block: Duration,
    /// Maximum entries taken per read.
    pub batch_size: usize,
    /// Deadline imposed around each source connector call.
    pub fetch_timeout: Duration,
    /// Pending entries idle longer than this are claimed from dead peers.
    pub visibility_timeout: Duration,
    /// How often this worker sweeps for stale entries.
    pub claim_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            read_block: Duration::from_secs(5),
            batch_size: 10,
            fetch_timeout: Duration::from_secs(30),
            visibility_timeout: Duration::from_secs(60),
            claim_interval: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_read_block(mut self, read_block: Duration) -> Self {
        self.read_block = read_block;
        self
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }
}

/// Worker that consumes fanout messages and fans each one out across its
/// requested sources, one admission check per source.
///
/// A message is acknowledged only after every source in it has been
/// attempted (fetched, failed, or skipped by admission), so a crash mid-way
/// leaves the entry pending for a peer to claim. Replays are possible; every
/// step tolerates them.
pub struct FanoutWorker<Q, S, C, P>
where
    Q: FanoutQueue,
    S: StateStore,
    C: SourceConnector,
    P: PostingSink,
{
    queue: Q,
    gate: AdmissionGate<S>,
    connector: C,
    sink: P,
    config: WorkerConfig,
}

impl<Q, S, C, P> FanoutWorker<Q, S, C, P>
where
    Q: FanoutQueue,
    S: StateStore,
    C: SourceConnector,
    P: PostingSink,
{
    pub fn new(
        queue: Q,
        gate: AdmissionGate<S>,
        connector: C,
        sink: P,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            gate,
            connector,
            sink,
            config,
        }
    }

    /// Run the consume loop until cancellation.
    pub async fn run<WR: WorkerReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &WR,
    ) -> Result<(), AppError> {
        reporter.report(WorkerEvent::Started {
            worker_id: &self.config.worker_id,
        });

        let mut last_claim = tokio::time::Instant::now();

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            if last_claim.elapsed() >= self.config.claim_interval {
                last_claim = tokio::time::Instant::now();
                self.sweep_stale(reporter).await;
            }

            reporter.report(WorkerEvent::Polling);

            let read = tokio::select! {
                read = self.queue.read_batch(
                    &self.config.worker_id,
                    self.config.batch_size,
                    self.config.read_block,
                ) => read,
                () = cancel_token.cancelled() => break,
            };

            match read {
                Ok(entries) => {
                    for entry in &entries {
                        if cancel_token.is_cancelled() {
                            // Unprocessed entries stay pending and get
                            // claimed by a peer after the visibility timeout.
                            break;
                        }
                        self.process_entry(entry, reporter).await;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read from fanout queue");
                    tokio::select! {
                        () = tokio::time::sleep(self.config.read_block) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
            }
        }

        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.config.worker_id,
        });

        Ok(())
    }

    async fn sweep_stale<WR: WorkerReporter>(&self, reporter: &WR) {
        match self
            .queue
            .claim_stale(
                &self.config.worker_id,
                self.config.visibility_timeout,
                self.config.batch_size,
            )
            .await
        {
            Ok(entries) if !entries.is_empty() => {
                reporter.report(WorkerEvent::StaleClaimed {
                    count: entries.len(),
                });
                for entry in &entries {
                    self.process_entry(entry, reporter).await;
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Failed to claim stale entries");
            }
        }
    }

    async fn process_entry<WR: WorkerReporter>(&self, entry: &QueueEntry, reporter: &WR) {
        reporter.report(WorkerEvent::MessageReceived {
            entry_id: &entry.id,
            sources: entry.message.sources.len(),
        });

        let fingerprint = entry.message.query.fingerprint();
        for source in &entry.message.sources {
            self.attempt_source(source, &entry.message, &fingerprint, reporter)
                .await;
        }

        // Every source has now been attempted; only here is the entry safe
        // to acknowledge.
        match self.queue.ack(&entry.id).await {
            Ok(()) => reporter.report(WorkerEvent::MessageAcked {
                entry_id: &entry.id,
            }),
            Err(e) => {
                tracing::error!(entry_id = %entry.id, error = %e, "Failed to acknowledge entry");
            }
        }
    }

    async fn attempt_source<WR: WorkerReporter>(
        &self,
        source: &str,
        message: &FanoutMessage,
        fingerprint: &str,
        reporter: &WR,
    ) {
        let decision = match self.gate.admit(source).await {
            Ok(decision) => decision,
            Err(e) => {
                // Can't tell whether the source is safe to call; skip it for
                // this entry rather than bypass the gates.
                let error = e.to_string();
                tracing::warn!(source = %source, %error, "Admission check failed, skipping source");
                reporter.report(WorkerEvent::SourceFailed {
                    source,
                    error: &error,
                });
                return;
            }
        };

        if !decision.is_admitted() {
            reporter.report(WorkerEvent::SourceSkipped { source, decision });
            return;
        }

        let fetched = match tokio::time::timeout(
            self.config.fetch_timeout,
            self.connector.fetch(source, &message.query),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(self.config.fetch_timeout.as_secs())),
        };

        match fetched {
            Ok(postings) => {
                if let Err(e) = self.gate.record_success(source).await {
                    tracing::warn!(
                        source = %source,
                        error = %e,
                        "Failed to record circuit success"
                    );
                }
                reporter.report(WorkerEvent::SourceCompleted {
                    source,
                    postings: postings.len(),
                });
                // Sink trouble is downstream trouble; it never counts
                // against the source's circuit.
                if let Err(e) = self.sink.deliver(source, fingerprint, postings).await {
                    tracing::error!(source = %source, error = %e, "Failed to deliver postings");
                }
            }
            Err(e) => {
                if e.should_trip_circuit() {
                    if let Err(store_err) = self.gate.record_failure(source).await {
                        tracing::warn!(
                            source = %source,
                            error = %store_err,
                            "Failed to record circuit failure"
                        );
                    }
                }
                let error = e.to_string();
                reporter.report(WorkerEvent::SourceFailed {
                    source,
                    error: &error,
                });
            }
        }
    }
}
