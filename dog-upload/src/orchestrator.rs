use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    AttemptId, ChunkPlanner, CompletionToken, FileMeta, FileSource, PartDescriptor, PartSource,
    PartTransport, PartUploader, ProgressAggregator, ProgressEvent, ProgressReporter,
    ProgressSnapshot, UploadBackend, UploadConfig, UploadError, UploadOutcome, UploadReceipt,
    UploadResult, UploadSession, UploadState, UploadTarget,
};

/// Drives upload attempts: initiate, plan, request targets, upload every part
/// concurrently, then finalize once all of them succeeded.
///
/// One attempt runs at a time. Observers follow it through [`progress`](Self::progress);
/// [`reset`](Self::reset) abandons whatever is in flight.
pub struct UploadOrchestrator {
    backend: Arc<dyn UploadBackend>,
    uploader: PartUploader,
    config: UploadConfig,
    snapshots: watch::Sender<ProgressSnapshot>,
    current: Mutex<Option<ActiveAttempt>>,
}

struct ActiveAttempt {
    id: AttemptId,
    cancel: CancellationToken,
}

/// State owned by the task driving one attempt
struct AttemptRun {
    id: AttemptId,
    cancel: CancellationToken,
    state: UploadState,
    progress: ProgressAggregator,
}

enum PartRun {
    /// The permit is held until the orchestrator has seen the result
    Finished(u32, UploadResult<CompletionToken>, OwnedSemaphorePermit),
    /// Never launched because the attempt was already failing
    Skipped(u32),
}

impl UploadOrchestrator {
    pub fn new<B, T>(backend: B, transport: T, config: UploadConfig) -> Self
    where
        B: UploadBackend + 'static,
        T: PartTransport + 'static,
    {
        Self::from_shared(Arc::new(backend), Arc::new(transport), config)
    }

    pub fn from_shared(
        backend: Arc<dyn UploadBackend>,
        transport: Arc<dyn PartTransport>,
        config: UploadConfig,
    ) -> Self {
        let (snapshots, _) = watch::channel(ProgressSnapshot::idle());
        Self {
            backend,
            uploader: PartUploader::new(transport, config.transfer_timeout),
            config,
            snapshots,
            current: Mutex::new(None),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Follow per-part and overall progress
    pub fn progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn state(&self) -> UploadState {
        self.snapshots.borrow().state
    }

    /// Abandon the current attempt, if any, and go back to idle.
    ///
    /// In-flight part transfers are not interrupted; their results are ignored.
    pub fn reset(&self) {
        let mut current = self.current.lock();
        if let Some(active) = current.take() {
            info!("Resetting upload attempt {}", active.id);
            active.cancel.cancel();
        }
        self.snapshots.send_replace(ProgressSnapshot::idle());
    }

    /// Upload a file from disk
    pub async fn upload_file<P: Into<PathBuf>>(
        &self,
        path: P,
        content_type: &str,
    ) -> UploadOutcome {
        let source = FileSource::new(path);
        match source.describe(content_type).await {
            Ok(file) => self.upload(file, source).await,
            Err(e) => UploadOutcome::failed(UploadState::Idle, e),
        }
    }

    /// Run one full attempt for `file`, reading part bytes from `source`
    pub async fn upload<S>(&self, file: FileMeta, source: S) -> UploadOutcome
    where
        S: PartSource + 'static,
    {
        let mut run = match self.begin_attempt() {
            Ok(run) => run,
            Err(e) => return UploadOutcome::failed(UploadState::Idle, e),
        };

        let outcome = self.drive(&mut run, file, Arc::new(source)).await;
        self.finish_attempt(&run);
        outcome
    }

    fn begin_attempt(&self) -> UploadResult<AttemptRun> {
        let mut current = self.current.lock();
        if let Some(active) = current.as_ref() {
            return Err(UploadError::invalid(format!(
                "Upload attempt {} is still in progress",
                active.id
            )));
        }

        let run = AttemptRun {
            id: AttemptId::new(),
            cancel: CancellationToken::new(),
            state: UploadState::Idle,
            progress: ProgressAggregator::new(),
        };
        *current = Some(ActiveAttempt {
            id: run.id.clone(),
            cancel: run.cancel.clone(),
        });
        // a new attempt discards whatever the previous one left behind
        self.snapshots
            .send_replace(ProgressSnapshot::capture(&run.id, run.state, &run.progress));
        Ok(run)
    }

    fn finish_attempt(&self, run: &AttemptRun) {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|active| active.id == run.id) {
            *current = None;
        }
    }

    #[instrument(skip_all, fields(attempt_id = %run.id, file = %file.name, size = file.size))]
    async fn drive(
        &self,
        run: &mut AttemptRun,
        file: FileMeta,
        source: Arc<dyn PartSource>,
    ) -> UploadOutcome {
        let part_count = match self.validate(&file) {
            Ok(count) => count,
            Err(e) => return self.fail(run, e),
        };

        // Initiate
        self.enter(run, UploadState::Initiating);
        let session = match self
            .call(run, self.backend.initiate(&file), UploadError::initiate_failed)
            .await
        {
            Ok(session) => session,
            Err(e) => return self.fail(run, e),
        };
        info!(
            "Initiated upload {} for {} (key {}, bucket {})",
            session.upload_id, file.name, session.key, session.bucket
        );

        // Plan
        self.enter(run, UploadState::PlanningParts);
        let parts = match ChunkPlanner::plan(file.size, self.config.chunk_size) {
            Ok(parts) => parts,
            Err(e) => return self.fail(run, e),
        };
        run.progress.initialize(&parts);

        // Request targets
        self.enter(run, UploadState::RequestingTargets);
        let targets = match self
            .call(
                run,
                self.backend.request_targets(&session, part_count),
                UploadError::targets_failed,
            )
            .await
            .and_then(|targets| order_targets(targets, part_count))
        {
            Ok(targets) => targets,
            Err(e) => return self.fail(run, e),
        };
        debug!("Received {} upload targets", targets.len());

        // Upload
        self.enter(run, UploadState::UploadingParts);
        let tokens = match self.upload_parts(run, &parts, targets, source).await {
            Ok(tokens) => tokens,
            Err(e) => {
                let part_failed = matches!(e, UploadError::PartUploadFailed { .. });
                if self.config.abort_on_failure && part_failed {
                    self.abort(run, &session).await;
                }
                return self.fail(run, e);
            }
        };

        // Finalize
        self.enter(run, UploadState::Finalizing);
        let completed = match self
            .call(
                run,
                self.backend.complete(&session, &tokens),
                UploadError::finalize_failed,
            )
            .await
        {
            Ok(completed) => completed,
            Err(e) => return self.fail(run, e),
        };

        let mut receipt = UploadReceipt::new(run.id.clone(), session, file.size, part_count);
        if let Some(location) = completed.location {
            receipt = receipt.with_location(location);
        }
        if let Some(message) = completed.message {
            receipt = receipt.with_message(message);
        }

        self.enter(run, UploadState::Succeeded);
        info!(
            "Upload {} completed: {} parts, location {}",
            receipt.upload_id,
            receipt.parts,
            receipt.location.as_deref().unwrap_or("<none>")
        );
        UploadOutcome::Succeeded(receipt)
    }

    /// Everything that can be rejected before touching the network
    fn validate(&self, file: &FileMeta) -> UploadResult<u32> {
        self.config.validate()?;
        if file.name.trim().is_empty() {
            return Err(UploadError::invalid("File name must not be empty"));
        }

        let count = ChunkPlanner::part_count(file.size, self.config.chunk_size)?;
        if count > u64::from(self.config.max_parts) {
            return Err(UploadError::invalid(format!(
                "File splits into {} parts, more than the allowed {}",
                count, self.config.max_parts
            )));
        }
        Ok(count as u32)
    }

    /// One coordination call: bounded by the request timeout, abandoned on reset
    async fn call<T, F>(
        &self,
        run: &AttemptRun,
        request: F,
        wrap: fn(String) -> UploadError,
    ) -> UploadResult<T>
    where
        F: Future<Output = UploadResult<T>>,
    {
        let timeout = self.config.request_timeout;
        tokio::select! {
            biased;
            _ = run.cancel.cancelled() => Err(UploadError::Cancelled),
            result = tokio::time::timeout(timeout, request) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) if e.is_stage_error() => Err(e),
                Ok(Err(e)) => Err(wrap(e.to_string())),
                Err(_) => Err(wrap(format!("Timed out after {:?}", timeout))),
            },
        }
    }

    /// Fan out one task per part and join them all
    async fn upload_parts(
        &self,
        run: &mut AttemptRun,
        parts: &[PartDescriptor],
        targets: Vec<UploadTarget>,
        source: Arc<dyn PartSource>,
    ) -> UploadResult<Vec<CompletionToken>> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let limit = self.config.max_concurrency.unwrap_or(parts.len()).max(1);
        let permits = Arc::new(Semaphore::new(limit));
        // stops launching parts once one failed; reset cancels it too
        let cancel = run.cancel.clone();
        let halt = cancel.child_token();

        let mut tasks = JoinSet::new();
        let mut task_parts = HashMap::with_capacity(parts.len());

        for (part, target) in parts.iter().copied().zip(targets) {
            let uploader = self.uploader.clone();
            let source = source.clone();
            let permits = permits.clone();
            let halt = halt.clone();
            let events = events_tx.clone();

            let handle = tasks.spawn(async move {
                let part_number = part.part_number;
                let permit = tokio::select! {
                    biased;
                    _ = halt.cancelled() => return PartRun::Skipped(part_number),
                    permit = permits.acquire_owned() => permit,
                };
                let Ok(permit) = permit else {
                    return PartRun::Skipped(part_number);
                };

                let _ = events.send(ProgressEvent::PartStarted { part_number });
                let reporter = Arc::new(ProgressReporter::new(part_number, part.size, events));
                let result = uploader
                    .upload(&part, &target, source.as_ref(), reporter)
                    .await;
                PartRun::Finished(part_number, result, permit)
            });
            task_parts.insert(handle.id(), part.part_number);
        }
        drop(events_tx);

        info!(
            "Uploading {} parts with up to {} in flight",
            parts.len(),
            limit
        );

        let mut tokens = Vec::with_capacity(parts.len());
        let mut first_failure: Option<UploadError> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    // transfers keep running server-side; nobody listens anymore
                    tasks.detach_all();
                    return Err(UploadError::Cancelled);
                }
                Some(event) = events_rx.recv() => {
                    self.apply(run, &event);
                }
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    let (part_number, result, permit) = match joined {
                        Ok(PartRun::Finished(part_number, result, permit)) => {
                            (part_number, result, Some(permit))
                        }
                        Ok(PartRun::Skipped(part_number)) => {
                            debug!("Part {} was not launched", part_number);
                            continue;
                        }
                        Err(e) => {
                            let part_number =
                                task_parts.get(&e.id()).copied().unwrap_or_default();
                            error!("Task for part {} ended abnormally: {}", part_number, e);
                            let cause = format!("Part task ended abnormally: {}", e);
                            (
                                part_number,
                                Err(UploadError::transfer_failed(part_number, cause)),
                                None,
                            )
                        }
                    };

                    // the task's own events precede its result
                    while let Ok(event) = events_rx.try_recv() {
                        self.apply(run, &event);
                    }

                    match result {
                        Ok(token) => {
                            self.apply(run, &ProgressEvent::PartCompleted { part_number });
                            tokens.push(token);
                        }
                        Err(e) => {
                            self.apply(run, &ProgressEvent::PartFailed {
                                part_number,
                                cause: e.to_string(),
                            });
                            if first_failure.is_none() {
                                warn!(
                                    "Part {} failed, not launching remaining parts: {}",
                                    part_number, e
                                );
                                halt.cancel();
                                first_failure = Some(e.into_part_upload_failed(part_number));
                            } else {
                                warn!("Part {} also failed: {}", part_number, e);
                            }
                        }
                    }
                    drop(permit);
                }
            }
        }

        if let Some(failure) = first_failure {
            return Err(failure);
        }

        // completion order is arbitrary, finalize needs ascending part numbers
        tokens.sort_by_key(|token| token.part_number);
        Ok(tokens)
    }

    async fn abort(&self, run: &AttemptRun, session: &UploadSession) {
        match self
            .call(run, self.backend.abort(session), UploadError::invalid)
            .await
        {
            Ok(()) => info!("Aborted upload {}", session.upload_id),
            Err(UploadError::Unsupported) => {
                debug!("Backend cannot abort upload {}", session.upload_id)
            }
            Err(e) => warn!("Failed to abort upload {}: {}", session.upload_id, e),
        }
    }

    fn apply(&self, run: &mut AttemptRun, event: &ProgressEvent) {
        if let Err(e) = run.progress.apply(event) {
            warn!("Dropping progress event for part {}: {}", event.part_number(), e);
            return;
        }
        self.publish(run);
    }

    fn enter(&self, run: &mut AttemptRun, state: UploadState) {
        debug!("Attempt {}: {} -> {}", run.id, run.state, state);
        run.state = state;
        self.publish(run);
    }

    fn fail(&self, run: &mut AttemptRun, error: UploadError) -> UploadOutcome {
        let stage = run.state;
        if matches!(error, UploadError::Cancelled) {
            info!("Attempt {} abandoned during {}", run.id, stage);
        } else {
            warn!("Attempt {} failed during {}: {}", run.id, stage, error);
            self.enter(run, UploadState::Failed);
        }
        UploadOutcome::failed(stage, error)
    }

    /// Snapshots from an abandoned attempt never reach observers
    fn publish(&self, run: &AttemptRun) {
        let _current = self.current.lock();
        if run.cancel.is_cancelled() {
            return;
        }
        self.snapshots
            .send_replace(ProgressSnapshot::capture(&run.id, run.state, &run.progress));
    }
}

/// Index targets by part number; every part `1..=parts` exactly once
fn order_targets(targets: Vec<UploadTarget>, parts: u32) -> UploadResult<Vec<UploadTarget>> {
    let mut slots: Vec<Option<UploadTarget>> = vec![None; parts as usize];
    let mut duplicated = BTreeSet::new();
    let mut unexpected = BTreeSet::new();

    for target in targets {
        let n = target.part_number;
        if n == 0 || n > parts {
            unexpected.insert(n);
            continue;
        }
        let slot = &mut slots[(n - 1) as usize];
        if slot.is_some() {
            duplicated.insert(n);
        } else {
            *slot = Some(target);
        }
    }

    let missing: Vec<u32> = slots
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.is_none())
        .map(|(i, _)| i as u32 + 1)
        .collect();

    if !missing.is_empty() || !duplicated.is_empty() || !unexpected.is_empty() {
        return Err(UploadError::targets_incomplete(format!(
            "expected one target for each of parts 1..={}, \
             missing {:?}, duplicated {:?}, unexpected {:?}",
            parts, missing, duplicated, unexpected
        )));
    }

    Ok(slots.into_iter().flatten().collect())
}
