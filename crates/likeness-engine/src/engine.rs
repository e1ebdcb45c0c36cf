use likeness_core::{
    evaluate_against, CompareOptions, Denial, NormalizeError, NormalizedGrid, Normalizer,
    SimilarityScore,
};
use likeness_store::{Fingerprint, ReferenceInfo, ReferenceStore, StorageLocation, StoreError};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("image could not be decoded: {0}")]
    Decode(#[from] NormalizeError),
    #[error("reference write failed: {0}")]
    StorageWrite(#[source] StoreError),
    #[error("reference read failed: {0}")]
    StorageRead(#[source] StoreError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("internal fault while handling request")]
    Fault,
}

impl EngineError {
    /// Message safe to show an end user; internal detail stays in the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            EngineError::Decode(_) => "the image could not be read, please capture again",
            EngineError::StorageWrite(_) => "enrollment failed, please retry",
            EngineError::StorageRead(_) => "the enrolled face could not be read, please retry",
            EngineError::Spawn(_) | EngineError::ChannelClosed | EngineError::Fault => {
                "face check unavailable"
            }
        }
    }
}

/// Result of an enrollment.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollReceipt {
    pub location: StorageLocation,
    pub sha256: Fingerprint,
}

/// Result of an authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuthOutcome {
    Verified {
        score: SimilarityScore,
    },
    Rejected {
        score: Option<SimilarityScore>,
        denial: Denial,
    },
    /// Nothing has been enrolled yet. Not a match and not a non-match.
    NoReferenceEnrolled,
}

impl AuthOutcome {
    /// `None` when there was no reference to decide against.
    pub fn decision(&self) -> Option<bool> {
        match self {
            AuthOutcome::Verified { .. } => Some(true),
            AuthOutcome::Rejected { .. } => Some(false),
            AuthOutcome::NoReferenceEnrolled => None,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, AuthOutcome::Verified { .. })
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            AuthOutcome::Verified { .. } => "verified",
            AuthOutcome::Rejected { .. } => "not verified",
            AuthOutcome::NoReferenceEnrolled => "no enrolled face found",
        }
    }
}

/// Snapshot of the engine and its reference.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub version: &'static str,
    pub enrolled: bool,
    pub location: StorageLocation,
    pub reference: Option<ReferenceInfo>,
    pub options: CompareOptions,
    pub reference_cached: bool,
}

/// Messages sent from callers to the engine thread.
enum EngineRequest {
    Enroll {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<EnrollReceipt, EngineError>>,
    },
    Authenticate {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<AuthOutcome, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<Result<EngineStatus, EngineError>>,
    },
    Clear {
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Validate `image` and persist it as the new reference.
    ///
    /// Undecodable images are rejected before anything is written.
    pub async fn enroll(&self, image: Vec<u8>) -> Result<EnrollReceipt, EngineError> {
        self.request(|reply| EngineRequest::Enroll { image, reply }).await
    }

    /// Compare `image` against the enrolled reference.
    ///
    /// Only storage read faults are errors. Every processing failure is a
    /// [`AuthOutcome::Rejected`].
    pub async fn authenticate(&self, image: Vec<u8>) -> Result<AuthOutcome, EngineError> {
        self.request(|reply| EngineRequest::Authenticate { image, reply })
            .await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    /// Remove the reference. Returns whether one existed.
    pub async fn clear(&self) -> Result<bool, EngineError> {
        self.request(|reply| EngineRequest::Clear { reply }).await
    }
}

/// Normalized reference kept between requests.
struct CachedReference {
    sha256: Fingerprint,
    normalizer: Normalizer,
    grid: NormalizedGrid,
}

struct Worker<S> {
    store: S,
    options: CompareOptions,
    cache: Option<CachedReference>,
}

/// Spawn the engine on a dedicated OS thread.
///
/// Requests are served one at a time, so store writes never interleave.
/// A caller that stops waiting does not abort a request already queued;
/// the store's atomic replace keeps a half-written reference from ever
/// becoming visible.
pub fn spawn_engine<S>(
    store: S,
    options: CompareOptions,
    queue_depth: usize,
) -> Result<EngineHandle, EngineError>
where
    S: ReferenceStore + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    tracing::info!(
        location = %store.location(),
        size = options.size.get(),
        filter = %options.filter,
        threshold = options.threshold.get(),
        "starting engine"
    );

    let mut worker = Worker {
        store,
        options,
        cache: None,
    };

    std::thread::Builder::new()
        .name("likeness-engine".into())
        .spawn(move || {
            tracing::debug!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { image, reply } => {
                        let result = worker
                            .guarded("enroll", |w| w.run_enroll(&image))
                            .unwrap_or(Err(EngineError::Fault));
                        let _ = reply.send(result);
                    }
                    EngineRequest::Authenticate { image, reply } => {
                        let result = worker
                            .guarded("authenticate", |w| w.run_authenticate(&image))
                            .unwrap_or(Ok(AuthOutcome::Rejected {
                                score: None,
                                denial: Denial::Fault,
                            }));
                        let _ = reply.send(result);
                    }
                    EngineRequest::Status { reply } => {
                        let result = worker
                            .guarded("status", |w| w.run_status())
                            .unwrap_or(Err(EngineError::Fault));
                        let _ = reply.send(result);
                    }
                    EngineRequest::Clear { reply } => {
                        let result = worker
                            .guarded("clear", |w| w.run_clear())
                            .unwrap_or(Err(EngineError::Fault));
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::debug!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

impl<S: ReferenceStore> Worker<S> {
    /// Run one request, keeping the thread alive if it panics. The cache is
    /// dropped on unwind since it may be half-updated.
    fn guarded<T>(&mut self, op: &'static str, f: impl FnOnce(&mut Self) -> T) -> Option<T> {
        match panic::catch_unwind(AssertUnwindSafe(|| f(self))) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::error!(op, "panic while handling request; cache reset");
                self.cache = None;
                None
            }
        }
    }

    fn run_enroll(&mut self, image: &[u8]) -> Result<EnrollReceipt, EngineError> {
        let normalizer = self.options.normalizer();
        let grid = normalizer.normalize(image).map_err(|e| {
            tracing::warn!(error = %e, len = image.len(), "enroll: image rejected");
            e
        })?;

        let location = self.store.save(image).map_err(|e| {
            tracing::error!(error = %e, "enroll: reference not persisted");
            EngineError::StorageWrite(e)
        })?;

        let sha256 = Fingerprint::of(image);
        self.cache = Some(CachedReference {
            sha256,
            normalizer,
            grid,
        });

        tracing::info!(location = %location, sha256 = %sha256, "enroll: reference stored");
        Ok(EnrollReceipt { location, sha256 })
    }

    fn run_authenticate(&mut self, probe: &[u8]) -> Result<AuthOutcome, EngineError> {
        let reference = self.store.load().map_err(|e| {
            tracing::error!(error = %e, "authenticate: reference unreadable");
            EngineError::StorageRead(e)
        })?;

        let Some(reference) = reference else {
            tracing::info!("authenticate: no reference enrolled");
            return Ok(AuthOutcome::NoReferenceEnrolled);
        };

        let options = self.options;
        let grid = match self.reference_grid(&reference) {
            Ok(grid) => grid,
            Err(denial) => {
                return Ok(AuthOutcome::Rejected {
                    score: None,
                    denial,
                })
            }
        };

        let verdict = evaluate_against(grid, probe, &options);
        let outcome = match (verdict.matched, verdict.score) {
            (true, Some(score)) => AuthOutcome::Verified { score },
            _ => AuthOutcome::Rejected {
                score: verdict.score,
                denial: verdict.denial.unwrap_or(Denial::Fault),
            },
        };

        tracing::info!(
            verified = outcome.is_verified(),
            score = verdict.score.map(|s| s.value()),
            "authenticate: complete"
        );
        Ok(outcome)
    }

    /// Normalized grid for the stored reference, reusing the cache when the
    /// stored bytes have not changed.
    fn reference_grid(&mut self, reference: &[u8]) -> Result<&NormalizedGrid, Denial> {
        let sha256 = Fingerprint::of(reference);
        let normalizer = self.options.normalizer();
        let fresh = matches!(
            &self.cache,
            Some(c) if c.sha256 == sha256 && c.normalizer == normalizer
        );

        if !fresh {
            self.cache = None;
            let normalized =
                panic::catch_unwind(AssertUnwindSafe(|| normalizer.normalize(reference)));
            let grid = match normalized {
                Ok(Ok(grid)) => grid,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "stored reference failed to normalize; denying");
                    return Err(Denial::Decode);
                }
                Err(_) => {
                    tracing::error!("panic normalizing stored reference; denying");
                    return Err(Denial::Fault);
                }
            };
            tracing::debug!(sha256 = %sha256, "reference normalized and cached");
            self.cache = Some(CachedReference {
                sha256,
                normalizer,
                grid,
            });
        }

        match &self.cache {
            Some(c) => Ok(&c.grid),
            None => Err(Denial::Fault),
        }
    }

    fn run_status(&self) -> Result<EngineStatus, EngineError> {
        let reference = self.store.info().map_err(EngineError::StorageRead)?;
        let reference_cached = match (&self.cache, &reference) {
            (Some(c), Some(info)) => c.sha256 == info.sha256,
            _ => false,
        };
        Ok(EngineStatus {
            version: env!("CARGO_PKG_VERSION"),
            enrolled: reference.is_some(),
            location: self.store.location(),
            reference,
            options: self.options,
            reference_cached,
        })
    }

    fn run_clear(&mut self) -> Result<bool, EngineError> {
        self.cache = None;
        self.store.clear().map_err(EngineError::StorageWrite)
    }
}
