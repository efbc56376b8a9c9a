use crate::config::Config;
use crate::encoder_client::HttpEncoder;
use rollcall_core::{
    recognize, recognize_probe, Deadline, Encoder, FeatureVector, MatchConfig,
    PrecomputedEncoder, RecognitionError, RecognitionOutcome,
};
use rollcall_store::{
    EnrolledEmbedding, EnrollmentRequest, IdentityStore, IdentitySummary, StoreError,
};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Recognition(#[from] RecognitionError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Snapshot of engine state for `rollcall status`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub version: &'static str,
    pub db_path: String,
    pub identities: usize,
    pub enrolled: usize,
    pub matching: MatchConfig,
    pub match_timeout_ms: u64,
    /// Encoder service URL, or `None` when reading precomputed sidecars.
    pub encoder_url: Option<String>,
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    RecognizeProbe {
        probe: FeatureVector,
        deadline: Option<Deadline>,
        reply: oneshot::Sender<Result<RecognitionOutcome, EngineError>>,
    },
    RecognizeImage {
        image: PathBuf,
        deadline: Option<Deadline>,
        reply: oneshot::Sender<Result<RecognitionOutcome, EngineError>>,
    },
    Enroll {
        request: EnrollmentRequest,
        reply: oneshot::Sender<Result<EnrolledEmbedding, EngineError>>,
    },
    List {
        reply: oneshot::Sender<Result<Vec<IdentitySummary>, EngineError>>,
    },
    Remove {
        identity_id: String,
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<Result<EngineStatus, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Option<Duration>,
}

impl EngineHandle {
    /// Match an already-encoded probe against the current gallery.
    pub async fn recognize(&self, probe: FeatureVector) -> Result<RecognitionOutcome, EngineError> {
        let deadline = self.deadline();
        self.call(|reply| EngineRequest::RecognizeProbe {
            probe,
            deadline,
            reply,
        })
        .await
    }

    /// Encode `image` and match it against the current gallery.
    pub async fn recognize_image(
        &self,
        image: impl Into<PathBuf>,
    ) -> Result<RecognitionOutcome, EngineError> {
        let deadline = self.deadline();
        let image = image.into();
        self.call(|reply| EngineRequest::RecognizeImage {
            image,
            deadline,
            reply,
        })
        .await
    }

    pub async fn enroll(
        &self,
        request: EnrollmentRequest,
    ) -> Result<EnrolledEmbedding, EngineError> {
        self.call(|reply| EngineRequest::Enroll { request, reply }).await
    }

    pub async fn list(&self) -> Result<Vec<IdentitySummary>, EngineError> {
        self.call(|reply| EngineRequest::List { reply }).await
    }

    pub async fn remove(&self, identity_id: impl Into<String>) -> Result<bool, EngineError> {
        let identity_id = identity_id.into();
        self.call(|reply| EngineRequest::Remove { identity_id, reply })
            .await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }

    // Started on the caller's side so time spent queued counts too.
    fn deadline(&self) -> Option<Deadline> {
        self.timeout.map(Deadline::after)
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Open the identity store at `config.db_path` and spawn the engine.
///
/// Fails fast if the store cannot be opened.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let store = IdentityStore::open(&config.db_path)?;
    spawn_engine_with_store(store, encoder_for(config), config)
}

/// The encoder service client when `encoder_url` is set, otherwise
/// precomputed sidecars.
pub fn encoder_for(config: &Config) -> Box<dyn Encoder + Send> {
    match &config.encoder_url {
        Some(url) => Box::new(HttpEncoder::new(
            url,
            Duration::from_millis(config.encoder_timeout_ms),
        )),
        None => Box::new(PrecomputedEncoder),
    }
}

/// Spawn the engine on a dedicated OS thread around an opened store.
pub fn spawn_engine_with_store(
    store: IdentityStore,
    encoder: Box<dyn Encoder + Send>,
    config: &Config,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(config.queue_depth);
    let worker = Worker {
        store,
        encoder,
        matching: config.matching.clone(),
        db_path: config.db_path.display().to_string(),
        match_timeout_ms: config.match_timeout_ms,
        encoder_url: config.encoder_url.clone(),
    };

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                worker.handle(req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    let timeout =
        (config.match_timeout_ms > 0).then(|| Duration::from_millis(config.match_timeout_ms));
    Ok(EngineHandle { tx, timeout })
}

/// State owned by the engine thread.
struct Worker {
    store: IdentityStore,
    encoder: Box<dyn Encoder + Send>,
    matching: MatchConfig,
    db_path: String,
    match_timeout_ms: u64,
    encoder_url: Option<String>,
}

impl Worker {
    fn handle(&self, req: EngineRequest) {
        // A dropped receiver means the caller gave up; nothing to do.
        match req {
            EngineRequest::RecognizeProbe {
                probe,
                deadline,
                reply,
            } => {
                let result =
                    recognize_probe(&probe, &self.store, &self.matching, deadline.as_ref())
                        .map_err(EngineError::from);
                log_recognition(&result);
                let _ = reply.send(result);
            }
            EngineRequest::RecognizeImage {
                image,
                deadline,
                reply,
            } => {
                let result = recognize(
                    self.encoder.as_ref(),
                    &image,
                    &self.store,
                    &self.matching,
                    deadline.as_ref(),
                )
                .map_err(EngineError::from);
                log_recognition(&result);
                let _ = reply.send(result);
            }
            EngineRequest::Enroll { request, reply } => {
                let _ = reply.send(self.store.enroll(request).map_err(EngineError::from));
            }
            EngineRequest::List { reply } => {
                let _ = reply.send(self.store.list().map_err(EngineError::from));
            }
            EngineRequest::Remove { identity_id, reply } => {
                let _ = reply.send(self.store.remove(&identity_id).map_err(EngineError::from));
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn status(&self) -> Result<EngineStatus, EngineError> {
        Ok(EngineStatus {
            version: env!("CARGO_PKG_VERSION"),
            db_path: self.db_path.clone(),
            identities: self.store.list()?.len(),
            enrolled: self.store.enrolled_count()?,
            matching: self.matching.clone(),
            match_timeout_ms: self.match_timeout_ms,
            encoder_url: self.encoder_url.clone(),
        })
    }
}

fn log_recognition(result: &Result<RecognitionOutcome, EngineError>) {
    match result {
        Ok(outcome) => tracing::debug!(
            matched = outcome.matched,
            method = outcome.method.as_str(),
            checked = outcome.diagnostics.gallery_size_checked,
            "recognition finished"
        ),
        Err(err) => tracing::warn!(error = %err, "recognition failed"),
    }
}
