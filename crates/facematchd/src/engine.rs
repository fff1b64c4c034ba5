use facematch_core::{
    AssignResponse, DetectRequest, DetectResponse, FaceService, FaceStore, FacesResponse,
    LifecycleError, MatchResponse,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

type Reply<T> = oneshot::Sender<Result<T, LifecycleError>>;

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Detect {
        photo_id: String,
        request: DetectRequest,
        reply: Reply<DetectResponse>,
    },
    Match {
        photo_id: String,
        threshold: Option<f64>,
        reply: Reply<MatchResponse>,
    },
    Assign {
        photo_id: String,
        face_index: i64,
        person_id: Option<String>,
        reply: Reply<AssignResponse>,
    },
    Faces {
        photo_id: String,
        reply: Reply<FacesResponse>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Store a detection result for a photo.
    pub async fn detect(
        &self,
        photo_id: String,
        request: DetectRequest,
    ) -> Result<DetectResponse, EngineError> {
        self.call(|reply| EngineRequest::Detect {
            photo_id,
            request,
            reply,
        })
        .await
    }

    /// Match a photo's faces against every person with a descriptor.
    pub async fn match_photo(
        &self,
        photo_id: String,
        threshold: Option<f64>,
    ) -> Result<MatchResponse, EngineError> {
        self.call(|reply| EngineRequest::Match {
            photo_id,
            threshold,
            reply,
        })
        .await
    }

    /// Assign one face to a person, or clear it.
    pub async fn assign(
        &self,
        photo_id: String,
        face_index: i64,
        person_id: Option<String>,
    ) -> Result<AssignResponse, EngineError> {
        self.call(|reply| EngineRequest::Assign {
            photo_id,
            face_index,
            person_id,
            reply,
        })
        .await
    }

    pub async fn faces(&self, photo_id: String) -> Result<FacesResponse, EngineError> {
        self.call(|reply| EngineRequest::Faces { photo_id, reply })
            .await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the service and its store; requests are handled one at
/// a time, so each read-modify-write on a photo completes before the next
/// one starts.
pub fn spawn_engine<S>(
    service: FaceService<S>,
    queue_depth: usize,
) -> Result<EngineHandle, EngineError>
where
    S: FaceStore + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("facematch-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                handle(&service, req);
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

fn handle<S: FaceStore>(service: &FaceService<S>, req: EngineRequest) {
    match req {
        EngineRequest::Detect {
            photo_id,
            request,
            reply,
        } => {
            let result = service.detect(&photo_id, request);
            log_failure("detect", &photo_id, &result);
            let _ = reply.send(result);
        }
        EngineRequest::Match {
            photo_id,
            threshold,
            reply,
        } => {
            let result = service.match_photo(&photo_id, threshold);
            log_failure("match", &photo_id, &result);
            let _ = reply.send(result);
        }
        EngineRequest::Assign {
            photo_id,
            face_index,
            person_id,
            reply,
        } => {
            let result = service.assign(&photo_id, face_index, person_id.as_deref());
            log_failure("assign", &photo_id, &result);
            let _ = reply.send(result);
        }
        EngineRequest::Faces { photo_id, reply } => {
            let _ = reply.send(service.faces(&photo_id));
        }
    }
}

fn log_failure<T>(op: &str, photo_id: &str, result: &Result<T, LifecycleError>) {
    if let Err(e) = result {
        tracing::warn!(op, photo_id, kind = ?e.kind(), error = %e, "request failed");
    }
}
