pub mod image_loader;

use super::model::{Candidate, DetectedBox, Detector, ModelError, Models, Query, Segmenter, SharedImage};

use serde::Serialize;
use tracing::{debug, error, info};

use std::{
    fmt,
    sync::mpsc::{self, Receiver, Sender},
    thread::{self, JoinHandle},
};

pub enum Command {
    Propose {
        image: SharedImage,
        query: Query,
        reply: Sender<Result<Vec<Candidate>, ModelError>>,
    },
    Detect {
        image: SharedImage,
        reply: Sender<Result<Vec<DetectedBox>, ModelError>>,
    },
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatus {
    pub segmenter: String,
    pub detector: Option<String>,
    pub supports_text: bool,
}

/// Cloneable front of the model thread. Every call is queued behind the
/// calls already sent, so the models only ever see one request at a time.
#[derive(Clone)]
pub struct ModelHandle {
    sender: Sender<Command>,
    status: ModelStatus,
}

/// Owns the thread that owns the models. Dropping it shuts the thread down.
pub struct ModelWorker {
    handle: ModelHandle,
    thread: Option<JoinHandle<()>>,
}

struct ComputationData {
    models: Models,
    receiver: Receiver<Command>,
}

// public
impl ModelWorker {
    pub fn spawn(models: Models) -> Result<Self, ModelError> {
        let status = ModelStatus {
            segmenter: models.segmenter.name().to_string(),
            detector: models.detector.as_ref().map(|d| d.name().to_string()),
            supports_text: models.segmenter.supports_text(),
        };

        let (sender, receiver) = mpsc::channel::<Command>();
        let data = ComputationData { models, receiver };

        let thread = thread::Builder::new()
            .name("segma-models".to_string())
            .spawn(move || data.run())
            .map_err(|e| ModelError::Unavailable(format!("failed to start model thread: {e}")))?;

        info!(
            segmenter = %status.segmenter,
            detector = ?status.detector,
            "Model worker started"
        );

        Ok(Self {
            handle: ModelHandle { sender, status },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> ModelHandle {
        self.handle.clone()
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            // the thread may already be gone, nothing to do then
            let _ = self.handle.sender.send(Command::End);
            if thread.join().is_err() {
                error!("Model thread panicked");
            }
        }
    }
}

impl Drop for ModelWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ModelHandle {
    pub fn status(&self) -> &ModelStatus {
        &self.status
    }

    pub fn has_detector(&self) -> bool {
        self.status.detector.is_some()
    }

    fn request<T>(
        &self,
        command: impl FnOnce(Sender<Result<T, ModelError>>) -> Command,
    ) -> Result<T, ModelError> {
        let (reply, response) = mpsc::channel();
        self.sender
            .send(command(reply))
            .map_err(|_| ModelError::WorkerGone)?;
        response.recv().map_err(|_| ModelError::WorkerGone)?
    }
}

impl Segmenter for ModelHandle {
    fn name(&self) -> &str {
        &self.status.segmenter
    }

    fn supports_text(&self) -> bool {
        self.status.supports_text
    }

    fn propose(&mut self, image: &SharedImage, query: &Query) -> Result<Vec<Candidate>, ModelError> {
        self.request(|reply| Command::Propose {
            image: image.clone(),
            query: query.clone(),
            reply,
        })
    }
}

impl Detector for ModelHandle {
    fn name(&self) -> &str {
        self.status.detector.as_deref().unwrap_or("none")
    }

    fn detect(&mut self, image: &SharedImage) -> Result<Vec<DetectedBox>, ModelError> {
        self.request(|reply| Command::Detect {
            image: image.clone(),
            reply,
        })
    }
}

// private
impl ComputationData {
    fn run(mut self) {
        while let Ok(task) = self.receiver.recv() {
            match task {
                Command::End => break,
                _ => self.run_task(task),
            }
        }
        info!("Model worker stopped");
    }

    fn run_task(&mut self, task: Command) {
        let timer = std::time::Instant::now();
        let msg = task.to_string();
        match task {
            Command::Propose {
                image,
                query,
                reply,
            } => {
                let ret = self.models.segmenter.propose(&image, &query);
                // the requester may have given up waiting
                let _ = reply.send(ret);
            }
            Command::Detect { image, reply } => {
                let ret = match self.models.detector.as_mut() {
                    Some(detector) => detector.detect(&image),
                    None => Err(ModelError::Unavailable("no detector loaded".into())),
                };
                let _ = reply.send(ret);
            }
            Command::End => (),
        }
        Self::time(timer, &msg);
    }
}

// private, utils
impl ComputationData {
    fn time(timer: std::time::Instant, msg: &str) {
        debug!("Time elapsed for {msg}: {:?}", timer.elapsed());
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Propose { query, .. } => match query {
                Query::Anchors(a) => write!(f, "Propose ({} anchors)", a.len()),
                _ => write!(f, "Propose"),
            },
            Command::Detect { .. } => write!(f, "Detect"),
            Command::End => write!(f, "End"),
        }
    }
}
