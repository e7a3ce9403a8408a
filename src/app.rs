pub mod model;
pub mod pipeline;
pub mod threads;

use crate::config::{Config, ConfigError};
use model::{Detector, ModelError, Models};
use pipeline::{Pipeline, SegmentError, SegmentRequest, SegmentationResult};
use threads::{ModelStatus, ModelWorker};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Owns the model worker and the pipeline for the life of the process.
pub struct App {
    config: Config,
    worker: ModelWorker,
    pipeline: Pipeline,
}

impl App {
    /// Load the configured models and start the model thread.
    pub fn new(config: Config) -> Result<Self, AppError> {
        config.validate()?;
        let models = Models::load(&config)?;
        Self::with_models(config, models)
    }

    pub fn with_models(config: Config, models: Models) -> Result<Self, AppError> {
        let pipeline = Pipeline::new(config.pipeline.clone())?;
        let worker = ModelWorker::spawn(models)?;

        Ok(App {
            config,
            worker,
            pipeline,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Safe to call from several threads; model calls queue up on the worker.
    pub fn segment(&self, request: &SegmentRequest) -> Result<SegmentationResult, SegmentError> {
        let mut segmenter = self.worker.handle();
        let mut detector = segmenter.has_detector().then(|| self.worker.handle());

        self.pipeline.segment(
            &mut segmenter,
            detector.as_mut().map(|d| d as &mut dyn Detector),
            request,
        )
    }

    pub fn status(&self) -> ModelStatus {
        self.worker.handle().status().clone()
    }

    pub fn shutdown(self) {
        self.worker.shutdown();
    }
}
