//! Client for the detection and captioning model service.
//!
//! The service hosts the GPU models. This crate wraps its HTTP API and
//! exposes the models to the pipeline as acquire/release handles behind the
//! [`ModelProvider`], [`DetectionModel`] and [`CaptionModel`] traits.
//! [`ModelLease`] guarantees a loaded model is released.

pub mod client;
pub mod encode;
pub mod error;
pub mod model;
pub mod types;

pub use client::{MlClient, MlClientConfig};
pub use error::{MlError, MlResult};
pub use model::{
    BoxPrediction, CaptionModel, CaptionOptions, DetectionModel, ModelConfig, ModelHandle,
    ModelLease, ModelProvider, RemoteModelProvider, PERSON_CLASS_ID,
};
