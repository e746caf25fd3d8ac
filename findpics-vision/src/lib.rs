//! Face detection and embedding for findpics.
//!
//! Wraps the OpenCV zoo YuNet detector and SFace recognizer, both running
//! through ONNX Runtime. The rest of the workspace only sees [`Pipeline`],
//! [`Detection`] and [`Embedding`].

pub mod detector;
pub mod encoder;
pub mod model;
pub mod pipeline;

pub use detector::{Detection, Detector};
pub use encoder::{Embedding, Encoder};
pub use pipeline::Pipeline;
