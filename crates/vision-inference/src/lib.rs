//! Inference client (component C2): a uniform `infer` contract over three
//! interchangeable transports — HTTP+JSON, gRPC tensor, and gRPC with the
//! tensor payload handed off through a registered shared-memory region.
//!
//! The transport is chosen once per model at attach time and does not
//! change mid-stream; callers never see which one is in use beyond the
//! latency/throughput difference.

use serde::{Deserialize, Serialize};
use vision_frame::{BBox, Detection, Frame};

mod grpc;
mod http;
mod postprocess;
mod preprocess;
mod shared_memory;

pub use postprocess::{non_max_suppression, PostprocessConfig};
pub use preprocess::{letterbox, PreprocessConfig};

pub mod proto {
    tonic::include_proto!("vision.inference");
}

#[derive(thiserror::Error, Debug)]
pub enum InferError {
    /// The server could not be reached at all. The camera keeps running;
    /// the caller is expected to retry on a later frame.
    #[error("inference server unavailable: {0}")]
    Unavailable(String),
    /// The server responded but the payload did not match the expected
    /// shape. The frame is dropped, nothing is retried within this call.
    #[error("malformed inference response: {0}")]
    Protocol(String),
    #[error("inference request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    HttpJson,
    GrpcTensor,
    SharedMemory,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_id: String,
    pub transport: Transport,
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
    pub class_names: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct InferResult {
    pub detections: Vec<Detection>,
}

/// Entry point used by the detector stage: preprocess, dispatch to the
/// configured transport, postprocess. No retry happens inside this call —
/// stage-level failure isolation (vision-tracking) decides what to do with
/// an `Err`.
pub fn infer(
    client: &InferenceClient,
    model: &ModelConfig,
    frame: &Frame,
) -> Result<InferResult, InferError> {
    let pre = PreprocessConfig {
        input_size: model.input_size,
    };
    let prepared = preprocess::letterbox(frame, &pre);

    let raw_outputs = match client {
        InferenceClient::Http(c) => http::infer(c, model, &prepared)?,
        InferenceClient::Grpc(c) => grpc::infer(c, model, &prepared)?,
        InferenceClient::SharedMemory(c) => shared_memory::infer(c, model, &prepared)?,
    };

    let post = PostprocessConfig {
        confidence_threshold: model.confidence_threshold,
        nms_iou_threshold: model.nms_iou_threshold,
        class_names: model.class_names.clone(),
    };
    let detections = postprocess::decode(&raw_outputs, &prepared, &post)?;
    Ok(InferResult { detections })
}

/// A raw tensor output exactly as received from the wire, before
/// dequantization and NMS.
pub(crate) struct RawOutput {
    pub boxes: Vec<[f32; 4]>,
    pub scores: Vec<f32>,
    pub class_ids: Vec<usize>,
}

/// The constructed, connected transport. Built once when a model is
/// attached to a camera (component C7 registry) and reused across frames.
pub enum InferenceClient {
    Http(http::HttpClient),
    Grpc(grpc::GrpcClient),
    SharedMemory(shared_memory::SharedMemoryClient),
}

impl InferenceClient {
    pub fn connect(
        transport: Transport,
        config: &vision_config::GlobalConfig,
    ) -> Result<Self, InferError> {
        match transport {
            Transport::HttpJson => Ok(Self::Http(http::HttpClient::connect(config)?)),
            Transport::GrpcTensor => Ok(Self::Grpc(grpc::GrpcClient::connect(config)?)),
            Transport::SharedMemory => {
                Ok(Self::SharedMemory(shared_memory::SharedMemoryClient::connect(config)?))
            }
        }
    }
}

pub(crate) fn bbox_from_xyxy(b: &[f32; 4]) -> BBox {
    BBox {
        x: b[0],
        y: b[1],
        w: (b[2] - b[0]).max(0.0),
        h: (b[3] - b[1]).max(0.0),
    }
}
