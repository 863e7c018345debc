//! gRPC-tensor transport: send an `InferInput` with raw little-endian f32
//! bytes, receive an `InferOutput`, parse the dtype-typed payload back into
//! boxes/scores/class ids.
//!
//! `tonic`'s client is async; the transport is confined to a small
//! current-thread runtime owned by this client so the rest of the pipeline
//! stays blocking, per the scheduler's own design.

use std::time::Duration;

use tonic::transport::Channel;

use crate::preprocess::PreparedInput;
use crate::proto::inference_server_client::InferenceServerClient;
use crate::proto::{InferInput, InferRequest, InferResponse};
use crate::{InferError, ModelConfig, RawOutput};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct GrpcClient {
    runtime: tokio::runtime::Runtime,
    client: InferenceServerClient<Channel>,
}

impl GrpcClient {
    pub fn connect(config: &vision_config::GlobalConfig) -> Result<Self, InferError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| InferError::Unavailable(e.to_string()))?;

        let endpoint = config.inference_server_url.clone();
        let client = runtime
            .block_on(async move {
                let channel = Channel::from_shared(endpoint)
                    .map_err(|e| e.to_string())?
                    .connect_timeout(REQUEST_TIMEOUT)
                    .connect()
                    .await
                    .map_err(|e| e.to_string())?;
                Ok::<_, String>(InferenceServerClient::new(channel))
            })
            .map_err(InferError::Unavailable)?;

        Ok(Self { runtime, client })
    }

    /// A cheap clone of the client handle (tonic clients share the
    /// underlying channel); used by the shared-memory transport to submit
    /// the inference call over the same connection.
    pub(crate) fn client_handle(&self) -> InferenceServerClient<Channel> {
        self.client.clone()
    }

    pub(crate) fn runtime_handle(&self) -> &tokio::runtime::Runtime {
        &self.runtime
    }
}

pub(crate) fn infer(
    client: &GrpcClient,
    model: &ModelConfig,
    prepared: &PreparedInput,
) -> Result<RawOutput, InferError> {
    let raw_data: Vec<u8> = prepared.tensor.iter().flat_map(|f| f.to_le_bytes()).collect();
    let channels = prepared.tensor.len()
        / (prepared.input_size as usize * prepared.input_size as usize);

    let input = InferInput {
        name: "images".to_string(),
        shape: vec![
            1,
            channels as i64,
            prepared.input_size as i64,
            prepared.input_size as i64,
        ],
        dtype: "FP32".to_string(),
        raw_data,
        shared_memory_region: String::new(),
        shared_memory_byte_size: 0,
    };

    let request = tonic::Request::new(InferRequest {
        model_id: model.model_id.clone(),
        inputs: vec![input],
    });

    // `&client.client` would need cloning to satisfy `&mut self` on the
    // generated client; tonic clients are cheap to clone (shared channel).
    let mut stub = client.client.clone();
    let response = client
        .runtime
        .block_on(async move { stub.infer(request).await })
        .map_err(|status| {
            if status.code() == tonic::Code::DeadlineExceeded {
                InferError::Timeout(REQUEST_TIMEOUT)
            } else {
                InferError::Unavailable(status.to_string())
            }
        })?
        .into_inner();

    raw_output_from_response(response)
}

pub(crate) fn raw_output_from_response(response: InferResponse) -> Result<RawOutput, InferError> {
    let output = response
        .outputs
        .into_iter()
        .next()
        .ok_or_else(|| InferError::Protocol("response had no outputs".to_string()))?;

    if output.dtype != "FP32" {
        return Err(InferError::Protocol(format!(
            "unsupported output dtype {}",
            output.dtype
        )));
    }
    if output.raw_data.len() % 4 != 0 {
        return Err(InferError::Protocol(
            "output byte length not a multiple of 4".to_string(),
        ));
    }

    let values: Vec<f32> = output
        .raw_data
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    // Expected layout: N detections x (x1, y1, x2, y2, score, class_id).
    if values.len() % 6 != 0 {
        return Err(InferError::Protocol(format!(
            "detection tensor length {} not a multiple of 6",
            values.len()
        )));
    }

    let mut boxes = Vec::new();
    let mut scores = Vec::new();
    let mut class_ids = Vec::new();
    for row in values.chunks_exact(6) {
        boxes.push([row[0], row[1], row[2], row[3]]);
        scores.push(row[4]);
        class_ids.push(row[5].round().max(0.0) as usize);
    }

    Ok(RawOutput {
        boxes,
        scores,
        class_ids,
    })
}
