//! HTTP+JSON transport: base64-encode the preprocessed tensor, POST to
//! `/{model_id}`, parse the JSON response. Simplest transport, highest
//! per-frame overhead; used for low-resolution models or servers without a
//! gRPC front end.

use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::preprocess::PreparedInput;
use crate::{InferError, ModelConfig, RawOutput};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpClient {
    pub fn connect(config: &vision_config::GlobalConfig) -> Result<Self, InferError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferError::Unavailable(e.to_string()))?;
        Ok(Self {
            base_url: config.inference_server_url.clone(),
            client,
        })
    }
}

#[derive(Serialize)]
struct InferHttpRequest {
    input_size: u32,
    channels: usize,
    tensor_b64: String,
}

#[derive(Deserialize)]
struct InferHttpResponse {
    boxes: Vec<[f32; 4]>,
    scores: Vec<f32>,
    class_ids: Vec<usize>,
}

pub(crate) fn infer(
    client: &HttpClient,
    model: &ModelConfig,
    prepared: &PreparedInput,
) -> Result<RawOutput, InferError> {
    let tensor_bytes: Vec<u8> = prepared.tensor.iter().flat_map(|f| f.to_le_bytes()).collect();
    let body = InferHttpRequest {
        input_size: prepared.input_size,
        channels: prepared.tensor.len() / (prepared.input_size as usize * prepared.input_size as usize),
        tensor_b64: base64::engine::general_purpose::STANDARD.encode(tensor_bytes),
    };

    let url = format!("{}/{}", client.base_url.trim_end_matches('/'), model.model_id);
    let response = client
        .client
        .post(&url)
        .json(&body)
        .send()
        .map_err(|e| {
            if e.is_timeout() {
                InferError::Timeout(REQUEST_TIMEOUT)
            } else {
                InferError::Unavailable(e.to_string())
            }
        })?;

    if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
        return Err(InferError::Unavailable(format!("{url} returned 503")));
    }
    if !response.status().is_success() {
        return Err(InferError::Protocol(format!(
            "{url} returned {}",
            response.status()
        )));
    }

    let parsed: InferHttpResponse = response
        .json()
        .map_err(|e| InferError::Protocol(e.to_string()))?;

    Ok(RawOutput {
        boxes: parsed.boxes,
        scores: parsed.scores,
        class_ids: parsed.class_ids,
    })
}
