//! Shared-memory + gRPC transport: the preprocessed tensor is written into a
//! POSIX shared-memory region, registered with the server over its HTTP
//! registration protocol, then the inference request references the region
//! by name instead of carrying the tensor inline. Highest throughput of the
//! three transports for large images.
//!
//! Lifecycle: `create(name, size) -> fd -> mmap -> write -> register ->
//! infer -> unregister -> munmap -> shm_unlink`. [`ShmRegionGuard`] is the
//! scoped handle: it guarantees the teardown half runs on every exit path,
//! including an error partway through, and guards against double-unregister
//! with a one-shot flag.

use std::os::fd::{FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use memmap2::MmapMut;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use serde::Serialize;

use crate::grpc::GrpcClient;
use crate::preprocess::PreparedInput;
use crate::proto::{InferInput, InferRequest};
use crate::{InferError, ModelConfig, RawOutput};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
static REGION_COUNTER: AtomicU64 = AtomicU64::new(0);

fn map_send_err(e: reqwest::Error) -> InferError {
    if e.is_timeout() {
        InferError::Timeout(REQUEST_TIMEOUT)
    } else {
        InferError::Unavailable(e.to_string())
    }
}

pub struct SharedMemoryClient {
    http: reqwest::blocking::Client,
    triton_base_url: String,
    grpc: GrpcClient,
}

impl SharedMemoryClient {
    pub fn connect(config: &vision_config::GlobalConfig) -> Result<Self, InferError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferError::Unavailable(e.to_string()))?;
        let triton_base_url = config
            .triton_server_url
            .clone()
            .unwrap_or_else(|| config.inference_server_url.clone());
        let grpc = GrpcClient::connect(config)?;
        Ok(Self {
            http,
            triton_base_url,
            grpc,
        })
    }
}

#[derive(Serialize)]
struct RegisterRegionRequest {
    key: String,
    offset: u64,
    byte_size: u64,
}

#[derive(Serialize)]
struct RegisterRegionRequestLegacy {
    name: String,
    key: String,
    offset: u64,
    byte_size: u64,
}

/// Owns the OS-level shared-memory resources and the registration state
/// with the remote server. Every exit path — success, inference error, or
/// an early `?` during setup — runs teardown through `Drop`.
struct ShmRegionGuard<'a> {
    name: String,
    mmap: Option<MmapMut>,
    registered: bool,
    unregistered: AtomicBool,
    client: &'a SharedMemoryClient,
}

impl<'a> ShmRegionGuard<'a> {
    fn create(client: &'a SharedMemoryClient, byte_size: usize) -> Result<Self, InferError> {
        let name = format!(
            "/vision-infer-{}-{}",
            std::process::id(),
            REGION_COUNTER.fetch_add(1, Ordering::Relaxed)
        );

        let fd = shm_open(
            name.as_str(),
            OFlag::O_CREAT | OFlag::O_RDWR | OFlag::O_EXCL,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|e| InferError::Unavailable(format!("shm_open({name}): {e}")))?;
        let fd: OwnedFd = unsafe { OwnedFd::from_raw_fd(fd) };

        ftruncate(&fd, byte_size as i64)
            .map_err(|e| InferError::Unavailable(format!("ftruncate({name}): {e}")))?;

        let file = std::fs::File::from(fd);
        let mmap = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| InferError::Unavailable(format!("mmap({name}): {e}")))?;

        Ok(Self {
            name,
            mmap: Some(mmap),
            registered: false,
            unregistered: AtomicBool::new(false),
            client,
        })
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), InferError> {
        let mmap = self
            .mmap
            .as_mut()
            .expect("mmap present until teardown");
        if bytes.len() > mmap.len() {
            return Err(InferError::Unavailable(format!(
                "tensor ({} bytes) exceeds region {} ({} bytes)",
                bytes.len(),
                self.name,
                mmap.len()
            )));
        }
        mmap[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Triton-style registration: try the per-region path first, fall back
    /// to the legacy flat endpoint on 404.
    fn register(&mut self, byte_size: u64) -> Result<(), InferError> {
        let region_url = format!(
            "{}/v2/systemsharedmemory/region/{}/register",
            self.client.triton_base_url.trim_end_matches('/'),
            self.name
        );
        let body = RegisterRegionRequest {
            key: self.name.clone(),
            offset: 0,
            byte_size,
        };
        let response = self
            .client
            .http
            .post(&region_url)
            .json(&body)
            .send()
            .map_err(map_send_err)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            let legacy_url = format!(
                "{}/v2/systemsharedmemory/register",
                self.client.triton_base_url.trim_end_matches('/')
            );
            let legacy_body = RegisterRegionRequestLegacy {
                name: self.name.clone(),
                key: self.name.clone(),
                offset: 0,
                byte_size,
            };
            let legacy_response = self
                .client
                .http
                .post(&legacy_url)
                .json(&legacy_body)
                .send()
                .map_err(map_send_err)?;
            if !legacy_response.status().is_success() {
                return Err(InferError::Protocol(format!(
                    "{legacy_url} returned {}",
                    legacy_response.status()
                )));
            }
        } else if !response.status().is_success() {
            return Err(InferError::Protocol(format!(
                "{region_url} returned {}",
                response.status()
            )));
        }

        self.registered = true;
        Ok(())
    }

    fn unregister(&self) {
        if self.unregistered.swap(true, Ordering::SeqCst) || !self.registered {
            return;
        }
        let url = format!(
            "{}/v2/systemsharedmemory/region/{}/unregister",
            self.client.triton_base_url.trim_end_matches('/'),
            self.name
        );
        if let Err(e) = self.client.http.post(&url).send() {
            log::warn!("failed to unregister shared-memory region {}: {e}", self.name);
        }
    }
}

impl<'a> Drop for ShmRegionGuard<'a> {
    fn drop(&mut self) {
        self.unregister();
        // Dropping `mmap` unmaps it; `shm_unlink` only removes the name,
        // safe to call after.
        self.mmap.take();
        if let Err(e) = shm_unlink(self.name.as_str()) {
            if e != nix::errno::Errno::ENOENT {
                log::warn!("failed to shm_unlink {}: {e}", self.name);
            }
        }
    }
}

pub(crate) fn infer(
    client: &SharedMemoryClient,
    model: &ModelConfig,
    prepared: &PreparedInput,
) -> Result<RawOutput, InferError> {
    let tensor_bytes: Vec<u8> = prepared.tensor.iter().flat_map(|f| f.to_le_bytes()).collect();
    let byte_size = tensor_bytes.len();

    let mut region = ShmRegionGuard::create(client, byte_size)?;
    region.write(&tensor_bytes)?;
    region.register(byte_size as u64)?;

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
        raw_data: Vec::new(),
        shared_memory_region: region.name.clone(),
        shared_memory_byte_size: byte_size as u64,
    };

    let request = tonic::Request::new(InferRequest {
        model_id: model.model_id.clone(),
        inputs: vec![input],
    });

    let mut stub = client.grpc.client_handle();
    let response = client
        .grpc
        .runtime_handle()
        .block_on(async move { stub.infer(request).await })
        .map_err(|status| {
            if status.code() == tonic::Code::DeadlineExceeded {
                InferError::Timeout(REQUEST_TIMEOUT)
            } else {
                InferError::Unavailable(status.to_string())
            }
        })?
        .into_inner();

    // `region` drops here regardless of outcome, running unregister/munmap/unlink.
    crate::grpc::raw_output_from_response(response)
}
