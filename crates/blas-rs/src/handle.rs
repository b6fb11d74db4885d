use std::fmt;
use std::sync::Arc;

use crate::device::{Device, Stream};
use crate::env::runtime_config;
use crate::kernel::registry::resolve_kernels;
use crate::kernel::BlasKernels;
use crate::status::BlasResult;
use crate::types::{PointerMode, ValidationMode};

/// Execution context: one active stream, a pointer mode and the kernel set work runs on.
///
/// A handle is not internally synchronized. Setters take `&mut self`, so sharing one handle
/// between threads requires external locking; independent threads should use their own.
pub struct Handle {
    device: Device,
    stream: Stream,
    pointer_mode: PointerMode,
    validation_mode: ValidationMode,
    kernels: Arc<dyn BlasKernels>,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("stream", &self.stream)
            .field("pointer_mode", &self.pointer_mode)
            .field("validation_mode", &self.validation_mode)
            .field("kernels", &self.kernels.name())
            .finish()
    }
}

impl Handle {
    /// Creates a handle on the global device with a fresh default stream, `Host` pointer mode
    /// and the configured kernel set.
    pub fn create() -> BlasResult<Self> {
        Self::create_on(Device::global())
    }

    /// Creates a handle on a specific device.
    pub fn create_on(device: Device) -> BlasResult<Self> {
        let config = runtime_config();
        let kernels = resolve_kernels(&config.kernels);
        let mut handle = Self::with_kernels(device, kernels)?;
        handle.validation_mode = config.validation_mode;
        Ok(handle)
    }

    /// Creates a handle that runs on the given kernel set.
    pub fn with_kernels(device: Device, kernels: Arc<dyn BlasKernels>) -> BlasResult<Self> {
        let stream = Stream::new()?;
        log::info!(
            "created handle on stream {} with {} kernels",
            stream.id(),
            kernels.name()
        );
        Ok(Self {
            device,
            stream,
            pointer_mode: PointerMode::Host,
            validation_mode: ValidationMode::Permissive,
            kernels,
        })
    }

    /// Releases the handle. Work already enqueued still runs to completion.
    pub fn destroy(self) {
        drop(self);
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Replaces the active stream. Pending work on the previous stream is not waited for.
    pub fn set_stream(&mut self, stream: Stream) {
        log::debug!("handle stream {} -> {}", self.stream.id(), stream.id());
        self.stream = stream;
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn set_pointer_mode(&mut self, mode: PointerMode) {
        self.pointer_mode = mode;
    }

    pub fn pointer_mode(&self) -> PointerMode {
        self.pointer_mode
    }

    pub fn set_validation_mode(&mut self, mode: ValidationMode) {
        self.validation_mode = mode;
    }

    pub fn validation_mode(&self) -> ValidationMode {
        self.validation_mode
    }

    pub fn set_kernels(&mut self, kernels: Arc<dyn BlasKernels>) {
        log::info!("handle kernels {} -> {}", self.kernels.name(), kernels.name());
        self.kernels = kernels;
    }

    pub fn kernels(&self) -> &Arc<dyn BlasKernels> {
        &self.kernels
    }

    /// Waits for all work on the active stream; see [`Stream::synchronize`].
    pub fn synchronize(&self) -> BlasResult<()> {
        self.stream.synchronize()
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        log::info!("destroyed handle on stream {}", self.stream.id());
    }
}
