//! Camera Discovery
//!
//! Finds frame-grabber servers that expose an acquisition device and picks
//! the one to open.

use crate::components::resources::AcqDevice;
use crate::components::sdk::{AcquisitionSdk, ServerInfo};
use gige_core::error::{AdapterError, AdapterResult};
use std::sync::Arc;

/// Discovery and device opening for one driver instance.
pub struct SaperaConnection {
    sdk: Arc<dyn AcquisitionSdk>,
}

impl SaperaConnection {
    /// Wrap an SDK instance.
    pub fn new(sdk: Arc<dyn AcquisitionSdk>) -> Self {
        Self { sdk }
    }

    /// Servers exposing at least one acquisition device, in discovery order.
    pub fn list_available_cameras(&self) -> AdapterResult<Vec<ServerInfo>> {
        let servers = self
            .sdk
            .detect_servers()
            .map_err(|e| AdapterError::Discovery(e.to_string()))?;
        let total = servers.len();
        let cameras: Vec<ServerInfo> = servers
            .into_iter()
            .filter(|s| s.acq_device_count > 0)
            .collect();
        tracing::debug!(total, cameras = cameras.len(), "Server discovery finished");
        Ok(cameras)
    }

    /// Pick `preferred` if it was discovered, otherwise the first camera.
    pub fn select<'a>(
        cameras: &'a [ServerInfo],
        preferred: Option<&str>,
    ) -> AdapterResult<&'a ServerInfo> {
        let first = cameras.first().ok_or_else(|| {
            AdapterError::Discovery("no server exposes an acquisition device".to_string())
        })?;
        match preferred {
            Some(name) => match cameras.iter().find(|s| s.name == name) {
                Some(server) => Ok(server),
                None => {
                    tracing::warn!(
                        requested = name,
                        using = %first.name,
                        "Configured server not found, using first available camera"
                    );
                    Ok(first)
                }
            },
            None => Ok(first),
        }
    }

    /// Open the acquisition device of `server`.
    pub fn open(&self, server: &ServerInfo) -> AdapterResult<AcqDevice> {
        tracing::info!(server = %server.name, "Opening acquisition device");
        AcqDevice::open(self.sdk.clone(), &server.name)
    }
}
