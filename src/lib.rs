//! Sapera GigE camera adapter.
//!
//! The driver lives in [`gige_driver_sapera`], the host-facing types and
//! capability traits in [`gige_core`]. This crate adds application
//! configuration and logging, and ships the `sapera-gige` CLI.
//!
//! # Example
//! ```no_run
//! use sapera_gige::prelude::*;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = AppConfig::load()?;
//! let mut camera = SaperaGigE::new_mock(config.camera.clone());
//! camera.initialize().await?;
//! camera.set_exposure(5.0).await?;
//! camera.snap_image().await?;
//! let pixels = camera.get_image_buffer()?.to_vec();
//! camera.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;

pub use gige_core;
pub use gige_driver_sapera;

/// Common imports for hosts and tools.
pub mod prelude {
    pub use crate::config::{AppConfig, ConfigError};
    pub use gige_core::capabilities::{
        Camera, Device, ExposureControl, ImageSource, Parameterized, SequenceAcquisition,
        SequenceSettings,
    };
    pub use gige_core::data::{Frame, Roi};
    pub use gige_core::error::{AdapterError, AdapterResult};
    pub use gige_core::property::{PropertyType, PropertyValue};
    pub use gige_driver_sapera::{names, SaperaConfig, SaperaGigE};
}
