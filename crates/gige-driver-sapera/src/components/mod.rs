//! Driver components.
//!
//! - `sdk`: frame-grabber SDK boundary
//! - `resources`: scoped device, buffer and transfer handles
//! - `connection`: server discovery
//! - `features`: typed feature access
//! - `bridge`: property / feature bindings
//! - `acquisition`: host image, ROI and single-frame capture
//! - `sequence`: continuous acquisition worker

pub mod acquisition;
pub mod bridge;
pub mod connection;
pub mod features;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod resources;
pub mod sdk;
pub mod sequence;
