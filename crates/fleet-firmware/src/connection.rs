//! Native device connections
//!
//! The RPC transport is supplied by the caller through [`ConnectionProvider`].
//! A connection is released when its box is dropped, which covers normal
//! return, early error return and unwinding alike.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::FirmwareError;
use crate::model::{FirmwareStatus, UpdateSource};

/// Reply to the native "check for update" RPC
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeUpdateCheck {
    /// Running firmware version
    pub current_version: String,

    /// Stable version offered, if any
    pub stable: Option<String>,

    /// Beta version offered, if any
    pub beta: Option<String>,

    /// Hardware model
    pub model: String,

    /// Device-reported identifier
    pub device_id: String,

    /// Device generation
    pub generation: u32,
}

/// An open RPC session with one native device
#[async_trait]
pub trait DeviceConnection: Send + Sync {
    /// Ask the device which firmware versions are on offer
    async fn check_for_update(&self) -> Result<NativeUpdateCheck, FirmwareError>;

    /// Start installing firmware from `source`; returns once the device accepted
    async fn start_update(&self, source: &UpdateSource) -> Result<(), FirmwareError>;

    /// Read the current update status
    async fn firmware_status(&self) -> Result<FirmwareStatus, FirmwareError>;

    /// Restore the previously installed firmware
    async fn rollback(&self) -> Result<(), FirmwareError>;
}

/// Opens connections to native devices
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Open a connection to the device known as `identifier`
    async fn connect(&self, identifier: &str) -> Result<Box<dyn DeviceConnection>, FirmwareError>;
}

/// Run `f` against a connection scoped to this call.
///
/// ```ignore
/// let check = with_connection(provider, "10.0.0.2", |conn| {
///     Box::pin(async move { conn.check_for_update().await })
/// })
/// .await?;
/// ```
pub async fn with_connection<T, F>(
    provider: &dyn ConnectionProvider,
    identifier: &str,
    f: F,
) -> Result<T, FirmwareError>
where
    F: for<'c> FnOnce(&'c dyn DeviceConnection) -> BoxFuture<'c, Result<T, FirmwareError>>,
{
    let connection = provider.connect(identifier).await?;
    let result = f(connection.as_ref()).await;
    drop(connection);
    result
}
