pub mod mock;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::storage::models::{NewAccessLog, NewSample};

/// Data produced by the cabinet's field devices.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Sample(NewSample),
    /// A device access decision taken locally.
    Access(NewAccessLog),
}

/// Trait for sources of field data.
///
/// Implementations spawn background tasks that send readings to an mpsc
/// channel until the cancellation token fires.
#[async_trait]
pub trait SensorSource: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Reading>, Self::Error>;
}
