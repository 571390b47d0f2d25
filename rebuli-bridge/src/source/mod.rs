pub mod mock;
pub mod mqtt;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::pipeline::PipelineInput;

/// Trait for receiving raw RF messages.
///
/// Implementations spawn background tasks that forward every inbound
/// message as [`PipelineInput::Payload`] on `tx`. The tasks run until the
/// cancellation token is cancelled or the pipeline goes away.
#[async_trait]
pub trait CodeSource: Send + Sync + 'static {
    /// Error type for this source implementation.
    type Error: std::error::Error + Send + Sync + 'static;

    async fn start(
        &self,
        tx: mpsc::Sender<PipelineInput>,
        cancel: CancellationToken,
    ) -> Result<(), Self::Error>;
}
