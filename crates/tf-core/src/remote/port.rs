use async_trait::async_trait;

use crate::{
    bulk::types::OperationClass,
    domain::{ChatId, MediaRef, MessageRef, UserId},
    remote::types::{DownloadedMedia, RemoteResult},
};

/// Account-level actions the bulk engine drives.
///
/// Adapters map their transport errors into `RemoteError` so the executor can
/// classify them (flood wait vs transient vs terminal) without knowing the
/// protocol underneath.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Whether this account type can perform `class` at all. Runs containing
    /// an unsupported class are rejected before any call is made.
    fn supports(&self, _class: OperationClass) -> bool {
        true
    }

    async fn send_message(&self, chat_id: ChatId, text: &str) -> RemoteResult<MessageRef>;

    /// `Ok(None)` means the message exists but carries nothing downloadable.
    async fn download_media(
        &self,
        message: MessageRef,
        media: &MediaRef,
    ) -> RemoteResult<Option<DownloadedMedia>>;

    async fn delete_message(&self, message: MessageRef) -> RemoteResult<()>;

    async fn delete_contact(&self, user_id: UserId) -> RemoteResult<()>;

    async fn archive_chat(&self, chat_id: ChatId) -> RemoteResult<()>;
}
