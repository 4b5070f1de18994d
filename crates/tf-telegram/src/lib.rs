//! Telegram adapter (teloxide).
//!
//! This crate implements the `tf-core` RemoteClient over the Telegram Bot API.
//! It never sleeps or retries on its own: flood-control answers are classified
//! and handed back to the engine, which owns pacing.

use async_trait::async_trait;
use teloxide::{net::Download, prelude::*, ApiError, RequestError};
use tracing::debug;

use tf_core::{
    bulk::types::OperationClass,
    domain::{ChatId, MediaRef, MessageId, MessageRef, UserId},
    remote::{
        port::RemoteClient,
        types::{DownloadedMedia, RemoteError, RemoteErrorKind, RemoteResult},
    },
};

#[derive(Clone)]
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn from_token(token: &str) -> Self {
        Self::new(Bot::new(token))
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }
}

/// Map a Bot API failure onto the engine's remote error categories.
pub fn classify_request_error(e: &RequestError) -> RemoteError {
    let kind = match e {
        RequestError::RetryAfter(wait) => return RemoteError::flood_wait(*wait),
        RequestError::Network(inner) if inner.is_timeout() => RemoteErrorKind::Timeout,
        RequestError::Network(_) | RequestError::Io(_) => RemoteErrorKind::Network,
        RequestError::Api(api) => classify_api_error(api),
        _ => RemoteErrorKind::Other,
    };
    RemoteError::new(kind, format!("telegram error: {e}"))
}

fn classify_api_error(api: &ApiError) -> RemoteErrorKind {
    match api {
        ApiError::BotBlocked
        | ApiError::UserDeactivated
        | ApiError::CantInitiateConversation
        | ApiError::CantTalkWithBots => RemoteErrorKind::PrivacyRestricted,
        ApiError::BotKicked => RemoteErrorKind::Forbidden,
        ApiError::ChatNotFound
        | ApiError::UserNotFound
        | ApiError::MessageToDeleteNotFound
        | ApiError::WrongFileId => RemoteErrorKind::NotFound,
        ApiError::MessageTextIsEmpty | ApiError::MessageIsTooLong => RemoteErrorKind::BadRequest,
        _ => RemoteErrorKind::Other,
    }
}

fn unsupported(action: &str) -> RemoteError {
    RemoteError::new(
        RemoteErrorKind::Forbidden,
        format!("bot accounts cannot {action}"),
    )
}

#[async_trait]
impl RemoteClient for TelegramClient {
    /// Bot accounts have no contact list and cannot archive dialogs.
    fn supports(&self, class: OperationClass) -> bool {
        !matches!(
            class,
            OperationClass::DeleteContact | OperationClass::ArchiveChat
        )
    }

    async fn send_message(&self, chat_id: ChatId, text: &str) -> RemoteResult<MessageRef> {
        let msg = self
            .bot
            .send_message(Self::tg_chat(chat_id), text.to_string())
            .await
            .map_err(|e| classify_request_error(&e))?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn download_media(
        &self,
        message: MessageRef,
        media: &MediaRef,
    ) -> RemoteResult<Option<DownloadedMedia>> {
        if media.file_id.is_empty() {
            return Ok(None);
        }

        let file = self
            .bot
            .get_file(media.file_id.clone())
            .await
            .map_err(|e| classify_request_error(&e))?;
        debug!("downloading {} for {message}", file.path);

        let mut bytes = Vec::new();
        self.bot
            .download_file(&file.path, &mut bytes)
            .await
            .map_err(|e| RemoteError::new(RemoteErrorKind::Network, format!("download failed: {e}")))?;

        let file_name = media.file_name.clone().or_else(|| {
            file.path
                .rsplit('/')
                .next()
                .filter(|name| !name.is_empty())
                .map(str::to_string)
        });
        Ok(Some(DownloadedMedia { bytes, file_name }))
    }

    async fn delete_message(&self, message: MessageRef) -> RemoteResult<()> {
        self.bot
            .delete_message(
                Self::tg_chat(message.chat_id),
                teloxide::types::MessageId(message.message_id.0),
            )
            .await
            .map_err(|e| classify_request_error(&e))?;
        Ok(())
    }

    async fn delete_contact(&self, _user_id: UserId) -> RemoteResult<()> {
        Err(unsupported("manage contacts"))
    }

    async fn archive_chat(&self, _chat_id: ChatId) -> RemoteResult<()> {
        Err(unsupported("archive chats"))
    }
}
