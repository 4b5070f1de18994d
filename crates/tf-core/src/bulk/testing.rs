//! Scripted fakes shared by the engine tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::{
    bulk::types::{OperationClass, Target},
    domain::{ChatId, MediaRef, MessageId, MessageRef, UserId},
    remote::{
        port::RemoteClient,
        types::{DownloadedMedia, RemoteError, RemoteErrorKind, RemoteResult},
    },
    sinks::MediaStore,
    Result,
};

#[derive(Clone, Copy, Debug)]
pub enum Step {
    Ok,
    NoMedia,
    Fail(RemoteErrorKind),
}

impl Step {
    pub fn flood(secs: u64) -> Self {
        Step::Fail(RemoteErrorKind::FloodWait(Duration::from_secs(secs)))
    }
}

/// Remote whose answers are scripted per subject id; unscripted calls succeed.
#[derive(Default)]
pub struct ScriptedRemote {
    script: Mutex<HashMap<i64, VecDeque<Step>>>,
    /// Optional time spent inside every call.
    latency: Duration,
    calls: Mutex<Vec<(i64, Instant)>>,
    unsupported: Vec<OperationClass>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Remote that refuses the given classes up front.
    pub fn without(classes: impl IntoIterator<Item = OperationClass>) -> Self {
        Self {
            unsupported: classes.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn script(&self, subject: i64, steps: impl IntoIterator<Item = Step>) {
        self.script
            .lock()
            .unwrap()
            .entry(subject)
            .or_default()
            .extend(steps);
    }

    pub fn calls(&self) -> Vec<(i64, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, subject: i64) -> Vec<Instant> {
        self.calls()
            .into_iter()
            .filter(|(s, _)| *s == subject)
            .map(|(_, at)| at)
            .collect()
    }

    async fn answer(&self, subject: i64) -> RemoteResult<Step> {
        self.calls.lock().unwrap().push((subject, Instant::now()));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let step = self
            .script
            .lock()
            .unwrap()
            .get_mut(&subject)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Ok);
        match step {
            Step::Fail(kind) => Err(RemoteError::new(kind, format!("scripted {kind:?}"))),
            other => Ok(other),
        }
    }
}

#[async_trait]
impl RemoteClient for ScriptedRemote {
    fn supports(&self, class: OperationClass) -> bool {
        !self.unsupported.contains(&class)
    }

    async fn send_message(&self, chat_id: ChatId, _text: &str) -> RemoteResult<MessageRef> {
        self.answer(chat_id.0).await?;
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(1),
        })
    }

    async fn download_media(
        &self,
        message: MessageRef,
        _media: &MediaRef,
    ) -> RemoteResult<Option<DownloadedMedia>> {
        match self.answer(i64::from(message.message_id.0)).await? {
            Step::NoMedia => Ok(None),
            _ => Ok(Some(DownloadedMedia {
                bytes: vec![0xFF, 0xD8],
                file_name: None,
            })),
        }
    }

    async fn delete_message(&self, message: MessageRef) -> RemoteResult<()> {
        self.answer(i64::from(message.message_id.0)).await.map(|_| ())
    }

    async fn delete_contact(&self, user_id: UserId) -> RemoteResult<()> {
        self.answer(user_id.0).await.map(|_| ())
    }

    async fn archive_chat(&self, chat_id: ChatId) -> RemoteResult<()> {
        self.answer(chat_id.0).await.map(|_| ())
    }
}

/// Media store that keeps byte counts in memory.
#[derive(Default)]
pub struct MemoryMediaStore {
    pub stored: Mutex<Vec<(MessageRef, usize)>>,
    pub fail: bool,
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn store(
        &self,
        _target: &Target,
        message: MessageRef,
        _media: &MediaRef,
        downloaded: DownloadedMedia,
    ) -> Result<String> {
        if self.fail {
            return Err(crate::Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.stored
            .lock()
            .unwrap()
            .push((message, downloaded.bytes.len()));
        Ok(format!("mem://{message}"))
    }
}
