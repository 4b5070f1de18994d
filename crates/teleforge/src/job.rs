//! Job files: one JSON object naming the operation plus its candidates.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use tf_core::{
    bulk::targets::TargetSource,
    candidates::{
        archive_targets, download_targets, message_targets, service_message_targets,
        stale_contact_targets, ArchiveRule, ChatMember, ChatMessage, Contact, Dialog,
        DownloadFilter,
    },
};

const DEFAULT_INACTIVE_MONTHS: u32 = 6;

#[derive(Debug, Deserialize)]
#[serde(tag = "operation", rename_all = "kebab-case")]
pub enum Job {
    SendMessage {
        text: String,
        members: Vec<ChatMember>,
        #[serde(default)]
        sample: Option<Sample>,
    },
    DownloadMedia {
        chat_name: String,
        messages: Vec<ChatMessage>,
        #[serde(default)]
        filter: DownloadFilter,
    },
    /// Delete join notices, pins and other service messages from a chat.
    CleanServiceMessages {
        messages: Vec<ChatMessage>,
    },
    DeleteContacts {
        contacts: Vec<Contact>,
        #[serde(default = "default_inactive_months")]
        inactive_months: u32,
    },
    ArchiveChats {
        dialogs: Vec<Dialog>,
        rule: ArchiveRule,
    },
}

/// Random subset of the eligible members.
#[derive(Debug, Deserialize)]
pub struct Sample {
    pub count: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_inactive_months() -> u32 {
    DEFAULT_INACTIVE_MONTHS
}

impl Job {
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read job file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid job file {}", path.display()))
    }

    pub fn targets(&self, now: DateTime<Utc>) -> tf_core::Result<TargetSource> {
        Ok(match self {
            Job::SendMessage {
                text,
                members,
                sample,
            } => {
                let eligible = message_targets(members, text);
                match sample {
                    Some(s) => eligible.sampled(s.count, s.seed)?,
                    None => eligible,
                }
            }
            Job::DownloadMedia {
                messages, filter, ..
            } => download_targets(messages, filter),
            Job::CleanServiceMessages { messages } => service_message_targets(messages),
            Job::DeleteContacts {
                contacts,
                inactive_months,
            } => stale_contact_targets(contacts, *inactive_months, now)?,
            Job::ArchiveChats { dialogs, rule } => archive_targets(dialogs, *rule, now)?,
        })
    }

    /// Folder name for downloaded media.
    pub fn media_folder(&self) -> &str {
        match self {
            Job::DownloadMedia { chat_name, .. } => chat_name,
            _ => "media",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tf_core::{bulk::types::OperationClass, candidates::MediaFilter, domain::UserId};

    fn parse(json: &str) -> Job {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn send_job_samples_eligible_members() {
        let job = parse(
            r#"{
                "operation": "send-message",
                "text": "hello",
                "members": [
                    {"user_id": 1, "name": "a"},
                    {"user_id": 2, "is_bot": true},
                    {"user_id": 3},
                    {"user_id": 4, "is_deleted": true},
                    {"user_id": 5}
                ],
                "sample": {"count": 2, "seed": 7}
            }"#,
        );

        let targets = job.targets(Utc::now()).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(job.media_folder(), "media");
    }

    #[test]
    fn oversized_sample_is_rejected() {
        let job = parse(
            r#"{"operation": "send-message", "text": "x",
                "members": [{"user_id": 1}], "sample": {"count": 3}}"#,
        );
        assert!(matches!(
            job.targets(Utc::now()),
            Err(tf_core::Error::InvalidPlan(_))
        ));
    }

    #[test]
    fn download_job_carries_filter_and_folder() {
        let job = parse(
            r#"{
                "operation": "download-media",
                "chat_name": "Team Chat",
                "filter": {"media": "photos", "sender": 9},
                "messages": [
                    {"message": {"chat_id": -100, "message_id": 1}, "sender": 9,
                     "media": {"file_id": "a", "kind": "photo"}},
                    {"message": {"chat_id": -100, "message_id": 2}, "sender": 8,
                     "media": {"file_id": "b", "kind": "photo"}}
                ]
            }"#,
        );

        match &job {
            Job::DownloadMedia { filter, .. } => {
                assert_eq!(filter.media, MediaFilter::Photos);
                assert_eq!(filter.sender, Some(UserId(9)));
            }
            other => panic!("unexpected job {other:?}"),
        }
        assert_eq!(job.targets(Utc::now()).unwrap().len(), 1);
        assert_eq!(job.media_folder(), "Team Chat");
    }

    #[test]
    fn contact_and_archive_jobs_parse() {
        let contacts = parse(
            r#"{"operation": "delete-contacts",
                "contacts": [{"user_id": 1, "is_deleted": true}, {"user_id": 2}]}"#,
        );
        assert!(matches!(
            contacts,
            Job::DeleteContacts {
                inactive_months: DEFAULT_INACTIVE_MONTHS,
                ..
            }
        ));
        assert_eq!(contacts.targets(Utc::now()).unwrap().len(), 1);

        let archive = parse(
            r#"{"operation": "archive-chats", "rule": {"rule": "channels"},
                "dialogs": [{"chat_id": -1, "kind": "channel"}, {"chat_id": -2, "kind": "group"}]}"#,
        );
        assert_eq!(archive.targets(Utc::now()).unwrap().len(), 1);
    }

    #[test]
    fn out_of_range_inactivity_is_rejected() {
        let job = parse(
            r#"{"operation": "archive-chats", "rule": {"rule": "inactive-for", "days": 4294967295},
                "dialogs": [{"chat_id": -1, "kind": "group", "last_message_at": "2024-01-01T00:00:00Z"}]}"#,
        );
        assert!(matches!(
            job.targets(Utc::now()),
            Err(tf_core::Error::InvalidPlan(_))
        ));
    }

    #[test]
    fn clean_job_targets_service_messages_only() {
        let job = parse(
            r#"{
                "operation": "clean-service-messages",
                "messages": [
                    {"message": {"chat_id": -100, "message_id": 1}, "is_service": true},
                    {"message": {"chat_id": -100, "message_id": 2}},
                    {"message": {"chat_id": -100, "message_id": 3}, "is_service": true}
                ]
            }"#,
        );

        let targets = job.targets(Utc::now()).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(
            targets.classes(),
            vec![OperationClass::DeleteMessage]
        );
    }
}
