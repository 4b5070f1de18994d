//! Already-fetched candidate lists (members, messages, contacts, dialogs) and
//! the filters that turn them into targets.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    bulk::{targets::TargetSource, types::Target},
    domain::{ChatId, MediaKind, MediaRef, MessageRef, UserId},
    errors::Error,
    Result,
};

/// `now` minus `days`, or an error when that lies outside the calendar.
fn days_before(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>> {
    ChronoDuration::try_days(days)
        .and_then(|span| now.checked_sub_signed(span))
        .ok_or_else(|| Error::InvalidPlan(format!("{days} days before {now} is out of range")))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMember {
    pub user_id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub is_deleted: bool,
}

impl ChatMember {
    pub fn display_name(&self) -> String {
        match (&self.name, &self.username) {
            (Some(name), _) if !name.trim().is_empty() => name.clone(),
            (_, Some(username)) => format!("@{username}"),
            _ => self.user_id.to_string(),
        }
    }
}

/// Send `text` to every member that is a real, live person.
pub fn message_targets(members: &[ChatMember], text: &str) -> TargetSource {
    members
        .iter()
        .filter(|m| !m.is_bot && !m.is_deleted)
        .map(|m| Target::send_message(m.user_id, text).with_label(m.display_name()))
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message: MessageRef,
    #[serde(default)]
    pub sender: Option<UserId>,
    #[serde(default)]
    pub is_service: bool,
    #[serde(default)]
    pub media: Option<MediaRef>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFilter {
    #[default]
    All,
    Photos,
    Videos,
    Audio,
    /// Documents that are neither video nor audio.
    Documents,
}

impl MediaFilter {
    pub fn matches(self, media: &MediaRef) -> bool {
        let mime = media.mime_type.as_deref().unwrap_or("");
        match (self, media.kind) {
            (MediaFilter::All, _) => true,
            (MediaFilter::Photos, kind) => kind == MediaKind::Photo,
            (_, MediaKind::Photo) => false,
            (MediaFilter::Videos, _) => mime.starts_with("video/"),
            (MediaFilter::Audio, _) => mime.starts_with("audio/"),
            (MediaFilter::Documents, _) => {
                !mime.starts_with("video/") && !mime.starts_with("audio/")
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadFilter {
    #[serde(default)]
    pub media: MediaFilter,
    /// Only messages sent by this user.
    #[serde(default)]
    pub sender: Option<UserId>,
}

pub fn download_targets(messages: &[ChatMessage], filter: &DownloadFilter) -> TargetSource {
    messages
        .iter()
        .filter(|m| !m.is_service)
        .filter(|m| filter.sender.is_none() || m.sender == filter.sender)
        .filter_map(|m| {
            let media = m.media.as_ref().filter(|media| filter.media.matches(media))?;
            Some(Target::download_media(m.message, media.clone()))
        })
        .collect()
}

/// Join notices, pins and other service messages, for deletion.
pub fn service_message_targets(messages: &[ChatMessage]) -> TargetSource {
    messages
        .iter()
        .filter(|m| m.is_service)
        .map(|m| Target::delete_message(m.message))
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub user_id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
    /// Last time the contact was seen online, when the service shares it.
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Deleted accounts first, then contacts last seen more than
/// `inactive_months` (30-day months) before `now`.
pub fn stale_contact_targets(
    contacts: &[Contact],
    inactive_months: u32,
    now: DateTime<Utc>,
) -> Result<TargetSource> {
    let cutoff = days_before(now, i64::from(inactive_months) * 30)?;
    let deleted = contacts.iter().filter(|c| c.is_deleted);
    let inactive = contacts
        .iter()
        .filter(|c| !c.is_deleted && c.last_seen.is_some_and(|seen| seen < cutoff));

    Ok(deleted
        .chain(inactive)
        .map(|c| {
            let target = Target::delete_contact(c.user_id);
            match &c.name {
                Some(name) => target.with_label(name.clone()),
                None => target,
            }
        })
        .collect())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogKind {
    Private,
    Group,
    Channel,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialog {
    pub chat_id: ChatId,
    #[serde(default)]
    pub title: Option<String>,
    pub kind: DialogKind,
    #[serde(default)]
    pub muted_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "kebab-case")]
pub enum ArchiveRule {
    /// Mute deadline still in the future.
    Muted,
    /// No message in the last `days` days.
    InactiveFor { days: u32 },
    Channels,
    Groups,
}

impl ArchiveRule {
    pub fn matches(self, dialog: &Dialog, now: DateTime<Utc>) -> Result<bool> {
        Ok(match self {
            ArchiveRule::Muted => dialog.muted_until.is_some_and(|until| until > now),
            ArchiveRule::InactiveFor { days } => {
                let cutoff = days_before(now, i64::from(days))?;
                dialog.last_message_at.is_some_and(|at| at < cutoff)
            }
            ArchiveRule::Channels => dialog.kind == DialogKind::Channel,
            ArchiveRule::Groups => dialog.kind == DialogKind::Group,
        })
    }
}

pub fn archive_targets(
    dialogs: &[Dialog],
    rule: ArchiveRule,
    now: DateTime<Utc>,
) -> Result<TargetSource> {
    let mut selected = Vec::new();
    for dialog in dialogs {
        if !rule.matches(dialog, now)? {
            continue;
        }
        let target = Target::archive_chat(dialog.chat_id);
        selected.push(match &dialog.title {
            Some(title) => target.with_label(title.clone()),
            None => target,
        });
    }
    Ok(TargetSource::new(selected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bulk::types::TargetPayload, domain::MessageId};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn member(id: i64, is_bot: bool, is_deleted: bool) -> ChatMember {
        ChatMember {
            user_id: UserId(id),
            name: Some(format!("user {id}")),
            username: None,
            is_bot,
            is_deleted,
        }
    }

    fn message(id: i32, media: Option<MediaRef>) -> ChatMessage {
        ChatMessage {
            message: MessageRef {
                chat_id: ChatId(-10),
                message_id: MessageId(id),
            },
            sender: Some(UserId(i64::from(id % 2))),
            is_service: false,
            media,
        }
    }

    fn doc(mime: &str) -> Option<MediaRef> {
        Some(MediaRef {
            file_id: mime.to_string(),
            kind: MediaKind::Document,
            mime_type: Some(mime.to_string()),
            file_name: None,
        })
    }

    fn photo() -> Option<MediaRef> {
        Some(MediaRef {
            file_id: "p".to_string(),
            kind: MediaKind::Photo,
            mime_type: None,
            file_name: None,
        })
    }

    #[test]
    fn bots_and_deleted_members_are_not_messaged() {
        let members = vec![
            member(1, false, false),
            member(2, true, false),
            member(3, false, true),
            member(4, false, false),
        ];
        let src = message_targets(&members, "hi");

        let ids: Vec<_> = src.iter().map(|t| t.id.0.clone()).collect();
        assert_eq!(ids, vec!["send-message:1", "send-message:4"]);
        assert_eq!(src.iter().next().unwrap().label.as_deref(), Some("user 1"));
    }

    #[test]
    fn media_filter_follows_mime_types() {
        let messages = vec![
            message(1, photo()),
            message(2, doc("video/mp4")),
            message(3, doc("audio/ogg")),
            message(4, doc("application/pdf")),
            message(5, None),
            ChatMessage {
                is_service: true,
                ..message(6, photo())
            },
        ];
        let pick = |media| {
            download_targets(
                &messages,
                &DownloadFilter {
                    media,
                    sender: None,
                },
            )
            .len()
        };

        assert_eq!(pick(MediaFilter::All), 4);
        assert_eq!(pick(MediaFilter::Photos), 1);
        assert_eq!(pick(MediaFilter::Videos), 1);
        assert_eq!(pick(MediaFilter::Audio), 1);
        assert_eq!(pick(MediaFilter::Documents), 1);
    }

    #[test]
    fn sender_filter_keeps_only_that_sender() {
        let messages: Vec<_> = (1..=6).map(|i| message(i, photo())).collect();
        let src = download_targets(
            &messages,
            &DownloadFilter {
                media: MediaFilter::All,
                sender: Some(UserId(1)),
            },
        );

        assert_eq!(src.len(), 3);
        assert!(src.iter().all(|t| matches!(
            &t.payload,
            TargetPayload::DownloadMedia { message, .. } if message.message_id.0 % 2 == 1
        )));
    }

    #[test]
    fn stale_contacts_are_deleted_then_inactive() {
        let contacts = vec![
            Contact {
                user_id: UserId(1),
                name: None,
                is_deleted: false,
                last_seen: Some(now() - ChronoDuration::days(200)),
            },
            Contact {
                user_id: UserId(2),
                name: None,
                is_deleted: false,
                last_seen: Some(now() - ChronoDuration::days(10)),
            },
            Contact {
                user_id: UserId(3),
                name: Some("gone".to_string()),
                is_deleted: true,
                last_seen: None,
            },
            Contact {
                user_id: UserId(4),
                name: None,
                is_deleted: false,
                last_seen: None,
            },
        ];

        let src = stale_contact_targets(&contacts, 6, now()).unwrap();
        let ids: Vec<_> = src.iter().map(|t| t.id.0.clone()).collect();
        assert_eq!(ids, vec!["delete-contact:3", "delete-contact:1"]);
    }

    #[test]
    fn out_of_range_cutoffs_are_rejected() {
        let contacts = vec![Contact {
            user_id: UserId(1),
            name: None,
            is_deleted: false,
            last_seen: Some(now()),
        }];
        assert!(matches!(
            stale_contact_targets(&contacts, 100_000_000, now()),
            Err(Error::InvalidPlan(_))
        ));

        let dialogs = vec![Dialog {
            chat_id: ChatId(1),
            title: None,
            kind: DialogKind::Group,
            muted_until: None,
            last_message_at: Some(now()),
        }];
        assert!(matches!(
            archive_targets(&dialogs, ArchiveRule::InactiveFor { days: u32::MAX }, now()),
            Err(Error::InvalidPlan(_))
        ));
        // Rules without a cutoff never fail.
        assert_eq!(
            archive_targets(&dialogs, ArchiveRule::Groups, now()).unwrap().len(),
            1
        );
    }

    #[test]
    fn only_service_messages_are_cleaned() {
        let messages = vec![
            message(1, None),
            ChatMessage {
                is_service: true,
                ..message(2, None)
            },
            ChatMessage {
                is_service: true,
                ..message(3, photo())
            },
        ];

        let ids: Vec<_> = service_message_targets(&messages)
            .iter()
            .map(|t| t.id.0.clone())
            .collect();
        assert_eq!(ids, vec!["delete-message:-10/2", "delete-message:-10/3"]);
    }

    #[test]
    fn archive_rules_select_dialogs() {
        let dialog = |id, kind, muted_days: Option<i64>, idle_days: Option<i64>| Dialog {
            chat_id: ChatId(id),
            title: None,
            kind,
            muted_until: muted_days.map(|d| now() + ChronoDuration::days(d)),
            last_message_at: idle_days.map(|d| now() - ChronoDuration::days(d)),
        };
        let dialogs = vec![
            dialog(1, DialogKind::Private, Some(3), Some(1)),
            dialog(2, DialogKind::Group, Some(-3), Some(90)),
            dialog(3, DialogKind::Channel, None, Some(5)),
            dialog(4, DialogKind::Group, None, None),
        ];
        let ids = |rule| -> Vec<i64> {
            archive_targets(&dialogs, rule, now())
                .unwrap()
                .iter()
                .filter_map(|t| match t.payload {
                    TargetPayload::ArchiveChat { chat } => Some(chat.0),
                    _ => None,
                })
                .collect()
        };

        assert_eq!(ids(ArchiveRule::Muted), vec![1]);
        assert_eq!(ids(ArchiveRule::InactiveFor { days: 30 }), vec![2]);
        assert_eq!(ids(ArchiveRule::Channels), vec![3]);
        assert_eq!(ids(ArchiveRule::Groups), vec![2, 4]);
    }

    #[test]
    fn archive_rule_parses_from_json() {
        let rule: ArchiveRule =
            serde_json::from_str(r#"{"rule":"inactive-for","days":14}"#).unwrap();
        assert_eq!(rule, ArchiveRule::InactiveFor { days: 14 });
    }
}
