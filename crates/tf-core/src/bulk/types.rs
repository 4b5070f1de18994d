use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::domain::{ChatId, MediaRef, MessageRef, UserId};

/// A category of remote call sharing one rate budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationClass {
    SendMessage,
    DownloadMedia,
    DeleteContact,
    ArchiveChat,
    DeleteMessage,
}

impl OperationClass {
    pub const ALL: [OperationClass; 5] = [
        OperationClass::SendMessage,
        OperationClass::DownloadMedia,
        OperationClass::DeleteContact,
        OperationClass::ArchiveChat,
        OperationClass::DeleteMessage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationClass::SendMessage => "send-message",
            OperationClass::DownloadMedia => "download-media",
            OperationClass::DeleteContact => "delete-contact",
            OperationClass::ArchiveChat => "archive-chat",
            OperationClass::DeleteMessage => "delete-message",
        }
    }

    /// Read-only classes may run several calls at once; everything that
    /// mutates account state is sequential so spacing stays exact.
    pub fn is_read_only(self) -> bool {
        matches!(self, OperationClass::DownloadMedia)
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run-unique key of a target.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub String);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum TargetPayload {
    SendMessage { recipient: ChatId, text: String },
    DownloadMedia { message: MessageRef, media: MediaRef },
    DeleteContact { user: UserId },
    ArchiveChat { chat: ChatId },
    DeleteMessage { message: MessageRef },
}

/// One unit of work: a subject plus what to do with it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub payload: TargetPayload,
    /// Human label for reports (member name, chat title).
    pub label: Option<String>,
}

impl Target {
    pub fn send_message(recipient: impl Into<ChatId>, text: impl Into<String>) -> Self {
        let recipient = recipient.into();
        Self {
            id: TargetId(format!("send-message:{recipient}")),
            payload: TargetPayload::SendMessage {
                recipient,
                text: text.into(),
            },
            label: None,
        }
    }

    pub fn download_media(message: MessageRef, media: MediaRef) -> Self {
        Self {
            id: TargetId(format!("download-media:{message}")),
            payload: TargetPayload::DownloadMedia { message, media },
            label: None,
        }
    }

    pub fn delete_contact(user: UserId) -> Self {
        Self {
            id: TargetId(format!("delete-contact:{user}")),
            payload: TargetPayload::DeleteContact { user },
            label: None,
        }
    }

    pub fn archive_chat(chat: ChatId) -> Self {
        Self {
            id: TargetId(format!("archive-chat:{chat}")),
            payload: TargetPayload::ArchiveChat { chat },
            label: None,
        }
    }

    pub fn delete_message(message: MessageRef) -> Self {
        Self {
            id: TargetId(format!("delete-message:{message}")),
            payload: TargetPayload::DeleteMessage { message },
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn class(&self) -> OperationClass {
        match self.payload {
            TargetPayload::SendMessage { .. } => OperationClass::SendMessage,
            TargetPayload::DownloadMedia { .. } => OperationClass::DownloadMedia,
            TargetPayload::DeleteContact { .. } => OperationClass::DeleteContact,
            TargetPayload::ArchiveChat { .. } => OperationClass::ArchiveChat,
            TargetPayload::DeleteMessage { .. } => OperationClass::DeleteMessage,
        }
    }
}

/// Classified failure of a single attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    FloodControl { wait: Duration },
    Transient,
    PermissionDenied,
    NotFound,
    InvalidTarget,
    /// The account was limited by the service; continuing risks a ban.
    AccountRestricted,
    /// Local persistence of a downloaded item failed.
    Storage,
    Unknown,
}

impl ErrorKind {
    pub fn is_flood_control(&self) -> bool {
        matches!(self, ErrorKind::FloodControl { .. })
    }

    /// Whether a later run could plausibly succeed on the same target.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ErrorKind::FloodControl { .. } | ErrorKind::Transient | ErrorKind::Unknown
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::FloodControl { wait } => write!(f, "flood control ({}s)", wait.as_secs()),
            ErrorKind::Transient => f.write_str("transient"),
            ErrorKind::PermissionDenied => f.write_str("permission denied"),
            ErrorKind::NotFound => f.write_str("not found"),
            ErrorKind::InvalidTarget => f.write_str("invalid target"),
            ErrorKind::AccountRestricted => f.write_str("account restricted"),
            ErrorKind::Storage => f.write_str("storage"),
            ErrorKind::Unknown => f.write_str("unknown"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationOutcome {
    Success {
        detail: String,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error_kind: ErrorKind,
        message: String,
        retriable: bool,
    },
}

impl OperationOutcome {
    pub fn success(detail: impl Into<String>) -> Self {
        Self::Success {
            detail: detail.into(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn failed(error_kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failed {
            error_kind,
            message: message.into(),
            retriable: error_kind.is_retriable(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Failed { error_kind, .. } => Some(*error_kind),
            _ => None,
        }
    }
}

/// Result of executing one target: the outcome plus how many remote calls it took.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Execution {
    pub outcome: OperationOutcome,
    pub calls: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_ids_are_keyed_by_class_and_subject() {
        let a = Target::send_message(UserId(7), "hi");
        let b = Target::send_message(UserId(7), "different text");
        let c = Target::delete_contact(UserId(7));

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.class(), OperationClass::SendMessage);
        assert_eq!(c.class(), OperationClass::DeleteContact);
    }

    #[test]
    fn failed_outcome_derives_retriable_from_kind() {
        let flood = OperationOutcome::failed(
            ErrorKind::FloodControl {
                wait: Duration::from_secs(3),
            },
            "wait",
        );
        let denied = OperationOutcome::failed(ErrorKind::PermissionDenied, "nope");

        assert!(matches!(flood, OperationOutcome::Failed { retriable: true, .. }));
        assert!(matches!(denied, OperationOutcome::Failed { retriable: false, .. }));
    }

    #[test]
    fn delete_message_targets_are_keyed_by_message() {
        let message = MessageRef {
            chat_id: ChatId(-100),
            message_id: crate::domain::MessageId(12),
        };
        let t = Target::delete_message(message);

        assert_eq!(t.id.0, "delete-message:-100/12");
        assert_eq!(t.class(), OperationClass::DeleteMessage);
        assert!(!t.class().is_read_only());
        assert_eq!(OperationClass::ALL.len(), 5);
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(OperationOutcome::skipped("empty")).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "empty");
    }
}
