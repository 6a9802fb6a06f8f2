use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Participation {
    Individual,
    Family,
}

impl Participation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Participation::Individual => "individual",
            Participation::Family => "family",
        }
    }

    pub fn label_ru(&self) -> &'static str {
        match self {
            Participation::Individual => "индивидуальное",
            Participation::Family => "семейное",
        }
    }
}

impl TryFrom<&str> for Participation {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "individual" => Ok(Participation::Individual),
            "family" => Ok(Participation::Family),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubmissionKind {
    Text,
    Photo,
    Video,
    Document,
}

impl SubmissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionKind::Text => "text",
            SubmissionKind::Photo => "photo",
            SubmissionKind::Video => "video",
            SubmissionKind::Document => "document",
        }
    }

    pub fn label_ru(&self) -> &'static str {
        match self {
            SubmissionKind::Text => "текст",
            SubmissionKind::Photo => "фото",
            SubmissionKind::Video => "видео",
            SubmissionKind::Document => "документ",
        }
    }

    /// Subdirectory for stored attachments of this kind.
    pub fn namespace(&self) -> &'static str {
        match self {
            SubmissionKind::Text => "texts",
            SubmissionKind::Photo => "photos",
            SubmissionKind::Video => "videos",
            SubmissionKind::Document => "documents",
        }
    }

    pub fn default_extension(&self) -> &'static str {
        match self {
            SubmissionKind::Text => "txt",
            SubmissionKind::Photo => "jpg",
            SubmissionKind::Video => "mp4",
            SubmissionKind::Document => "bin",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::Rejected => "rejected",
        }
    }

    pub fn label_ru(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "на проверке",
            SubmissionStatus::Approved => "зачтено",
            SubmissionStatus::Rejected => "отклонено",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InboxKind {
    /// Message from a user who has not completed registration.
    Unregistered,
    /// Looks like report content sent outside the submission flow.
    PotentialReport,
    /// Short text that matched nothing; kept for the record.
    Unknown,
    /// Durability journal for input consumed by an active conversation step.
    StepInput,
}

impl InboxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboxKind::Unregistered => "unregistered",
            InboxKind::PotentialReport => "potential_report",
            InboxKind::Unknown => "unknown",
            InboxKind::StepInput => "step_input",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SupportStatus {
    Open,
    Closed,
    Archived,
}

impl SupportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupportStatus::Open => "open",
            SupportStatus::Closed => "closed",
            SupportStatus::Archived => "archived",
        }
    }
}

/// Raw content captured into the inbox: whatever the message carried.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct InboxPayload {
    pub text: Option<String>,
    pub media: Option<SubmissionKind>,
    pub file_id: Option<String>,
    pub file_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participation_round_trips_through_str() {
        for p in [Participation::Individual, Participation::Family] {
            assert_eq!(Participation::try_from(p.as_str()), Ok(p));
        }
        assert!(Participation::try_from("corporate").is_err());
    }

    #[test]
    fn inbox_payload_serializes_media_kind_lowercase() {
        let payload = InboxPayload {
            text: Some("отчет".to_string()),
            media: Some(SubmissionKind::Photo),
            file_id: Some("abc".to_string()),
            file_path: None,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"photo\""));
        let back: InboxPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }
}
