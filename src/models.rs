// Core data structures for the klassgram pipeline

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A class (logical channel) on the content source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Klass {
    /// Source-assigned class id
    pub id: String,
    /// Display name, matched against the configured class list
    pub name: String,
}

/// Kind of a post, as reported by the content source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PostKind {
    /// Regular text post (source type "message")
    Text,
    /// Poll post; internals are not rendered, only announced
    Poll,
    /// Anything else, keeping the source's raw type string
    Other(String),
}

impl PostKind {
    /// Raw type string as the source reports it
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "message",
            Self::Poll => "poll",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for PostKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "message" => Self::Text,
            "poll" => Self::Poll,
            _ => Self::Other(raw),
        }
    }
}

impl From<PostKind> for String {
    fn from(kind: PostKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Media kind of an attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MediaKind {
    Image,
    Document,
    Video,
    Audio,
    /// Unrecognized kind, keeping the source's raw type string
    Unknown(String),
}

impl MediaKind {
    /// Raw type string as the source reports it
    pub fn as_str(&self) -> &str {
        match self {
            Self::Image => "image",
            Self::Document => "document",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Unknown(raw) => raw,
        }
    }

    /// Bot API method for an individual send of this kind
    pub fn send_method(&self) -> Option<&'static str> {
        match self {
            Self::Image => Some("sendPhoto"),
            Self::Document => Some("sendDocument"),
            Self::Video => Some("sendVideo"),
            Self::Audio => Some("sendAudio"),
            Self::Unknown(_) => None,
        }
    }

    /// Form field / media-group item type for this kind
    pub fn api_type(&self) -> Option<&'static str> {
        match self {
            Self::Image => Some("photo"),
            Self::Document => Some("document"),
            Self::Video => Some("video"),
            Self::Audio => Some("audio"),
            Self::Unknown(_) => None,
        }
    }
}

impl From<String> for MediaKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "image" => Self::Image,
            "document" => Self::Document,
            "video" => Self::Video,
            "audio" => Self::Audio,
            _ => Self::Unknown(raw),
        }
    }
}

impl From<MediaKind> for String {
    fn from(kind: MediaKind) -> Self {
        kind.as_str().to_string()
    }
}

/// A post attachment
///
/// `data` is populated lazily by materialization and never persisted;
/// an attachment whose download failed simply keeps `data = None` and
/// is skipped at delivery time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// Media kind, drives the request shape used for upload
    #[serde(rename = "type")]
    pub media_kind: MediaKind,

    /// Display filename, also the correlation token in grouped sends
    pub name: String,

    /// Source locator, resolvable by the materializer
    pub url: String,

    /// Raw bytes, present only after materialization
    #[serde(skip)]
    pub data: Option<Bytes>,
}

/// A single content item, the unit of deduplication and delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    /// Source-assigned id, the sole deduplication key
    pub id: String,

    /// Name of the class this post came from
    pub klass: String,

    /// Creation time of the post
    pub date: DateTime<Utc>,

    /// Author display name
    pub from: String,

    /// Post body, may be empty
    pub text: String,

    #[serde(rename = "type")]
    pub kind: PostKind,

    pub attachments: Vec<Attachment>,
}

/// One line of the delivery ledger: a delivered post id and its date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub date: DateTime<Utc>,
}
