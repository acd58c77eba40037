use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The signed-in user that viewer-relative fields are derived against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewer {
    pub username: String,
    pub display_name: String,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    pub username: String,
    pub display_name: String,
    pub image: Option<String>,
    pub is_host: bool,
}

impl Attendee {
    pub fn from_viewer(viewer: &Viewer) -> Self {
        Self {
            username: viewer.username.clone(),
            display_name: viewer.display_name.clone(),
            image: viewer.image.clone(),
            is_host: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub body: String,
    pub username: String,
    pub display_name: String,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub venue: String,
    pub city: String,
}

/// Wire shape exchanged with the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDto {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub date: DateTime<Utc>,
    pub city: String,
    pub venue: String,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitiesEnvelope {
    pub activities: Vec<ActivityDto>,
    pub activity_count: u64,
}

/// A cached activity. `is_host`, `is_going` and `main_image` are relative to
/// the viewer the record was annotated for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub date: DateTime<Utc>,
    pub location: Location,
    pub attendees: Vec<Attendee>,
    pub comments: Vec<Comment>,
    pub is_host: bool,
    pub is_going: bool,
    pub main_image: Option<String>,
}

impl Activity {
    /// A fresh record for the create form, with a client-generated id.
    pub fn draft(
        title: impl Into<String>,
        description: impl Into<String>,
        category: impl Into<String>,
        date: DateTime<Utc>,
        location: Location,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: description.into(),
            category: category.into(),
            date,
            location,
            attendees: Vec::new(),
            comments: Vec::new(),
            is_host: false,
            is_going: false,
            main_image: None,
        }
    }

    pub fn from_dto(dto: ActivityDto, viewer: &Viewer) -> Self {
        let mut activity = Self {
            id: dto.id,
            title: dto.title,
            description: dto.description,
            category: dto.category,
            date: dto.date,
            location: Location {
                venue: dto.venue,
                city: dto.city,
            },
            attendees: dto.attendees,
            comments: dto.comments,
            is_host: false,
            is_going: false,
            main_image: None,
        };
        activity.annotate(viewer);
        activity
    }

    pub fn to_dto(&self) -> ActivityDto {
        ActivityDto {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
            date: self.date,
            city: self.location.city.clone(),
            venue: self.location.venue.clone(),
            attendees: self.attendees.clone(),
            comments: self.comments.clone(),
        }
    }

    /// Recomputes the viewer-relative fields from the attendee list.
    pub fn annotate(&mut self, viewer: &Viewer) {
        self.is_going = self
            .attendees
            .iter()
            .any(|attendee| attendee.username == viewer.username);
        self.is_host = self
            .attendees
            .iter()
            .any(|attendee| attendee.username == viewer.username && attendee.is_host);
        self.main_image = self.host().and_then(|host| host.image.clone());
    }

    pub fn host(&self) -> Option<&Attendee> {
        self.attendees.iter().find(|attendee| attendee.is_host)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityGroup {
    pub date: NaiveDate,
    pub activities: Vec<Activity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// Where inbound `ReceiveComment` frames are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CommentRouting {
    /// Whatever activity is selected when the frame is dispatched. A frame
    /// that arrives after the viewer navigated away lands on the new
    /// selection.
    #[default]
    SelectedAtDispatch,
    /// The activity the channel joined, regardless of selection.
    BoundActivity,
}

/// Where the access/refresh token pair is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TokenStoreKind {
    #[default]
    Database,
    Keyring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A user-visible message raised by the store (toast equivalent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusyFlags {
    pub loading_initial: bool,
    pub submitting: bool,
    pub target: Option<String>,
    pub loading: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundComment {
    pub activity_id: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    pub api_url: String,
    pub hub_url: String,
    pub page_size: u32,
    pub token_guard_window_ms: u64,
    pub request_timeout_ms: u64,
    pub comment_routing: CommentRouting,
    pub token_store: TokenStoreKind,
    pub log_filter: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000/api".to_string(),
            hub_url: "http://localhost:5000/chat".to_string(),
            page_size: 2,
            token_guard_window_ms: 5_000,
            request_timeout_ms: 10_000,
            comment_routing: CommentRouting::SelectedAtDispatch,
            token_store: TokenStoreKind::Database,
            log_filter: "info".to_string(),
        }
    }
}
