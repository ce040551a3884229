use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title every new session starts with until its first user message arrives.
pub const PLACEHOLDER_TITLE: &str = "Neuer Chat";

/// Number of whitespace separated words kept when deriving a title.
const TITLE_WORDS: usize = 5;
const TITLE_SUFFIX: &str = "...";

/// Fresh identifier for a session or message. Stored ids are opaque strings;
/// older data may carry ids in other formats.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current time truncated to whole milliseconds, the precision the store keeps.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

// Who authored a message. Stored with the generation API's role names.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "model", alias = "assistant")]
    Assistant,
}

impl Role {
    /// Role name understood by the generation API.
    pub fn api_name(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "model",
        }
    }
}

/// Response profile of a session. Stored as `"pro"`/`"flash"`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Profile {
    /// Detailed, reflective answers.
    #[default]
    #[serde(rename = "pro", alias = "thorough")]
    Thorough,
    /// Short answers, extended reasoning disabled.
    #[serde(rename = "flash", alias = "fast")]
    Fast,
}

impl std::str::FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thorough" | "pro" => Ok(Profile::Thorough),
            "fast" | "flash" => Ok(Profile::Fast),
            other => Err(format!("unknown profile '{}', expected 'thorough' or 'fast'", other)),
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Profile::Thorough => write!(f, "thorough"),
            Profile::Fast => write!(f, "fast"),
        }
    }
}

// A single message in a session
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub text: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    // base64 data URL, e.g. "data:image/png;base64,...."
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Message {
    pub fn user(text: impl Into<String>, image: Option<String>) -> Self {
        Self {
            id: new_id(),
            role: Role::User,
            text: text.into(),
            timestamp: now_millis(),
            image,
        }
    }

    /// Empty assistant message that streamed fragments are appended to.
    pub fn placeholder() -> Self {
        Self {
            id: new_id(),
            role: Role::Assistant,
            text: String::new(),
            timestamp: now_millis(),
            image: None,
        }
    }
}

// One saved conversation thread
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(rename = "modelProfile", default)]
    pub profile: Profile,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: new_id(),
            title: PLACEHOLDER_TITLE.to_string(),
            messages: Vec::new(),
            profile: Profile::default(),
            created_at: now_millis(),
        }
    }

    pub fn has_placeholder_title(&self) -> bool {
        self.title == PLACEHOLDER_TITLE
    }

    /// Replaces the placeholder title with an excerpt of the first user message.
    /// Does nothing once the title has been set.
    pub fn derive_title(&mut self) {
        if !self.has_placeholder_title() {
            return;
        }
        if let Some(first) = self.messages.iter().find(|m| m.role == Role::User) {
            self.title = title_excerpt(&first.text);
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// First five whitespace separated words joined by single spaces, plus an ellipsis.
pub fn title_excerpt(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().take(TITLE_WORDS).collect();
    format!("{}{}", words.join(" "), TITLE_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_keeps_first_five_words() {
        assert_eq!(
            title_excerpt("Wie  wird\tdas Wetter morgen in Berlin?"),
            "Wie wird das Wetter morgen..."
        );
        assert_eq!(title_excerpt("Hallo"), "Hallo...");
    }

    #[test]
    fn title_is_derived_only_once() {
        let mut session = Session::new();
        session.derive_title();
        assert_eq!(session.title, PLACEHOLDER_TITLE);

        session.messages.push(Message::user("erste Frage zum Thema Garten", None));
        session.derive_title();
        assert_eq!(session.title, "erste Frage zum Thema Garten...");

        session.messages.push(Message::user("ganz etwas anderes", None));
        session.derive_title();
        assert_eq!(session.title, "erste Frage zum Thema Garten...");
    }

    #[test]
    fn assistant_messages_do_not_name_the_session() {
        let mut session = Session::new();
        let mut reply = Message::placeholder();
        reply.text = "Antwort".into();
        session.messages.push(reply);
        session.derive_title();
        assert!(session.has_placeholder_title());
    }

    #[test]
    fn persisted_shape_uses_api_role_names_and_millis() {
        let mut session = Session::new();
        session.messages.push(Message::user("hi", Some("data:image/png;base64,AAAA".into())));
        session.messages.push(Message::placeholder());

        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["modelProfile"], "pro");
        assert_eq!(value["createdAt"], session.created_at.timestamp_millis());
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["image"], "data:image/png;base64,AAAA");
        assert_eq!(value["messages"][1]["role"], "model");
        assert!(value["messages"][1].get("image").is_none());
    }

    #[test]
    fn alternate_profile_and_role_names_are_accepted() {
        let json = r#"{
            "id": "6f1c2a8e-8c1b-4a57-9d59-0d3c7a6f2b10",
            "title": "Neuer Chat",
            "messages": [
                {"id": "0b6f6c3e-2f55-4a0f-8d0e-5d1e4f0c9a11", "role": "assistant", "text": "x", "timestamp": 1700000000000}
            ],
            "modelProfile": "fast",
            "createdAt": 1700000000000
        }"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.profile, Profile::Fast);
        assert_eq!(session.messages[0].role, Role::Assistant);
    }

    #[test]
    fn sessions_with_free_form_ids_round_trip() {
        let json = r#"{
            "id": "lq3k9x2abc",
            "title": "Gartenfragen...",
            "messages": [
                {"id": "lq3k9x2abd", "role": "user", "text": "Gartenfragen", "timestamp": 1700000000000},
                {"id": "lq3k9x2abe", "role": "model", "text": "Gern!", "timestamp": 1700000000500}
            ],
            "modelProfile": "flash",
            "createdAt": 1700000000000
        }"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.id, "lq3k9x2abc");
        assert_eq!(session.messages[1].id, "lq3k9x2abe");

        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["id"], "lq3k9x2abc");
        assert_eq!(value["modelProfile"], "flash");
    }

    #[test]
    fn profile_parses_from_user_input() {
        assert_eq!("Fast".parse::<Profile>(), Ok(Profile::Fast));
        assert_eq!("thorough".parse::<Profile>(), Ok(Profile::Thorough));
        assert!("slow".parse::<Profile>().is_err());
    }
}
