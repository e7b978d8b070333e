use serde::{Deserialize, Serialize};

/// Kind of captured media handed over by the capture pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
        }
    }
}

/// How long the receiver may look at a snap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityMode {
    Permanent,
    OneTime,
    Ephemeral,
}

impl Default for VisibilityMode {
    fn default() -> Self {
        Self::OneTime
    }
}

/// Foreground state of the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Active,
    Inactive,
    Background,
}

impl AppState {
    pub fn is_foreground(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::Active
    }
}

/// Media reference produced by the capture/compression pipeline. The core
/// never looks inside the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub local_media_ref: String,
    pub media_kind: MediaKind,
    pub size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&VisibilityMode::OneTime).unwrap(),
            "\"one_time\""
        );
        assert_eq!(serde_json::to_string(&MediaKind::Video).unwrap(), "\"video\"");
        assert_eq!(
            serde_json::from_str::<AppState>("\"background\"").unwrap(),
            AppState::Background
        );
    }
}
