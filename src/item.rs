use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_mime(mime: &str) -> Self {
        if mime.trim().to_ascii_lowercase().starts_with("video/") {
            MediaKind::Video
        } else {
            MediaKind::Image
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MediaKind::Image => "photo",
            MediaKind::Video => "video",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Reaction {
    Like,
    Dislike,
    #[default]
    None,
}

impl Reaction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reaction::Like => "like",
            Reaction::Dislike => "dislike",
            Reaction::None => "none",
        }
    }

    /// Click-to-toggle: asking for the reaction already set clears it.
    pub fn toggled(current: Reaction, requested: Reaction) -> Reaction {
        if current == requested {
            Reaction::None
        } else {
            requested
        }
    }
}

/// One photo or video in the catalog.
///
/// `id`, `kind` and `source_url` never change once the item is admitted;
/// only `reaction` is mutated during a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    pub kind: MediaKind,
    pub source_url: String,
    pub preview_url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub reaction: Reaction,
    #[serde(default)]
    pub origin_link: Option<String>,
}

impl MediaItem {
    /// A static fallback entry; these are always images addressed by URL.
    pub fn seed(index: usize, url: &str) -> Self {
        Self {
            id: format!("seed-{index}"),
            kind: MediaKind::Image,
            source_url: url.to_string(),
            preview_url: url.to_string(),
            name: None,
            size_bytes: None,
            created_at: None,
            reaction: Reaction::None,
            origin_link: None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.id)
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Totals {
    pub likes: usize,
    pub dislikes: usize,
}

pub fn totals(items: &[MediaItem]) -> Totals {
    items.iter().fold(Totals::default(), |mut acc, item| {
        match item.reaction {
            Reaction::Like => acc.likes += 1,
            Reaction::Dislike => acc.dislikes += 1,
            Reaction::None => {}
        }
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_clears_matching_reaction() {
        assert_eq!(
            Reaction::toggled(Reaction::Like, Reaction::Like),
            Reaction::None
        );
        assert_eq!(
            Reaction::toggled(Reaction::Like, Reaction::Dislike),
            Reaction::Dislike
        );
        assert_eq!(
            Reaction::toggled(Reaction::None, Reaction::Like),
            Reaction::Like
        );
    }

    #[test]
    fn mime_decides_kind() {
        assert_eq!(MediaKind::from_mime("video/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_mime("image/jpeg"), MediaKind::Image);
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let mut item = MediaItem::seed(3, "https://example.com/x.jpg");
        assert_eq!(item.display_name(), "seed-3");
        item.name = Some("beach.jpg".into());
        assert_eq!(item.display_name(), "beach.jpg");
    }
}
