//! Per-card lazy loading and autoplay.
//!
//! Each card owns a [`ViewportLoader`] fed with visibility and load events.
//! The loader answers with [`Effect`]s for the presentation layer to carry
//! out; it never touches media itself.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::drive;
use crate::item::{MediaItem, MediaKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Ready,
    Playing,
    Paused,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Surface {
    Placeholder,
    Native,
    /// Remote embedded player; once chosen the card never goes back.
    EmbeddedPreview(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shape {
    #[default]
    Square,
    Landscape,
    Portrait,
}

impl Shape {
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        let ratio = width.max(1) as f64 / height.max(1) as f64;
        if ratio > 1.15 {
            Shape::Landscape
        } else if ratio < 0.85 {
            Shape::Portrait
        } else {
            Shape::Square
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Load,
    Play { muted: bool, looped: bool, inline: bool },
    Pause,
    Release,
    ShowEmbed(String),
}

const AUTOPLAY: Effect = Effect::Play {
    muted: true,
    looped: true,
    inline: true,
};

#[derive(Debug, Clone)]
pub struct ViewportLoader {
    id: String,
    kind: MediaKind,
    state: LoadState,
    surface: Surface,
    shape: Shape,
    in_view: bool,
    user_paused: bool,
}

impl ViewportLoader {
    pub fn new(item: &MediaItem) -> Self {
        Self {
            id: item.id.clone(),
            kind: item.kind,
            state: LoadState::Unloaded,
            surface: Surface::Placeholder,
            shape: Shape::default(),
            in_view: false,
            user_paused: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn in_view(&self) -> bool {
        self.in_view
    }

    /// The card crossed into the proximity margin. Repeated calls are no-ops.
    pub fn enter(&mut self) -> Vec<Effect> {
        if self.in_view {
            return Vec::new();
        }
        self.in_view = true;
        match (self.kind, self.state) {
            (_, LoadState::Unloaded) => {
                self.state = LoadState::Loading;
                vec![Effect::Load]
            }
            (MediaKind::Video, LoadState::Paused) if !self.user_paused => {
                self.state = LoadState::Playing;
                vec![AUTOPLAY]
            }
            _ => Vec::new(),
        }
    }

    /// The card left the proximity margin. Repeated calls are no-ops.
    pub fn exit(&mut self) -> Vec<Effect> {
        if !self.in_view {
            return Vec::new();
        }
        self.in_view = false;
        if self.kind == MediaKind::Image {
            return Vec::new();
        }
        match self.state {
            LoadState::Playing => {
                self.state = LoadState::Paused;
                vec![Effect::Pause, Effect::Release]
            }
            LoadState::Loading => {
                self.state = LoadState::Unloaded;
                vec![Effect::Release]
            }
            LoadState::Ready => {
                self.state = LoadState::Paused;
                vec![Effect::Release]
            }
            LoadState::Paused => vec![Effect::Release],
            _ => Vec::new(),
        }
    }

    /// Video metadata arrived; playback starts muted, looped and inline.
    pub fn metadata_ready(&mut self, width: u32, height: u32) -> Vec<Effect> {
        if self.kind != MediaKind::Video || self.state != LoadState::Loading {
            return Vec::new();
        }
        self.shape = Shape::from_dimensions(width, height);
        self.surface = Surface::Native;
        if self.in_view && !self.user_paused {
            self.state = LoadState::Playing;
            vec![AUTOPLAY]
        } else {
            self.state = LoadState::Ready;
            Vec::new()
        }
    }

    /// Image bytes finished loading.
    pub fn load_complete(&mut self, width: u32, height: u32) -> Vec<Effect> {
        if self.kind != MediaKind::Image || self.state != LoadState::Loading {
            return Vec::new();
        }
        self.shape = Shape::from_dimensions(width, height);
        self.surface = Surface::Native;
        self.state = LoadState::Ready;
        Vec::new()
    }

    /// The card's bytes failed to load; it tries again the next time it
    /// scrolls into range.
    pub fn load_failed(&mut self) -> Vec<Effect> {
        if self.state == LoadState::Loading {
            self.state = LoadState::Unloaded;
        }
        Vec::new()
    }

    /// The platform refused to autoplay. Swallowed: the card simply waits paused.
    pub fn autoplay_rejected(&mut self) -> Vec<Effect> {
        if self.state == LoadState::Playing {
            debug!(id = %self.id, "autoplay rejected");
            self.state = LoadState::Paused;
        }
        Vec::new()
    }

    /// Native playback failed; switch to the embedded preview for good.
    /// Errors reported for a card that is out of range or not yet loading are
    /// stale and ignored.
    pub fn playback_error(&mut self) -> Vec<Effect> {
        let live = matches!(
            self.state,
            LoadState::Loading | LoadState::Ready | LoadState::Playing | LoadState::Paused
        );
        if self.kind != MediaKind::Video || !live || !self.in_view {
            return Vec::new();
        }
        self.state = LoadState::Errored;
        let url = drive::embed_preview_url(&self.id);
        self.surface = Surface::EmbeddedPreview(url.clone());
        vec![Effect::Release, Effect::ShowEmbed(url)]
    }

    /// Manual play/pause. Has no effect before metadata or after an error.
    pub fn toggle_playback(&mut self) -> Vec<Effect> {
        match self.state {
            LoadState::Playing => {
                self.state = LoadState::Paused;
                self.user_paused = true;
                vec![Effect::Pause]
            }
            LoadState::Paused | LoadState::Ready if self.kind == MediaKind::Video => {
                self.state = LoadState::Playing;
                self.user_paused = false;
                vec![AUTOPLAY]
            }
            _ => Vec::new(),
        }
    }
}

/// Visible window in rows plus the proximity margin on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub top: usize,
    pub height: usize,
    pub margin: usize,
}

impl Viewport {
    /// Whether rows `[start, end)` fall inside the window widened by the margin.
    pub fn contains(&self, start: usize, end: usize) -> bool {
        let lo = self.top.saturating_sub(self.margin);
        let hi = self.top + self.height + self.margin;
        end > lo && start < hi
    }
}

/// Loaders for every card currently in the catalog, keyed by item id.
#[derive(Debug, Default)]
pub struct LoaderSet {
    loaders: HashMap<String, ViewportLoader>,
}

impl LoaderSet {
    pub fn get(&self, id: &str) -> Option<&ViewportLoader> {
        self.loaders.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ViewportLoader> {
        self.loaders.get_mut(id)
    }

    /// Creates loaders for new items and drops those whose item is gone.
    pub fn retain_items(&mut self, items: &[MediaItem]) {
        let ids: HashSet<&str> = items.iter().map(|item| item.id.as_str()).collect();
        self.loaders.retain(|id, _| ids.contains(id.as_str()));
        for item in items {
            self.loaders
                .entry(item.id.clone())
                .or_insert_with(|| ViewportLoader::new(item));
        }
    }

    /// Feeds enter/exit to every loader given the set of ids now in range.
    pub fn update_visibility(&mut self, visible: &HashSet<String>) -> Vec<(String, Effect)> {
        let mut effects = Vec::new();
        for (id, loader) in self.loaders.iter_mut() {
            let out = if visible.contains(id) {
                loader.enter()
            } else {
                loader.exit()
            };
            effects.extend(out.into_iter().map(|effect| (id.clone(), effect)));
        }
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video() -> MediaItem {
        let mut item = MediaItem::seed(0, "https://example.com/v.mp4");
        item.id = "vid".into();
        item.kind = MediaKind::Video;
        item
    }

    fn image() -> MediaItem {
        MediaItem::seed(1, "https://example.com/i.jpg")
    }

    #[test]
    fn video_autoplays_muted_once_metadata_arrives() {
        let mut loader = ViewportLoader::new(&video());
        assert_eq!(loader.enter(), vec![Effect::Load]);
        assert_eq!(loader.state(), LoadState::Loading);
        assert_eq!(
            loader.metadata_ready(1920, 1080),
            vec![Effect::Play {
                muted: true,
                looped: true,
                inline: true
            }]
        );
        assert_eq!(loader.state(), LoadState::Playing);
        assert_eq!(loader.shape(), Shape::Landscape);
    }

    #[test]
    fn leaving_pauses_and_releases_then_resumes() {
        let mut loader = ViewportLoader::new(&video());
        loader.enter();
        loader.metadata_ready(100, 100);
        assert_eq!(loader.exit(), vec![Effect::Pause, Effect::Release]);
        assert_eq!(loader.state(), LoadState::Paused);
        assert_eq!(loader.enter(), vec![AUTOPLAY]);
        assert_eq!(loader.state(), LoadState::Playing);
    }

    #[test]
    fn enter_and_exit_are_idempotent() {
        let mut loader = ViewportLoader::new(&video());
        assert_eq!(loader.enter().len(), 1);
        assert!(loader.enter().is_empty());
        assert_eq!(loader.exit(), vec![Effect::Release]);
        assert!(loader.exit().is_empty());
        assert_eq!(loader.state(), LoadState::Unloaded);
        // exit before any enter is harmless too
        let mut fresh = ViewportLoader::new(&video());
        assert!(fresh.exit().is_empty());
    }

    #[test]
    fn metadata_after_leaving_is_ignored() {
        let mut loader = ViewportLoader::new(&video());
        loader.enter();
        loader.exit();
        assert!(loader.metadata_ready(10, 10).is_empty());
        assert_eq!(loader.state(), LoadState::Unloaded);
    }

    #[test]
    fn playback_error_is_terminal() {
        let mut loader = ViewportLoader::new(&video());
        loader.enter();
        loader.metadata_ready(10, 10);
        let effects = loader.playback_error();
        assert_eq!(
            effects,
            vec![
                Effect::Release,
                Effect::ShowEmbed("https://drive.google.com/file/d/vid/preview".into())
            ]
        );
        assert_eq!(loader.state(), LoadState::Errored);
        assert!(matches!(loader.surface(), Surface::EmbeddedPreview(_)));
        loader.exit();
        assert!(loader.enter().is_empty());
        assert!(loader.toggle_playback().is_empty());
        assert!(loader.playback_error().is_empty());
        assert_eq!(loader.state(), LoadState::Errored);
    }

    #[test]
    fn autoplay_rejection_is_swallowed() {
        let mut loader = ViewportLoader::new(&video());
        loader.enter();
        loader.metadata_ready(10, 10);
        assert!(loader.autoplay_rejected().is_empty());
        assert_eq!(loader.state(), LoadState::Paused);
    }

    #[test]
    fn manual_pause_sticks_across_scrolling() {
        let mut loader = ViewportLoader::new(&video());
        loader.enter();
        loader.metadata_ready(10, 10);
        assert_eq!(loader.toggle_playback(), vec![Effect::Pause]);
        assert_eq!(loader.exit(), vec![Effect::Release]);
        assert!(loader.enter().is_empty());
        assert_eq!(loader.state(), LoadState::Paused);
        assert_eq!(loader.toggle_playback(), vec![AUTOPLAY]);
    }

    #[test]
    fn rejected_autoplay_releases_when_scrolled_away() {
        let mut loader = ViewportLoader::new(&video());
        loader.enter();
        loader.metadata_ready(10, 10);
        loader.autoplay_rejected();
        assert_eq!(loader.exit(), vec![Effect::Release]);
        assert_eq!(loader.state(), LoadState::Paused);
        assert!(loader.exit().is_empty());
    }

    #[test]
    fn stale_playback_error_is_ignored() {
        let mut loader = ViewportLoader::new(&video());
        assert!(loader.playback_error().is_empty());
        loader.enter();
        loader.exit();
        assert_eq!(loader.state(), LoadState::Unloaded);
        assert!(loader.playback_error().is_empty());
        assert_eq!(loader.state(), LoadState::Unloaded);
        assert_eq!(loader.surface(), &Surface::Placeholder);

        // paused and scrolled away
        loader.enter();
        loader.metadata_ready(10, 10);
        loader.toggle_playback();
        loader.exit();
        assert!(loader.playback_error().is_empty());
        assert_eq!(loader.state(), LoadState::Paused);
    }

    #[test]
    fn failed_video_load_retries_instead_of_embedding() {
        let mut loader = ViewportLoader::new(&video());
        loader.enter();
        assert!(loader.load_failed().is_empty());
        assert_eq!(loader.state(), LoadState::Unloaded);
        assert_eq!(loader.surface(), &Surface::Placeholder);
        loader.exit();
        assert_eq!(loader.enter(), vec![Effect::Load]);
    }

    #[test]
    fn image_is_two_state() {
        let mut loader = ViewportLoader::new(&image());
        assert_eq!(loader.enter(), vec![Effect::Load]);
        assert!(loader.load_complete(300, 400).is_empty());
        assert_eq!(loader.state(), LoadState::Ready);
        assert_eq!(loader.shape(), Shape::Portrait);
        assert!(loader.exit().is_empty());
        assert_eq!(loader.state(), LoadState::Ready);
        assert!(loader.playback_error().is_empty());
        assert!(loader.toggle_playback().is_empty());
    }

    #[test]
    fn failed_image_retries_on_next_entry() {
        let mut loader = ViewportLoader::new(&image());
        loader.enter();
        loader.load_failed();
        assert_eq!(loader.state(), LoadState::Unloaded);
        assert!(loader.enter().is_empty());
        loader.exit();
        assert_eq!(loader.enter(), vec![Effect::Load]);
    }

    #[test]
    fn margin_extends_window() {
        let view = Viewport {
            top: 20,
            height: 10,
            margin: 5,
        };
        assert!(view.contains(16, 18));
        assert!(view.contains(33, 36));
        assert!(!view.contains(10, 15));
        assert!(!view.contains(35, 40));
    }

    #[test]
    fn loader_set_tracks_catalog() {
        let items = vec![video(), image()];
        let mut set = LoaderSet::default();
        set.retain_items(&items);
        let visible: HashSet<String> = ["vid".to_string()].into_iter().collect();
        let effects = set.update_visibility(&visible);
        assert_eq!(effects, vec![("vid".to_string(), Effect::Load)]);
        set.retain_items(&items[1..]);
        assert!(set.get("vid").is_none());
        assert!(set.get("seed-1").is_some());
    }
}
