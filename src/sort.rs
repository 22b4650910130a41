use std::cmp::Ordering;
use std::iter::Peekable;
use std::str::Chars;

use serde::{Deserialize, Serialize};

use crate::item::{MediaItem, MediaKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    #[default]
    #[serde(alias = "photosFirst", alias = "typePhotosFirst")]
    PhotosFirst,
    #[serde(alias = "videosFirst", alias = "typeVideosFirst")]
    VideosFirst,
    #[serde(alias = "sizeDesc")]
    SizeDesc,
    #[serde(alias = "sizeAsc")]
    SizeAsc,
    #[serde(alias = "dateDesc")]
    DateDesc,
    #[serde(alias = "dateAsc")]
    DateAsc,
    #[serde(alias = "nameAsc")]
    NameAsc,
    #[serde(alias = "nameDesc")]
    NameDesc,
}

pub const ALL_SORTS: [SortMode; 8] = [
    SortMode::PhotosFirst,
    SortMode::VideosFirst,
    SortMode::SizeDesc,
    SortMode::SizeAsc,
    SortMode::DateDesc,
    SortMode::DateAsc,
    SortMode::NameAsc,
    SortMode::NameDesc,
];

impl SortMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortMode::PhotosFirst => "photos_first",
            SortMode::VideosFirst => "videos_first",
            SortMode::SizeDesc => "size_desc",
            SortMode::SizeAsc => "size_asc",
            SortMode::DateDesc => "date_desc",
            SortMode::DateAsc => "date_asc",
            SortMode::NameAsc => "name_asc",
            SortMode::NameDesc => "name_desc",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SortMode::PhotosFirst => "Photos → Videos",
            SortMode::VideosFirst => "Videos → Photos",
            SortMode::SizeDesc => "Size ↓",
            SortMode::SizeAsc => "Size ↑",
            SortMode::DateDesc => "Newest",
            SortMode::DateAsc => "Oldest",
            SortMode::NameAsc => "A → Z",
            SortMode::NameDesc => "Z → A",
        }
    }

    /// Accepts snake_case and camelCase spellings, with or without a `type` prefix.
    pub fn from_key(key: &str) -> Option<Self> {
        let normalized: String = key
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        let normalized = normalized.strip_prefix("type").unwrap_or(&normalized);
        ALL_SORTS
            .iter()
            .copied()
            .find(|mode| mode.as_str().replace('_', "") == normalized)
    }

    pub fn shift(&self, delta: isize) -> Self {
        let len = ALL_SORTS.len() as isize;
        let idx = ALL_SORTS.iter().position(|m| m == self).unwrap_or(0) as isize;
        ALL_SORTS[((idx + delta).rem_euclid(len)) as usize]
    }
}

/// Returns a reordered copy; the input is left untouched.
pub fn sort(items: &[MediaItem], mode: SortMode) -> Vec<MediaItem> {
    let mut out = items.to_vec();
    out.sort_by(|a, b| compare(a, b, mode));
    out
}

pub fn compare(a: &MediaItem, b: &MediaItem, mode: SortMode) -> Ordering {
    let primary = match mode {
        SortMode::PhotosFirst => kind_rank(a.kind, MediaKind::Image)
            .cmp(&kind_rank(b.kind, MediaKind::Image))
            .then_with(|| size(b).cmp(&size(a))),
        SortMode::VideosFirst => kind_rank(a.kind, MediaKind::Video)
            .cmp(&kind_rank(b.kind, MediaKind::Video))
            .then_with(|| size(b).cmp(&size(a))),
        SortMode::SizeDesc => size(b).cmp(&size(a)),
        SortMode::SizeAsc => size(a).cmp(&size(b)),
        SortMode::DateDesc => created(b).cmp(&created(a)),
        SortMode::DateAsc => created(a).cmp(&created(b)),
        SortMode::NameAsc => by_name(a, b),
        SortMode::NameDesc => by_name(b, a),
    };
    primary
        .then_with(|| by_name(a, b))
        .then_with(|| name(a).cmp(name(b)))
        .then_with(|| a.id.cmp(&b.id))
}

fn kind_rank(kind: MediaKind, first: MediaKind) -> u8 {
    if kind == first {
        0
    } else {
        1
    }
}

fn size(item: &MediaItem) -> u64 {
    item.size_bytes.unwrap_or(0)
}

fn created(item: &MediaItem) -> i64 {
    item.created_at.unwrap_or(0)
}

fn name(item: &MediaItem) -> &str {
    item.name.as_deref().unwrap_or("")
}

fn by_name(a: &MediaItem, b: &MediaItem) -> Ordering {
    natural_cmp(name(a), name(b))
}

/// Case-insensitive comparison where digit runs compare by numeric value,
/// so `img2` sorts before `img10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();
    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let lnum = take_digits(&mut left);
                let rnum = take_digits(&mut right);
                let ord = compare_digit_runs(&lnum, &rnum);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                let ord = x
                    .to_lowercase()
                    .cmp(y.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
        run.push(c);
        chars.next();
    }
    run
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
