//! Gallery/guild organizational model: slug derivation and the lookup rule
//! from Open Question #1 — storage keys always use the slug, and looking a
//! gallery up from its raw name means iterating known galleries and
//! comparing slugs, never re-deriving a slug from unverified input.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// A gallery known to the system: its raw display name and the guild that
/// owns it. The slug is derived, never stored independently, so it can
/// never drift from the name that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gallery {
    pub guild_id: String,
    pub name: String,
}

impl Gallery {
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }
}

/// Normalize a gallery name into a filesystem/URL-safe slug: lowercase,
/// non-alphanumerics collapsed to `-`, trimmed, falling back to the
/// literal `"gallery"` when nothing alphanumeric remains.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_dash = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash && !slug.is_empty() {
            slug.push('-');
            last_was_dash = true;
        }
    }

    while slug.ends_with('-') {
        slug.pop();
    }

    if slug.is_empty() {
        "gallery".to_string()
    } else {
        slug
    }
}

/// Resolves gallery names to slugs and back by consulting the set of
/// galleries known within a guild, per Open Question #1: never re-derive a
/// slug from a raw name supplied by a caller without cross-checking it
/// against a gallery that's actually registered.
pub trait GalleryDirectory: Send + Sync {
    fn galleries_in_guild(&self, guild_id: &str) -> Vec<Gallery>;
}

/// Resolve `(guild_id, gallery_name)` to the slug used in storage keys.
/// The gallery must already be known to the directory; this never
/// fabricates a slug for an unregistered gallery.
pub fn resolve_slug(directory: &dyn GalleryDirectory, guild_id: &str, gallery_name: &str) -> Result<String> {
    directory
        .galleries_in_guild(guild_id)
        .into_iter()
        .find(|g| g.name == gallery_name)
        .map(|g| g.slug())
        .ok_or_else(|| Error::not_found(format!("gallery '{gallery_name}' in guild '{guild_id}'")))
}

/// Find the gallery whose slug matches, given only the slug (e.g. when
/// parsing a storage key or a streamed-media request path).
pub fn gallery_by_slug(directory: &dyn GalleryDirectory, guild_id: &str, slug: &str) -> Option<Gallery> {
    directory
        .galleries_in_guild(guild_id)
        .into_iter()
        .find(|g| g.slug() == slug)
}

/// In-process `GalleryDirectory`: galleries are created implicitly the
/// first time a name is used within a guild (no separate "create gallery"
/// step in the core upload flow), then remembered for slug resolution.
/// `galleries_in_guild` is synchronous per the trait, so this holds state
/// behind a `std::sync::RwLock` rather than tokio's async one.
#[derive(Default)]
pub struct InMemoryGalleryDirectory {
    by_guild: RwLock<HashMap<String, Vec<Gallery>>>,
}

impl InMemoryGalleryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gallery if no gallery with this name already exists in
    /// the guild; returns the (possibly pre-existing) gallery.
    pub fn ensure(&self, guild_id: &str, name: &str) -> Gallery {
        let mut galleries = self.by_guild.write().unwrap();
        let entry = galleries.entry(guild_id.to_string()).or_default();

        if let Some(existing) = entry.iter().find(|g| g.name == name) {
            return existing.clone();
        }

        let gallery = Gallery { guild_id: guild_id.to_string(), name: name.to_string() };
        entry.push(gallery.clone());
        gallery
    }
}

impl GalleryDirectory for InMemoryGalleryDirectory {
    fn galleries_in_guild(&self, guild_id: &str) -> Vec<Gallery> {
        self.by_guild
            .read()
            .unwrap()
            .get(guild_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_and_lowercases() {
        assert_eq!(slugify("My Trip to Japan!!"), "my-trip-to-japan");
        assert_eq!(slugify("  leading/trailing  "), "leading-trailing");
        assert_eq!(slugify("日本語"), "gallery");
        assert_eq!(slugify(""), "gallery");
    }

    struct FakeDirectory(Vec<Gallery>);
    impl GalleryDirectory for FakeDirectory {
        fn galleries_in_guild(&self, guild_id: &str) -> Vec<Gallery> {
            self.0.iter().filter(|g| g.guild_id == guild_id).cloned().collect()
        }
    }

    #[test]
    fn resolve_slug_requires_known_gallery() {
        let dir = FakeDirectory(vec![Gallery {
            guild_id: "g1".into(),
            name: "Summer Trip".into(),
        }]);

        assert_eq!(resolve_slug(&dir, "g1", "Summer Trip").unwrap(), "summer-trip");
        assert!(resolve_slug(&dir, "g1", "Unknown Gallery").is_err());
        assert!(resolve_slug(&dir, "other-guild", "Summer Trip").is_err());
    }

    #[test]
    fn in_memory_directory_ensure_is_idempotent_per_name() {
        let dir = InMemoryGalleryDirectory::new();
        let a = dir.ensure("g1", "Summer Trip");
        let b = dir.ensure("g1", "Summer Trip");
        dir.ensure("g1", "Winter Trip");

        assert_eq!(a.slug(), b.slug());
        assert_eq!(dir.galleries_in_guild("g1").len(), 2);
        assert!(dir.galleries_in_guild("other-guild").is_empty());
    }

    #[test]
    fn gallery_by_slug_round_trips() {
        let dir = FakeDirectory(vec![Gallery {
            guild_id: "g1".into(),
            name: "Summer Trip".into(),
        }]);

        let found = gallery_by_slug(&dir, "g1", "summer-trip").unwrap();
        assert_eq!(found.name, "Summer Trip");
        assert!(gallery_by_slug(&dir, "g1", "no-such-slug").is_none());
    }
}
