use serde::{Deserialize, Serialize};

/// Canonical preview metadata for one URL.
///
/// Every field is optional: pages routinely omit some of them, and a record
/// with only a title is still a usable preview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub title: Option<String>,
    pub site: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub image: Option<String>,
    pub video: Option<String>,
}

impl MetadataRecord {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.site.is_none()
            && self.description.is_none()
            && self.icon.is_none()
            && self.image.is_none()
            && self.video.is_none()
    }

    /// Overlay `other` on top of `self`: fields present in `other` win,
    /// fields it lacks keep their current value.
    pub fn overlay(self, other: MetadataRecord) -> MetadataRecord {
        MetadataRecord {
            title: other.title.or(self.title),
            site: other.site.or(self.site),
            description: other.description.or(self.description),
            icon: other.icon.or(self.icon),
            image: other.image.or(self.image),
            video: other.video.or(self.video),
        }
    }
}
