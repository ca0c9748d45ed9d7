//! Object-store key grammar.
//!
//! Keys are the storage ABI: every logical artifact derives its key from
//! (sku, hash, theme, role, variant, aspect) and nothing else, so
//! re-running a step overwrites the same objects. This module is the only
//! place keys are minted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Output aspect ratios for composites and derivatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aspect {
    #[serde(rename = "1x1")]
    Square,
    #[serde(rename = "4x5")]
    Portrait,
    #[serde(rename = "16x9")]
    Landscape,
}

impl Aspect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Square => "1x1",
            Self::Portrait => "4x5",
            Self::Landscape => "16x9",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1x1" => Some(Self::Square),
            "4x5" => Some(Self::Portrait),
            "16x9" => Some(Self::Landscape),
            _ => None,
        }
    }

    /// Pixel dimensions used for derivative output at this aspect.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Square => (1024, 1024),
            Self::Portrait => (1080, 1350),
            Self::Landscape => (1600, 900),
        }
    }
}

impl fmt::Display for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite flavor: `sharp` for the deterministic compositor, `ai` for
/// an AI compositor output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeKind {
    Sharp,
    Ai,
}

impl CompositeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sharp => "sharp",
            Self::Ai => "ai",
        }
    }
}

pub fn original(sku: &str, hash: &str) -> String {
    format!("originals/{}/{}.jpg", sku, hash)
}

pub fn mask(sku: &str, hash: &str) -> String {
    format!("masks/{}/{}.png", sku, hash)
}

pub fn cutout(sku: &str, hash: &str) -> String {
    format!("cutouts/{}/{}.png", sku, hash)
}

/// `variant` is 1-based.
pub fn background(sku: &str, hash: &str, theme: &str, variant: u32) -> String {
    format!("backgrounds/{}/{}/{}/v{}.jpg", sku, hash, theme, variant)
}

pub fn composite(
    sku: &str,
    hash: &str,
    theme: &str,
    aspect: Aspect,
    variant: u32,
    kind: CompositeKind,
) -> String {
    format!(
        "composites/{}/{}/{}/{}/v{}/{}.jpg",
        sku,
        hash,
        theme,
        aspect.as_str(),
        variant,
        kind.as_str()
    )
}

pub fn thumbnail(sku: &str, hash: &str) -> String {
    format!("thumbnails/{}/{}.jpg", sku, hash)
}

/// Resized/reformatted variant of a composite. Width/height/extension make
/// the key unique per derivative spec; the grammar is deterministic like
/// the rest so regeneration overwrites in place.
pub fn derivative(
    sku: &str,
    hash: &str,
    theme: &str,
    aspect: Aspect,
    width: u32,
    height: u32,
    ext: &str,
) -> String {
    format!(
        "derivatives/{}/{}/{}/{}/{}x{}.{}",
        sku,
        hash,
        theme,
        aspect.as_str(),
        width,
        height,
        ext
    )
}

pub fn template_asset(template_id: &str, variant: u32) -> String {
    format!("templates/{}/v{}.jpg", template_id, variant)
}

/// Key for a background uploaded by hand rather than generated.
pub fn template_upload(template_id: &str) -> String {
    format!("templates/{}/background.jpg", template_id)
}

pub fn manifest(sku: &str, hash: &str, theme: &str) -> String {
    format!("manifests/{}/{}/{}.json", sku, hash, theme)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SKU: &str = "ABC-1";
    const HASH: &str = "deadbeef";

    #[test]
    fn key_grammar_is_stable() {
        assert_eq!(original(SKU, HASH), "originals/ABC-1/deadbeef.jpg");
        assert_eq!(mask(SKU, HASH), "masks/ABC-1/deadbeef.png");
        assert_eq!(cutout(SKU, HASH), "cutouts/ABC-1/deadbeef.png");
        assert_eq!(
            background(SKU, HASH, "studio", 2),
            "backgrounds/ABC-1/deadbeef/studio/v2.jpg"
        );
        assert_eq!(
            composite(SKU, HASH, "studio", Aspect::Square, 1, CompositeKind::Sharp),
            "composites/ABC-1/deadbeef/studio/1x1/v1/sharp.jpg"
        );
        assert_eq!(
            composite(SKU, HASH, "studio", Aspect::Portrait, 3, CompositeKind::Ai),
            "composites/ABC-1/deadbeef/studio/4x5/v3/ai.jpg"
        );
        assert_eq!(thumbnail(SKU, HASH), "thumbnails/ABC-1/deadbeef.jpg");
        assert_eq!(template_asset("tpl-9", 1), "templates/tpl-9/v1.jpg");
        assert_eq!(template_upload("tpl-9"), "templates/tpl-9/background.jpg");
        assert_eq!(
            manifest(SKU, HASH, "studio"),
            "manifests/ABC-1/deadbeef/studio.json"
        );
    }

    #[test]
    fn regeneration_hits_the_same_key() {
        let a = composite(SKU, HASH, "default", Aspect::Square, 1, CompositeKind::Sharp);
        let b = composite(SKU, HASH, "default", Aspect::Square, 1, CompositeKind::Sharp);
        assert_eq!(a, b);
    }

    #[test]
    fn aspect_round_trips() {
        for a in [Aspect::Square, Aspect::Portrait, Aspect::Landscape] {
            assert_eq!(Aspect::parse(a.as_str()), Some(a));
        }
        assert_eq!(Aspect::parse("2x3"), None);
    }
}
