//! # Semantic Asset Paths
//!
//! A [`SemanticPath`] classifies an artifact by what it depicts rather than
//! by a content hash. Every storage location is a pure function of it:
//!
//! ```text
//! products/{transparent|original}/{category}/{product-slug}/product.png
//! backgrounds/{style}/{region|global}/{season|none}/background.jpg
//! composites/{campaign-id}/{product-slug}/{aspect-ratio}/final.jpg
//! ```
//!
//! The remote key prepends the configured namespace prefix; the local path
//! joins the same relative layout onto the cache root. Because the layout
//! is derived from stable product and category attributes, the same asset
//! requested by two campaigns lands on the same key and is reused.
//!
//! ## Boundary Validation
//!
//! Paths are validated before any key or file location is derived. Each
//! segment must be a non-empty slug of `[a-z0-9._-]`, not starting with a
//! dot, so a crafted category or campaign id cannot escape the cache root.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Maximum length of a single path segment.
const MAX_SEGMENT_LEN: usize = 128;

/// Region segment used for backgrounds that are not region specific.
const GLOBAL_REGION: &str = "global";

/// Season segment used for backgrounds that are not seasonal.
const NO_SEASON: &str = "none";

/// Kind of artifact held in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    /// Product cut-out with an alpha channel.
    ProductTransparent,
    /// Product photograph as delivered.
    ProductOriginal,
    /// Scene or backdrop a product is composited onto.
    SceneBackground,
    /// Final composed creative for a campaign.
    Composite,
}

impl AssetType {
    /// All asset types, in layout order.
    pub const ALL: [AssetType; 4] = [
        Self::ProductTransparent,
        Self::ProductOriginal,
        Self::SceneBackground,
        Self::Composite,
    ];

    /// Returns the snake_case identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProductTransparent => "product_transparent",
            Self::ProductOriginal => "product_original",
            Self::SceneBackground => "scene_background",
            Self::Composite => "composite",
        }
    }

    /// Top-level folder of the layout this type lives under.
    pub fn folder(&self) -> &'static str {
        match self {
            Self::ProductTransparent | Self::ProductOriginal => "products",
            Self::SceneBackground => "backgrounds",
            Self::Composite => "composites",
        }
    }

    /// File name of the artifact inside its leaf directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::ProductTransparent | Self::ProductOriginal => "product.png",
            Self::SceneBackground => "background.jpg",
            Self::Composite => "final.jpg",
        }
    }
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AssetType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "product_transparent" | "transparent" => Ok(Self::ProductTransparent),
            "product_original" | "original" => Ok(Self::ProductOriginal),
            "scene_background" | "background" => Ok(Self::SceneBackground),
            "composite" => Ok(Self::Composite),
            _ => Err(CoreError::UnknownVariant {
                kind: "asset type",
                value: s.to_string(),
            }),
        }
    }
}

/// Season a background is styled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    Spring,
    Summer,
    Fall,
    Winter,
}

impl Season {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spring => "spring",
            Self::Summer => "summer",
            Self::Fall => "fall",
            Self::Winter => "winter",
        }
    }
}

impl std::fmt::Display for Season {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Season {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spring" => Ok(Self::Spring),
            "summer" => Ok(Self::Summer),
            "fall" | "autumn" => Ok(Self::Fall),
            "winter" => Ok(Self::Winter),
            _ => Err(CoreError::UnknownVariant {
                kind: "season",
                value: s.to_string(),
            }),
        }
    }
}

/// Structured classification of an artifact.
///
/// Optional fields are required or ignored depending on `asset_type`; see
/// [`SemanticPath::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SemanticPath {
    pub asset_type: AssetType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<Season>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
}

impl SemanticPath {
    fn empty(asset_type: AssetType) -> Self {
        Self {
            asset_type,
            category: None,
            product_slug: None,
            style: None,
            region: None,
            season: None,
            campaign_id: None,
            aspect_ratio: None,
        }
    }

    /// A product image. Category and product name are slugified.
    pub fn product(category: &str, product_name: &str, transparent: bool) -> Self {
        let asset_type = if transparent {
            AssetType::ProductTransparent
        } else {
            AssetType::ProductOriginal
        };
        Self {
            category: Some(slugify(category)),
            product_slug: Some(slugify(product_name)),
            ..Self::empty(asset_type)
        }
    }

    /// A background. A missing region renders as `global`, a missing season as `none`.
    pub fn background(style: &str, region: Option<&str>, season: Option<Season>) -> Self {
        Self {
            style: Some(slugify(style)),
            region: region.map(slugify),
            season,
            ..Self::empty(AssetType::SceneBackground)
        }
    }

    /// A final creative. Aspect ratios given as `9:16` are stored as `9x16`.
    pub fn composite(campaign_id: &str, product_name: &str, aspect_ratio: &str) -> Self {
        Self {
            campaign_id: Some(slugify(campaign_id)),
            product_slug: Some(slugify(product_name)),
            aspect_ratio: Some(normalize_aspect_ratio(aspect_ratio)),
            ..Self::empty(AssetType::Composite)
        }
    }

    /// Check that every field required by the asset type is present and
    /// that every present segment is a safe slug.
    pub fn validate(&self) -> Result<(), CoreError> {
        let required: Vec<(&str, &Option<String>)> = match self.asset_type {
            AssetType::ProductTransparent | AssetType::ProductOriginal => vec![
                ("category", &self.category),
                ("product_slug", &self.product_slug),
            ],
            AssetType::SceneBackground => vec![("style", &self.style)],
            AssetType::Composite => vec![
                ("campaign_id", &self.campaign_id),
                ("product_slug", &self.product_slug),
                ("aspect_ratio", &self.aspect_ratio),
            ],
        };
        for (name, value) in required {
            if value.is_none() {
                return Err(CoreError::InvalidSemanticPath(format!(
                    "{} requires {name}",
                    self.asset_type
                )));
            }
        }

        let optional = [
            ("category", &self.category),
            ("product_slug", &self.product_slug),
            ("style", &self.style),
            ("region", &self.region),
            ("campaign_id", &self.campaign_id),
            ("aspect_ratio", &self.aspect_ratio),
        ];
        for (name, value) in optional {
            if let Some(segment) = value {
                validate_segment(name, segment)?;
            }
        }
        Ok(())
    }

    /// Leaf directory segments, in layout order, without the folder or file name.
    fn segments(&self) -> Result<Vec<&str>, CoreError> {
        self.validate()?;
        let segments = match self.asset_type {
            AssetType::ProductTransparent => {
                vec!["transparent", field(&self.category), field(&self.product_slug)]
            }
            AssetType::ProductOriginal => {
                vec!["original", field(&self.category), field(&self.product_slug)]
            }
            AssetType::SceneBackground => vec![
                field(&self.style),
                self.region.as_deref().unwrap_or(GLOBAL_REGION),
                self.season.as_ref().map_or(NO_SEASON, Season::as_str),
            ],
            AssetType::Composite => vec![
                field(&self.campaign_id),
                field(&self.product_slug),
                field(&self.aspect_ratio),
            ],
        };
        Ok(segments)
    }

    /// Layout path relative to a tier root, e.g.
    /// `products/transparent/laundry-care/tide-pods/product.png`.
    pub fn relative_path(&self) -> Result<String, CoreError> {
        let segments = self.segments()?;
        Ok(format!(
            "{}/{}/{}",
            self.asset_type.folder(),
            segments.join("/"),
            self.asset_type.file_name()
        ))
    }

    /// Object key under the remote namespace prefix.
    pub fn remote_key(&self, prefix: &str) -> Result<String, CoreError> {
        let relative = self.relative_path()?;
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            Ok(relative)
        } else {
            Ok(format!("{prefix}/{relative}"))
        }
    }

    /// File location under the local cache root.
    pub fn local_path(&self, root: &Path) -> Result<PathBuf, CoreError> {
        let relative = self.relative_path()?;
        Ok(relative.split('/').fold(root.to_path_buf(), |p, s| p.join(s)))
    }

    /// Stable, human-legible cache key, e.g.
    /// `product_transparent:laundry-care:tide-pods`.
    pub fn derive_key(&self) -> Result<String, CoreError> {
        let segments = self.segments()?;
        let tail = match self.asset_type {
            // The variant is already named by the asset type.
            AssetType::ProductTransparent | AssetType::ProductOriginal => &segments[1..],
            _ => &segments[..],
        };
        Ok(format!("{}:{}", self.asset_type, tail.join(":")))
    }

    /// Recover a semantic path from a remote key.
    ///
    /// Returns `None` for keys outside `prefix`, for the metadata index, and
    /// for keys that do not follow the layout.
    pub fn parse_remote_key(prefix: &str, key: &str) -> Option<Self> {
        let prefix = prefix.trim_end_matches('/');
        let relative = if prefix.is_empty() {
            key
        } else {
            key.strip_prefix(prefix)?.strip_prefix('/')?
        };
        Self::parse_relative(relative)
    }

    /// Inverse of [`SemanticPath::relative_path`].
    pub fn parse_relative(relative: &str) -> Option<Self> {
        let parts: Vec<&str> = relative.split('/').collect();
        if parts.len() != 5 {
            return None;
        }
        let owned = |s: &str| Some(s.to_string());
        let path = match parts[0] {
            "products" => {
                let asset_type = match parts[1] {
                    "transparent" => AssetType::ProductTransparent,
                    "original" => AssetType::ProductOriginal,
                    _ => return None,
                };
                Self {
                    category: owned(parts[2]),
                    product_slug: owned(parts[3]),
                    ..Self::empty(asset_type)
                }
            }
            "backgrounds" => Self {
                style: owned(parts[1]),
                region: (parts[2] != GLOBAL_REGION).then(|| parts[2].to_string()),
                season: if parts[3] == NO_SEASON {
                    None
                } else {
                    Some(parts[3].parse().ok()?)
                },
                ..Self::empty(AssetType::SceneBackground)
            },
            "composites" => Self {
                campaign_id: owned(parts[1]),
                product_slug: owned(parts[2]),
                aspect_ratio: owned(parts[3]),
                ..Self::empty(AssetType::Composite)
            },
            _ => return None,
        };
        if parts[4] != path.asset_type.file_name() || path.validate().is_err() {
            return None;
        }
        Some(path)
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

fn field(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or_default()
}

fn validate_segment(name: &str, segment: &str) -> Result<(), CoreError> {
    if segment.is_empty() {
        return Err(CoreError::InvalidSemanticPath(format!("{name} is empty")));
    }
    if segment.len() > MAX_SEGMENT_LEN {
        return Err(CoreError::InvalidSemanticPath(format!(
            "{name} exceeds {MAX_SEGMENT_LEN} characters"
        )));
    }
    if segment.starts_with('.') {
        return Err(CoreError::InvalidSemanticPath(format!(
            "{name} {segment:?} must not start with '.'"
        )));
    }
    if !segment
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
    {
        return Err(CoreError::InvalidSemanticPath(format!(
            "{name} {segment:?} must contain only [a-z0-9._-]"
        )));
    }
    Ok(())
}

/// Convert a display name to a path-safe slug.
///
/// Lowercases, drops punctuation, and collapses runs of whitespace,
/// hyphens, and underscores into a single hyphen.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else if c.is_whitespace() || c == '-' || c == '_' {
            pending_sep = true;
        }
    }
    out
}

fn normalize_aspect_ratio(ratio: &str) -> String {
    ratio.trim().to_ascii_lowercase().replace(':', "x")
}
