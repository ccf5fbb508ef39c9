//! Storage metadata for tile cache files.
//!
//! Every uploaded object carries HTTP headers derived from its file extension
//! alone. Vector tiles are stored pre-compressed, so they advertise a gzip
//! content encoding; raster tiles and vector tiles are immutable once
//! published and get a one year cache lifetime.
//!
//! | extension      | content-type             | encoding | cache-control      |
//! |----------------|--------------------------|----------|--------------------|
//! | `.mvt`, `.pbf` | `application/x-protobuf` | `gzip`   | `max-age=31536000` |
//! | `.png`         | `image/png`              |          | `max-age=31536000` |
//! | `.jpg`         | `image/jpeg`             |          | `max-age=31536000` |
//! | `.json`        | `application/json`       |          |                    |
//!
//! Any other extension gets empty metadata and is uploaded without headers.

use std::path::Path;

/// Cache lifetime for immutable tiles (365 days).
pub const TILE_CACHE_CONTROL: &str = "max-age=31536000";

/// Content type for Mapbox vector tiles.
pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// Content type for JSON documents (tile metadata, manifest).
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Extensions of tile files, as opposed to sibling metadata files.
pub const TILE_EXTENSIONS: &[&str] = &[".mvt", ".pbf", ".png", ".jpg"];

/// Headers attached to an uploaded object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// `Content-Type` header.
    pub content_type: Option<&'static str>,
    /// `Content-Encoding` header.
    pub content_encoding: Option<&'static str>,
    /// `Cache-Control` header.
    pub cache_control: Option<&'static str>,
}

impl ObjectMetadata {
    /// Metadata with no headers set.
    pub const EMPTY: ObjectMetadata = ObjectMetadata {
        content_type: None,
        content_encoding: None,
        cache_control: None,
    };

    const VECTOR_TILE: ObjectMetadata = ObjectMetadata {
        content_type: Some(PROTOBUF_CONTENT_TYPE),
        content_encoding: Some("gzip"),
        cache_control: Some(TILE_CACHE_CONTROL),
    };

    const PNG_TILE: ObjectMetadata = ObjectMetadata {
        content_type: Some("image/png"),
        content_encoding: None,
        cache_control: Some(TILE_CACHE_CONTROL),
    };

    const JPG_TILE: ObjectMetadata = ObjectMetadata {
        content_type: Some("image/jpeg"),
        content_encoding: None,
        cache_control: Some(TILE_CACHE_CONTROL),
    };

    const JSON: ObjectMetadata = ObjectMetadata {
        content_type: Some(JSON_CONTENT_TYPE),
        content_encoding: None,
        cache_control: None,
    };

    /// Look up the metadata for a file extension.
    ///
    /// The extension includes its leading dot (`".png"`) and is matched
    /// exactly, so `".PNG"` and `"png"` are both unrecognized. Never fails:
    /// unknown input yields [`ObjectMetadata::EMPTY`].
    pub fn for_extension(extension: &str) -> Self {
        match extension {
            ".mvt" | ".pbf" => Self::VECTOR_TILE,
            ".png" => Self::PNG_TILE,
            ".jpg" => Self::JPG_TILE,
            ".json" => Self::JSON,
            _ => Self::EMPTY,
        }
    }

    /// Look up the metadata for a file by its extension.
    pub fn for_path(path: &Path) -> Self {
        Self::for_extension(&extension_of(path))
    }

    /// Returns true if no header is set.
    pub fn is_empty(&self) -> bool {
        self.content_type.is_none()
            && self.content_encoding.is_none()
            && self.cache_control.is_none()
    }
}

/// Extension of a path including the leading dot, or `""` when there is none.
///
/// Dotfiles such as `.hidden` have no extension, matching how the file name
/// stem is split everywhere else in the crate.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Returns true if the extension belongs to a tile file.
pub fn is_tile_extension(extension: &str) -> bool {
    TILE_EXTENSIONS.contains(&extension)
}
