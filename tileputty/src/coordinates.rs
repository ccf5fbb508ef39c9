//! Publish coordinates: where in the bucket a tile cache lands.

use std::fmt;

use crate::config::ConfigError;

/// Default destination bucket.
pub const DEFAULT_BUCKET: &str = "gfw-tiles";

/// Default implementation (rendering option) name.
pub const DEFAULT_IMPLEMENTATION: &str = "default";

/// Logical location of one publish run.
///
/// Every object uploaded in a run is keyed under
/// `{dataset}/{version}/{implementation}/`. The coordinates are validated on
/// construction so that each component is exactly one key segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublishCoordinates {
    bucket: String,
    dataset: String,
    version: String,
    implementation: String,
}

impl PublishCoordinates {
    /// Create coordinates with every component given explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if any component is empty, is
    /// `.` or `..`, or contains a `/` or `\` separator.
    pub fn new(
        bucket: impl Into<String>,
        dataset: impl Into<String>,
        version: impl Into<String>,
        implementation: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let coordinates = Self {
            bucket: bucket.into(),
            dataset: dataset.into(),
            version: version.into(),
            implementation: implementation.into(),
        };

        if coordinates.bucket.trim().is_empty() {
            return Err(ConfigError::invalid("bucket", "must not be empty"));
        }
        validate_segment("dataset", &coordinates.dataset)?;
        validate_segment("version", &coordinates.version)?;
        validate_segment("implementation", &coordinates.implementation)?;

        Ok(coordinates)
    }

    /// Create coordinates in the default bucket with the default implementation.
    pub fn for_dataset(
        dataset: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Self::new(DEFAULT_BUCKET, dataset, version, DEFAULT_IMPLEMENTATION)
    }

    /// Destination bucket.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Dataset (layer) name.
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Dataset version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Implementation (rendering option) name.
    pub fn implementation(&self) -> &str {
        &self.implementation
    }

    /// Key prefix shared by every object in the run, without trailing slash.
    pub fn prefix(&self) -> String {
        format!("{}/{}/{}", self.dataset, self.version, self.implementation)
    }
}

impl fmt::Display for PublishCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.prefix())
    }
}

fn validate_segment(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::invalid(field, "must not be empty"));
    }
    if value == "." || value == ".." {
        return Err(ConfigError::invalid(field, format!("'{}' is not allowed", value)));
    }
    if value.contains('/') || value.contains('\\') {
        return Err(ConfigError::invalid(
            field,
            format!("'{}' must not contain path separators", value),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_dataset_uses_defaults() {
        let coords = PublishCoordinates::for_dataset("gfw", "v1").unwrap();
        assert_eq!(coords.bucket(), DEFAULT_BUCKET);
        assert_eq!(coords.implementation(), DEFAULT_IMPLEMENTATION);
        assert_eq!(coords.prefix(), "gfw/v1/default");
    }

    #[test]
    fn test_display() {
        let coords = PublishCoordinates::new("b", "gfw", "v1", "default").unwrap();
        assert_eq!(coords.to_string(), "s3://b/gfw/v1/default");
    }

    #[test]
    fn test_rejects_empty_components() {
        assert!(PublishCoordinates::new("", "gfw", "v1", "default").is_err());
        assert!(PublishCoordinates::new("b", "", "v1", "default").is_err());
        assert!(PublishCoordinates::new("b", "gfw", "", "default").is_err());
        assert!(PublishCoordinates::new("b", "gfw", "v1", "").is_err());
    }

    #[test]
    fn test_rejects_separators() {
        let err = PublishCoordinates::new("b", "gfw/forest", "v1", "default").unwrap_err();
        assert!(err.to_string().contains("dataset"));
        assert!(PublishCoordinates::new("b", "gfw", "v1\\2", "default").is_err());
        assert!(PublishCoordinates::new("b", "gfw", "..", "default").is_err());
    }
}
