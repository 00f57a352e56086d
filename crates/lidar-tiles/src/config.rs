//! Catalog configuration.
//!
//! Defaults describe the two provider naming conventions found in the survey
//! data. Any field can be overridden from a YAML file:
//!
//! ```yaml
//! include_imagery: false
//! elevation_valid_range: [-50.0, 2500.0]
//! role_rules:
//!   - pattern: { prefix: EGM-NHP }
//!     role: elevation
//!   - pattern: { directory: ORTHO }
//!     role: imagery
//! ```

use crate::{CatalogError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// What a raster file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterRole {
    /// Digital elevation model (DEM).
    Elevation,
    /// Orthophoto imagery (ORTHO).
    Imagery,
}

impl RasterRole {
    /// Returns the role as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RasterRole::Elevation => "elevation",
            RasterRole::Imagery => "imagery",
        }
    }
}

impl fmt::Display for RasterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a [`RoleRule`] recognizes a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolePattern {
    /// Filename starts with this provider prefix, followed by `_`, `-` or a digit.
    Prefix(String),
    /// Some directory between the scan root and the file has this name.
    Directory(String),
}

/// One entry of the ordered role dispatch table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRule {
    /// What to match.
    pub pattern: RolePattern,
    /// Role assigned on match.
    pub role: RasterRole,
}

impl RoleRule {
    /// Rule matching a filename prefix.
    pub fn prefix(prefix: &str, role: RasterRole) -> Self {
        Self {
            pattern: RolePattern::Prefix(prefix.to_string()),
            role,
        }
    }

    /// Rule matching a directory name.
    pub fn directory(name: &str, role: RasterRole) -> Self {
        Self {
            pattern: RolePattern::Directory(name.to_string()),
            role,
        }
    }

    /// Check whether this rule matches a file.
    ///
    /// `dirs` are the directory names between the scan root and the file.
    pub fn matches(&self, dirs: &[&str], filename: &str) -> bool {
        match &self.pattern {
            RolePattern::Prefix(prefix) => {
                let Some(head) = filename.get(..prefix.len()) else {
                    return false;
                };
                if !head.eq_ignore_ascii_case(prefix) {
                    return false;
                }
                matches!(
                    filename[prefix.len()..].chars().next(),
                    Some('_' | '-') | Some('0'..='9')
                )
            }
            RolePattern::Directory(name) => dirs.iter().any(|d| d.eq_ignore_ascii_case(name)),
        }
    }
}

/// Resampling used to bring an imagery grid onto its elevation grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resampling {
    /// Nearest source pixel.
    #[default]
    Nearest,
    /// Bilinear blend of the four surrounding source pixels.
    Bilinear,
}

/// Settings for discovery, pairing and raster loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Raster file extensions, without the dot, compared case-insensitively.
    pub extensions: Vec<String>,
    /// Directories whose name contains one of these markers are not entered.
    pub excluded_dir_markers: Vec<String>,
    /// Files ending with one of these suffixes are pyramid/aux sidecars.
    pub sidecar_suffixes: Vec<String>,
    /// Ordered role rules; the first match wins.
    pub role_rules: Vec<RoleRule>,
    /// When false, imagery files are ignored (elevation-only catalog).
    pub include_imagery: bool,
    /// Elevations outside this inclusive range are treated as no-data.
    pub elevation_valid_range: Option<(f32, f32)>,
    /// Imagery-to-elevation resampling method.
    pub resampling: Resampling,
    /// Follow symbolic links while scanning.
    pub follow_links: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["tif".to_string(), "tiff".to_string()],
            excluded_dir_markers: vec![".gdb".to_string(), "Overviews".to_string()],
            sidecar_suffixes: vec![
                ".ovr".to_string(),
                ".aux.xml".to_string(),
                ".rrd".to_string(),
                "_ovr.tif".to_string(),
            ],
            role_rules: vec![
                RoleRule::prefix("EGM-NHP", RasterRole::Elevation),
                RoleRule::prefix("EGM-NMCG", RasterRole::Elevation),
                RoleRule::prefix("NHP", RasterRole::Imagery),
                RoleRule::prefix("NMCG", RasterRole::Imagery),
                RoleRule::directory("DEM", RasterRole::Elevation),
                RoleRule::directory("ORTHO", RasterRole::Imagery),
            ],
            include_imagery: true,
            elevation_valid_range: Some((-100.0, 5000.0)),
            resampling: Resampling::Nearest,
            follow_links: false,
        }
    }
}

impl CatalogConfig {
    /// Parse a configuration from YAML. Missing fields keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(CatalogError::Io)?;
        Self::from_yaml_str(&text)
    }

    /// Elevation-only variant of this configuration.
    pub fn elevation_only(mut self) -> Self {
        self.include_imagery = false;
        self
    }

    /// Determine the role of a file, or `None` if no rule matches.
    pub fn classify(&self, dirs: &[&str], filename: &str) -> Option<RasterRole> {
        self.role_rules
            .iter()
            .find(|rule| rule.matches(dirs, filename))
            .map(|rule| rule.role)
    }

    /// Check whether a filename has a raster extension and is not a sidecar.
    pub fn is_raster_filename(&self, filename: &str) -> bool {
        let lower = filename.to_ascii_lowercase();
        if self
            .sidecar_suffixes
            .iter()
            .any(|suffix| lower.ends_with(&suffix.to_ascii_lowercase()))
        {
            return false;
        }
        match lower.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => self
                .extensions
                .iter()
                .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext)),
            _ => false,
        }
    }

    /// Check whether a directory must not be entered.
    pub fn is_excluded_dir(&self, dir_name: &str) -> bool {
        self.excluded_dir_markers
            .iter()
            .any(|marker| dir_name.contains(marker.as_str()))
    }
}
