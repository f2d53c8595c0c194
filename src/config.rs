use crate::engine::EngineParameters;
use crate::error::{LineageError, Result};
use crate::position::{DEFAULT_UM_PER_PIXEL, PixelScale};
use lineage_protocol::CollisionPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub um_per_pixel: f64,
    pub collision_policy: CollisionPolicy,
    pub strict_parents: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            um_per_pixel: DEFAULT_UM_PER_PIXEL,
            collision_policy: CollisionPolicy::Reject,
            strict_parents: false,
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            LineageError::InvalidInput(format!(
                "could not read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.scale().map(|_| ())
    }

    pub fn scale(&self) -> Result<PixelScale> {
        PixelScale::new(self.um_per_pixel)
    }

    pub fn engine_parameters(&self) -> EngineParameters {
        EngineParameters {
            collision_policy: self.collision_policy,
            strict_parents: self.strict_parents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = SessionConfig::from_json_str(r#"{"strict_parents": true}"#).unwrap();
        assert!(config.strict_parents);
        assert_eq!(config.um_per_pixel, DEFAULT_UM_PER_PIXEL);
        assert_eq!(config.collision_policy, CollisionPolicy::Reject);
        assert_eq!(SessionConfig::from_json_str("{}").unwrap(), SessionConfig::default());
    }

    #[test]
    fn test_invalid_scale_is_rejected() {
        assert!(SessionConfig::from_json_str(r#"{"um_per_pixel": 0}"#).is_err());
        assert!(SessionConfig::from_json_str(r#"{"um_per_pixel": "x"}"#).is_err());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lineage.json");
        std::fs::write(&path, r#"{"um_per_pixel": 0.5, "collision_policy": "merge"}"#).unwrap();
        let config = SessionConfig::load_from_path(&path).unwrap();
        assert_eq!(config.um_per_pixel, 0.5);
        assert_eq!(
            config.engine_parameters().collision_policy,
            CollisionPolicy::Merge
        );
        assert!(SessionConfig::load_from_path(dir.path().join("nope.json")).is_err());
    }
}
