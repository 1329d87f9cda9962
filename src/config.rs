//! Dot-path configuration lookup, grounded in the original runtime's BSON
//! document walker (`smxconfig.c`/`smxconfig.h`): a document tree is
//! addressed with paths like `"a.b.c.d"`, and lookups fail with one of
//! three distinct reasons instead of a generic "not found".

use serde_json::Value;

use crate::error::ConfigError;

/// A document tree addressed by dot-separated paths, backed by
/// `serde_json::Value` rather than BSON — the crate has no need for
/// BSON's binary wire format, only its document-tree/dot-path shape.
#[derive(Debug, Clone)]
pub struct Config {
    root: Value,
}

impl Config {
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    pub fn from_str(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::from_value(serde_json::from_str(json)?))
    }

    fn resolve(&self, path: &str) -> Result<&Value, ConfigError> {
        let mut current = &self.root;
        for segment in path.split('.') {
            match current.get(segment) {
                Some(next) => current = next,
                None => return Err(ConfigError::None(path.to_string())),
            }
        }
        Ok(current)
    }

    pub fn get_bool(&self, path: &str) -> Result<bool, ConfigError> {
        self.resolve(path)?
            .as_bool()
            .ok_or_else(|| ConfigError::BadType(path.to_string()))
    }

    pub fn get_i64(&self, path: &str) -> Result<i64, ConfigError> {
        self.resolve(path)?
            .as_i64()
            .ok_or_else(|| ConfigError::BadType(path.to_string()))
    }

    pub fn get_f64(&self, path: &str) -> Result<f64, ConfigError> {
        self.resolve(path)?
            .as_f64()
            .ok_or_else(|| ConfigError::BadType(path.to_string()))
    }

    pub fn get_str(&self, path: &str) -> Result<&str, ConfigError> {
        self.resolve(path)?
            .as_str()
            .ok_or_else(|| ConfigError::BadType(path.to_string()))
    }

    /// A sub-view rooted at `path`, for a net that wants to read several
    /// keys relative to its own configuration block.
    pub fn view(&self, path: &str) -> Result<Config, ConfigError> {
        let value = self.resolve(path)?;
        if value.is_object() || value.is_array() {
            Ok(Config::from_value(value.clone()))
        } else {
            Err(ConfigError::NoValue(path.to_string()))
        }
    }

    /// Re-root this config at an alternate path, letting several nets
    /// share one configuration block under different keys — mirrors the
    /// original runtime's key-remapping support in `smxconfig.c`.
    pub fn remap(&self, from: &str) -> Config {
        match self.resolve(from) {
            Ok(value) => Config::from_value(value.clone()),
            Err(_) => self.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_nested_dot_paths() {
        let cfg = Config::from_str(r#"{"a":{"b":{"c":42}}}"#).unwrap();
        assert_eq!(cfg.get_i64("a.b.c").unwrap(), 42);
    }

    #[test]
    fn missing_path_reports_none() {
        let cfg = Config::from_str(r#"{"a":1}"#).unwrap();
        assert_eq!(cfg.get_i64("a.b"), Err(ConfigError::None("a.b".to_string())));
    }

    #[test]
    fn wrong_type_reports_bad_type() {
        let cfg = Config::from_str(r#"{"a":"not a number"}"#).unwrap();
        assert_eq!(cfg.get_i64("a"), Err(ConfigError::BadType("a".to_string())));
    }

    #[test]
    fn resolving_a_document_as_a_value_reports_no_value() {
        let cfg = Config::from_str(r#"{"a":{"b":1}}"#).unwrap();
        assert_eq!(cfg.get_i64("a"), Err(ConfigError::BadType("a".to_string())));
        assert!(cfg.view("a").is_ok());
    }
}
