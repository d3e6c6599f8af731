//! Version information for throne.

/// Throne version from Cargo.toml
pub const THRONE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub throne: &'static str,
    /// Build identifier supplied by the deployment, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            throne: THRONE_VERSION,
            build: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_build(mut self, build: String) -> Self {
        self.build = Some(build);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_info_has_crate_version() {
        let info = VersionInfo::new();
        assert_eq!(info.throne, THRONE_VERSION);
        assert!(info.build.is_none());
    }

    #[test]
    fn version_info_serializes_minimal() {
        let info = VersionInfo {
            throne: "0.1.0",
            build: None,
        };
        insta::assert_json_snapshot!(info, @r#"
        {
          "throne": "0.1.0"
        }
        "#);
    }

    #[test]
    fn version_info_serializes_build() {
        let info = VersionInfo {
            throne: "0.1.0",
            build: None,
        }
        .with_build("2024-06-01.abc123".to_string());
        insta::assert_json_snapshot!(info, @r#"
        {
          "throne": "0.1.0",
          "build": "2024-06-01.abc123"
        }
        "#);
    }
}
