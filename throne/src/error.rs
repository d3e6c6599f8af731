//! Failure classification shared by every domain error.

use serde::Serialize;

/// The three ways an operation can be rejected.
///
/// Every rejection happens before any state is touched; there are no partial
/// effects to recover from and nothing is retried internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed input: bad identifier, out-of-range value, unknown enum.
    Validation,
    /// Referenced user, request or record does not exist (or is not in the
    /// state the operation needs).
    NotFound,
    /// Operation collides with existing state: duplicate active request,
    /// resource already held, identity tag already taken.
    Conflict,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
        }
    }
}

/// Implemented by domain errors so transports can map them uniformly.
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_snake_case() {
        insta::assert_json_snapshot!(
            [ErrorClass::Validation, ErrorClass::NotFound, ErrorClass::Conflict],
            @r#"
        [
          "validation",
          "not_found",
          "conflict"
        ]
        "#
        );
    }

    #[test]
    fn as_str_matches_serde() {
        for class in [
            ErrorClass::Validation,
            ErrorClass::NotFound,
            ErrorClass::Conflict,
        ] {
            assert_eq!(
                serde_json::to_value(class).unwrap(),
                serde_json::json!(class.as_str())
            );
        }
    }
}
