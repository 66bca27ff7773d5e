use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const IPTC_DIGITAL_SOURCE_TYPE: &str = "http://cv.iptc.org/newscodes/digitalsourcetype/";

/// IPTC digital source type URI describing how a new asset came to be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DigitalSourceType(String);

impl DigitalSourceType {
    pub fn new(uri: impl Into<String>) -> Result<Self> {
        let uri = uri.into();
        let valid = ["http://", "https://"]
            .iter()
            .any(|scheme| uri.len() > scheme.len() && uri.starts_with(scheme));
        if !valid {
            return Err(Error::Validation(format!(
                "digital source type must be an http(s) URI, got {uri:?}"
            )));
        }
        Ok(Self(uri))
    }

    pub fn digital_capture() -> Self {
        Self::iptc("digitalCapture")
    }

    pub fn trained_algorithmic_media() -> Self {
        Self::iptc("trainedAlgorithmicMedia")
    }

    pub fn composite_with_trained_algorithmic_media() -> Self {
        Self::iptc("compositeWithTrainedAlgorithmicMedia")
    }

    pub fn algorithmic_media() -> Self {
        Self::iptc("algorithmicMedia")
    }

    pub fn digital_creation() -> Self {
        Self::iptc("digitalCreation")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn iptc(term: &str) -> Self {
        Self(format!("{IPTC_DIGITAL_SOURCE_TYPE}{term}"))
    }
}

impl TryFrom<String> for DigitalSourceType {
    type Error = Error;

    fn try_from(uri: String) -> Result<Self> {
        Self::new(uri)
    }
}

impl From<DigitalSourceType> for String {
    fn from(value: DigitalSourceType) -> Self {
        value.0
    }
}

impl fmt::Display for DigitalSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declared purpose of a build.
///
/// - `Create`: a brand new asset; no parent ingredient is allowed and the
///   engine adds a `c2pa.created` action.
/// - `Edit`: the asset derives from a parent, synthesized from the source
///   when none was added; the engine adds a `c2pa.opened` action.
/// - `Update`: a non-content change to the parent, which must be the only
///   ingredient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Create(DigitalSourceType),
    Edit,
    Update,
}

impl Intent {
    pub fn create(digital_source_type: impl Into<String>) -> Result<Self> {
        Ok(Intent::Create(DigitalSourceType::new(digital_source_type)?))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Intent::Create(_) => "create",
            Intent::Edit => "edit",
            Intent::Update => "update",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_requires_source_type_uri() {
        assert!(Intent::create("").is_err());
        assert!(Intent::create("digitalCapture").is_err());
        assert!(Intent::create("http://").is_err());
        let intent = Intent::create(
            "http://cv.iptc.org/newscodes/digitalsourcetype/trainedAlgorithmicMedia",
        )
        .unwrap();
        assert_eq!(
            intent,
            Intent::Create(DigitalSourceType::trained_algorithmic_media())
        );
    }

    #[test]
    fn test_intent_json_shape() {
        let intent: Intent = serde_json::from_str(
            r#"{"create":"http://cv.iptc.org/newscodes/digitalsourcetype/digitalCapture"}"#,
        )
        .unwrap();
        assert_eq!(intent, Intent::Create(DigitalSourceType::digital_capture()));
        assert_eq!(
            serde_json::from_str::<Intent>(r#""edit""#).unwrap(),
            Intent::Edit
        );
        assert!(serde_json::from_str::<Intent>(r#"{"create":""}"#).is_err());
    }
}
