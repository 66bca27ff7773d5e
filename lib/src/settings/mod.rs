//! Layered settings handed to the provenance engine.
//!
//! Settings are built from typed section records, folded together with
//! [`merge_settings`] and serialized once when a [`crate::Builder`] or
//! [`crate::Reader`] is constructed. Every field is optional: `None` means
//! "engine default" and never reaches the serialized form, which is what makes
//! partial overrides possible.

mod load;

pub use load::{load_settings_from_file, load_settings_from_url};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Section-level behaviour shared by every settings record.
trait Section: Sized {
    /// Fields set in `later` win; fields left unset in `later` keep `self`.
    fn merge(self, later: Self) -> Self;

    fn is_empty(&self) -> bool;
}

macro_rules! section {
    ($name:ident { $($field:ident),+ $(,)? }) => {
        impl Section for $name {
            fn merge(self, later: Self) -> Self {
                Self {
                    $($field: later.$field.or(self.$field)),+
                }
            }

            fn is_empty(&self) -> bool {
                true $(&& self.$field.is_none())+
            }
        }
    };
}

/// Certificate trust configuration for manifest signers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustSettings {
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "verifyTrustList")]
    pub verify_trust_list: Option<bool>,
    /// PEM bundle of additional anchors supplied by the user.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "userAnchors")]
    pub user_anchors: Option<String>,
    /// PEM bundle of trust anchors.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "trustAnchors")]
    pub trust_anchors: Option<String>,
    /// Allowed extended key usage OIDs, one per line.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "trustConfig")]
    pub trust_config: Option<String>,
    /// End-entity certificates that are trusted regardless of their chain.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "allowedList")]
    pub allowed_list: Option<String>,
}

section!(TrustSettings {
    verify_trust_list,
    user_anchors,
    trust_anchors,
    trust_config,
    allowed_list,
});

/// Trust configuration used when validating CAWG identity assertions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CawgTrustSettings {
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "verifyTrustList")]
    pub verify_trust_list: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "userAnchors")]
    pub user_anchors: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "trustAnchors")]
    pub trust_anchors: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "trustConfig")]
    pub trust_config: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "allowedList")]
    pub allowed_list: Option<String>,
}

section!(CawgTrustSettings {
    verify_trust_list,
    user_anchors,
    trust_anchors,
    trust_config,
    allowed_list,
});

/// Verification policy applied while reading and after signing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifySettings {
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "verifyAfterReading")]
    pub verify_after_reading: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "verifyAfterSign")]
    pub verify_after_sign: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "verifyTrust")]
    pub verify_trust: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "verifyTimestampTrust")]
    pub verify_timestamp_trust: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "ocspFetch")]
    pub ocsp_fetch: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "remoteManifestFetch")]
    pub remote_manifest_fetch: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "skipIngredientConflictResolution"
    )]
    pub skip_ingredient_conflict_resolution: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "strictV1Validation")]
    pub strict_v1_validation: Option<bool>,
}

section!(VerifySettings {
    verify_after_reading,
    verify_after_sign,
    verify_trust,
    verify_timestamp_trust,
    ocsp_fetch,
    remote_manifest_fetch,
    skip_ingredient_conflict_resolution,
    strict_v1_validation,
});

/// Options that shape how manifests and archives are produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderSettings {
    /// Write archives in the C2PA archive format rather than the legacy zip.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "generateC2paArchive")]
    pub generate_c2pa_archive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "autoThumbnail")]
    pub auto_thumbnail: Option<bool>,
    /// Assertion labels recorded as created rather than gathered.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "createdAssertionLabels")]
    pub created_assertion_labels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "certificateStatusFetch")]
    pub certificate_status_fetch: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "certificateStatusShouldOverride"
    )]
    pub certificate_status_should_override: Option<bool>,
}

section!(BuilderSettings {
    generate_c2pa_archive,
    auto_thumbnail,
    created_assertion_labels,
    certificate_status_fetch,
    certificate_status_should_override,
});

fn is_unset<T: Section>(section: &Option<T>) -> bool {
    section.as_ref().is_none_or(Section::is_empty)
}

fn merge_section<T: Section>(earlier: Option<T>, later: Option<T>) -> Option<T> {
    match (earlier, later) {
        (Some(earlier), Some(later)) => Some(earlier.merge(later)),
        (earlier, later) => later.or(earlier),
    }
}

/// A settings fragment. Fragments compose with [`Settings::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "is_unset")]
    pub trust: Option<TrustSettings>,
    #[serde(default, skip_serializing_if = "is_unset", alias = "cawgTrust")]
    pub cawg_trust: Option<CawgTrustSettings>,
    #[serde(default, skip_serializing_if = "is_unset")]
    pub verify: Option<VerifySettings>,
    #[serde(default, skip_serializing_if = "is_unset")]
    pub builder: Option<BuilderSettings>,
}

impl Settings {
    pub fn merge(self, later: Settings) -> Settings {
        Settings {
            trust: merge_section(self.trust, later.trust),
            cawg_trust: merge_section(self.cawg_trust, later.cawg_trust),
            verify: merge_section(self.verify, later.verify),
            builder: merge_section(self.builder, later.builder),
        }
    }

    pub fn is_empty(&self) -> bool {
        is_unset(&self.trust)
            && is_unset(&self.cawg_trust)
            && is_unset(&self.verify)
            && is_unset(&self.builder)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Parses settings text, treating anything that starts with `{` as JSON and
    /// everything else as TOML.
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim_start().starts_with('{') {
            Self::from_json(text)
        } else {
            Self::from_toml(text)
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }
}

pub fn create_trust_settings(trust: TrustSettings) -> Settings {
    Settings {
        trust: Some(trust),
        ..Default::default()
    }
}

pub fn create_cawg_trust_settings(cawg_trust: CawgTrustSettings) -> Settings {
    Settings {
        cawg_trust: Some(cawg_trust),
        ..Default::default()
    }
}

pub fn create_verify_settings(verify: VerifySettings) -> Settings {
    Settings {
        verify: Some(verify),
        ..Default::default()
    }
}

pub fn create_builder_settings(builder: BuilderSettings) -> Settings {
    Settings {
        builder: Some(builder),
        ..Default::default()
    }
}

/// Folds fragments left to right; later fragments override earlier ones key by key.
pub fn merge_settings(fragments: impl IntoIterator<Item = Settings>) -> Settings {
    fragments
        .into_iter()
        .fold(Settings::default(), Settings::merge)
}

pub fn settings_to_json(settings: &Settings) -> Result<String> {
    settings.to_json()
}

pub fn settings_to_toml(settings: &Settings) -> Result<String> {
    settings.to_toml()
}
