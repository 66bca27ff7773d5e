//! # c2pa-compose
//!
//! Compose, sign, and read C2PA manifests on top of `c2pa-rs`.
//! A [`Builder`] collects the manifest definition, assertions, resources, and
//! ingredients for one asset, checks them against the declared [`Intent`], and
//! signs through whichever [`Signer`] the caller provides: local keys, an
//! async callback (for an HSM or a remote signing service), a callback with
//! per-call [`Settings`], or a CAWG identity assertion signer.
//!
//! ## Building and signing
//!
//! - [`ProvenanceEngine`]: the manifest engine. [`C2paEngine`] is the production one.
//! - [`Settings`]: typed trust, verify, and builder settings that compose by merging.
//! - [`Source`] / [`Destination`]: where asset bytes come from and where the signed asset goes.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use c2pa_compose::{
//!     Builder, C2paEngine, CallbackError, CallbackSigner, CertificateChain, Destination,
//!     DigitalSourceType, Intent, Signer, SignerConfig, Source,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(C2paEngine::new());
//!     let mut builder = Builder::with_json(engine, r#"{"title":"photo.jpg"}"#, None)?;
//!     builder.set_intent(Intent::Create(DigitalSourceType::digital_capture()))?;
//!
//!     let certificates = CertificateChain::from_bytes(&std::fs::read("chain.pem")?)?;
//!     let signer = CallbackSigner::new(SignerConfig::new(certificates), |data: Vec<u8>| async move {
//!         // hand `data` to the key holder and return the raw signature
//!         Ok::<_, CallbackError>(data)
//!     });
//!
//!     let mut signed = Vec::new();
//!     let manifest = builder
//!         .sign_async(
//!             &Signer::Callback(signer),
//!             Source::file("photo.jpg"),
//!             Destination::buffer(&mut signed),
//!         )
//!         .await?;
//!     println!("manifest: {} bytes, asset: {} bytes", manifest.len(), signed.len());
//!     Ok(())
//! }
//! ```
//!
//! ### Environment variables
//!
//! [`LocalSignerConfig`] reads a local signer from the environment:
//!
//! - `SIGNING_CERT`: PEM or p7b certificate chain file.
//! - `SIGNING_KEY`: PEM private key file.
//! - `ALGORITHM` *(optional)*: signature algorithm, `es256` by default.
//! - `TIME_AUTHORITY_URL` *(optional)*: RFC3161 timestamp authority.
//! - `SETTINGS` *(optional)*: JSON or TOML settings applied to every builder.
//!
//! ### Reading a signed file
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use c2pa_compose::{C2paEngine, Reader, Source};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(C2paEngine::new());
//!     match Reader::from_asset(engine, Source::file("signed.jpg"), None).await? {
//!         Some(reader) => println!("{}", reader.json()?),
//!         None => println!("no manifest"),
//!     }
//!     Ok(())
//! }
//! ```
//!
mod asset;
mod builder;
mod certs;
mod dispatch;
mod engine;
mod error;
mod ingredient;
mod intent;
mod reader;
mod settings;
mod signer;

pub use asset::{Destination, ReadSeek, Source};
pub use builder::{AssertionKind, Builder};
pub use c2pa::SigningAlg;
pub use certs::CertificateChain;
pub use dispatch::{CallbackFailed, FailureSlot, SignAttempt};
pub use engine::{
    C2paEngine, EngineDestination, EngineHandle, EngineSignResult, EngineSource,
    IngredientAsset, ProvenanceEngine, ReaderHandle, ValidationState,
};
pub use envconfig::Envconfig;
pub use error::{CallbackError, Error, ErrorKind, Result};
pub use ingredient::{IngredientSummary, Relationship};
pub use intent::{DigitalSourceType, Intent};
pub use reader::Reader;
pub use settings::{
    BuilderSettings, CawgTrustSettings, Settings, TrustSettings, VerifySettings,
    create_builder_settings, create_cawg_trust_settings, create_trust_settings,
    create_verify_settings, load_settings_from_file, load_settings_from_url, merge_settings,
    settings_to_json, settings_to_toml,
};
pub use signer::{
    CallbackSigner, CredentialHolder, IdentityAssertionBuilder, IdentityAssertionSigner,
    LocalSigner, LocalSignerConfig, SignCallback, SignatureType, Signer, SignerConfig,
    parse_algorithm,
};
