//! The boundary to the provenance engine.
//!
//! Everything that touches manifest bytes (parsing, hashing, signing,
//! embedding) lives behind [`ProvenanceEngine`]. The builder and reader keep
//! only opaque, move-only handles to engine-side state; a builder handle is
//! consumed by signing and can never be signed twice.

mod c2pa_rs;
#[cfg(test)]
pub(crate) mod memory;

pub use c2pa_rs::C2paEngine;

use std::{fmt, path::PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::{AssertionKind, Intent, LocalSigner, ReadSeek, Result, SignAttempt};

/// Engine-side builder state. Not `Clone`: exactly one session owns it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct EngineHandle(u64);

impl EngineHandle {
    /// For [`ProvenanceEngine`] implementations only. A handle built from an
    /// id the engine did not just issue refers to no session, or to someone
    /// else's.
    #[doc(hidden)]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Engine-side reader state.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ReaderHandle(u64);

impl ReaderHandle {
    /// For [`ProvenanceEngine`] implementations only.
    #[doc(hidden)]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// An opened asset handed to the engine.
pub struct EngineSource {
    pub format: String,
    pub stream: Box<dyn ReadSeek>,
}

impl fmt::Debug for EngineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSource")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// Where the engine should put the signed asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineDestination {
    /// Return the signed asset in the result.
    Buffer,
    /// Write the signed asset to this path and return only the manifest.
    File(PathBuf),
}

/// Raw result of a sign call, before it is checked against the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineSignResult {
    Manifest(Vec<u8>),
    Embedded { manifest: Vec<u8>, asset: Vec<u8> },
}

/// Ingredient asset bytes with their format.
#[derive(Debug, Clone)]
pub struct IngredientAsset {
    pub format: String,
    pub bytes: Vec<u8>,
}

/// Outcome of validating the manifest a reader loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationState {
    Invalid,
    Valid,
    Trusted,
}

#[async_trait]
pub trait ProvenanceEngine: Send + Sync {
    /// `settings` is a JSON or TOML settings string, applied to this session only.
    fn builder_new(&self, settings: Option<&str>) -> Result<EngineHandle>;

    fn builder_with_json(&self, json: &str, settings: Option<&str>) -> Result<EngineHandle>;

    fn set_intent(&self, handle: &EngineHandle, intent: &Intent) -> Result<()>;

    fn add_assertion(
        &self,
        handle: &EngineHandle,
        label: &str,
        payload: &Value,
        kind: AssertionKind,
    ) -> Result<()>;

    fn add_resource(&self, handle: &EngineHandle, uri: &str, bytes: Vec<u8>) -> Result<()>;

    /// Adds an ingredient and returns its resolved definition. With an asset
    /// the engine reads and validates the ingredient's own manifest.
    async fn add_ingredient(
        &self,
        handle: &EngineHandle,
        json: &str,
        asset: Option<IngredientAsset>,
    ) -> Result<Value>;

    /// Copies the ingredient a reader already resolved, without re-reading or
    /// re-validating the asset.
    fn add_ingredient_from_reader(
        &self,
        handle: &EngineHandle,
        reader: &ReaderHandle,
    ) -> Result<Value>;

    fn definition(&self, handle: &EngineHandle) -> Result<Value>;

    fn to_archive(&self, handle: &EngineHandle) -> Result<Vec<u8>>;

    fn from_archive(&self, archive: Vec<u8>, settings: Option<&str>) -> Result<EngineHandle>;

    fn sign(
        &self,
        handle: EngineHandle,
        signer: &LocalSigner,
        source: EngineSource,
        destination: EngineDestination,
    ) -> Result<EngineSignResult>;

    async fn sign_async(
        &self,
        handle: EngineHandle,
        attempt: &SignAttempt<'_>,
        source: EngineSource,
        destination: EngineDestination,
    ) -> Result<EngineSignResult>;

    fn release(&self, handle: EngineHandle);

    /// Returns `None` when the asset carries no manifest.
    async fn reader_from_stream(
        &self,
        source: EngineSource,
        settings: Option<&str>,
    ) -> Result<Option<ReaderHandle>>;

    async fn reader_from_manifest_data(
        &self,
        manifest: &[u8],
        source: EngineSource,
        settings: Option<&str>,
    ) -> Result<ReaderHandle>;

    fn reader_json(&self, reader: &ReaderHandle) -> Result<String>;

    fn reader_remote_url(&self, reader: &ReaderHandle) -> Result<Option<String>>;

    fn reader_is_embedded(&self, reader: &ReaderHandle) -> Result<bool>;

    fn reader_validation_state(&self, reader: &ReaderHandle) -> Result<ValidationState>;

    /// The ingredient definition a builder would receive from this reader.
    fn reader_ingredient(&self, reader: &ReaderHandle) -> Result<Value>;

    fn reader_resource(&self, reader: &ReaderHandle, uri: &str) -> Result<Vec<u8>>;

    fn release_reader(&self, reader: ReaderHandle);
}
