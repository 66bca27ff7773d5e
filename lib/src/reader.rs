use std::sync::Arc;

use serde_json::Value;

use crate::{
    Destination, EngineSource, Error, ProvenanceEngine, ReaderHandle, Result, Settings, Source,
    ValidationState,
};

/// A manifest store loaded from an asset or from detached manifest bytes.
pub struct Reader {
    engine: Arc<dyn ProvenanceEngine>,
    handle: Option<ReaderHandle>,
}

impl Reader {
    /// Reads the manifest embedded in `source`. Returns `Ok(None)` when the
    /// asset has no manifest.
    pub async fn from_asset(
        engine: Arc<dyn ProvenanceEngine>,
        source: Source,
        settings: Option<&Settings>,
    ) -> Result<Option<Self>> {
        let settings = settings.map(Settings::to_json).transpose()?;
        let source = EngineSource {
            format: source.format()?,
            stream: source.into_stream()?,
        };
        let handle = engine
            .reader_from_stream(source, settings.as_deref())
            .await?;
        if handle.is_none() {
            log::debug!("No manifest found in asset");
        }
        Ok(handle.map(|handle| Self::from_handle(engine, handle)))
    }

    /// Reads a detached manifest and validates it against `source`.
    pub async fn from_manifest_data_and_asset(
        engine: Arc<dyn ProvenanceEngine>,
        manifest: &[u8],
        source: Source,
        settings: Option<&Settings>,
    ) -> Result<Self> {
        let settings = settings.map(Settings::to_json).transpose()?;
        let source = EngineSource {
            format: source.format()?,
            stream: source.into_stream()?,
        };
        let handle = engine
            .reader_from_manifest_data(manifest, source, settings.as_deref())
            .await?;
        Ok(Self::from_handle(engine, handle))
    }

    pub(crate) fn from_handle(engine: Arc<dyn ProvenanceEngine>, handle: ReaderHandle) -> Self {
        Self {
            engine,
            handle: Some(handle),
        }
    }

    pub(crate) fn handle(&self) -> Result<&ReaderHandle> {
        self.handle
            .as_ref()
            .ok_or_else(|| Error::Internal("reader handle already released".to_owned()))
    }

    pub(crate) fn shares_engine(&self, engine: &Arc<dyn ProvenanceEngine>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.engine), Arc::as_ptr(engine))
    }

    /// The manifest store as a JSON report.
    pub fn json(&self) -> Result<String> {
        self.engine.reader_json(self.handle()?)
    }

    pub fn manifest_store(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.json()?)?)
    }

    pub fn remote_url(&self) -> Result<Option<String>> {
        self.engine.reader_remote_url(self.handle()?)
    }

    pub fn is_embedded(&self) -> Result<bool> {
        self.engine.reader_is_embedded(self.handle()?)
    }

    pub fn validation_state(&self) -> Result<ValidationState> {
        self.engine.reader_validation_state(self.handle()?)
    }

    /// The ingredient a builder attaches from this reader: the first
    /// ingredient of the active manifest.
    pub fn ingredient(&self) -> Result<Value> {
        self.engine.reader_ingredient(self.handle()?)
    }

    /// Writes the resource at `uri` to `destination` and returns its size.
    pub async fn resource_to_asset(&self, uri: &str, destination: Destination<'_>) -> Result<usize> {
        let bytes = self.engine.reader_resource(self.handle()?, uri)?;
        let len = bytes.len();
        destination.write_bytes(bytes).await?;
        Ok(len)
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.engine.release_reader(handle);
        }
    }
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
