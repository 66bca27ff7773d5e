use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Destination, EngineHandle, Error, IngredientAsset, IngredientSummary, Intent, LocalSigner,
    ProvenanceEngine, Reader, Result, Settings, Signer, Source, dispatch,
    ingredient::{self, Ingredients},
};

/// How an assertion payload is stored in the manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssertionKind {
    #[default]
    #[serde(alias = "Cbor")]
    Cbor,
    #[serde(alias = "Json")]
    Json,
}

/// A manifest under construction.
///
/// All mutation goes through `&mut self` and signing consumes the builder,
/// so a session is never signed twice. Dropping a builder releases its
/// engine-side state.
pub struct Builder {
    engine: Arc<dyn ProvenanceEngine>,
    handle: Option<EngineHandle>,
    intent: Option<Intent>,
    assertions: Vec<(String, AssertionKind)>,
    resources: Vec<String>,
    ingredients: Ingredients,
}

impl Builder {
    pub fn new(engine: Arc<dyn ProvenanceEngine>, settings: Option<&Settings>) -> Result<Self> {
        let settings = settings.map(Settings::to_json).transpose()?;
        let handle = engine.builder_new(settings.as_deref())?;
        Ok(Self::from_handle(engine, handle))
    }

    /// Starts from an existing manifest definition. Ingredients and
    /// assertions it already lists count towards the intent rules.
    pub fn with_json(
        engine: Arc<dyn ProvenanceEngine>,
        json: &str,
        settings: Option<&Settings>,
    ) -> Result<Self> {
        let settings = settings.map(Settings::to_json).transpose()?;
        let handle = engine.builder_with_json(json, settings.as_deref())?;
        let mut builder = Self::from_handle(engine, handle);
        builder.load_definition()?;
        Ok(builder)
    }

    /// Restores a session written by [`Builder::to_archive`]. The intent is
    /// not part of the archive and must be set again.
    pub async fn from_archive(
        engine: Arc<dyn ProvenanceEngine>,
        source: Source,
        settings: Option<&Settings>,
    ) -> Result<Self> {
        let settings = settings.map(Settings::to_json).transpose()?;
        let archive = source.read_bytes().await?;
        let handle = engine.from_archive(archive, settings.as_deref())?;
        let mut builder = Self::from_handle(engine, handle);
        builder.load_definition()?;
        log::debug!(
            "Restored builder with {} ingredients from archive",
            builder.ingredients.as_slice().len()
        );
        Ok(builder)
    }

    fn from_handle(engine: Arc<dyn ProvenanceEngine>, handle: EngineHandle) -> Self {
        Self {
            engine,
            handle: Some(handle),
            intent: None,
            assertions: Vec::new(),
            resources: Vec::new(),
            ingredients: Ingredients::default(),
        }
    }

    fn load_definition(&mut self) -> Result<()> {
        let definition = self.definition()?;
        let ingredients = definition
            .get("ingredients")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .map(IngredientSummary::from_definition)
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();
        self.ingredients = Ingredients::from_summaries(ingredients);
        self.assertions = definition
            .get("assertions")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|a| {
                        let label = a.get("label")?.as_str()?.to_owned();
                        let kind = a
                            .get("kind")
                            .and_then(|k| AssertionKind::deserialize(k).ok())
                            .unwrap_or_default();
                        Some((label, kind))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(())
    }

    fn handle(&self) -> Result<&EngineHandle> {
        self.handle
            .as_ref()
            .ok_or_else(|| Error::Internal("builder handle already released".to_owned()))
    }

    fn take_handle(&mut self) -> Result<EngineHandle> {
        self.handle
            .take()
            .ok_or_else(|| Error::Internal("builder handle already released".to_owned()))
    }

    pub fn intent(&self) -> Option<&Intent> {
        self.intent.as_ref()
    }

    /// Records the intent. Ingredients added earlier are checked at sign time.
    pub fn set_intent(&mut self, intent: Intent) -> Result<&mut Self> {
        self.engine.set_intent(self.handle()?, &intent)?;
        log::debug!("Builder intent set to {}", intent.name());
        self.intent = Some(intent);
        Ok(self)
    }

    /// Adds an assertion, replacing any earlier one with the same label and kind.
    pub fn add_assertion(
        &mut self,
        label: &str,
        payload: &impl Serialize,
        kind: Option<AssertionKind>,
    ) -> Result<&mut Self> {
        let kind = kind.unwrap_or_default();
        let payload = serde_json::to_value(payload)?;
        self.engine
            .add_assertion(self.handle()?, label, &payload, kind)?;
        if !self.assertions.iter().any(|(l, k)| l == label && *k == kind) {
            self.assertions.push((label.to_owned(), kind));
        }
        Ok(self)
    }

    pub fn has_assertion(&self, label: &str) -> bool {
        self.assertions.iter().any(|(l, _)| l == label)
    }

    /// Associates bytes with a resource URI referenced from the definition.
    pub async fn add_resource(&mut self, uri: &str, source: Source) -> Result<&mut Self> {
        let bytes = source.read_bytes().await?;
        self.engine.add_resource(self.handle()?, uri, bytes)?;
        if !self.resources.iter().any(|r| r == uri) {
            self.resources.push(uri.to_owned());
        }
        Ok(self)
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    /// Adds an ingredient from its definition JSON and optionally its asset.
    ///
    /// Without an asset the ingredient is metadata only. Returns the
    /// ingredient definition as resolved by the engine.
    pub async fn add_ingredient(&mut self, json: &str, asset: Option<Source>) -> Result<Value> {
        let definition: Value = serde_json::from_str(json)?;
        let summary = IngredientSummary::from_definition(&definition)?;
        self.ingredients.admit(self.intent.as_ref(), &summary)?;

        let asset = match asset {
            Some(source) => Some(IngredientAsset {
                format: source.format()?,
                bytes: source.read_bytes().await?,
            }),
            None => None,
        };
        let resolved = self
            .engine
            .add_ingredient(self.handle()?, json, asset)
            .await?;
        let resolved_summary = IngredientSummary::from_definition(&resolved).unwrap_or(summary);
        self.ingredients.push(resolved_summary);
        Ok(resolved)
    }

    /// Copies the ingredient a reader resolved. The reader's asset is not read
    /// again and its validation is not repeated; readers whose manifest is
    /// invalid are refused.
    pub fn add_ingredient_from_reader(&mut self, reader: &Reader) -> Result<Value> {
        if !reader.shares_engine(&self.engine) {
            return Err(Error::Validation(
                "reader was created by a different engine".to_owned(),
            ));
        }
        ingredient::admit_reader(reader.validation_state()?)?;
        let candidate = IngredientSummary::from_definition(&reader.ingredient()?)?;
        self.ingredients.admit(self.intent.as_ref(), &candidate)?;

        let resolved = self
            .engine
            .add_ingredient_from_reader(self.handle()?, reader.handle()?)?;
        let summary = IngredientSummary::from_definition(&resolved).unwrap_or(candidate);
        self.ingredients.push(summary);
        Ok(resolved)
    }

    pub fn ingredients(&self) -> &[IngredientSummary] {
        self.ingredients.as_slice()
    }

    /// The manifest definition as the engine currently sees it.
    pub fn definition(&self) -> Result<Value> {
        self.engine.definition(self.handle()?)
    }

    pub async fn to_archive(&self, destination: Destination<'_>) -> Result<()> {
        let archive = self.engine.to_archive(self.handle()?)?;
        log::debug!("Writing builder archive of {} bytes", archive.len());
        destination.write_bytes(archive).await
    }

    /// Structural checks that depend on the final set of ingredients.
    pub fn validate(&self) -> Result<()> {
        self.ingredients.validate_for_sign(self.intent.as_ref())
    }

    /// Signs with a local signer and embeds the manifest into `destination`.
    pub fn sign(
        mut self,
        signer: &LocalSigner,
        source: Source,
        destination: Destination<'_>,
    ) -> Result<Vec<u8>> {
        self.validate()?;
        let handle = self.take_handle()?;
        dispatch::sign(self.engine.as_ref(), handle, signer, source, destination)
    }

    /// Signs with any signer, awaiting callbacks as needed.
    ///
    /// Returns the manifest bytes. A buffer destination is overwritten with
    /// the signed asset only when signing succeeds.
    pub async fn sign_async(
        mut self,
        signer: &Signer,
        source: Source,
        destination: Destination<'_>,
    ) -> Result<Vec<u8>> {
        self.validate()?;
        dispatch::check_referenced_assertions(signer, |label| self.has_assertion(label))?;
        let handle = self.take_handle()?;
        dispatch::sign_async(self.engine.as_ref(), handle, signer, source, destination).await
    }
}

impl Drop for Builder {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.engine.release(handle);
        }
    }
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("handle", &self.handle)
            .field("intent", &self.intent)
            .field("assertions", &self.assertions)
            .field("resources", &self.resources)
            .field("ingredients", &self.ingredients)
            .finish_non_exhaustive()
    }
}
