//! In-memory engine used by the unit tests.
//!
//! It keeps builder state as plain JSON, "embeds" a manifest by appending it
//! to the asset after a marker, and calls signing callbacks exactly the way a
//! real engine does, so the builder and dispatcher can be exercised without
//! certificates or real media files.

use std::{
    collections::{BTreeMap, HashMap},
    io::{Read, Seek},
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{
    EngineDestination, EngineHandle, EngineSignResult, EngineSource, IngredientAsset,
    ProvenanceEngine, ReaderHandle, ValidationState,
};
use crate::{AssertionKind, Error, Intent, LocalSigner, Result, SignAttempt, Signer};

const MARKER: &[u8] = b"\0C2PA-MEMORY\0";
const ARCHIVE_MAGIC: &[u8] = b"MEMARCHIVE1";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Session {
    settings: Option<String>,
    definition: Value,
    intent: Option<Intent>,
    assertions: Vec<(String, AssertionKind, Value)>,
    resources: BTreeMap<String, Vec<u8>>,
}

impl Session {
    fn ingredients_mut(&mut self) -> Result<&mut Vec<Value>> {
        let definition = self
            .definition
            .as_object_mut()
            .ok_or_else(|| Error::Validation("manifest definition must be an object".to_owned()))?;
        definition
            .entry("ingredients")
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .ok_or_else(|| Error::Validation("ingredients must be an array".to_owned()))
    }

    fn definition(&self) -> Value {
        let mut definition = self.definition.clone();
        if let Some(object) = definition.as_object_mut() {
            let assertions = self
                .assertions
                .iter()
                .map(|(label, kind, data)| json!({ "label": label, "kind": kind, "data": data }))
                .collect();
            object.insert("assertions".to_owned(), Value::Array(assertions));
        }
        definition
    }
}

#[derive(Debug, Clone)]
struct MemoryReader {
    store: Value,
    ingredient: Option<Value>,
    state: ValidationState,
    embedded: bool,
    remote_url: Option<String>,
    resources: BTreeMap<String, Vec<u8>>,
}

#[derive(Default)]
pub(crate) struct MemoryEngine {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<u64, Session>>,
    readers: Mutex<HashMap<u64, MemoryReader>>,
    signed_settings: Mutex<Vec<Option<String>>>,
    swap_result_shapes: bool,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine that returns the wrong result shape for every destination.
    pub fn with_swapped_result_shapes() -> Self {
        Self {
            swap_result_shapes: true,
            ..Self::default()
        }
    }

    pub fn live_sessions(&self) -> usize {
        self.lock_sessions().len()
    }

    pub fn live_readers(&self) -> usize {
        self.readers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Settings in effect for each completed sign call.
    pub fn signed_settings(&self) -> Vec<Option<String>> {
        self.signed_settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Registers a reader as if an asset with the given ingredient had been read.
    pub fn insert_reader(&self, ingredient: Value, state: ValidationState) -> ReaderHandle {
        let reader = MemoryReader {
            store: json!({ "active_manifest": "urn:c2pa:memory", "manifests": {} }),
            ingredient: Some(ingredient),
            state,
            embedded: true,
            remote_url: None,
            resources: BTreeMap::new(),
        };
        self.insert_reader_state(reader)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert_session(&self, session: Session) -> EngineHandle {
        let id = self.next_id();
        self.lock_sessions().insert(id, session);
        EngineHandle::new(id)
    }

    fn insert_reader_state(&self, reader: MemoryReader) -> ReaderHandle {
        let id = self.next_id();
        self.readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, reader);
        ReaderHandle::new(id)
    }

    fn with_session<T>(
        &self,
        handle: &EngineHandle,
        f: impl FnOnce(&mut Session) -> Result<T>,
    ) -> Result<T> {
        let mut sessions = self.lock_sessions();
        let session = sessions
            .get_mut(&handle.id())
            .ok_or_else(|| Error::Internal(format!("unknown builder handle {}", handle.id())))?;
        f(session)
    }

    fn with_reader<T>(&self, reader: &ReaderHandle, f: impl FnOnce(&MemoryReader) -> T) -> Result<T> {
        let readers = self.readers.lock().unwrap_or_else(PoisonError::into_inner);
        readers
            .get(&reader.id())
            .map(f)
            .ok_or_else(|| Error::Internal(format!("unknown reader handle {}", reader.id())))
    }

    fn take_session(&self, handle: EngineHandle) -> Result<Session> {
        self.lock_sessions()
            .remove(&handle.id())
            .ok_or_else(|| Error::Internal(format!("unknown builder handle {}", handle.id())))
    }

    fn check_settings(settings: Option<&str>) -> Result<Option<String>> {
        if let Some(text) = settings {
            crate::Settings::parse(text)?;
        }
        Ok(settings.map(str::to_owned))
    }

    /// Builds the manifest body: the definition plus the actions implied by the intent.
    fn claim(session: &Session, format: &str, signer: &str) -> Result<Value> {
        let mut session = session.clone();
        let intent = session.intent.clone();
        let action = match &intent {
            Some(Intent::Create(source_type)) => {
                Some(json!({ "action": "c2pa.created", "digitalSourceType": source_type }))
            }
            Some(Intent::Edit) | Some(Intent::Update) => {
                let ingredients = session.ingredients_mut()?;
                let has_parent = ingredients
                    .iter()
                    .any(|i| i.get("relationship") == Some(&json!("parentOf")));
                if !has_parent {
                    ingredients.push(json!({ "title": "source", "format": format, "relationship": "parentOf" }));
                }
                Some(json!({ "action": "c2pa.opened" }))
            }
            None => None,
        };
        if let Some(action) = action {
            session.assertions.push((
                "c2pa.actions".to_owned(),
                AssertionKind::Cbor,
                json!({ "actions": [action] }),
            ));
        }
        Ok(json!({
            "claim": session.definition(),
            "signer": signer,
            "resources": session.resources,
        }))
    }

    fn finish(
        &self,
        manifest: Vec<u8>,
        mut source: EngineSource,
        destination: EngineDestination,
        settings: Option<String>,
    ) -> Result<EngineSignResult> {
        let mut asset = Vec::new();
        source.stream.rewind()?;
        source.stream.read_to_end(&mut asset)?;
        asset.extend_from_slice(MARKER);
        asset.extend_from_slice(&manifest);

        self.signed_settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(settings);

        let embed = matches!(destination, EngineDestination::Buffer) != self.swap_result_shapes;
        if let EngineDestination::File(path) = &destination {
            std::fs::write(path, &asset)?;
        }
        Ok(if embed {
            EngineSignResult::Embedded { manifest, asset }
        } else {
            EngineSignResult::Manifest(manifest)
        })
    }

    fn read_store(bytes: &[u8]) -> Option<Value> {
        let start = bytes
            .windows(MARKER.len())
            .position(|window| window == MARKER)?;
        serde_json::from_slice(&bytes[start + MARKER.len()..]).ok()
    }

    fn reader_for(store: Value, embedded: bool) -> MemoryReader {
        let resources = serde_json::from_value(store["resources"].clone()).unwrap_or_default();
        MemoryReader {
            ingredient: store["claim"]["ingredients"].get(0).cloned(),
            store,
            state: ValidationState::Valid,
            embedded,
            remote_url: None,
            resources,
        }
    }
}

#[async_trait]
impl ProvenanceEngine for MemoryEngine {
    fn builder_new(&self, settings: Option<&str>) -> Result<EngineHandle> {
        Ok(self.insert_session(Session {
            settings: Self::check_settings(settings)?,
            definition: json!({}),
            ..Session::default()
        }))
    }

    fn builder_with_json(&self, json: &str, settings: Option<&str>) -> Result<EngineHandle> {
        let definition: Value = serde_json::from_str(json)?;
        if !definition.is_object() {
            return Err(Error::Validation("manifest definition must be an object".to_owned()));
        }
        Ok(self.insert_session(Session {
            settings: Self::check_settings(settings)?,
            definition,
            ..Session::default()
        }))
    }

    fn set_intent(&self, handle: &EngineHandle, intent: &Intent) -> Result<()> {
        self.with_session(handle, |session| {
            session.intent = Some(intent.clone());
            Ok(())
        })
    }

    fn add_assertion(
        &self,
        handle: &EngineHandle,
        label: &str,
        payload: &Value,
        kind: AssertionKind,
    ) -> Result<()> {
        self.with_session(handle, |session| {
            let entry = (label.to_owned(), kind, payload.clone());
            match session
                .assertions
                .iter_mut()
                .find(|(l, k, _)| l == label && *k == kind)
            {
                Some(existing) => *existing = entry,
                None => session.assertions.push(entry),
            }
            Ok(())
        })
    }

    fn add_resource(&self, handle: &EngineHandle, uri: &str, bytes: Vec<u8>) -> Result<()> {
        self.with_session(handle, |session| {
            session.resources.insert(uri.to_owned(), bytes);
            Ok(())
        })
    }

    async fn add_ingredient(
        &self,
        handle: &EngineHandle,
        json: &str,
        asset: Option<IngredientAsset>,
    ) -> Result<Value> {
        let mut ingredient: Value = serde_json::from_str(json)?;
        self.with_session(handle, |session| {
            if let Some(asset) = asset {
                let id = format!("ingredient-{}", session.resources.len());
                if let Some(object) = ingredient.as_object_mut() {
                    object
                        .entry("format")
                        .or_insert_with(|| json!(asset.format));
                    if let Some(store) = Self::read_store(&asset.bytes) {
                        object.insert("active_manifest".to_owned(), json!("urn:c2pa:memory"));
                        object.insert("manifest_data".to_owned(), store);
                    }
                    object.insert("data".to_owned(), json!({ "identifier": id }));
                }
                session.resources.insert(id, asset.bytes);
            }
            session.ingredients_mut()?.push(ingredient.clone());
            Ok(ingredient)
        })
    }

    fn add_ingredient_from_reader(
        &self,
        handle: &EngineHandle,
        reader: &ReaderHandle,
    ) -> Result<Value> {
        let ingredient = self.reader_ingredient(reader)?;
        self.with_session(handle, |session| {
            session.ingredients_mut()?.push(ingredient.clone());
            Ok(ingredient)
        })
    }

    fn definition(&self, handle: &EngineHandle) -> Result<Value> {
        self.with_session(handle, |session| Ok(session.definition()))
    }

    fn to_archive(&self, handle: &EngineHandle) -> Result<Vec<u8>> {
        self.with_session(handle, |session| {
            let mut archive = ARCHIVE_MAGIC.to_vec();
            archive.extend(serde_json::to_vec(session)?);
            Ok(archive)
        })
    }

    fn from_archive(&self, archive: Vec<u8>, settings: Option<&str>) -> Result<EngineHandle> {
        let body = archive.strip_prefix(ARCHIVE_MAGIC).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "not a builder archive")
        })?;
        let mut session: Session = serde_json::from_slice(body)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        session.settings = Self::check_settings(settings)?;
        Ok(self.insert_session(session))
    }

    fn sign(
        &self,
        handle: EngineHandle,
        signer: &LocalSigner,
        source: EngineSource,
        destination: EngineDestination,
    ) -> Result<EngineSignResult> {
        let session = self.take_session(handle)?;
        let mut claim = Self::claim(&session, &source.format, "local")?;
        claim["signature"] = json!(format!("{:?}", signer.algorithm()));
        let manifest = serde_json::to_vec(&claim)?;
        self.finish(manifest, source, destination, session.settings)
    }

    async fn sign_async(
        &self,
        handle: EngineHandle,
        attempt: &SignAttempt<'_>,
        source: EngineSource,
        destination: EngineDestination,
    ) -> Result<EngineSignResult> {
        if let Signer::Local(local) = attempt.signer() {
            return self.sign(handle, local, source, destination);
        }
        let session = self.take_session(handle)?;
        let mut claim = Self::claim(&session, &source.format, attempt.signer().name())?;

        if let Signer::Identity(identity) = attempt.signer() {
            let mut identities = Vec::new();
            for (index, builder) in identity.identity_assertions().iter().enumerate() {
                let payload = serde_json::to_vec(&json!({
                    "referenced_assertions": builder.referenced_assertions(),
                    "sig_type": builder.holder().signature_type().as_str(),
                }))?;
                let signature = attempt
                    .sign_credential(index, payload)
                    .await
                    .map_err(|_| Error::Engine(c2pa::Error::CoseSignature))?;
                identities.push(json!({
                    "roles": builder.roles(),
                    "signature": signature,
                }));
            }
            claim["identities"] = Value::Array(identities);
        }

        let to_be_signed = serde_json::to_vec(&claim)?;
        let signature = attempt
            .sign_claim(to_be_signed)
            .await
            .map_err(|_| Error::Engine(c2pa::Error::CoseSignature))?;
        claim["signature"] = json!(signature);
        let manifest = serde_json::to_vec(&claim)?;
        let settings = attempt
            .settings()
            .map(str::to_owned)
            .or(session.settings);
        self.finish(manifest, source, destination, settings)
    }

    fn release(&self, handle: EngineHandle) {
        self.lock_sessions().remove(&handle.id());
    }

    async fn reader_from_stream(
        &self,
        mut source: EngineSource,
        settings: Option<&str>,
    ) -> Result<Option<ReaderHandle>> {
        Self::check_settings(settings)?;
        let mut bytes = Vec::new();
        source.stream.read_to_end(&mut bytes)?;
        Ok(Self::read_store(&bytes)
            .map(|store| self.insert_reader_state(Self::reader_for(store, true))))
    }

    async fn reader_from_manifest_data(
        &self,
        manifest: &[u8],
        source: EngineSource,
        settings: Option<&str>,
    ) -> Result<ReaderHandle> {
        Self::check_settings(settings)?;
        let store: Value = serde_json::from_slice(manifest)?;
        Ok(self.insert_reader_state(Self::reader_for(store, false)))
    }

    fn reader_json(&self, reader: &ReaderHandle) -> Result<String> {
        self.with_reader(reader, |r| r.store.to_string())
    }

    fn reader_remote_url(&self, reader: &ReaderHandle) -> Result<Option<String>> {
        self.with_reader(reader, |r| r.remote_url.clone())
    }

    fn reader_is_embedded(&self, reader: &ReaderHandle) -> Result<bool> {
        self.with_reader(reader, |r| r.embedded)
    }

    fn reader_validation_state(&self, reader: &ReaderHandle) -> Result<ValidationState> {
        self.with_reader(reader, |r| r.state)
    }

    fn reader_ingredient(&self, reader: &ReaderHandle) -> Result<Value> {
        self.with_reader(reader, |r| r.ingredient.clone())?.ok_or_else(|| {
            Error::Validation("reader's active manifest has no ingredient".to_owned())
        })
    }

    fn reader_resource(&self, reader: &ReaderHandle, uri: &str) -> Result<Vec<u8>> {
        self.with_reader(reader, |r| r.resources.get(uri).cloned())?
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, format!("no resource {uri}"))
                    .into()
            })
    }

    fn release_reader(&self, reader: ReaderHandle) {
        self.readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&reader.id());
    }
}
