//! [`ProvenanceEngine`] backed by the `c2pa` crate.

use std::{
    collections::HashMap,
    io::{self, Cursor, Seek},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use c2pa::{
    AsyncSigner, BuilderIntent, Context, Ingredient, ManifestAssertionKind, SigningAlg,
    assertions::DigitalSourceType,
    crypto::{
        raw_signature::{AsyncRawSigner, RawSignerError},
        time_stamp::AsyncTimeStampProvider,
    },
    identity::{
        SignerPayload,
        builder::{
            AsyncCredentialHolder, AsyncIdentityAssertionBuilder, AsyncIdentityAssertionSigner,
            IdentityBuilderError,
        },
    },
};
use serde_json::{Value, json};

use super::{
    EngineDestination, EngineHandle, EngineSignResult, EngineSource, IngredientAsset,
    ProvenanceEngine, ReaderHandle, ValidationState,
};
use crate::{
    AssertionKind, CredentialHolder, Error, FailureSlot, Intent, LocalSigner, Result, Settings,
    SignAttempt, SignCallback, Signer, SignerConfig,
};

struct Session {
    builder: c2pa::Builder,
    settings: Option<String>,
    intent: Option<Intent>,
}

/// The production engine. Sessions and readers live in this value and are
/// addressed by handle.
#[derive(Default)]
pub struct C2paEngine {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<u64, Session>>,
    readers: Mutex<HashMap<u64, c2pa::Reader>>,
}

impl C2paEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<u64, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_readers(&self) -> MutexGuard<'_, HashMap<u64, c2pa::Reader>> {
        self.readers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn context(settings: Option<&str>) -> Result<Context> {
        let context = Context::new();
        match settings {
            Some(settings) => context
                .with_settings(settings)
                .map_err(|e| Error::Config(format!("invalid settings: {e}"))),
            None => Ok(context),
        }
    }

    fn insert_session(&self, session: Session) -> EngineHandle {
        let id = self.next_id();
        self.lock_sessions().insert(id, session);
        EngineHandle::new(id)
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

    fn take_session(&self, handle: &EngineHandle) -> Result<Session> {
        self.lock_sessions()
            .remove(&handle.id())
            .ok_or_else(|| Error::Internal(format!("unknown builder handle {}", handle.id())))
    }

    fn with_reader<T>(
        &self,
        reader: &ReaderHandle,
        f: impl FnOnce(&c2pa::Reader) -> Result<T>,
    ) -> Result<T> {
        let readers = self.lock_readers();
        let found = readers
            .get(&reader.id())
            .ok_or_else(|| Error::Internal(format!("unknown reader handle {}", reader.id())))?;
        f(found)
    }

    fn builder_intent(intent: &Intent) -> Result<BuilderIntent> {
        Ok(match intent {
            Intent::Create(source_type) => {
                let source_type: DigitalSourceType =
                    serde_json::from_value(json!(source_type.as_str())).map_err(|e| {
                        Error::Validation(format!("unsupported digital source type: {e}"))
                    })?;
                BuilderIntent::Create(source_type)
            }
            Intent::Edit => BuilderIntent::Edit,
            Intent::Update => BuilderIntent::Update,
        })
    }

    fn last_ingredient(builder: &c2pa::Builder) -> Result<Value> {
        let ingredient = builder
            .definition
            .ingredients
            .last()
            .ok_or_else(|| Error::Internal("ingredient was not recorded".to_owned()))?;
        Ok(serde_json::to_value(ingredient)?)
    }

    /// Re-creates the session's builder under `settings` layered over its own.
    fn with_override(session: Session, settings: &str) -> Result<Session> {
        let merged = match &session.settings {
            Some(base) => Settings::parse(base)?.merge(Settings::parse(settings)?),
            None => Settings::parse(settings)?,
        };
        let merged = merged.to_json()?;

        let mut archive = Cursor::new(Vec::new());
        let mut previous = session.builder;
        previous.to_archive(&mut archive)?;
        archive.rewind()?;
        let mut builder = c2pa::Builder::from_context(Self::context(Some(&merged))?)
            .with_archive(archive)?;
        if let Some(intent) = &session.intent {
            builder.set_intent(Self::builder_intent(intent)?);
        }
        Ok(Session {
            builder,
            settings: Some(merged),
            intent: session.intent,
        })
    }

    fn into_result(
        manifest: Vec<u8>,
        signed: Vec<u8>,
        destination: EngineDestination,
    ) -> Result<EngineSignResult> {
        match destination {
            EngineDestination::Buffer => Ok(EngineSignResult::Embedded {
                manifest,
                asset: signed,
            }),
            EngineDestination::File(path) => {
                std::fs::write(&path, signed)
                    .inspect_err(|e| log::error!("Failed to write {}: {e}", path.display()))?;
                Ok(EngineSignResult::Manifest(manifest))
            }
        }
    }

    fn identity_signer(
        attempt: &SignAttempt<'_>,
        identity: &crate::IdentityAssertionSigner,
    ) -> AsyncIdentityAssertionSigner {
        let raw = RawCallbackSigner {
            config: identity.signer().config().clone(),
            callback: identity.signer().callback(),
            failures: attempt.failures().clone(),
        };
        let mut signer = AsyncIdentityAssertionSigner::new(Box::new(raw));
        for builder in identity.identity_assertions() {
            let holder = CredentialCallback::new(builder.holder(), attempt.failures().clone());
            let mut assertion = AsyncIdentityAssertionBuilder::for_credential_holder(holder);
            let roles: Vec<&str> = builder.roles().iter().map(String::as_str).collect();
            let labels: Vec<&str> = builder
                .referenced_assertions()
                .iter()
                .map(String::as_str)
                .collect();
            assertion.add_roles(&roles);
            assertion.add_referenced_assertions(&labels);
            signer.add_identity_assertion(assertion);
        }
        signer
    }
}

/// Adapts a sign attempt to the `c2pa` claim signer interface.
struct AttemptSigner<'a> {
    attempt: &'a SignAttempt<'a>,
    config: &'a SignerConfig,
}

#[async_trait]
impl AsyncSigner for AttemptSigner<'_> {
    async fn sign(&self, data: Vec<u8>) -> c2pa::Result<Vec<u8>> {
        self.attempt
            .sign_claim(data)
            .await
            .map_err(|_| c2pa::Error::CoseSignature)
    }

    fn alg(&self) -> SigningAlg {
        self.config.algorithm
    }

    fn certs(&self) -> c2pa::Result<Vec<Vec<u8>>> {
        Ok(self.config.certificates.der_certificates().to_vec())
    }

    fn reserve_size(&self) -> usize {
        self.config.reserve_size
    }

    fn time_authority_url(&self) -> Option<String> {
        self.config.time_authority_url.clone()
    }

    fn direct_cose_handling(&self) -> bool {
        self.config.direct_cose_handling
    }
}

/// Claim signer used underneath identity assertions.
struct RawCallbackSigner {
    config: SignerConfig,
    callback: Arc<dyn SignCallback>,
    failures: FailureSlot,
}

#[async_trait]
impl AsyncTimeStampProvider for RawCallbackSigner {
    fn time_stamp_service_url(&self) -> Option<String> {
        self.config.time_authority_url.clone()
    }
}

#[async_trait]
impl AsyncRawSigner for RawCallbackSigner {
    async fn sign(&self, data: Vec<u8>) -> std::result::Result<Vec<u8>, RawSignerError> {
        self.failures
            .invoke(self.callback.as_ref(), data)
            .await
            .map_err(|e| RawSignerError::InternalError(e.to_string()))
    }

    fn alg(&self) -> SigningAlg {
        self.config.algorithm
    }

    fn cert_chain(&self) -> std::result::Result<Vec<Vec<u8>>, RawSignerError> {
        Ok(self.config.certificates.der_certificates().to_vec())
    }

    fn reserve_size(&self) -> usize {
        self.config.reserve_size
    }
}

struct CredentialCallback {
    sig_type: &'static str,
    reserve_size: usize,
    callback: Arc<dyn SignCallback>,
    failures: FailureSlot,
}

impl CredentialCallback {
    fn new(holder: &CredentialHolder, failures: FailureSlot) -> Self {
        Self {
            sig_type: holder.signature_type().as_str(),
            reserve_size: holder.reserve_size(),
            callback: holder.callback(),
            failures,
        }
    }
}

#[async_trait]
impl AsyncCredentialHolder for CredentialCallback {
    fn sig_type(&self) -> &'static str {
        self.sig_type
    }

    fn reserve_size(&self) -> usize {
        self.reserve_size
    }

    async fn sign(
        &self,
        signer_payload: &SignerPayload,
    ) -> std::result::Result<Vec<u8>, IdentityBuilderError> {
        let payload = serde_json::to_vec(signer_payload)
            .map_err(|e| IdentityBuilderError::InternalError(e.to_string()))?;
        self.failures
            .invoke(self.callback.as_ref(), payload)
            .await
            .map_err(|e| IdentityBuilderError::SignerError(e.to_string()))
    }
}

#[async_trait]
impl ProvenanceEngine for C2paEngine {
    fn builder_new(&self, settings: Option<&str>) -> Result<EngineHandle> {
        let builder = c2pa::Builder::from_context(Self::context(settings)?);
        Ok(self.insert_session(Session {
            builder,
            settings: settings.map(str::to_owned),
            intent: None,
        }))
    }

    fn builder_with_json(&self, json: &str, settings: Option<&str>) -> Result<EngineHandle> {
        let mut builder = c2pa::Builder::from_context(Self::context(settings)?);
        builder.definition = serde_json::from_str(json)?;
        Ok(self.insert_session(Session {
            builder,
            settings: settings.map(str::to_owned),
            intent: None,
        }))
    }

    fn set_intent(&self, handle: &EngineHandle, intent: &Intent) -> Result<()> {
        let builder_intent = Self::builder_intent(intent)?;
        self.with_session(handle, |session| {
            session.builder.set_intent(builder_intent);
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
        let json_kind = kind == AssertionKind::Json;
        self.with_session(handle, |session| {
            session.builder.definition.assertions.retain(|existing| {
                existing.label != label
                    || matches!(existing.kind, Some(ManifestAssertionKind::Json)) != json_kind
            });
            match kind {
                AssertionKind::Cbor => session.builder.add_assertion(label, payload)?,
                AssertionKind::Json => session.builder.add_assertion_json(label, payload)?,
            };
            Ok(())
        })
    }

    fn add_resource(&self, handle: &EngineHandle, uri: &str, bytes: Vec<u8>) -> Result<()> {
        self.with_session(handle, |session| {
            session.builder.add_resource(uri, Cursor::new(bytes))?;
            Ok(())
        })
    }

    async fn add_ingredient(
        &self,
        handle: &EngineHandle,
        json: &str,
        asset: Option<IngredientAsset>,
    ) -> Result<Value> {
        let Some(asset) = asset else {
            let ingredient = Ingredient::from_json(json)?;
            return self.with_session(handle, |session| {
                session.builder.add_ingredient(ingredient);
                Self::last_ingredient(&session.builder)
            });
        };

        // The session leaves the map while the asset is read so no lock is
        // held across the await.
        let mut session = self.take_session(handle)?;
        let mut stream = Cursor::new(asset.bytes);
        let added = session
            .builder
            .add_ingredient_from_stream_async(json, &asset.format, &mut stream)
            .await
            .map(|ingredient| serde_json::to_value(&*ingredient));
        self.lock_sessions().insert(handle.id(), session);
        Ok(added.inspect_err(|e| log::error!("Failed to add ingredient: {e}"))??)
    }

    fn add_ingredient_from_reader(
        &self,
        handle: &EngineHandle,
        reader: &ReaderHandle,
    ) -> Result<Value> {
        let readers = self.lock_readers();
        let reader = readers
            .get(&reader.id())
            .ok_or_else(|| Error::Internal(format!("unknown reader handle {}", reader.id())))?;
        self.with_session(handle, |session| {
            session.builder.add_ingredient_from_reader(reader)?;
            Self::last_ingredient(&session.builder)
        })
    }

    fn definition(&self, handle: &EngineHandle) -> Result<Value> {
        self.with_session(handle, |session| {
            Ok(serde_json::to_value(&session.builder.definition)?)
        })
    }

    fn to_archive(&self, handle: &EngineHandle) -> Result<Vec<u8>> {
        self.with_session(handle, |session| {
            let mut archive = Cursor::new(Vec::new());
            session.builder.to_archive(&mut archive)?;
            Ok(archive.into_inner())
        })
    }

    fn from_archive(&self, archive: Vec<u8>, settings: Option<&str>) -> Result<EngineHandle> {
        let builder = c2pa::Builder::from_context(Self::context(settings)?)
            .with_archive(Cursor::new(archive))
            .map_err(|e| {
                log::error!("Failed to load builder archive: {e}");
                io::Error::new(io::ErrorKind::InvalidData, e)
            })?;
        Ok(self.insert_session(Session {
            builder,
            settings: settings.map(str::to_owned),
            intent: None,
        }))
    }

    fn sign(
        &self,
        handle: EngineHandle,
        signer: &LocalSigner,
        mut source: EngineSource,
        destination: EngineDestination,
    ) -> Result<EngineSignResult> {
        let mut session = self.take_session(&handle)?;
        let certificates = signer.certificate_pem()?;
        let signer = c2pa::create_signer::from_keys(
            certificates.as_bytes(),
            signer.private_key(),
            signer.algorithm(),
            signer.time_authority_url().map(str::to_owned),
        )?;
        let mut signed = Cursor::new(Vec::new());
        let manifest = session
            .builder
            .sign(signer.as_ref(), &source.format, &mut source.stream, &mut signed)
            .inspect_err(|e| log::error!("Failed to sign {}: {e}", source.format))?;
        Self::into_result(manifest, signed.into_inner(), destination)
    }

    async fn sign_async(
        &self,
        handle: EngineHandle,
        attempt: &SignAttempt<'_>,
        mut source: EngineSource,
        destination: EngineDestination,
    ) -> Result<EngineSignResult> {
        let claim_signer: Box<dyn AsyncSigner + Send + Sync + '_> = match attempt.signer() {
            Signer::Local(local) => return self.sign(handle, local, source, destination),
            Signer::Identity(identity) => Box::new(Self::identity_signer(attempt, identity)),
            Signer::Callback(callback) | Signer::CallbackWithConfig { signer: callback, .. } => {
                Box::new(AttemptSigner {
                    attempt,
                    config: callback.config(),
                })
            }
        };
        let mut session = self.take_session(&handle)?;
        if let Some(settings) = attempt.settings() {
            session = Self::with_override(session, settings)?;
        }

        let mut signed = Cursor::new(Vec::new());
        let manifest = session
            .builder
            .sign_async(
                claim_signer.as_ref(),
                &source.format,
                &mut source.stream,
                &mut signed,
            )
            .await
            .inspect_err(|e| log::error!("Failed to sign {}: {e}", source.format))?;
        Self::into_result(manifest, signed.into_inner(), destination)
    }

    fn release(&self, handle: EngineHandle) {
        self.lock_sessions().remove(&handle.id());
    }

    async fn reader_from_stream(
        &self,
        source: EngineSource,
        settings: Option<&str>,
    ) -> Result<Option<ReaderHandle>> {
        let result = c2pa::Reader::from_context(Self::context(settings)?)
            .with_stream_async(&source.format, source.stream)
            .await;
        let reader = match result {
            Ok(reader) => reader,
            Err(c2pa::Error::JumbfNotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let id = self.next_id();
        self.lock_readers().insert(id, reader);
        Ok(Some(ReaderHandle::new(id)))
    }

    async fn reader_from_manifest_data(
        &self,
        manifest: &[u8],
        source: EngineSource,
        settings: Option<&str>,
    ) -> Result<ReaderHandle> {
        let reader = c2pa::Reader::from_context(Self::context(settings)?)
            .with_manifest_data_and_stream_async(manifest, &source.format, source.stream)
            .await?;
        let id = self.next_id();
        self.lock_readers().insert(id, reader);
        Ok(ReaderHandle::new(id))
    }

    fn reader_json(&self, reader: &ReaderHandle) -> Result<String> {
        self.with_reader(reader, |r| Ok(r.json()))
    }

    fn reader_remote_url(&self, reader: &ReaderHandle) -> Result<Option<String>> {
        self.with_reader(reader, |r| Ok(r.remote_url().map(str::to_owned)))
    }

    fn reader_is_embedded(&self, reader: &ReaderHandle) -> Result<bool> {
        self.with_reader(reader, |r| Ok(r.is_embedded()))
    }

    fn reader_validation_state(&self, reader: &ReaderHandle) -> Result<ValidationState> {
        self.with_reader(reader, |r| {
            Ok(match r.validation_state() {
                c2pa::ValidationState::Invalid => ValidationState::Invalid,
                c2pa::ValidationState::Valid => ValidationState::Valid,
                c2pa::ValidationState::Trusted => ValidationState::Trusted,
            })
        })
    }

    fn reader_ingredient(&self, reader: &ReaderHandle) -> Result<Value> {
        // `add_ingredient_from_reader` attaches the first ingredient of the
        // active manifest.
        self.with_reader(reader, |r| {
            let ingredient = r
                .active_manifest()
                .and_then(|manifest| manifest.ingredients().first())
                .ok_or_else(|| {
                    Error::Validation("reader's active manifest has no ingredient".to_owned())
                })?;
            Ok(serde_json::to_value(ingredient)?)
        })
    }

    fn reader_resource(&self, reader: &ReaderHandle, uri: &str) -> Result<Vec<u8>> {
        self.with_reader(reader, |r| {
            let mut out = Cursor::new(Vec::new());
            r.resource_to_stream(uri, &mut out)?;
            Ok(out.into_inner())
        })
    }

    fn release_reader(&self, reader: ReaderHandle) {
        self.lock_readers().remove(&reader.id());
    }
}
