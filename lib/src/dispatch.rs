//! Signing dispatch.
//!
//! Every sign call funnels through here: the source is opened before the
//! engine is involved, the engine's raw result is checked against the
//! destination the caller asked for, and a failure raised by a caller's
//! signing callback is handed back as-is even when the engine reports an
//! error of its own on top of it.

use std::sync::{Arc, Mutex, PoisonError};

use crate::{
    CallbackError, Destination, EngineDestination, EngineHandle, EngineSignResult, EngineSource,
    Error, LocalSigner, ProvenanceEngine, Result, SignCallback, Signer, Source,
};

/// Marker returned to the engine when a caller callback failed. The original
/// error is kept in the attempt's [`FailureSlot`].
#[derive(Debug, thiserror::Error)]
#[error("signing callback failed")]
pub struct CallbackFailed;

/// Holds the first error raised by a callback during one sign attempt.
#[derive(Clone, Default)]
pub struct FailureSlot(Arc<Mutex<Option<CallbackError>>>);

impl FailureSlot {
    fn record(&self, err: CallbackError) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        slot.get_or_insert(err);
    }

    fn take(&self) -> Option<CallbackError> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Runs `callback`, stashing its error on failure.
    pub async fn invoke(
        &self,
        callback: &dyn SignCallback,
        data: Vec<u8>,
    ) -> std::result::Result<Vec<u8>, CallbackFailed> {
        callback.sign(data).await.map_err(|err| {
            log::error!("Signing callback failed: {err}");
            self.record(err);
            CallbackFailed
        })
    }
}

/// One asynchronous sign attempt, as seen by the engine.
pub struct SignAttempt<'a> {
    signer: &'a Signer,
    settings: Option<String>,
    failures: FailureSlot,
}

impl<'a> SignAttempt<'a> {
    fn new(signer: &'a Signer) -> Result<Self> {
        let settings = match signer {
            Signer::CallbackWithConfig { settings, .. } => Some(settings.to_json()?),
            _ => None,
        };
        Ok(Self {
            signer,
            settings,
            failures: FailureSlot::default(),
        })
    }

    pub fn signer(&self) -> &'a Signer {
        self.signer
    }

    /// Settings that override the builder's for this attempt only.
    pub fn settings(&self) -> Option<&str> {
        self.settings.as_deref()
    }

    pub fn failures(&self) -> &FailureSlot {
        &self.failures
    }

    /// Signs claim bytes with the attempt's callback signer.
    pub async fn sign_claim(&self, data: Vec<u8>) -> std::result::Result<Vec<u8>, CallbackFailed> {
        let signer = self.signer.callback_signer().ok_or(CallbackFailed)?;
        self.failures.invoke(signer.callback().as_ref(), data).await
    }

    /// Signs an identity assertion payload with the credential holder of the
    /// `index`th identity assertion.
    pub async fn sign_credential(
        &self,
        index: usize,
        payload: Vec<u8>,
    ) -> std::result::Result<Vec<u8>, CallbackFailed> {
        let Signer::Identity(identity) = self.signer else {
            return Err(CallbackFailed);
        };
        let builder = identity
            .identity_assertions()
            .get(index)
            .ok_or(CallbackFailed)?;
        self.failures
            .invoke(builder.holder().callback().as_ref(), payload)
            .await
    }
}

/// Fails if an identity assertion references a label the builder lacks.
pub(crate) fn check_referenced_assertions(
    signer: &Signer,
    has_assertion: impl Fn(&str) -> bool,
) -> Result<()> {
    let Signer::Identity(identity) = signer else {
        return Ok(());
    };
    for builder in identity.identity_assertions() {
        if let Some(missing) = builder
            .referenced_assertions()
            .iter()
            .find(|label| !has_assertion(label))
        {
            return Err(Error::Validation(format!(
                "identity assertion references missing assertion {missing:?}"
            )));
        }
    }
    Ok(())
}

fn open_source(source: Source) -> Result<EngineSource> {
    let format = source.format()?;
    let stream = source.into_stream()?;
    Ok(EngineSource { format, stream })
}

fn engine_destination(destination: &Destination<'_>) -> EngineDestination {
    match destination {
        Destination::File(path) => EngineDestination::File(path.clone()),
        Destination::Buffer(_) => EngineDestination::Buffer,
    }
}

/// Checks the raw result against the destination and hands back the manifest.
fn deliver(result: EngineSignResult, destination: Destination<'_>) -> Result<Vec<u8>> {
    match (destination, result) {
        (Destination::Buffer(buffer), EngineSignResult::Embedded { manifest, asset }) => {
            *buffer = asset;
            Ok(manifest)
        }
        (Destination::File(_), EngineSignResult::Manifest(manifest)) => Ok(manifest),
        (Destination::Buffer(_), EngineSignResult::Manifest(_)) => Err(Error::Internal(
            "unexpected result shape: manifest only for a buffer destination".to_owned(),
        )),
        (Destination::File(path), EngineSignResult::Embedded { .. }) => Err(Error::Internal(
            format!(
                "unexpected result shape: embedded asset for file destination {}",
                path.display()
            ),
        )),
    }
}

pub(crate) fn sign(
    engine: &dyn ProvenanceEngine,
    handle: EngineHandle,
    signer: &LocalSigner,
    source: Source,
    destination: Destination<'_>,
) -> Result<Vec<u8>> {
    let source = match open_source(source) {
        Ok(source) => source,
        Err(err) => {
            engine.release(handle);
            return Err(err);
        }
    };
    log::debug!("Signing {} with a local signer", source.format);
    let result = engine.sign(handle, signer, source, engine_destination(&destination))?;
    let manifest = deliver(result, destination)?;
    log::info!("Signed manifest of {} bytes", manifest.len());
    Ok(manifest)
}

pub(crate) async fn sign_async(
    engine: &dyn ProvenanceEngine,
    handle: EngineHandle,
    signer: &Signer,
    source: Source,
    destination: Destination<'_>,
) -> Result<Vec<u8>> {
    let prepared = open_source(source).and_then(|source| Ok((source, SignAttempt::new(signer)?)));
    let (source, attempt) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => {
            engine.release(handle);
            return Err(err);
        }
    };
    log::debug!("Signing {} with a {} signer", source.format, signer.name());
    let result = engine
        .sign_async(handle, &attempt, source, engine_destination(&destination))
        .await;
    if let Some(err) = attempt.failures.take() {
        return Err(Error::Callback(err));
    }
    let manifest = deliver(result?, destination)?;
    log::info!("Signed manifest of {} bytes", manifest.len());
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_buffer_receives_embedded_asset() {
        let mut buffer = vec![0u8; 4];
        let manifest = deliver(
            EngineSignResult::Embedded {
                manifest: vec![1],
                asset: vec![2, 2],
            },
            Destination::buffer(&mut buffer),
        )
        .unwrap();
        assert_eq!(manifest, vec![1]);
        assert_eq!(buffer, vec![2, 2]);
    }

    #[test]
    fn test_mismatched_shapes_are_internal_errors() {
        let mut buffer = vec![7u8; 3];
        let err = deliver(
            EngineSignResult::Manifest(vec![1]),
            Destination::buffer(&mut buffer),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Internal(ref m) if m.contains("unexpected result shape")));
        assert_eq!(buffer, vec![7u8; 3]);

        let err = deliver(
            EngineSignResult::Embedded {
                manifest: vec![1],
                asset: vec![2],
            },
            Destination::File(PathBuf::from("out.jpg")),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_failure_slot_keeps_first_error() {
        let slot = FailureSlot::default();
        let failing = |_: Vec<u8>| async { Err::<Vec<u8>, CallbackError>("first".into()) };
        assert!(slot.invoke(&failing, vec![]).await.is_err());
        let failing = |_: Vec<u8>| async { Err::<Vec<u8>, CallbackError>("second".into()) };
        assert!(slot.invoke(&failing, vec![]).await.is_err());
        assert_eq!(slot.take().unwrap().to_string(), "first");
        assert!(slot.take().is_none());
    }
}
