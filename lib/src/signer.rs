use async_trait::async_trait;
use c2pa::SigningAlg;
use envconfig::Envconfig;
use std::{future::Future, path::Path, sync::Arc};

use crate::{CallbackError, CertificateChain, Error, Result, Settings};

const DEFAULT_RESERVE_SIZE: usize = 20000;
const DEFAULT_ALGORITHM: SigningAlg = SigningAlg::Es256;

/// A signing function supplied by the caller. It is invoked once per sign
/// attempt with the bytes to be signed and returns the raw signature.
#[async_trait]
pub trait SignCallback: Send + Sync {
    async fn sign(&self, data: Vec<u8>) -> std::result::Result<Vec<u8>, CallbackError>;
}

#[async_trait]
impl<F, Fut> SignCallback for F
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Vec<u8>, CallbackError>> + Send + 'static,
{
    async fn sign(&self, data: Vec<u8>) -> std::result::Result<Vec<u8>, CallbackError> {
        self(data).await
    }
}

pub fn parse_algorithm(name: &str) -> Result<SigningAlg> {
    name.to_ascii_lowercase()
        .parse()
        .map_err(|_| Error::Validation(format!("unknown signing algorithm {name:?}")))
}

/// Signs with certificate and key material held in memory.
#[derive(Clone)]
pub struct LocalSigner {
    certificates: CertificateChain,
    private_key: Vec<u8>,
    algorithm: SigningAlg,
    time_authority_url: Option<String>,
}

impl LocalSigner {
    /// `certificates` may be a PEM bundle or a p7b; `private_key` is PEM.
    pub fn new(
        certificates: &[u8],
        private_key: impl Into<Vec<u8>>,
        algorithm: SigningAlg,
        time_authority_url: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            certificates: CertificateChain::from_bytes(certificates)?,
            private_key: private_key.into(),
            algorithm,
            time_authority_url,
        })
    }

    pub fn from_files(
        certificates: impl AsRef<Path>,
        private_key: impl AsRef<Path>,
        algorithm: SigningAlg,
        time_authority_url: Option<String>,
    ) -> Result<Self> {
        let certificates = std::fs::read(certificates)?;
        let private_key = std::fs::read(private_key)?;
        Self::new(&certificates, private_key, algorithm, time_authority_url)
    }

    pub fn certificates(&self) -> &CertificateChain {
        &self.certificates
    }

    pub fn certificate_pem(&self) -> Result<String> {
        self.certificates.to_pem()
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    pub fn algorithm(&self) -> SigningAlg {
        self.algorithm
    }

    pub fn time_authority_url(&self) -> Option<&str> {
        self.time_authority_url.as_deref()
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("certificates", &self.certificates.len())
            .field("algorithm", &self.algorithm)
            .field("time_authority_url", &self.time_authority_url)
            .finish_non_exhaustive()
    }
}

/// Environment driven configuration for a [`LocalSigner`].
#[derive(Debug, Envconfig)]
pub struct LocalSignerConfig {
    /// Path to the certificate chain (PEM or p7b).
    #[envconfig(from = "SIGNING_CERT")]
    pub certificates: String,
    /// Path to the PEM private key.
    #[envconfig(from = "SIGNING_KEY")]
    pub private_key: String,
    #[envconfig(from = "ALGORITHM", default = "es256")]
    pub algorithm: String,
    #[envconfig(from = "TIME_AUTHORITY_URL")]
    pub time_authority_url: Option<String>,
    /// Settings file applied when the builder is created.
    #[envconfig(from = "SETTINGS")]
    pub settings: Option<String>,
}

impl LocalSignerConfig {
    pub fn signer(&self) -> Result<LocalSigner> {
        LocalSigner::from_files(
            &self.certificates,
            &self.private_key,
            parse_algorithm(&self.algorithm)?,
            self.time_authority_url.clone(),
        )
    }
}

/// Parameters shared by callback based signers.
#[derive(Debug, Clone)]
pub struct SignerConfig {
    pub algorithm: SigningAlg,
    pub certificates: CertificateChain,
    pub reserve_size: usize,
    pub time_authority_url: Option<String>,
    /// When set, the callback returns a complete COSE signature rather than
    /// raw signature bytes.
    pub direct_cose_handling: bool,
}

impl SignerConfig {
    pub fn new(certificates: CertificateChain) -> Self {
        Self {
            algorithm: DEFAULT_ALGORITHM,
            certificates,
            reserve_size: DEFAULT_RESERVE_SIZE,
            time_authority_url: None,
            direct_cose_handling: false,
        }
    }

    pub fn with_algorithm(mut self, algorithm: SigningAlg) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_reserve_size(mut self, reserve_size: usize) -> Self {
        self.reserve_size = reserve_size;
        self
    }

    pub fn with_time_authority_url(mut self, url: impl Into<String>) -> Self {
        self.time_authority_url = Some(url.into());
        self
    }

    pub fn with_direct_cose_handling(mut self, direct: bool) -> Self {
        self.direct_cose_handling = direct;
        self
    }
}

/// Delegates the signature itself to a caller supplied function.
#[derive(Clone)]
pub struct CallbackSigner {
    config: SignerConfig,
    callback: Arc<dyn SignCallback>,
}

impl CallbackSigner {
    pub fn new(config: SignerConfig, callback: impl SignCallback + 'static) -> Self {
        Self {
            config,
            callback: Arc::new(callback),
        }
    }

    pub fn config(&self) -> &SignerConfig {
        &self.config
    }

    pub(crate) fn callback(&self) -> Arc<dyn SignCallback> {
        Arc::clone(&self.callback)
    }
}

impl std::fmt::Debug for CallbackSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSigner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// CAWG identity assertion signature types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    X509Cose,
    IdentityClaimsAggregation,
}

impl SignatureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureType::X509Cose => "cawg.x509.cose",
            SignatureType::IdentityClaimsAggregation => "cawg.identity_claims_aggregation",
        }
    }
}

/// Produces the credential signature of an identity assertion.
#[derive(Clone)]
pub struct CredentialHolder {
    signature_type: SignatureType,
    reserve_size: usize,
    callback: Arc<dyn SignCallback>,
}

impl CredentialHolder {
    pub fn new(
        signature_type: SignatureType,
        reserve_size: usize,
        callback: impl SignCallback + 'static,
    ) -> Self {
        Self {
            signature_type,
            reserve_size,
            callback: Arc::new(callback),
        }
    }

    pub fn signature_type(&self) -> SignatureType {
        self.signature_type
    }

    pub fn reserve_size(&self) -> usize {
        self.reserve_size
    }

    pub(crate) fn callback(&self) -> Arc<dyn SignCallback> {
        Arc::clone(&self.callback)
    }
}

impl std::fmt::Debug for CredentialHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialHolder")
            .field("signature_type", &self.signature_type)
            .field("reserve_size", &self.reserve_size)
            .finish_non_exhaustive()
    }
}

/// One identity assertion: who signs it, in which roles, and which
/// assertions it vouches for.
#[derive(Debug, Clone)]
pub struct IdentityAssertionBuilder {
    holder: CredentialHolder,
    roles: Vec<String>,
    referenced_assertions: Vec<String>,
}

impl IdentityAssertionBuilder {
    pub fn for_credential_holder(holder: CredentialHolder) -> Self {
        Self {
            holder,
            roles: Vec::new(),
            referenced_assertions: Vec::new(),
        }
    }

    pub fn add_roles(&mut self, roles: &[&str]) -> &mut Self {
        self.roles.extend(roles.iter().map(|r| (*r).to_owned()));
        self
    }

    pub fn add_referenced_assertions(&mut self, labels: &[&str]) -> &mut Self {
        self.referenced_assertions
            .extend(labels.iter().map(|l| (*l).to_owned()));
        self
    }

    pub fn holder(&self) -> &CredentialHolder {
        &self.holder
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn referenced_assertions(&self) -> &[String] {
        &self.referenced_assertions
    }
}

/// A callback signer that also attaches identity assertions.
#[derive(Debug, Clone)]
pub struct IdentityAssertionSigner {
    signer: CallbackSigner,
    builders: Vec<IdentityAssertionBuilder>,
}

impl IdentityAssertionSigner {
    pub fn new(signer: CallbackSigner) -> Self {
        Self {
            signer,
            builders: Vec::new(),
        }
    }

    pub fn add_identity_assertion(&mut self, builder: IdentityAssertionBuilder) -> &mut Self {
        self.builders.push(builder);
        self
    }

    pub fn signer(&self) -> &CallbackSigner {
        &self.signer
    }

    pub fn identity_assertions(&self) -> &[IdentityAssertionBuilder] {
        &self.builders
    }
}

/// Every way a manifest can be signed.
#[derive(Debug, Clone)]
pub enum Signer {
    Local(LocalSigner),
    Callback(CallbackSigner),
    /// A callback signer whose settings override the builder's for this
    /// sign call only.
    CallbackWithConfig {
        signer: CallbackSigner,
        settings: Settings,
    },
    Identity(IdentityAssertionSigner),
}

impl Signer {
    pub fn name(&self) -> &'static str {
        match self {
            Signer::Local(_) => "local",
            Signer::Callback(_) => "callback",
            Signer::CallbackWithConfig { .. } => "callback-with-config",
            Signer::Identity(_) => "identity-assertion",
        }
    }

    /// The callback signer behind an asynchronous variant.
    pub fn callback_signer(&self) -> Option<&CallbackSigner> {
        match self {
            Signer::Local(_) => None,
            Signer::Callback(signer)
            | Signer::CallbackWithConfig { signer, .. }
            | Signer::Identity(IdentityAssertionSigner { signer, .. }) => Some(signer),
        }
    }
}

impl From<LocalSigner> for Signer {
    fn from(signer: LocalSigner) -> Self {
        Signer::Local(signer)
    }
}

impl From<CallbackSigner> for Signer {
    fn from(signer: CallbackSigner) -> Self {
        Signer::Callback(signer)
    }
}

impl From<IdentityAssertionSigner> for Signer {
    fn from(signer: IdentityAssertionSigner) -> Self {
        Signer::Identity(signer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CERTS: &[u8] = include_bytes!("../../test_data/certs/es256.pub");
    const KEY: &[u8] = include_bytes!("../../test_data/certs/es256.key");

    #[test]
    fn test_local_signer_normalizes_chain() {
        let signer = LocalSigner::new(CERTS, KEY, SigningAlg::Es256, None).unwrap();
        assert_eq!(signer.certificates().len(), 2);
        assert!(signer.certificate_pem().unwrap().starts_with("-----BEGIN CERTIFICATE-----"));
        assert_eq!(signer.private_key(), KEY);
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!(parse_algorithm("ES256").unwrap(), SigningAlg::Es256);
        assert_eq!(parse_algorithm("ps384").unwrap(), SigningAlg::Ps384);
        assert!(parse_algorithm("rot13").is_err());
    }

    #[tokio::test]
    async fn test_closure_callback() {
        let callback = |data: Vec<u8>| async move {
            Ok::<_, CallbackError>(data.into_iter().rev().collect::<Vec<u8>>())
        };
        let chain = CertificateChain::from_bytes(CERTS).unwrap();
        let signer = CallbackSigner::new(SignerConfig::new(chain), callback);
        let signature = signer.callback().sign(vec![1, 2, 3]).await.unwrap();
        assert_eq!(signature, vec![3, 2, 1]);
        assert_eq!(signer.config().reserve_size, 20000);
    }

    #[test]
    fn test_identity_builder_collects_roles_and_labels() {
        let holder = CredentialHolder::new(SignatureType::X509Cose, 10000, |_: Vec<u8>| async {
            Ok::<_, CallbackError>(vec![0u8; 64])
        });
        let mut builder = IdentityAssertionBuilder::for_credential_holder(holder);
        builder
            .add_roles(&["cawg.creator"])
            .add_referenced_assertions(&["c2pa.actions", "cawg.training-mining"]);
        assert_eq!(builder.roles(), ["cawg.creator"]);
        assert_eq!(builder.referenced_assertions().len(), 2);
        assert_eq!(builder.holder().signature_type().as_str(), "cawg.x509.cose");
    }
}
