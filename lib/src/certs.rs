// Signing services hand out certificate chains either as PEM bundles or as
// PKCS#7 (p7b) blobs. Both are normalized to a leaf-first DER list.
use bytes::Bytes;
use cms::cert::CertificateChoices;
use cms::{content_info::ContentInfo, signed_data::SignedData};
use x509_cert::Certificate;
use x509_cert::der::{Decode, Encode, EncodePem, pem::LineEnding};

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct CertificateChain {
    certificates: Vec<Certificate>,
    der: Vec<Vec<u8>>,
}

impl CertificateChain {
    /// Accepts either a PEM bundle or a DER encoded p7b.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.trim_ascii_start().starts_with(b"-----BEGIN") {
            Self::from_pem(bytes)
        } else {
            Self::from_p7b(Bytes::copy_from_slice(bytes))
        }
    }

    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let certificates = Certificate::load_pem_chain(pem)
            .inspect_err(|x| log::error!("{x:?}"))
            .map_err(|e| Error::Certificate(e.to_string()))?;
        Self::ordered(certificates)
    }

    pub fn from_p7b(p7b: Bytes) -> Result<Self> {
        let info = ContentInfo::from_der(&p7b)
            .inspect_err(|x| log::error!("{x:?}"))
            .map_err(|e| Error::Certificate(e.to_string()))?;
        let data: SignedData = info
            .content
            .decode_as()
            .map_err(|e| Error::Certificate(e.to_string()))?;
        let certificates = data
            .certificates
            .map(|set| {
                set.0
                    .iter()
                    .filter_map(|c| match c {
                        CertificateChoices::Certificate(c) => Some(c.clone()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Self::ordered(certificates)
    }

    /// DER encoded certificates, signing certificate first.
    pub fn der_certificates(&self) -> &[Vec<u8>] {
        &self.der
    }

    pub fn to_pem(&self) -> Result<String> {
        self.certificates
            .iter()
            .map(|c| {
                c.to_pem(LineEnding::LF)
                    .map_err(|e| Error::Certificate(e.to_string()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Orders the chain from the signing certificate up to, but excluding,
    /// the self-signed root. A lone self-signed certificate is kept.
    fn ordered(certificates: Vec<Certificate>) -> Result<Self> {
        if certificates.is_empty() {
            return Err(Error::Certificate("no certificates found".to_owned()));
        }

        let is_root =
            |c: &Certificate| c.tbs_certificate.subject == c.tbs_certificate.issuer;
        let mut remaining: Vec<Certificate> = if certificates.len() == 1 {
            certificates
        } else {
            certificates.into_iter().filter(|c| !is_root(c)).collect()
        };

        // The leaf is the certificate that issued nothing else in the set.
        let leaf = remaining
            .iter()
            .position(|candidate| {
                !remaining.iter().any(|other| {
                    !std::ptr::eq(other, candidate)
                        && other.tbs_certificate.issuer == candidate.tbs_certificate.subject
                })
            })
            .ok_or_else(|| Error::Certificate("no signing certificate in chain".to_owned()))?;

        let mut chain = vec![remaining.swap_remove(leaf)];
        while !remaining.is_empty() {
            let issuer = &chain[chain.len() - 1].tbs_certificate.issuer;
            let next = remaining
                .iter()
                .position(|c| &c.tbs_certificate.subject == issuer)
                .ok_or_else(|| {
                    Error::Certificate(format!("no issuer found for {issuer}"))
                })?;
            chain.push(remaining.swap_remove(next));
        }

        let der = chain
            .iter()
            .inspect(|c| {
                log::debug!(
                    "cert: Subject= ({}) Issuer= ({})",
                    c.tbs_certificate.subject,
                    c.tbs_certificate.issuer
                )
            })
            .map(|c| c.to_der().map_err(|e| Error::Certificate(e.to_string())))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            certificates: chain,
            der,
        })
    }
}
