// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Trust material and its aggregation.
//!
//! [TrustMaterial] is one source of trust: the trust-everything
//! sentinel, the platform's default CA bundle, or an explicit set of
//! anchors with optional CRLs. [TrustChain] aggregates sources; once the
//! sentinel has been added the chain accepts any peer certificate no
//! matter what else it holds, so the sentinel is a variant rather than a
//! special certificate set.

use {
    crate::{jks, pkcs12, SslError as Error},
    chrono::Utc,
    x509_der::{
        pem::{iter_blocks, PemLabel},
        CertificateList, X509Certificate,
    },
};

/// One source of trust anchors.
#[derive(Clone, Debug)]
pub enum TrustMaterial {
    /// Trust every peer certificate. The TLS layer skips verification
    /// entirely when this is in play.
    All,
    /// The platform provider's default CA bundle.
    Default,
    /// An explicit set of anchors and CRLs.
    Certs {
        anchors: Vec<X509Certificate>,
        crls: Vec<CertificateList>,
    },
}

impl TrustMaterial {
    /// Collect trust anchors (CERTIFICATE blocks) and CRLs (X509 CRL
    /// blocks) from PEM armored or raw DER input.
    pub fn from_pem_bytes(data: &[u8]) -> Result<Self, Error> {
        let mut anchors = Vec::new();
        let mut crls = Vec::new();

        for block in iter_blocks(data) {
            let block = block?;
            match block.label {
                PemLabel::Certificate | PemLabel::Der => {
                    anchors.push(X509Certificate::from_der(&block.der)?)
                }
                PemLabel::X509Crl => crls.push(CertificateList::from_der(&block.der)?),
                _ => {}
            }
        }

        if anchors.is_empty() && crls.is_empty() {
            return Err(Error::CertificateInvalid(
                "no trust material in input".to_string(),
            ));
        }

        Ok(Self::Certs { anchors, crls })
    }

    pub fn from_cert(cert: X509Certificate) -> Self {
        Self::Certs {
            anchors: vec![cert],
            crls: Vec::new(),
        }
    }

    /// Collect the trusted certificates of a key store container
    /// (trusted-cert entries of JKS-like stores, certificate bags of
    /// PKCS#12).
    pub fn from_store(data: &[u8], store_password: &str) -> Result<Self, Error> {
        let anchors = if jks::matches_magic(data) {
            jks::load(data, store_password)?
                .trusted_certs
                .into_iter()
                .map(|(_, cert)| cert)
                .collect::<Vec<_>>()
        } else if pkcs12::matches(data) {
            pkcs12::load(data, store_password, store_password)?
                .certs
                .into_iter()
                .map(|entry| entry.certificate)
                .collect()
        } else {
            return Err(Error::UnsupportedContainer);
        };

        if anchors.is_empty() {
            return Err(Error::CertificateInvalid(
                "key store holds no trusted certificates".to_string(),
            ));
        }

        Ok(Self::Certs {
            anchors,
            crls: Vec::new(),
        })
    }
}

/// The aggregated trust of a configuration.
#[derive(Clone, Debug)]
pub enum TrustChain {
    /// The sentinel absorbed every other source.
    All,
    Set(TrustSet),
}

/// The non-sentinel state of a [TrustChain].
#[derive(Clone, Debug, Default)]
pub struct TrustSet {
    anchors: Vec<X509Certificate>,
    crls: Vec<CertificateList>,
    default_ca: bool,
}

impl TrustSet {
    pub fn anchors(&self) -> &[X509Certificate] {
        &self.anchors
    }

    pub fn crls(&self) -> &[CertificateList] {
        &self.crls
    }

    pub fn includes_default_ca(&self) -> bool {
        self.default_ca
    }

    fn add_anchor(&mut self, cert: X509Certificate) {
        // Anchor identity is (subject, public key); duplicates are
        // dropped.
        let identity = cert.anchor_identity();
        let present = self
            .anchors
            .iter()
            .any(|anchor| anchor.anchor_identity() == identity);

        if !present {
            self.anchors.push(cert);
        }
    }

    fn add_crl(&mut self, crl: CertificateList) {
        if !self.crls.contains(&crl) {
            self.crls.push(crl);
        }
    }
}

impl Default for TrustChain {
    fn default() -> Self {
        Self::Set(TrustSet::default())
    }
}

impl TrustChain {
    /// Add a source. The sentinel absorbs everything; otherwise sources
    /// union, with anchors deduplicated by (subject, public key).
    pub fn add(&mut self, material: TrustMaterial) {
        // Nothing dilutes the sentinel.
        if self.contains_trust_all() {
            return;
        }

        if matches!(material, TrustMaterial::All) {
            *self = Self::All;
            return;
        }

        if let Self::Set(set) = self {
            match material {
                TrustMaterial::All => {}
                TrustMaterial::Default => set.default_ca = true,
                TrustMaterial::Certs { anchors, crls } => {
                    for anchor in anchors {
                        set.add_anchor(anchor);
                    }
                    for crl in crls {
                        set.add_crl(crl);
                    }
                }
            }
        }
    }

    pub fn contains_trust_all(&self) -> bool {
        matches!(self, Self::All)
    }

    pub fn anchors(&self) -> &[X509Certificate] {
        match self {
            Self::All => &[],
            Self::Set(set) => set.anchors(),
        }
    }

    pub fn crls(&self) -> &[CertificateList] {
        match self {
            Self::All => &[],
            Self::Set(set) => set.crls(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::All => false,
            Self::Set(set) => set.anchors.is_empty() && !set.default_ca,
        }
    }

    /// Static screening of a peer chain against the in-memory CRL set.
    ///
    /// `revoked` when a current CRL lists a chain member's serial;
    /// `crl unavailable` when every CRL known for an issuer is past its
    /// nextUpdate. Issuers with no CRL at all pass: holding a CRL is
    /// optional, holding a stale one is a misconfiguration.
    pub fn screen_peer_chain(&self, chain: &[X509Certificate]) -> Result<(), Error> {
        let crls = match self {
            Self::All => return Ok(()),
            Self::Set(set) => set.crls(),
        };

        if crls.is_empty() {
            return Ok(());
        }

        let now = Utc::now();

        for cert in chain {
            let mut any_current = false;
            let mut any_for_issuer = false;

            for crl in crls {
                if crl.issuer() != cert.issuer() {
                    continue;
                }
                any_for_issuer = true;

                if matches!(crl.next_update(), Some(next) if next < now) {
                    continue;
                }
                any_current = true;

                if crl.is_revoked(cert.serial()) {
                    return Err(Error::TrustFailure(format!(
                        "peer certificate {} is revoked",
                        cert.subject()
                    )));
                }
            }

            if any_for_issuer && !any_current {
                return Err(Error::TrustFailure(format!(
                    "crl unavailable: every CRL for issuer {} is stale",
                    cert.issuer()
                )));
            }
        }

        Ok(())
    }
}
