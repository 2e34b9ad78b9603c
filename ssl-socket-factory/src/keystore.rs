// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Key material: private keys with their certificate chains, loaded from
//! key store containers or PEM.
//!
//! Containers are recognized by content, never by filename. The
//! dual-password model applies throughout: the store password covers
//! container integrity, the key password covers per-entry encryption,
//! and an absent key password falls back to the store password.

use {
    crate::{jks, pbe, pkcs12, SslError as Error},
    log::debug,
    x509_der::{
        pem::{iter_blocks, PemLabel},
        PrivateKeyInfo, X509Certificate,
    },
};

/// One `(alias, private key, certificate chain)` entry.
///
/// The chain runs head to root: `chain[0]` is the end entity whose
/// public key corresponds to the private key, and each following
/// certificate certifies the previous. The chain may be partial.
#[derive(Clone, Debug)]
pub struct KeyEntry {
    alias: String,
    key: PrivateKeyInfo,
    chain: Vec<X509Certificate>,
}

impl KeyEntry {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn key(&self) -> &PrivateKeyInfo {
        &self.key
    }

    pub fn chain(&self) -> &[X509Certificate] {
        &self.chain
    }
}

/// Private key material extracted from a key store.
#[derive(Clone, Debug)]
pub struct KeyMaterial {
    entries: Vec<KeyEntry>,
}

impl KeyMaterial {
    /// Load key material from a key store container.
    ///
    /// PKCS#12, JKS-like, and JCEKS-like containers are recognized.
    /// BKS-like containers are refused: this platform has no provider
    /// for them. A `None` key password reuses the store password for
    /// each private-key entry.
    pub fn from_store(
        data: &[u8],
        store_password: &str,
        key_password: Option<&str>,
    ) -> Result<Self, Error> {
        let key_password = key_password.unwrap_or(store_password);

        if jks::matches_magic(data) {
            debug!("key store looks like JKS/JCEKS");
            return Self::from_jks(data, store_password, key_password);
        }

        if looks_like_bks(data) {
            return Err(Error::UnsupportedContainer);
        }

        if pkcs12::matches(data) {
            debug!("key store looks like PKCS#12");
            return Self::from_pkcs12(data, store_password, key_password);
        }

        Err(Error::UnsupportedContainer)
    }

    /// Assemble key material from PEM inputs: a certificate (chain) and
    /// a private key, the key optionally encrypted (PKCS#8) under
    /// `password`.
    pub fn from_pem(
        cert_data: &[u8],
        key_data: &[u8],
        password: Option<&str>,
    ) -> Result<Self, Error> {
        let certs = X509Certificate::from_pem_multiple(cert_data)?;
        if certs.is_empty() {
            return Err(Error::CertificateInvalid(
                "no certificate in PEM input".to_string(),
            ));
        }

        let mut key = None;
        for block in iter_blocks(key_data) {
            let block = block?;
            let parsed = match block.label {
                PemLabel::RsaPrivateKey => PrivateKeyInfo::from_pkcs1_der(&block.der)?,
                PemLabel::DsaPrivateKey => PrivateKeyInfo::from_dsa_der(&block.der)?,
                PemLabel::EcPrivateKey => PrivateKeyInfo::from_sec1_der(&block.der)?,
                PemLabel::PrivateKey | PemLabel::Der => {
                    PrivateKeyInfo::from_pkcs8_der(&block.der)?
                }
                PemLabel::EncryptedPrivateKey => {
                    let password = password.ok_or(Error::WrongPassword)?;
                    let plain = pbe::decrypt_encrypted_private_key_info(&block.der, password)?;
                    PrivateKeyInfo::from_pkcs8_der(&plain).map_err(|_| Error::WrongPassword)?
                }
                _ => continue,
            };

            key = Some(parsed);
            break;
        }

        let key = key.ok_or(Error::NoPrivateKey)?;
        let entry = assemble_entry("pem".to_string(), key, &certs)?;

        Ok(Self {
            entries: vec![entry],
        })
    }

    fn from_jks(data: &[u8], store_password: &str, key_password: &str) -> Result<Self, Error> {
        let store = jks::load(data, store_password)?;

        let mut entries = Vec::new();
        for entry in store.key_entries {
            let pkcs8 = pbe::decrypt_encrypted_private_key_info(&entry.encrypted_key, key_password)?;
            let key =
                PrivateKeyInfo::from_pkcs8_der(&pkcs8).map_err(|_| Error::WrongPassword)?;

            // Trusted entries may hold the issuers of a partial chain.
            let mut pool = entry.chain;
            pool.extend(store.trusted_certs.iter().map(|(_, cert)| cert.clone()));

            entries.push(assemble_entry(entry.alias, key, &pool)?);
        }

        Self::finish(entries)
    }

    fn from_pkcs12(data: &[u8], store_password: &str, key_password: &str) -> Result<Self, Error> {
        let parsed = pkcs12::load(data, store_password, key_password)?;

        let pool = parsed
            .certs
            .iter()
            .map(|entry| entry.certificate.clone())
            .collect::<Vec<_>>();

        let mut entries = Vec::new();
        for (index, entry) in parsed.keys.into_iter().enumerate() {
            // Prefer the certificate wired to the key by localKeyId.
            let head = entry
                .local_key_id
                .as_ref()
                .and_then(|id| {
                    parsed
                        .certs
                        .iter()
                        .find(|cert| cert.local_key_id.as_ref() == Some(id))
                })
                .map(|cert| cert.certificate.clone());

            let alias = entry
                .alias
                .unwrap_or_else(|| format!("entry{}", index + 1));

            let entry = match head {
                Some(head) => {
                    assemble_entry_with_head(alias, entry.key, head, &pool)?
                }
                None => assemble_entry(alias, entry.key, &pool)?,
            };
            entries.push(entry);
        }

        Self::finish(entries)
    }

    fn finish(entries: Vec<KeyEntry>) -> Result<Self, Error> {
        if entries.is_empty() {
            return Err(Error::NoPrivateKey);
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[KeyEntry] {
        &self.entries
    }

    pub fn aliases(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.alias()).collect()
    }
}

fn looks_like_bks(data: &[u8]) -> bool {
    // BKS stores open with a bare u32 version of 1 or 2, which no DER
    // structure and neither Sun magic can start with.
    matches!(data.get(0..4), Some([0, 0, 0, 1]) | Some([0, 0, 0, 2]))
}

/// Pick the end-entity certificate for `key` out of `pool` and build the
/// ordered chain behind it.
fn assemble_entry(
    alias: String,
    key: PrivateKeyInfo,
    pool: &[X509Certificate],
) -> Result<KeyEntry, Error> {
    let head = pool
        .iter()
        .find(|cert| key.matches_certificate(cert).unwrap_or(false))
        .cloned()
        .ok_or_else(|| {
            Error::CertificateInvalid(format!(
                "no certificate matches the private key of entry {:?}",
                alias
            ))
        })?;

    assemble_entry_with_head(alias, key, head, pool)
}

fn assemble_entry_with_head(
    alias: String,
    key: PrivateKeyInfo,
    head: X509Certificate,
    pool: &[X509Certificate],
) -> Result<KeyEntry, Error> {
    if !key.matches_certificate(&head)? {
        return Err(Error::CertificateInvalid(format!(
            "private key of entry {:?} does not match its end-entity certificate",
            alias
        )));
    }

    let chain = order_chain(head, pool);

    Ok(KeyEntry { alias, key, chain })
}

/// Order a chain head to root by following issuer links through the
/// certificate pool. Stops at a self-signed certificate, a missing
/// issuer (partial chains are fine), or a cycle.
fn order_chain(head: X509Certificate, pool: &[X509Certificate]) -> Vec<X509Certificate> {
    let mut chain = vec![head];

    loop {
        let next = {
            let tail = &chain[chain.len() - 1];
            if tail.subject_is_issuer() {
                None
            } else {
                pool.iter()
                    .find(|cert| !chain.contains(cert) && cert.subject() == tail.issuer())
                    .cloned()
            }
        };

        match next {
            Some(cert) => chain.push(cert),
            None => break,
        }
    }

    chain
}
