// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! JKS-like and JCEKS-like key store containers.
//!
//! Both use the same record layout: a magic number (0xFEEDFEED for JKS,
//! 0xCECECECE for JCEKS), a version, a count, then tagged entries, and a
//! trailing SHA-1 integrity digest over the store password (UTF-16BE),
//! the ASCII string "Mighty Aphrodite", and the payload. Private keys
//! are stored as EncryptedPrivateKeyInfo; decryption is dispatched
//! elsewhere on the protection algorithm OID.

use {
    crate::{pbe, SslError as Error},
    x509_der::X509Certificate,
};

pub(crate) const JKS_MAGIC: u32 = 0xfeed_feed;
pub(crate) const JCEKS_MAGIC: u32 = 0xcece_cece;

const PRIVATE_KEY_TAG: u32 = 1;
const TRUSTED_CERT_TAG: u32 = 2;
const SECRET_KEY_TAG: u32 = 3;

/// The salt, of sorts, Sun's key store integrity digest mixes in.
const INTEGRITY_SUFFIX: &[u8] = b"Mighty Aphrodite";

pub(crate) struct JksKeyEntry {
    pub alias: String,
    /// EncryptedPrivateKeyInfo DER, still protected.
    pub encrypted_key: Vec<u8>,
    /// Chain as stored, head first.
    pub chain: Vec<X509Certificate>,
}

pub(crate) struct JksEntries {
    pub key_entries: Vec<JksKeyEntry>,
    pub trusted_certs: Vec<(String, X509Certificate)>,
}

pub(crate) fn matches_magic(data: &[u8]) -> bool {
    read_magic(data) == Some(JKS_MAGIC) || read_magic(data) == Some(JCEKS_MAGIC)
}

fn read_magic(data: &[u8]) -> Option<u32> {
    Some(u32::from_be_bytes(data.get(0..4)?.try_into().ok()?))
}

/// Parse a JKS/JCEKS container, verifying the integrity digest against
/// the store password.
pub(crate) fn load(data: &[u8], store_password: &str) -> Result<JksEntries, Error> {
    let malformed = |what: &str| Error::MalformedContainer(what.to_string());

    if data.len() < 32 {
        return Err(malformed("store is too short"));
    }

    let payload_end = data.len() - 20;
    let mut message = pbe::utf16be_password(store_password);
    message.extend_from_slice(INTEGRITY_SUFFIX);
    message.extend_from_slice(&data[..payload_end]);
    if pbe::sha1(&message)? != data[payload_end..] {
        return Err(Error::WrongPassword);
    }

    let mut reader = Reader {
        data: &data[..payload_end],
        pos: 0,
    };

    let magic = reader.u32()?;
    if magic != JKS_MAGIC && magic != JCEKS_MAGIC {
        return Err(Error::UnsupportedContainer);
    }

    let version = reader.u32()?;
    if version != 1 && version != 2 {
        return Err(malformed("unknown store version"));
    }

    let count = reader.u32()?;
    let mut entries = JksEntries {
        key_entries: Vec::new(),
        trusted_certs: Vec::new(),
    };

    for _ in 0..count {
        let tag = reader.u32()?;
        match tag {
            PRIVATE_KEY_TAG => {
                let alias = reader.utf()?;
                let _creation_date = reader.u64()?;

                let key_length = reader.u32()? as usize;
                let encrypted_key = reader.take(key_length)?.to_vec();

                let chain_length = reader.u32()?;
                let mut chain = Vec::new();
                for _ in 0..chain_length {
                    chain.push(read_certificate(&mut reader, version)?);
                }

                entries.key_entries.push(JksKeyEntry {
                    alias,
                    encrypted_key,
                    chain,
                });
            }
            TRUSTED_CERT_TAG => {
                let alias = reader.utf()?;
                let _creation_date = reader.u64()?;
                let certificate = read_certificate(&mut reader, version)?;

                entries.trusted_certs.push((alias, certificate));
            }
            SECRET_KEY_TAG => {
                // JCEKS secret keys are serialized SealedObjects with no
                // length prefix; there is no way to skip one.
                return Err(Error::MalformedContainer(
                    "JCEKS secret-key entries are not supported".to_string(),
                ));
            }
            _ => return Err(malformed("unknown entry tag")),
        }
    }

    if reader.pos != reader.data.len() {
        return Err(malformed("trailing bytes after entries"));
    }

    Ok(entries)
}

fn read_certificate(reader: &mut Reader<'_>, version: u32) -> Result<X509Certificate, Error> {
    if version == 2 {
        let certificate_type = reader.utf()?;
        if certificate_type != "X.509" {
            return Err(Error::MalformedContainer(format!(
                "unsupported certificate type {:?}",
                certificate_type
            )));
        }
    }

    let length = reader.u32()? as usize;
    let der = reader.take(length)?;

    Ok(X509Certificate::from_der(der)?)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, length: usize) -> Result<&'a [u8], Error> {
        let end = self
            .pos
            .checked_add(length)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| Error::MalformedContainer("record truncated".to_string()))?;

        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, Error> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().expect("2 bytes")))
    }

    fn u32(&mut self) -> Result<u32, Error> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    fn u64(&mut self) -> Result<u64, Error> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    /// A Java modified-UTF-8 string. Aliases are ASCII in practice, so
    /// plain UTF-8 decoding suffices.
    fn utf(&mut self) -> Result<String, Error> {
        let length = self.u16()? as usize;
        let bytes = self.take(length)?;

        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::MalformedContainer("alias is not UTF-8".to_string()))
    }
}
