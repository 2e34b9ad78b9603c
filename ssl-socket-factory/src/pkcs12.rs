// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PKCS#12 key store containers.
//!
//! The walk: PFX (version 3) wraps an authSafe ContentInfo whose octets
//! hold a sequence of further ContentInfos, each either plain `data` or
//! password-encrypted `encryptedData`. Those octets hold SafeContents:
//! sequences of SafeBags carrying keys (plain or shrouded) and
//! certificates, decorated with friendlyName/localKeyId attributes. An
//! optional MacData authenticates the authSafe octets with HMAC-SHA1
//! under the store password; shrouded keys decrypt under the key
//! password. That split is the dual-password model.

use {
    crate::{pbe, SslError as Error},
    x509_der::{
        der::{DerObject, Tag},
        x509::algorithm_identifier,
        PrivateKeyInfo, X509Certificate,
    },
};

const OID_DATA: &[u64] = &[1, 2, 840, 113549, 1, 7, 1];
const OID_ENCRYPTED_DATA: &[u64] = &[1, 2, 840, 113549, 1, 7, 6];

const OID_KEY_BAG: &[u64] = &[1, 2, 840, 113549, 1, 12, 10, 1, 1];
const OID_SHROUDED_KEY_BAG: &[u64] = &[1, 2, 840, 113549, 1, 12, 10, 1, 2];
const OID_CERT_BAG: &[u64] = &[1, 2, 840, 113549, 1, 12, 10, 1, 3];

const OID_X509_CERTIFICATE: &[u64] = &[1, 2, 840, 113549, 1, 9, 22, 1];
const OID_FRIENDLY_NAME: &[u64] = &[1, 2, 840, 113549, 1, 9, 20];
const OID_LOCAL_KEY_ID: &[u64] = &[1, 2, 840, 113549, 1, 9, 21];

const OID_SHA1: &[u64] = &[1, 3, 14, 3, 2, 26];

pub(crate) struct Pkcs12KeyEntry {
    pub alias: Option<String>,
    pub local_key_id: Option<Vec<u8>>,
    pub key: PrivateKeyInfo,
}

pub(crate) struct Pkcs12CertEntry {
    pub alias: Option<String>,
    pub local_key_id: Option<Vec<u8>>,
    pub certificate: X509Certificate,
}

pub(crate) struct ParsedPkcs12 {
    pub keys: Vec<Pkcs12KeyEntry>,
    pub certs: Vec<Pkcs12CertEntry>,
}

/// Cheap content sniff: a DER SEQUENCE whose first child is INTEGER 3.
pub(crate) fn matches(data: &[u8]) -> bool {
    let root = match DerObject::decode(data) {
        Ok(root) => root,
        Err(_) => return false,
    };

    root.as_sequence()
        .ok()
        .and_then(|fields| fields.first()?.as_u64().ok())
        == Some(3)
}

/// Parse a PKCS#12 container.
///
/// The MAC (when present) is verified under `store_password`; shrouded
/// keys decrypt under `key_password`.
pub(crate) fn load(
    data: &[u8],
    store_password: &str,
    key_password: &str,
) -> Result<ParsedPkcs12, Error> {
    let malformed = |what: &str| Error::MalformedContainer(what.to_string());

    let fields = DerObject::decode(data)?.as_sequence()?.to_vec();
    if fields.len() < 2 || fields.len() > 3 {
        return Err(malformed("PFX must have two or three fields"));
    }
    if fields[0].as_u64().ok() != Some(3) {
        return Err(malformed("PFX version must be 3"));
    }

    let auth_safe = content_info_data(&fields[1])?;

    if let Some(mac_data) = fields.get(2) {
        verify_mac(mac_data, &auth_safe, store_password)?;
    }

    let mut parsed = ParsedPkcs12 {
        keys: Vec::new(),
        certs: Vec::new(),
    };

    for content_info in DerObject::decode(&auth_safe)?.as_sequence()? {
        let info = content_info.as_sequence()?;
        let content_type = info
            .first()
            .ok_or_else(|| malformed("empty ContentInfo"))?
            .as_oid()?;

        let safe_contents = if content_type == OID_DATA {
            content_info_data(content_info)?
        } else if content_type == OID_ENCRYPTED_DATA {
            decrypt_encrypted_data(content_info, store_password)?
        } else {
            // Other content types (e.g. enveloped data) are skipped.
            continue;
        };

        for bag in DerObject::decode(&safe_contents)?.as_sequence()? {
            read_safe_bag(bag, key_password, &mut parsed)?;
        }
    }

    Ok(parsed)
}

/// Unwrap `ContentInfo { data, [0] EXPLICIT OCTET STRING }`.
fn content_info_data(obj: &DerObject) -> Result<Vec<u8>, Error> {
    let malformed = |what: &str| Error::MalformedContainer(what.to_string());

    let fields = obj.as_sequence()?;
    if fields.len() != 2 {
        return Err(malformed("ContentInfo must have two fields"));
    }
    if fields[0].as_oid()? != OID_DATA {
        return Err(malformed("expected data ContentInfo"));
    }

    let wrapped = fields[1]
        .children()?
        .first()
        .ok_or_else(|| malformed("empty ContentInfo body"))?
        .clone();

    Ok(wrapped.as_octet_string()?.to_vec())
}

fn verify_mac(mac_data: &DerObject, auth_safe: &[u8], store_password: &str) -> Result<(), Error> {
    let malformed = |what: &str| Error::MalformedContainer(what.to_string());

    let fields = mac_data.as_sequence()?;
    if fields.len() < 2 {
        return Err(malformed("MacData must carry digest and salt"));
    }

    let digest_info = fields[0].as_sequence()?;
    if digest_info.len() != 2 {
        return Err(malformed("DigestInfo must have two fields"));
    }
    let (digest_algorithm, _) = algorithm_identifier(&digest_info[0])?;
    if digest_algorithm != OID_SHA1 {
        // Password-integrity MACs other than SHA-1 are not produced by
        // the tooling this container format is exchanged with.
        return Err(Error::UnsupportedContainer);
    }
    let expected = digest_info[1].as_octet_string()?;

    let salt = fields[1].as_octet_string()?;
    let iterations = match fields.get(2) {
        Some(field) => field.as_u64()?,
        None => 1,
    };

    let mac_key =
        pbe::pkcs12_key_derive(store_password, salt, pbe::PKCS12_ID_MAC, iterations, 20)?;
    let actual = pbe::hmac_sha1(&mac_key, auth_safe)?;

    if actual != expected.as_ref() {
        return Err(Error::WrongPassword);
    }

    Ok(())
}

/// Unwrap and decrypt `EncryptedData` under the store password.
fn decrypt_encrypted_data(obj: &DerObject, store_password: &str) -> Result<Vec<u8>, Error> {
    let malformed = |what: &str| Error::MalformedContainer(what.to_string());

    let body = obj
        .as_sequence()?
        .get(1)
        .ok_or_else(|| malformed("EncryptedData ContentInfo missing body"))?
        .children()?
        .first()
        .ok_or_else(|| malformed("empty EncryptedData body"))?
        .clone();

    let fields = body.as_sequence()?;
    if fields.len() < 2 {
        return Err(malformed("EncryptedData must carry content info"));
    }

    let content = fields[1].as_sequence()?;
    if content.len() != 3 {
        return Err(malformed("EncryptedContentInfo must have three fields"));
    }

    let (algorithm, parameters) = algorithm_identifier(&content[1])?;

    // encryptedContent [0] IMPLICIT OCTET STRING; some writers emit the
    // constructed form holding OCTET STRING fragments.
    let ciphertext = if content[2].tag() == Tag::context_primitive(0) {
        content[2].primitive_bytes()?.to_vec()
    } else if content[2].tag() == Tag::context(0) {
        let mut joined = Vec::new();
        for fragment in content[2].children()? {
            joined.extend_from_slice(fragment.as_octet_string()?);
        }
        joined
    } else {
        return Err(malformed("encryptedContent has unexpected tag"));
    };

    pbe::decrypt_pbe(&algorithm, parameters.as_ref(), store_password, &ciphertext)
}

fn read_safe_bag(
    bag: &DerObject,
    key_password: &str,
    parsed: &mut ParsedPkcs12,
) -> Result<(), Error> {
    let malformed = |what: &str| Error::MalformedContainer(what.to_string());

    let fields = bag.as_sequence()?;
    if fields.len() < 2 {
        return Err(malformed("SafeBag must have id and value"));
    }

    let bag_id = fields[0].as_oid()?;
    let value = fields[1]
        .children()?
        .first()
        .ok_or_else(|| malformed("empty SafeBag value"))?
        .clone();

    let (alias, local_key_id) = match fields.get(2) {
        Some(attributes) => read_bag_attributes(attributes)?,
        None => (None, None),
    };

    if bag_id == OID_KEY_BAG {
        let key = PrivateKeyInfo::from_pkcs8_der(value.encode())?;
        parsed.keys.push(Pkcs12KeyEntry {
            alias,
            local_key_id,
            key,
        });
    } else if bag_id == OID_SHROUDED_KEY_BAG {
        let plain = pbe::decrypt_encrypted_private_key_info(&value.encode(), key_password)?;
        // If the padding happened to survive a wrong password, the
        // plaintext won't parse as PKCS#8.
        let key = PrivateKeyInfo::from_pkcs8_der(&plain).map_err(|_| Error::WrongPassword)?;
        parsed.keys.push(Pkcs12KeyEntry {
            alias,
            local_key_id,
            key,
        });
    } else if bag_id == OID_CERT_BAG {
        let cert_bag = value.as_sequence()?;
        if cert_bag.len() != 2 {
            return Err(malformed("CertBag must have two fields"));
        }
        if cert_bag[0].as_oid()? != OID_X509_CERTIFICATE {
            // SDSI certificates and friends are skipped.
            return Ok(());
        }

        let der = cert_bag[1]
            .children()?
            .first()
            .ok_or_else(|| malformed("empty CertBag value"))?
            .as_octet_string()?
            .to_vec();

        parsed.certs.push(Pkcs12CertEntry {
            alias,
            local_key_id,
            certificate: X509Certificate::from_der(&der)?,
        });
    }
    // Unrecognized bag types (CRL bags, secret bags) are skipped.

    Ok(())
}

type BagAttributes = (Option<String>, Option<Vec<u8>>);

fn read_bag_attributes(attributes: &DerObject) -> Result<BagAttributes, Error> {
    let mut alias = None;
    let mut local_key_id = None;

    for attribute in attributes.as_set()? {
        let fields = attribute.as_sequence()?;
        if fields.len() != 2 {
            continue;
        }

        let attribute_type = fields[0].as_oid()?;
        let first_value = fields[1].as_set()?.first().cloned();

        if attribute_type == OID_FRIENDLY_NAME {
            if let Some(value) = first_value {
                alias = value.as_string().ok();
            }
        } else if attribute_type == OID_LOCAL_KEY_ID {
            if let Some(value) = first_value {
                local_key_id = value.as_octet_string().ok().map(|bytes| bytes.to_vec());
            }
        }
    }

    Ok((alias, local_key_id))
}

#[cfg(test)]
pub(crate) mod testp12 {
    //! Forward construction of PKCS#12 containers for tests, using the
    //! library's own encoder and PBE schemes.

    use super::*;

    const SALT: [u8; 8] = [0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6, 0x07, 0x18];
    const MAC_SALT: [u8; 8] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
    const ITERATIONS: u64 = 2048;

    fn pbe_algorithm() -> DerObject {
        DerObject::sequence(vec![
            DerObject::oid(&Oid::new(pbe::OID_PBE_SHA1_3KEY_3DES.to_vec()).unwrap()),
            DerObject::sequence(vec![
                DerObject::octet_string(SALT.to_vec()),
                DerObject::integer(ITERATIONS as i64),
            ]),
        ])
    }

    fn bag_attributes(alias: &str, local_key_id: Option<&[u8]>) -> DerObject {
        let mut attributes = vec![DerObject::sequence(vec![
            DerObject::oid(&Oid::new(OID_FRIENDLY_NAME.to_vec()).unwrap()),
            DerObject::set(vec![DerObject::bmp_string(alias)]),
        ])];

        if let Some(id) = local_key_id {
            attributes.push(DerObject::sequence(vec![
                DerObject::oid(&Oid::new(OID_LOCAL_KEY_ID.to_vec()).unwrap()),
                DerObject::set(vec![DerObject::octet_string(id.to_vec())]),
            ]));
        }

        DerObject::set(attributes)
    }

    fn data_content_info(content: Vec<u8>) -> DerObject {
        DerObject::sequence(vec![
            DerObject::oid(&Oid::new(OID_DATA.to_vec()).unwrap()),
            DerObject::explicit(0, DerObject::octet_string(content)),
        ])
    }

    fn encrypted_content_info(password: &str, plaintext: &[u8]) -> DerObject {
        let ciphertext =
            pbe::encrypt_pbes1_sha1_3des(password, &SALT, ITERATIONS, plaintext).unwrap();

        DerObject::sequence(vec![
            DerObject::oid(&Oid::new(OID_ENCRYPTED_DATA.to_vec()).unwrap()),
            DerObject::explicit(
                0,
                DerObject::sequence(vec![
                    DerObject::integer(0),
                    DerObject::sequence(vec![
                        DerObject::oid(&Oid::new(OID_DATA.to_vec()).unwrap()),
                        pbe_algorithm(),
                        DerObject::primitive(Tag::context_primitive(0), ciphertext),
                    ]),
                ]),
            ),
        ])
    }

    /// Build a PKCS#12 container with one shrouded key and the given
    /// certificates (first one tied to the key via localKeyId).
    pub(crate) fn build(
        key_pkcs8: &[u8],
        cert_ders: &[Vec<u8>],
        store_password: &str,
        key_password: &str,
        alias: &str,
    ) -> Vec<u8> {
        let local_key_id: &[u8] = &[0x01];

        let shrouded = DerObject::sequence(vec![
            pbe_algorithm(),
            DerObject::octet_string(
                pbe::encrypt_pbes1_sha1_3des(key_password, &SALT, ITERATIONS, key_pkcs8).unwrap(),
            ),
        ]);

        let key_bag = DerObject::sequence(vec![
            DerObject::oid(&Oid::new(OID_SHROUDED_KEY_BAG.to_vec()).unwrap()),
            DerObject::explicit(0, shrouded),
            bag_attributes(alias, Some(local_key_id)),
        ]);

        let cert_bags = cert_ders
            .iter()
            .enumerate()
            .map(|(index, der)| {
                let cert_bag = DerObject::sequence(vec![
                    DerObject::oid(&Oid::new(OID_X509_CERTIFICATE.to_vec()).unwrap()),
                    DerObject::explicit(0, DerObject::octet_string(der.clone())),
                ]);

                DerObject::sequence(vec![
                    DerObject::oid(&Oid::new(OID_CERT_BAG.to_vec()).unwrap()),
                    DerObject::explicit(0, cert_bag),
                    bag_attributes(
                        alias,
                        if index == 0 { Some(local_key_id) } else { None },
                    ),
                ])
            })
            .collect::<Vec<_>>();

        let key_safe_contents = DerObject::sequence(vec![key_bag]).encode();
        let cert_safe_contents = DerObject::sequence(cert_bags).encode();

        let auth_safe_content = DerObject::sequence(vec![
            data_content_info(key_safe_contents),
            encrypted_content_info(store_password, &cert_safe_contents),
        ])
        .encode();

        let mac_key = pbe::pkcs12_key_derive(
            store_password,
            &MAC_SALT,
            pbe::PKCS12_ID_MAC,
            ITERATIONS,
            20,
        )
        .unwrap();
        let digest = pbe::hmac_sha1(&mac_key, &auth_safe_content).unwrap();

        let mac_data = DerObject::sequence(vec![
            DerObject::sequence(vec![
                DerObject::sequence(vec![
                    DerObject::oid(&Oid::new(OID_SHA1.to_vec()).unwrap()),
                    DerObject::null(),
                ]),
                DerObject::octet_string(digest),
            ]),
            DerObject::octet_string(MAC_SALT.to_vec()),
            DerObject::integer(ITERATIONS as i64),
        ]);

        DerObject::sequence(vec![
            DerObject::integer(3),
            data_content_info(auth_safe_content),
            mac_data,
        ])
        .encode()
    }
}
