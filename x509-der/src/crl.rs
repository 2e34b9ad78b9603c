// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Certificate revocation lists.

use {
    crate::{
        der::{strip_leading_zeros, DerObject, Tag},
        name::Name,
        pem::{iter_blocks, PemLabel},
        time::parse_time,
        x509::algorithm_identifier,
        X509DerError as Error,
    },
    bytes::Bytes,
    chrono::{DateTime, Utc},
    std::hash::{Hash, Hasher},
};

/// One entry of a CRL's revokedCertificates list.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RevokedCertificate {
    pub serial: Bytes,
    pub revocation_date: DateTime<Utc>,
}

/// A DER-decoded CertificateList.
#[derive(Clone, Debug)]
pub struct CertificateList {
    der: Bytes,
    issuer: Name,
    this_update: DateTime<Utc>,
    next_update: Option<DateTime<Utc>>,
    revoked: Vec<RevokedCertificate>,
}

impl CertificateList {
    pub fn from_der(data: impl AsRef<[u8]>) -> Result<Self, Error> {
        let der = data.as_ref();
        let invalid = |what: &str| Error::CertificateInvalid(what.to_string());

        let outer = DerObject::decode(der)?;
        let fields = outer.as_sequence()?;
        if fields.len() != 3 {
            return Err(invalid("CertificateList must have three fields"));
        }

        let tbs = fields[0].as_sequence()?;
        let mut index = 0;

        // version INTEGER OPTIONAL
        if tbs.get(index).map(|obj| obj.tag()) == Some(Tag::INTEGER) {
            index += 1;
        }

        // signature AlgorithmIdentifier
        algorithm_identifier(
            tbs.get(index)
                .ok_or_else(|| invalid("missing CRL signature algorithm"))?,
        )?;
        index += 1;

        let issuer = Name::from_der_object(
            tbs.get(index).ok_or_else(|| invalid("missing CRL issuer"))?,
        )?;
        index += 1;

        let this_update = parse_time(
            tbs.get(index)
                .ok_or_else(|| invalid("missing thisUpdate"))?,
        )?;
        index += 1;

        let mut next_update = None;
        if let Some(obj) = tbs.get(index) {
            if matches!(obj.tag(), Tag::UTC_TIME | Tag::GENERALIZED_TIME) {
                next_update = Some(parse_time(obj)?);
                index += 1;
            }
        }

        let mut revoked = Vec::new();
        if let Some(obj) = tbs.get(index) {
            if obj.tag() == Tag::SEQUENCE {
                for entry in obj.as_sequence()? {
                    let entry_fields = entry.as_sequence()?;
                    if entry_fields.len() < 2 {
                        return Err(invalid("revoked entry must have serial and date"));
                    }

                    revoked.push(RevokedCertificate {
                        serial: entry_fields[0].as_integer_bytes()?.clone(),
                        revocation_date: parse_time(&entry_fields[1])?,
                    });
                }
            }
        }

        // crlExtensions [0] EXPLICIT OPTIONAL is ignored.

        Ok(Self {
            der: Bytes::copy_from_slice(der),
            issuer,
            this_update,
            next_update,
            revoked,
        })
    }

    /// Parse the first `X509 CRL` (or raw DER) block of the input.
    pub fn from_pem(data: impl AsRef<[u8]>) -> Result<Self, Error> {
        for block in iter_blocks(data.as_ref()) {
            let block = block?;
            if matches!(block.label, PemLabel::X509Crl | PemLabel::Der) {
                return Self::from_der(&block.der);
            }
        }

        Err(Error::CertificateInvalid(
            "no X509 CRL block in input".to_string(),
        ))
    }

    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    pub fn issuer(&self) -> &Name {
        &self.issuer
    }

    pub fn this_update(&self) -> DateTime<Utc> {
        self.this_update
    }

    pub fn next_update(&self) -> Option<DateTime<Utc>> {
        self.next_update
    }

    pub fn revoked(&self) -> &[RevokedCertificate] {
        &self.revoked
    }

    /// Whether the given serial number appears in this list.
    ///
    /// Serial content octets are minimally normalized on both sides.
    pub fn is_revoked(&self, serial: &[u8]) -> bool {
        let serial = strip_leading_zeros(serial);

        self.revoked
            .iter()
            .any(|entry| strip_leading_zeros(&entry.serial) == serial)
    }
}

impl PartialEq for CertificateList {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for CertificateList {}

impl Hash for CertificateList {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.der.hash(state);
    }
}
