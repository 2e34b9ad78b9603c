// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Private key parsing.
//!
//! Keys arrive as PKCS#8 PrivateKeyInfo or in one of the raw layouts
//! (PKCS#1 RSA, SEC1 EC, OpenSSL-style DSA). Raw layouts are re-wrapped
//! into PKCS#8 so downstream consumers deal with exactly one form.

use {
    crate::{
        der::{strip_leading_zeros, DerObject},
        oid::{Oid, OID_DSA, OID_EC_PUBLIC_KEY, OID_RSA_ENCRYPTION},
        x509::{algorithm_identifier, X509Certificate},
        X509DerError as Error,
    },
    bytes::Bytes,
    std::fmt::{Debug, Formatter},
};

/// Key algorithms this library understands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyAlgorithm {
    Rsa,
    Dsa,
    Ec,
}

impl KeyAlgorithm {
    fn from_oid(oid: &Oid) -> Result<Self, Error> {
        if *oid == OID_RSA_ENCRYPTION {
            Ok(Self::Rsa)
        } else if *oid == OID_DSA {
            Ok(Self::Dsa)
        } else if *oid == OID_EC_PUBLIC_KEY {
            Ok(Self::Ec)
        } else {
            Err(Error::UnsupportedAlgorithm(oid.to_string()))
        }
    }

    fn oid(&self) -> Oid {
        let components = match self {
            Self::Rsa => OID_RSA_ENCRYPTION,
            Self::Dsa => OID_DSA,
            Self::Ec => OID_EC_PUBLIC_KEY,
        };

        Oid::new(components.to_vec()).expect("well-known OID is valid")
    }
}

/// Algorithm-specific parameters extracted for consistency checking.
#[derive(Clone, Eq, PartialEq)]
pub enum KeyParameters {
    Rsa {
        modulus: Bytes,
        public_exponent: Bytes,
    },
    Dsa {
        p: Bytes,
        q: Bytes,
        g: Bytes,
    },
    Ec {
        curve: Option<Oid>,
    },
}

impl Debug for KeyParameters {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rsa { modulus, .. } => write!(f, "Rsa({} octet modulus)", modulus.len()),
            Self::Dsa { p, .. } => write!(f, "Dsa({} octet prime)", p.len()),
            Self::Ec { curve } => write!(f, "Ec({:?})", curve),
        }
    }
}

/// A private key held as PKCS#8, with enough parsed structure to check
/// that it corresponds to a certificate's public key.
#[derive(Clone, Eq, PartialEq)]
pub struct PrivateKeyInfo {
    algorithm: KeyAlgorithm,
    parameters: KeyParameters,
    pkcs8_der: Vec<u8>,
}

impl Debug for PrivateKeyInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // The key material itself is never printed.
        f.debug_struct("PrivateKeyInfo")
            .field("algorithm", &self.algorithm)
            .field("parameters", &self.parameters)
            .finish()
    }
}

impl PrivateKeyInfo {
    /// Parse an unencrypted PKCS#8 PrivateKeyInfo.
    pub fn from_pkcs8_der(data: impl AsRef<[u8]>) -> Result<Self, Error> {
        let data = data.as_ref();
        let invalid = |what: &str| Error::malformed(what.to_string());

        let fields = DerObject::decode(data)?.as_sequence()?.to_vec();
        if fields.len() < 3 {
            return Err(invalid("PrivateKeyInfo must have three fields"));
        }

        fields[0].as_u64()?;
        let (oid, algorithm_parameters) = algorithm_identifier(&fields[1])?;
        let key_octets = fields[2].as_octet_string()?;

        let algorithm = KeyAlgorithm::from_oid(&oid)?;
        let parameters = match algorithm {
            KeyAlgorithm::Rsa => rsa_parameters(key_octets)?,
            KeyAlgorithm::Dsa => {
                let wrapped = algorithm_parameters
                    .ok_or_else(|| invalid("DSA PrivateKeyInfo without parameters"))?;
                dsa_parameters(&wrapped)?
            }
            KeyAlgorithm::Ec => KeyParameters::Ec {
                curve: algorithm_parameters.and_then(|parameter| parameter.as_oid().ok()),
            },
        };

        Ok(Self {
            algorithm,
            parameters,
            pkcs8_der: data.to_vec(),
        })
    }

    /// Wrap a raw PKCS#1 RSAPrivateKey into PKCS#8.
    pub fn from_pkcs1_der(data: impl AsRef<[u8]>) -> Result<Self, Error> {
        let data = data.as_ref();
        let parameters = rsa_parameters(data)?;

        let pkcs8 = wrap_pkcs8(KeyAlgorithm::Rsa, Some(DerObject::null()), data);

        Ok(Self {
            algorithm: KeyAlgorithm::Rsa,
            parameters,
            pkcs8_der: pkcs8,
        })
    }

    /// Wrap a SEC1 ECPrivateKey into PKCS#8.
    ///
    /// The curve is lifted out of the key's `[0]` parameter field into
    /// the PKCS#8 algorithm parameters, as PKCS#8 requires.
    pub fn from_sec1_der(data: impl AsRef<[u8]>) -> Result<Self, Error> {
        let data = data.as_ref();

        let fields = DerObject::decode(data)?.as_sequence()?.to_vec();
        if fields.len() < 2 {
            return Err(Error::malformed("ECPrivateKey must have version and key"));
        }

        let curve = fields
            .iter()
            .find(|field| field.tag() == crate::der::Tag::context(0))
            .and_then(|wrapper| wrapper.children().ok()?.first().cloned())
            .map(|inner| inner.as_oid())
            .transpose()?;

        let algorithm_parameters = curve.as_ref().map(DerObject::oid);
        let pkcs8 = wrap_pkcs8(KeyAlgorithm::Ec, algorithm_parameters, data);

        Ok(Self {
            algorithm: KeyAlgorithm::Ec,
            parameters: KeyParameters::Ec { curve },
            pkcs8_der: pkcs8,
        })
    }

    /// Wrap an OpenSSL-layout DSA private key
    /// (`SEQUENCE { 0, p, q, g, y, x }`) into PKCS#8.
    pub fn from_dsa_der(data: impl AsRef<[u8]>) -> Result<Self, Error> {
        let fields = DerObject::decode(data.as_ref())?.as_sequence()?.to_vec();
        if fields.len() != 6 {
            return Err(Error::malformed(
                "DSA private key must have six INTEGER fields",
            ));
        }

        let integer = |i: usize| -> Result<Bytes, Error> {
            Ok(Bytes::copy_from_slice(strip_leading_zeros(
                fields[i].as_integer_bytes()?,
            )))
        };

        let (p, q, g) = (integer(1)?, integer(2)?, integer(3)?);

        let domain = DerObject::sequence(vec![
            DerObject::integer_from_unsigned(&p),
            DerObject::integer_from_unsigned(&q),
            DerObject::integer_from_unsigned(&g),
        ]);
        let x = fields[5].clone();

        let pkcs8 = wrap_pkcs8(KeyAlgorithm::Dsa, Some(domain), &x.encode());

        Ok(Self {
            algorithm: KeyAlgorithm::Dsa,
            parameters: KeyParameters::Dsa { p, q, g },
            pkcs8_der: pkcs8,
        })
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn parameters(&self) -> &KeyParameters {
        &self.parameters
    }

    /// The key as an unencrypted PKCS#8 PrivateKeyInfo.
    pub fn as_pkcs8_der(&self) -> &[u8] {
        &self.pkcs8_der
    }

    /// Lightweight check that this key corresponds to the certificate's
    /// public key: RSA modulus equality, DSA domain parameter equality,
    /// or EC named-curve equality.
    pub fn matches_certificate(&self, certificate: &X509Certificate) -> Result<bool, Error> {
        Ok(match &self.parameters {
            KeyParameters::Rsa { modulus, .. } => match certificate.rsa_modulus()? {
                Some(certificate_modulus) => certificate_modulus == *modulus,
                None => false,
            },
            KeyParameters::Dsa { p, q, g } => match certificate.dsa_parameters()? {
                Some((cp, cq, cg)) => cp == *p && cq == *q && cg == *g,
                None => false,
            },
            KeyParameters::Ec { curve } => match (certificate.ec_curve(), curve) {
                (Some(certificate_curve), Some(curve)) => certificate_curve == *curve,
                // A named curve on only one side cannot match.
                (Some(_), None) | (None, Some(_)) => false,
                // Neither side names a curve: nothing cheap to compare.
                // Accept unless the certificate is a different algorithm
                // entirely.
                (None, None) => {
                    certificate.rsa_modulus()?.is_none()
                        && certificate.dsa_parameters()?.is_none()
                }
            },
        })
    }
}

fn wrap_pkcs8(
    algorithm: KeyAlgorithm,
    parameters: Option<DerObject>,
    key: &[u8],
) -> Vec<u8> {
    let mut algorithm_fields = vec![DerObject::oid(&algorithm.oid())];
    if let Some(parameters) = parameters {
        algorithm_fields.push(parameters);
    }

    DerObject::sequence(vec![
        DerObject::integer(0),
        DerObject::sequence(algorithm_fields),
        DerObject::octet_string(key.to_vec()),
    ])
    .encode()
}

fn rsa_parameters(pkcs1: &[u8]) -> Result<KeyParameters, Error> {
    // RSAPrivateKey ::= SEQUENCE { version, n, e, d, p, q, ... }
    let fields = DerObject::decode(pkcs1)?.as_sequence()?.to_vec();
    if fields.len() < 3 {
        return Err(Error::malformed("RSAPrivateKey is too short"));
    }

    Ok(KeyParameters::Rsa {
        modulus: Bytes::copy_from_slice(strip_leading_zeros(fields[1].as_integer_bytes()?)),
        public_exponent: Bytes::copy_from_slice(strip_leading_zeros(
            fields[2].as_integer_bytes()?,
        )),
    })
}

fn dsa_parameters(parameters: &DerObject) -> Result<KeyParameters, Error> {
    let fields = parameters.as_sequence()?;
    if fields.len() != 3 {
        return Err(Error::malformed("DSA parameters must be (p, q, g)"));
    }

    let integer = |i: usize| -> Result<Bytes, Error> {
        Ok(Bytes::copy_from_slice(strip_leading_zeros(
            fields[i].as_integer_bytes()?,
        )))
    };

    Ok(KeyParameters::Dsa {
        p: integer(0)?,
        q: integer(1)?,
        g: integer(2)?,
    })
}
