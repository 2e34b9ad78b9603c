// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ASN.1 DER codec and X.509 parsing.
//!
//! This crate implements the DER subset needed to read and write X.509
//! certificates, certificate revocation lists, and private keys (PKCS#8
//! plus the raw RSA/DSA/EC layouts), independently of any platform TLS
//! provider's parsers.
//!
//! The layers, lowest first:
//!
//! * [der] — the tag-length-value codec. Decoding is lenient where DER
//!   readers conventionally are (non-minimal long-form lengths are
//!   accepted); encoding always emits canonical DER.
//! * [oid] — the object identifier value type and its dotted-text
//!   tokenizer.
//! * [pem] — extraction of DER frames from PEM armored (or raw DER)
//!   input.
//! * [name], [x509], [crl], [keys] — the X.509 productions built on top
//!   of the codec.

pub mod crl;
pub mod der;
pub mod keys;
pub mod name;
pub mod oid;
pub mod pem;
pub mod time;
pub mod x509;

pub use {
    crate::pem::{PemBlock, PemLabel},
    crl::CertificateList,
    der::{DerObject, Tag},
    keys::{KeyAlgorithm, PrivateKeyInfo},
    name::Name,
    oid::Oid,
    x509::{GeneralName, X509Certificate},
};

use thiserror::Error;

/// Unified error type for DER and X.509 handling.
#[derive(Debug, Error)]
pub enum X509DerError {
    #[error("malformed DER: {0}")]
    MalformedDer(String),

    #[error("bad base64 in PEM block: {0}")]
    BadBase64(::pem::PemError),

    #[error("PEM block is missing its END line")]
    UnterminatedBlock,

    #[error("invalid certificate structure: {0}")]
    CertificateInvalid(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

impl X509DerError {
    pub(crate) fn malformed(what: impl std::fmt::Display) -> Self {
        Self::MalformedDer(what.to_string())
    }
}
