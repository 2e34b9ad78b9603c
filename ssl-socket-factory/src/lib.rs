// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SSL/TLS socket factory with coherent configuration.
//!
//! The platform TLS engine (OpenSSL) does the handshaking; this crate
//! supplies everything around it: loading key stores in several container
//! formats with a dual-password model, aggregating trust material with a
//! trust-everything sentinel, validating cipher and protocol selections
//! against what the platform actually supports, verifying hostnames after
//! connecting, and keeping the lazily built TLS context coherent with the
//! configuration that produced it.
//!
//! [SslFactory] is the entry point. Configure it with [TrustMaterial] and
//! [KeyMaterial], then produce client sockets with
//! [SslFactory::create_socket] or server sockets with
//! [SslFactory::create_server_socket].

pub mod hostname;
mod jks;
pub mod keystore;
mod pbe;
mod pkcs12;
pub mod platform;
pub mod ssl;
pub mod trust;
pub mod wrapper;

#[cfg(test)]
pub(crate) mod testutil;

pub use {
    hostname::verify_hostname,
    keystore::{KeyEntry, KeyMaterial},
    ssl::{supported_ciphers, SslFactory, SslServerSocket, KNOWN_PROTOCOLS},
    trust::{TrustChain, TrustMaterial},
    wrapper::{NoWrap, SslWrapperFactory, TlsSocket},
};

use thiserror::Error;

/// Unified error type for TLS configuration and key store handling.
#[derive(Debug, Error)]
pub enum SslError {
    #[error("X.509/DER error: {0}")]
    X509(#[from] x509_der::X509DerError),

    #[error("key store container format is not supported")]
    UnsupportedContainer,

    #[error("malformed key store: {0}")]
    MalformedContainer(String),

    #[error("key store password incorrect")]
    WrongPassword,

    #[error("key store contains no private key entry")]
    NoPrivateKey,

    #[error("invalid certificate: {0}")]
    CertificateInvalid(String),

    #[error("trust failure: {0}")]
    TrustFailure(String),

    #[error("hostname {expected} does not match peer certificate names {actual:?}")]
    HostnameMismatch {
        expected: String,
        actual: Vec<String>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("TLS platform error: {0}")]
    Platform(#[from] openssl::error::ErrorStack),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[from] openssl::ssl::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
