// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Socket decoration.
//!
//! Every socket-producing operation routes its result through the
//! configured [SslWrapperFactory], so callers can interpose decorators
//! (metrics, audit logging, bounded I/O) without touching the factory
//! itself.

use {
    std::io::{Read, Write},
    x509_der::X509Certificate,
};

/// A connected TLS socket as produced by the factory.
pub trait TlsSocket: Read + Write + Send {
    /// The peer's certificate chain, head first. Empty when the peer
    /// presented none.
    fn peer_chain(&self) -> &[X509Certificate];

    /// Name of the negotiated cipher suite.
    fn negotiated_cipher(&self) -> Option<&str>;

    /// Shut the connection down, TLS close-notify included where the
    /// transport still allows it.
    fn shutdown(&mut self) -> std::io::Result<()>;
}

/// Single-method indirection over socket production.
pub trait SslWrapperFactory: Send + Sync {
    fn wrap(&self, socket: Box<dyn TlsSocket>) -> Box<dyn TlsSocket>;
}

/// The default factory: hands sockets back untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoWrap;

impl SslWrapperFactory for NoWrap {
    fn wrap(&self, socket: Box<dyn TlsSocket>) -> Box<dyn TlsSocket> {
        socket
    }
}
