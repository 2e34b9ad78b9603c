// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The boundary over the platform TLS engine (OpenSSL).
//!
//! Everything OpenSSL-specific lives here: building an `SslContext` from
//! trust and key material, opening and wrapping TCP connections, mapping
//! protocol names onto version bounds, applying per-socket cipher
//! selections, and the client-auth tri-state with the platform's
//! clearing side effect.

use {
    crate::{
        keystore::KeyMaterial,
        trust::TrustChain,
        wrapper::TlsSocket,
        SslError as Error,
    },
    log::debug,
    openssl::{
        pkey::PKey,
        ssl::{Ssl, SslContext, SslMethod, SslStream, SslVerifyMode, SslVersion},
        x509::X509,
    },
    socket2::{Domain, Protocol, Socket, Type},
    std::{
        io::{self, Read, Write},
        net::{Shutdown, SocketAddr, TcpStream},
        time::Duration,
    },
    x509_der::X509Certificate,
};

/// A built TLS context plus the flags per-socket setup needs.
pub struct PlatformContext {
    context: SslContext,
    trust_all: bool,
}

/// Build a TLS context from the aggregated configuration.
pub(crate) fn build_context(
    trust: &TrustChain,
    key: Option<&KeyMaterial>,
    default_protocol: &str,
) -> Result<PlatformContext, Error> {
    debug!(
        "building TLS context (protocol {:?}, {} anchors, key material: {})",
        default_protocol,
        trust.anchors().len(),
        key.is_some()
    );

    let mut builder = SslContext::builder(SslMethod::tls())?;

    let (min, max) = default_protocol_bounds(default_protocol)?;
    builder.set_min_proto_version(min)?;
    builder.set_max_proto_version(max)?;

    let trust_all = trust.contains_trust_all();
    if trust_all {
        builder.set_verify(SslVerifyMode::NONE);
    } else {
        builder.set_verify(SslVerifyMode::PEER);

        if let TrustChain::Set(set) = trust {
            if set.includes_default_ca() {
                builder.set_default_verify_paths()?;
            }
            for anchor in set.anchors() {
                builder
                    .cert_store_mut()
                    .add_cert(X509::from_der(anchor.as_der())?)?;
            }
        }
    }

    if let Some(key) = key {
        if let Some(entry) = key.entries().first() {
            let pkey = PKey::private_key_from_pkcs8(entry.key().as_pkcs8_der())?;
            builder.set_private_key(&pkey)?;

            let chain = entry.chain();
            let leaf_cert = X509::from_der(chain[0].as_der())?;
            builder.set_certificate(&leaf_cert)?;
            for cert in &chain[1..] {
                builder.add_extra_chain_cert(X509::from_der(cert.as_der())?)?;
            }

            builder.check_private_key()?;
        }
    }

    Ok(PlatformContext {
        context: builder.build(),
        trust_all,
    })
}

/// Cipher names supported by a default context of the platform engine.
pub(crate) fn default_cipher_names() -> Result<Vec<String>, Error> {
    let context = SslContext::builder(SslMethod::tls())?.build();
    let ssl = Ssl::new(&context)?;

    Ok(ssl
        .ciphers()
        .iter()
        .map(|cipher| cipher.name().to_string())
        .collect())
}

/// Per-socket settings applied before the handshake.
#[derive(Clone, Debug, Default)]
pub(crate) struct SocketOptions {
    pub use_client_mode: Option<bool>,
    pub so_timeout_ms: u64,
    pub enabled_protocols: Option<Vec<String>>,
    pub enabled_ciphers: Option<Vec<String>>,
}

/// The platform's client-auth setting for server sockets.
///
/// One tri-state backs both the "want" and "need" flags, and setting
/// `need` to false resets the whole state: it silently clears `want` as
/// a side effect. Callers that must preserve `want` have to write their
/// true settings after their false ones.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ClientAuth {
    #[default]
    None,
    Want,
    Need,
}

impl ClientAuth {
    pub fn set_want(&mut self, value: bool) {
        *self = if value { Self::Want } else { Self::None };
    }

    pub fn set_need(&mut self, value: bool) {
        *self = if value { Self::Need } else { Self::None };
    }

    /// Whether a client certificate is requested at all.
    pub fn want(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Whether a client certificate is mandatory.
    pub fn need(&self) -> bool {
        matches!(self, Self::Need)
    }

    fn verify_mode(&self) -> SslVerifyMode {
        match self {
            Self::None => SslVerifyMode::NONE,
            Self::Want => SslVerifyMode::PEER,
            Self::Need => SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT,
        }
    }
}

/// Open a TCP connection, optionally bound to a local address.
pub(crate) fn open_tcp(
    address: SocketAddr,
    local: Option<SocketAddr>,
    connect_timeout: Duration,
) -> Result<TcpStream, Error> {
    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))?;

    if let Some(local) = local {
        socket.bind(&local.into())?;
    }

    socket.connect_timeout(&address.into(), connect_timeout)?;

    Ok(socket.into())
}

/// Wrap a connected TCP stream in TLS as a client (or, when client mode
/// was explicitly disabled, as the accepting side of the handshake).
pub(crate) fn connect(
    context: &PlatformContext,
    tcp: TcpStream,
    host: &str,
    options: &SocketOptions,
) -> Result<SslSocket, Error> {
    apply_timeouts(&tcp, options)?;

    let mut ssl = Ssl::new(&context.context)?;
    ssl.set_hostname(host)?;
    apply_socket_options(&mut ssl, options)?;

    let mut stream = SslStream::new(ssl, tcp)?;
    match options.use_client_mode {
        Some(false) => stream.accept()?,
        _ => stream.connect()?,
    }

    SslSocket::new(stream)
}

/// Wrap an accepted TCP stream in TLS as a server, applying the
/// client-auth policy.
pub(crate) fn accept(
    context: &PlatformContext,
    tcp: TcpStream,
    options: &SocketOptions,
    client_auth: ClientAuth,
) -> Result<SslSocket, Error> {
    apply_timeouts(&tcp, options)?;

    let mut ssl = Ssl::new(&context.context)?;

    let mode = client_auth.verify_mode();
    if context.trust_all && mode != SslVerifyMode::NONE {
        // Request the certificate but accept whatever arrives.
        ssl.set_verify_callback(mode, |_, _| true);
    } else {
        ssl.set_verify(mode);
    }

    apply_socket_options(&mut ssl, options)?;

    let mut stream = SslStream::new(ssl, tcp)?;
    match options.use_client_mode {
        Some(true) => stream.connect()?,
        _ => stream.accept()?,
    }

    SslSocket::new(stream)
}

fn apply_timeouts(tcp: &TcpStream, options: &SocketOptions) -> Result<(), Error> {
    if options.so_timeout_ms > 0 {
        let timeout = Duration::from_millis(options.so_timeout_ms);
        tcp.set_read_timeout(Some(timeout))?;
        tcp.set_write_timeout(Some(timeout))?;
    }

    Ok(())
}

fn apply_socket_options(ssl: &mut Ssl, options: &SocketOptions) -> Result<(), Error> {
    if let Some(protocols) = &options.enabled_protocols {
        let (min, max) = protocol_range(protocols)?;
        ssl.set_min_proto_version(Some(min))?;
        ssl.set_max_proto_version(Some(max))?;
    }

    if let Some(ciphers) = &options.enabled_ciphers {
        // TLS 1.3 suite names live in their own configuration slot.
        let (modern, classic): (Vec<_>, Vec<_>) = ciphers
            .iter()
            .map(|name| name.as_str())
            .partition(|name| name.starts_with("TLS_"));

        if !classic.is_empty() {
            ssl.set_cipher_list(&classic.join(":"))?;
        }
        if !modern.is_empty() {
            ssl.set_ciphersuites(&modern.join(":"))?;
        }
    }

    Ok(())
}

/// Version bounds for the context default protocol. "TLS" leaves the
/// engine's own bounds in place; a concrete version pins both ends.
fn default_protocol_bounds(
    name: &str,
) -> Result<(Option<SslVersion>, Option<SslVersion>), Error> {
    if name == "TLS" {
        return Ok((None, None));
    }

    let version = negotiable_version(name)?;
    Ok((Some(version), Some(version)))
}

fn negotiable_version(name: &str) -> Result<SslVersion, Error> {
    match name {
        "SSLv3" => Ok(SslVersion::SSL3),
        "TLSv1" => Ok(SslVersion::TLS1),
        "TLSv1.1" => Ok(SslVersion::TLS1_1),
        "TLSv1.2" => Ok(SslVersion::TLS1_2),
        "TLSv1.3" => Ok(SslVersion::TLS1_3),
        other => Err(Error::InvalidArgument(format!(
            "protocol {:?} is not negotiable on this platform",
            other
        ))),
    }
}

fn version_rank(version: SslVersion) -> u8 {
    if version == SslVersion::SSL3 {
        0
    } else if version == SslVersion::TLS1 {
        1
    } else if version == SslVersion::TLS1_1 {
        2
    } else if version == SslVersion::TLS1_2 {
        3
    } else {
        4
    }
}

/// Collapse an enabled-protocols list into (min, max) version bounds.
///
/// "SSLv2Hello" only selects a hello format and has no version of its
/// own; it is ignored when other protocols accompany it.
fn protocol_range(protocols: &[String]) -> Result<(SslVersion, SslVersion), Error> {
    let mut versions = Vec::new();
    for name in protocols {
        if name == "SSLv2Hello" {
            continue;
        }
        versions.push(negotiable_version(name)?);
    }

    let min = versions
        .iter()
        .copied()
        .min_by_key(|version| version_rank(*version));
    let max = versions
        .iter()
        .copied()
        .max_by_key(|version| version_rank(*version));

    match (min, max) {
        (Some(min), Some(max)) => Ok((min, max)),
        _ => Err(Error::InvalidArgument(
            "no negotiable protocol in list".to_string(),
        )),
    }
}

/// A TLS socket backed by the platform engine.
pub struct SslSocket {
    stream: SslStream<TcpStream>,
    peer_chain: Vec<X509Certificate>,
    cipher: Option<String>,
}

impl SslSocket {
    fn new(stream: SslStream<TcpStream>) -> Result<Self, Error> {
        let ssl = stream.ssl();

        let mut ders: Vec<Vec<u8>> = Vec::new();
        if let Some(leaf) = ssl.peer_certificate() {
            ders.push(leaf.to_der()?);
        }
        if let Some(chain) = ssl.peer_cert_chain() {
            for cert in chain {
                let der = cert.to_der()?;
                if !ders.contains(&der) {
                    ders.push(der);
                }
            }
        }

        let peer_chain = ders
            .iter()
            .map(|der| X509Certificate::from_der(der).map_err(Error::from))
            .collect::<Result<Vec<_>, Error>>()?;

        let cipher = ssl.current_cipher().map(|cipher| cipher.name().to_string());

        Ok(Self {
            stream,
            peer_chain,
            cipher,
        })
    }
}

impl Read for SslSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for SslSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl TlsSocket for SslSocket {
    fn peer_chain(&self) -> &[X509Certificate] {
        &self.peer_chain
    }

    fn negotiated_cipher(&self) -> Option<&str> {
        self.cipher.as_deref()
    }

    fn shutdown(&mut self) -> io::Result<()> {
        // Best-effort close-notify, then the transport.
        let _ = self.stream.shutdown();

        match self.stream.get_ref().shutdown(Shutdown::Both) {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cipher_catalog_is_non_empty() {
        let names = default_cipher_names().unwrap();
        assert!(!names.is_empty());
        assert!(names.iter().all(|name| !name.is_empty()));
    }

    #[test]
    fn client_auth_true_after_false_survives() {
        // want=true, need=true
        let mut auth = ClientAuth::default();
        auth.set_want(true);
        auth.set_need(true);
        assert!(auth.want());
        assert!(auth.need());

        // want=true, need=false written falses-first
        let mut auth = ClientAuth::default();
        auth.set_need(false);
        auth.set_want(true);
        assert!(auth.want());
        assert!(!auth.need());
    }

    #[test]
    fn clearing_need_clears_want() {
        let mut auth = ClientAuth::default();
        auth.set_want(true);
        assert!(auth.want());

        // The side effect callers must order their writes around.
        auth.set_need(false);
        assert!(!auth.want());
    }

    #[test]
    fn verify_modes() {
        assert_eq!(ClientAuth::None.verify_mode(), SslVerifyMode::NONE);
        assert_eq!(ClientAuth::Want.verify_mode(), SslVerifyMode::PEER);
        assert!(ClientAuth::Need
            .verify_mode()
            .contains(SslVerifyMode::FAIL_IF_NO_PEER_CERT));
    }

    #[test]
    fn protocol_ranges() {
        let (min, max) =
            protocol_range(&["TLSv1.2".to_string(), "TLSv1.3".to_string()]).unwrap();
        assert_eq!(min, SslVersion::TLS1_2);
        assert_eq!(max, SslVersion::TLS1_3);

        let (min, max) = protocol_range(&["TLSv1.2".to_string()]).unwrap();
        assert_eq!(min, SslVersion::TLS1_2);
        assert_eq!(max, SslVersion::TLS1_2);

        // SSLv2Hello alone selects nothing.
        assert!(protocol_range(&["SSLv2Hello".to_string()]).is_err());
        assert!(protocol_range(&["SSLv2".to_string()]).is_err());
    }

    #[test]
    fn default_protocol_mapping() {
        assert_eq!(default_protocol_bounds("TLS").unwrap(), (None, None));
        assert_eq!(
            default_protocol_bounds("TLSv1.2").unwrap(),
            (Some(SslVersion::TLS1_2), Some(SslVersion::TLS1_2))
        );
        assert!(default_protocol_bounds("QUIC").is_err());
    }
}
