// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The stateful TLS configuration core.
//!
//! [SslFactory] accumulates trust material, key material, cipher and
//! protocol selections, and client-auth policy, and lazily materializes
//! a platform TLS context from which client and server sockets are
//! produced.
//!
//! Context coherence follows a dirty/rebuild discipline: any mutator
//! that affects context composition drops the built context. For the
//! first five such cycles the context is rebuilt eagerly, so early
//! configuration mistakes (a bad key password, an unknown protocol)
//! surface as typed errors from the mutator that caused them. After
//! that, rebuilding is deferred to the next socket request, amortizing
//! the cost when callers toggle settings rapidly.
//!
//! The factory is shared between threads; every mutator and every
//! accessor of context-derived state holds the per-instance lock.

use {
    crate::{
        hostname::verify_hostname,
        keystore::KeyMaterial,
        platform::{self, ClientAuth, PlatformContext, SocketOptions, SslSocket},
        trust::{TrustChain, TrustMaterial},
        wrapper::{NoWrap, SslWrapperFactory, TlsSocket},
        SslError as Error,
    },
    log::{debug, warn},
    once_cell::sync::Lazy,
    std::{
        io,
        net::{SocketAddr, TcpListener, ToSocketAddrs},
        sync::{Arc, Mutex, MutexGuard, PoisonError},
        time::Duration,
    },
    x509_der::X509Certificate,
};

/// Protocol names the configuration accepts, reverse-sorted.
///
/// What the platform can actually negotiate is a subset; the SSLv2
/// members are validated here but refused at context build.
pub static KNOWN_PROTOCOLS: &[&str] = &[
    "TLSv1.3",
    "TLSv1.2",
    "TLSv1.1",
    "TLSv1",
    "SSLv3",
    "SSLv2Hello",
    "SSLv2",
];

/// Cipher names supported by the platform's default context, frozen at
/// first access.
static SUPPORTED_CIPHERS: Lazy<Vec<String>> = Lazy::new(|| {
    match platform::default_cipher_names() {
        Ok(names) => names,
        Err(err) => {
            // With an empty catalog every cipher selection fails
            // validation, which surfaces the platform problem loudly.
            warn!("could not interrogate the platform cipher catalog: {}", err);
            Vec::new()
        }
    }
});

pub fn supported_ciphers() -> &'static [String] {
    &SUPPORTED_CIPHERS
}

const DEFAULT_SO_TIMEOUT_MS: u64 = 86_400_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3_600_000;

/// Context rebuilds stay eager while the build count is at or below
/// this.
const EAGER_REBUILD_LIMIT: u32 = 5;

struct SslState {
    trust_chain: TrustChain,
    key_material: Option<KeyMaterial>,
    enabled_ciphers: Option<Vec<String>>,
    enabled_protocols: Option<Vec<String>>,
    default_protocol: String,
    do_verify: bool,
    check_crl: bool,
    use_client_mode: Option<bool>,
    so_timeout_ms: u64,
    connect_timeout_ms: u64,
    want_client_auth: bool,
    need_client_auth: bool,
    wrapper_factory: Arc<dyn SslWrapperFactory>,
    context: Option<Arc<PlatformContext>>,
    init_count: u32,
    current_server_chain: Vec<X509Certificate>,
    // Shared with produced server sockets, which record each accepted
    // peer's chain here.
    current_client_chain: Arc<Mutex<Vec<X509Certificate>>>,
}

/// The user-facing TLS configuration and socket factory.
pub struct SslFactory {
    state: Mutex<SslState>,
}

impl SslFactory {
    /// Create a factory with default settings and build its first
    /// context.
    pub fn new() -> Result<Self, Error> {
        let factory = Self {
            state: Mutex::new(SslState {
                trust_chain: TrustChain::default(),
                key_material: None,
                enabled_ciphers: None,
                enabled_protocols: None,
                default_protocol: "TLS".to_string(),
                do_verify: true,
                check_crl: true,
                use_client_mode: None,
                so_timeout_ms: DEFAULT_SO_TIMEOUT_MS,
                connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
                want_client_auth: true,
                need_client_auth: false,
                wrapper_factory: Arc::new(NoWrap),
                context: None,
                init_count: 0,
                current_server_chain: Vec::new(),
                current_client_chain: Arc::new(Mutex::new(Vec::new())),
            }),
        };

        init(&mut factory.state())?;

        Ok(factory)
    }

    fn state(&self) -> MutexGuard<'_, SslState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Trust and key material.

    /// Replace the aggregated trust with the given material.
    pub fn set_trust_material(&self, material: TrustMaterial) -> Result<(), Error> {
        let mut state = self.state();
        let mut chain = TrustChain::default();
        chain.add(material);
        state.trust_chain = chain;

        dirty_and_reload_if_young(&mut state)
    }

    /// Union the given material into the aggregated trust.
    pub fn add_trust_material(&self, material: TrustMaterial) -> Result<(), Error> {
        let mut state = self.state();
        state.trust_chain.add(material);

        dirty_and_reload_if_young(&mut state)
    }

    pub fn set_key_material(&self, material: KeyMaterial) -> Result<(), Error> {
        let mut state = self.state();
        state.key_material = Some(material);

        dirty_and_reload_if_young(&mut state)
    }

    // Protocol and cipher selection.

    /// Set the protocol name the context is built for. "TLS" lets the
    /// platform negotiate.
    pub fn set_default_protocol(&self, protocol: &str) -> Result<(), Error> {
        let mut state = self.state();
        state.default_protocol = protocol.to_string();

        dirty_and_reload_if_young(&mut state)
    }

    /// Select the cipher suites applied to each produced socket.
    ///
    /// Every name must appear in the platform catalog. Does not rebuild
    /// the context: ciphers are per-socket state.
    pub fn set_enabled_ciphers(&self, ciphers: Vec<String>) -> Result<(), Error> {
        let unknown = ciphers
            .iter()
            .filter(|name| !supported_ciphers().contains(name))
            .cloned()
            .collect::<Vec<_>>();

        if !unknown.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "following ciphers not supported: [{}]",
                unknown.join(", ")
            )));
        }

        self.state().enabled_ciphers = Some(ciphers);
        Ok(())
    }

    pub fn get_enabled_ciphers(&self) -> Option<Vec<String>> {
        self.state().enabled_ciphers.clone()
    }

    /// Select the protocols applied to each produced socket. Every name
    /// must appear in [KNOWN_PROTOCOLS].
    pub fn set_enabled_protocols(&self, protocols: Vec<String>) -> Result<(), Error> {
        let unknown = protocols
            .iter()
            .filter(|name| !KNOWN_PROTOCOLS.contains(&name.as_str()))
            .cloned()
            .collect::<Vec<_>>();

        if !unknown.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "following protocols not supported: [{}]",
                unknown.join(", ")
            )));
        }

        self.state().enabled_protocols = Some(protocols);
        Ok(())
    }

    pub fn get_enabled_protocols(&self) -> Option<Vec<String>> {
        self.state().enabled_protocols.clone()
    }

    pub fn get_default_protocol(&self) -> String {
        self.state().default_protocol.clone()
    }

    // Scalar settings. None of these touch the context.

    pub fn set_do_verify(&self, value: bool) {
        self.state().do_verify = value;
    }

    pub fn do_verify(&self) -> bool {
        self.state().do_verify
    }

    pub fn set_check_crl(&self, value: bool) {
        self.state().check_crl = value;
    }

    pub fn check_crl(&self) -> bool {
        self.state().check_crl
    }

    /// Explicitly select client or server handshake mode for produced
    /// sockets. Until called, the platform default for the socket kind
    /// is left untouched.
    pub fn set_use_client_mode(&self, value: bool) {
        self.state().use_client_mode = Some(value);
    }

    pub fn use_client_mode(&self) -> Option<bool> {
        self.state().use_client_mode
    }

    pub fn set_so_timeout(&self, milliseconds: u64) {
        self.state().so_timeout_ms = milliseconds;
    }

    pub fn so_timeout(&self) -> u64 {
        self.state().so_timeout_ms
    }

    pub fn set_connect_timeout(&self, milliseconds: u64) {
        self.state().connect_timeout_ms = milliseconds;
    }

    pub fn connect_timeout(&self) -> u64 {
        self.state().connect_timeout_ms
    }

    pub fn set_want_client_auth(&self, value: bool) {
        self.state().want_client_auth = value;
    }

    pub fn want_client_auth(&self) -> bool {
        self.state().want_client_auth
    }

    pub fn set_need_client_auth(&self, value: bool) {
        self.state().need_client_auth = value;
    }

    pub fn need_client_auth(&self) -> bool {
        self.state().need_client_auth
    }

    pub fn set_wrapper_factory(&self, factory: Arc<dyn SslWrapperFactory>) {
        self.state().wrapper_factory = factory;
    }

    // Context-derived state.

    /// The built TLS context, building it first if a reconfiguration
    /// left it dropped.
    pub fn context(&self) -> Result<Arc<PlatformContext>, Error> {
        built_context(&mut self.state())
    }

    /// Whether a built context is currently held.
    pub fn is_built(&self) -> bool {
        self.state().context.is_some()
    }

    /// How many times a context has been built. Monotonically
    /// non-decreasing.
    pub fn init_count(&self) -> u32 {
        self.state().init_count
    }

    /// The peer chain of the most recent client connection.
    pub fn current_server_chain(&self) -> Vec<X509Certificate> {
        self.state().current_server_chain.clone()
    }

    /// The peer chain of the most recent accepted server connection.
    pub fn current_client_chain(&self) -> Vec<X509Certificate> {
        let state = self.state();
        let chain = state
            .current_client_chain
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        chain.clone()
    }

    // Socket production.

    /// Connect a TLS client socket to `host:port`.
    pub fn create_socket(&self, host: &str, port: u16) -> Result<Box<dyn TlsSocket>, Error> {
        self.create_socket_bound(host, port, None, 0)
    }

    /// Connect a TLS client socket, optionally bound to a local address.
    /// A `connect_timeout_ms` of 0 uses the factory default.
    pub fn create_socket_bound(
        &self,
        host: &str,
        port: u16,
        local: Option<SocketAddr>,
        connect_timeout_ms: u64,
    ) -> Result<Box<dyn TlsSocket>, Error> {
        let (context, options, wrapper, do_verify, check_crl, trust, timeout_ms) = {
            let mut state = self.state();
            let context = built_context(&mut state)?;
            let timeout = if connect_timeout_ms > 0 {
                connect_timeout_ms
            } else {
                state.connect_timeout_ms
            };

            (
                context,
                socket_options(&state),
                state.wrapper_factory.clone(),
                state.do_verify,
                state.check_crl,
                state.trust_chain.clone(),
                timeout,
            )
        };

        let address = resolve(host, port)?;
        let tcp = platform::open_tcp(address, local, Duration::from_millis(timeout_ms))?;
        let mut socket = platform::connect(&context, tcp, host, &options)?;

        self.state().current_server_chain = socket.peer_chain().to_vec();

        if let Err(err) = post_connect_checks(&trust, check_crl, do_verify, host, &socket) {
            // The socket must be closed before the failure propagates.
            let _ = socket.shutdown();
            return Err(err);
        }

        Ok(wrapper.wrap(Box::new(socket)))
    }

    /// Bind a TLS server socket.
    pub fn create_server_socket<A: ToSocketAddrs>(
        &self,
        address: A,
    ) -> Result<SslServerSocket, Error> {
        let mut state = self.state();
        let context = built_context(&mut state)?;

        // The platform clears `want` as a side effect of writing
        // `need = false`. False writes go first and true writes last, so
        // a true setting always survives.
        let mut client_auth = ClientAuth::default();
        if !state.want_client_auth {
            client_auth.set_want(false);
        }
        if !state.need_client_auth {
            client_auth.set_need(false);
        }
        if state.want_client_auth {
            client_auth.set_want(true);
        }
        if state.need_client_auth {
            client_auth.set_need(true);
        }

        let listener = TcpListener::bind(address)?;

        Ok(SslServerSocket {
            listener,
            context,
            options: socket_options(&state),
            client_auth,
            wrapper: state.wrapper_factory.clone(),
            trust: state.trust_chain.clone(),
            check_crl: state.check_crl,
            client_chain: state.current_client_chain.clone(),
        })
    }
}

/// A bound TLS server socket.
pub struct SslServerSocket {
    listener: TcpListener,
    context: Arc<PlatformContext>,
    options: SocketOptions,
    client_auth: ClientAuth,
    wrapper: Arc<dyn SslWrapperFactory>,
    trust: TrustChain,
    check_crl: bool,
    client_chain: Arc<Mutex<Vec<X509Certificate>>>,
}

impl SslServerSocket {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Whether accepted sockets request a client certificate.
    pub fn want_client_auth(&self) -> bool {
        self.client_auth.want()
    }

    /// Whether accepted sockets require a client certificate.
    pub fn need_client_auth(&self) -> bool {
        self.client_auth.need()
    }

    /// Accept one TLS connection.
    pub fn accept(&self) -> Result<Box<dyn TlsSocket>, Error> {
        let (tcp, peer) = self.listener.accept()?;
        debug!("accepted TCP connection from {}", peer);

        let mut socket = platform::accept(&self.context, tcp, &self.options, self.client_auth)?;

        {
            let mut chain = self
                .client_chain
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *chain = socket.peer_chain().to_vec();
        }

        if self.check_crl {
            if let Err(err) = self.trust.screen_peer_chain(socket.peer_chain()) {
                let _ = socket.shutdown();
                return Err(err);
            }
        }

        Ok(self.wrapper.wrap(Box::new(socket)))
    }
}

fn socket_options(state: &SslState) -> SocketOptions {
    SocketOptions {
        use_client_mode: state.use_client_mode,
        so_timeout_ms: state.so_timeout_ms,
        enabled_protocols: state.enabled_protocols.clone(),
        enabled_ciphers: state.enabled_ciphers.clone(),
    }
}

fn init(state: &mut SslState) -> Result<Arc<PlatformContext>, Error> {
    let context = Arc::new(platform::build_context(
        &state.trust_chain,
        state.key_material.as_ref(),
        &state.default_protocol,
    )?);

    state.context = Some(context.clone());
    state.init_count += 1;
    debug!("TLS context built (build #{})", state.init_count);

    Ok(context)
}

/// Drop the built context and, while the factory is young, rebuild it
/// eagerly so configuration errors surface right here.
fn dirty_and_reload_if_young(state: &mut SslState) -> Result<(), Error> {
    state.context = None;

    if state.init_count <= EAGER_REBUILD_LIMIT {
        init(state)?;
    }

    Ok(())
}

fn built_context(state: &mut SslState) -> Result<Arc<PlatformContext>, Error> {
    match &state.context {
        Some(context) => Ok(context.clone()),
        None => init(state),
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, Error> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::InvalidArgument(format!("cannot resolve {:?}", host)))
}

fn post_connect_checks(
    trust: &TrustChain,
    check_crl: bool,
    do_verify: bool,
    host: &str,
    socket: &SslSocket,
) -> Result<(), Error> {
    if check_crl {
        trust.screen_peer_chain(socket.peer_chain())?;
    }

    if do_verify {
        let leaf = socket.peer_chain().first().ok_or_else(|| {
            Error::TrustFailure("peer presented no certificate".to_string())
        })?;

        verify_hostname(host, leaf)?;
    }

    Ok(())
}
