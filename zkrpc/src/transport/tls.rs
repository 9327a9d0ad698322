// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! TLS material loaded from PEM files.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Errors raised while loading TLS material.
#[derive(thiserror::Error, Debug)]
pub enum TlsError {
    /// The file could not be read or parsed as PEM.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Offending file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The file holds no certificate.
    #[error("no certificate found in {0}")]
    NoCertificates(PathBuf),
    /// The file holds no private key.
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),
    /// rustls rejected the material.
    #[error("invalid TLS material: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Client-side TLS settings. Absence of a [`TlsConfig`] means a plain transport.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct TlsConfig {
    /// PEM file holding the root CA certificate(s) to trust.
    pub ca_file: PathBuf,
    /// Name to verify the server certificate against.
    /// Default is the host of the resolved endpoint.
    pub server_name: Option<String>,
}

impl TlsConfig {
    /// Trusts the root certificates in `ca_file`.
    pub fn new(ca_file: impl Into<PathBuf>) -> Self {
        Self {
            ca_file: ca_file.into(),
            server_name: None,
        }
    }
    /// Verify server certificates against `server_name` instead of the endpoint host.
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }
    /// Loads the trust roots and builds a connector.
    pub fn connector(&self) -> Result<TlsConnector, TlsError> {
        let mut roots = RootCertStore::empty();
        for cert in load_certs(&self.ca_file)? {
            roots.add(cert)?;
        }
        let config = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
        Ok(TlsConnector::from(Arc::new(config)))
    }
}

/// Server-side TLS identity: a private key and its certificate chain.
#[derive(Clone, Debug)]
pub struct ServerIdentity {
    /// PEM file holding the private key.
    pub key_file: PathBuf,
    /// PEM file holding the certificate chain, leaf first.
    pub cert_chain_file: PathBuf,
}

impl ServerIdentity {
    /// Creates an identity from its two files.
    pub fn new(key_file: impl Into<PathBuf>, cert_chain_file: impl Into<PathBuf>) -> Self {
        Self {
            key_file: key_file.into(),
            cert_chain_file: cert_chain_file.into(),
        }
    }
    /// Loads the key and chain and builds an acceptor.
    pub fn acceptor(&self) -> Result<TlsAcceptor, TlsError> {
        let certs = load_certs(&self.cert_chain_file)?;
        let key = load_key(&self.key_file)?;
        let config = ServerConfig::builder().with_no_client_auth().with_single_cert(certs, key)?;
        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path).map(BufReader::new).map_err(|source| TlsError::Read { path: path.to_owned(), source })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read { path: path.to_owned(), source })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_owned()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| TlsError::Read { path: path.to_owned(), source })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_owned()))
}
