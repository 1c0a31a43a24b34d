//! TLS configuration loading, available with the `rustls` feature.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{anyhow, Context as _};
use tokio_rustls::rustls::server::AllowAnyAuthenticatedClient;
use tokio_rustls::rustls::{Certificate, PrivateKey, RootCertStore, ServerConfig};

use crate::config::TlsOptions;

/// Builds a rustls server configuration from PEM files. With a CA bundle
/// configured, client certificates are required and verified against it.
pub fn server_config(options: &TlsOptions) -> anyhow::Result<ServerConfig> {
    let certs = load_certs(&options.cert_file)?;
    let key = load_key(&options.key_file)?;

    let builder = ServerConfig::builder().with_safe_defaults();

    let config = match &options.ca_cert_file {
        Some(ca_file) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca_file)? {
                roots
                    .add(&cert)
                    .context("invalid certificate in client CA bundle")?;
            }
            builder
                .with_client_cert_verifier(AllowAnyAuthenticatedClient::new(roots))
                .with_single_cert(certs, key)?
        }
        None => builder
            .with_no_client_auth()
            .with_single_cert(certs, key)?,
    };

    Ok(config)
}

fn load_certs(path: &Path) -> anyhow::Result<Vec<Certificate>> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("unable to open `{}`", path.display()))?,
    );
    let certs = rustls_pemfile::certs(&mut reader)
        .with_context(|| format!("unable to parse certificates in `{}`", path.display()))?;
    if certs.is_empty() {
        return Err(anyhow!("no certificates found in `{}`", path.display()));
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

fn load_key(path: &Path) -> anyhow::Result<PrivateKey> {
    let open = || -> anyhow::Result<BufReader<File>> {
        Ok(BufReader::new(File::open(path).with_context(|| {
            format!("unable to open `{}`", path.display())
        })?))
    };

    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut open()?)?;
    if keys.is_empty() {
        keys = rustls_pemfile::rsa_private_keys(&mut open()?)?;
    }
    keys.into_iter()
        .next()
        .map(PrivateKey)
        .ok_or_else(|| anyhow!("no private key found in `{}`", path.display()))
}
