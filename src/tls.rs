//! Certificate database for networked graph elements
//!
//! The trust store comes from an explicit path or from the `CA_CERTIFICATES`
//! environment variable. Failing to build one is not fatal: the session starts
//! without it and only secure-transport elements are affected: a capture source
//! with an `https://` location is refused at build time.

use std::ffi::OsString;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use rustls_pemfile::certs;
use rustls_pki_types::CertificateDer;

use crate::assets::CA_CERTIFICATES_ENV;

#[derive(Debug, thiserror::Error)]
pub enum TrustStoreError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse certificates in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificates found in {0}")]
    Empty(PathBuf),
}

/// Anchors loaded from one PEM bundle
#[derive(Debug, Clone)]
pub struct TrustStore {
    path: PathBuf,
    certificates: Vec<CertificateDer<'static>>,
}

impl TrustStore {
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, TrustStoreError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| TrustStoreError::Open {
            path: path.clone(),
            source,
        })?;
        let mut reader = BufReader::new(file);
        let certificates = certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| TrustStoreError::Parse {
                path: path.clone(),
                source,
            })?;

        if certificates.is_empty() {
            return Err(TrustStoreError::Empty(path));
        }
        Ok(Self { path, certificates })
    }

    /// Load the configured bundle, or the one named by `CA_CERTIFICATES`
    ///
    /// Returns `None` when nothing is configured or the bundle cannot be used.
    pub fn initialize(explicit: Option<&Path>) -> Option<Self> {
        let path = resolve_path(explicit, std::env::var_os(CA_CERTIFICATES_ENV))?;
        match Self::from_pem_file(&path) {
            Ok(store) => {
                log::info!(
                    "Loaded {} trusted certificates from {}",
                    store.len(),
                    store.path.display()
                );
                Some(store)
            }
            Err(err) => {
                log::warn!("failed to create a trust store from file: {}", err);
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.certificates
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

/// An explicit path wins over the environment. Empty values count as unset.
pub fn resolve_path(explicit: Option<&Path>, env_value: Option<OsString>) -> Option<PathBuf> {
    explicit
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .or_else(|| env_value.filter(|v| !v.is_empty()).map(PathBuf::from))
}
