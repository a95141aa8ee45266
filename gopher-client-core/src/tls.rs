use std::fs::File;
use std::io::{BufReader, Error, ErrorKind, Result};
use std::path::Path;
use std::sync::Arc;

use rustls::{Certificate, ClientConfig, OwnedTrustAnchor, RootCertStore};
use rustls_pemfile::certs;

pub fn load_certs(path: &Path) -> Result<Vec<Certificate>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let certs_data = certs(&mut reader)?;
    if certs_data.is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("no certificates found in {}", path.display()),
        ));
    }
    Ok(certs_data.into_iter().map(Certificate).collect())
}

fn webpki_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));
    root_store
}

/// Client config trusting the Mozilla root set, plus any PEM certificates in
/// `extra_ca_path` (for servers with a private CA or a self-signed cert).
pub fn make_client_config(extra_ca_path: Option<&Path>) -> Result<Arc<ClientConfig>> {
    let mut root_store = webpki_root_store();

    if let Some(path) = extra_ca_path {
        for cert in load_certs(path)? {
            root_store
                .add(&cert)
                .map_err(|e| Error::new(ErrorKind::InvalidData, format!("invalid CA cert: {}", e)))?;
        }
    }

    Ok(client_config(root_store))
}

/// Client config trusting only the Mozilla root set.
pub fn default_client_config() -> Arc<ClientConfig> {
    client_config(webpki_root_store())
}

fn client_config(root_store: RootCertStore) -> Arc<ClientConfig> {
    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Arc::new(config)
}
