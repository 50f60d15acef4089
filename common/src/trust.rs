use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrustStoreError {
    #[error("no CA certificates found in bundle")]
    Empty,
    #[error("malformed PEM bundle: {0}")]
    Malformed(#[from] io::Error),
}

/// Decodes every certificate block of a PEM bundle to DER. Other PEM
/// sections and text between blocks are skipped.
pub fn parse_pem_bundle(bundle: &str) -> Result<Vec<Vec<u8>>, TrustStoreError> {
    let certificates = rustls_pemfile::certs(&mut bundle.as_bytes())?;
    if certificates.is_empty() {
        return Err(TrustStoreError::Empty);
    }
    Ok(certificates)
}
