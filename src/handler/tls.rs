//! TLS verification settings shared by encrypted-scheme handlers.

use std::fs;
use std::path::Path;

use crate::config::NetConfig;
use crate::error::RequestError;

/// Verification context built once per handler from the configuration.
///
/// `legacy_connect` widens what the backend will negotiate (older protocol
/// versions, legacy renegotiation where the backend supports it), narrowing
/// security only when the user explicitly asked for it.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    /// Verify server certificates.
    pub verify: bool,
    /// Relax negotiation for legacy servers.
    pub legacy_connect: bool,
    client_pem: Option<Vec<u8>>,
}

impl TlsSettings {
    /// Builds settings from the configuration, loading the client
    /// certificate from disk when one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::ClientCertificate`] when the certificate or
    /// key cannot be read, or when a key password is configured (the native
    /// TLS backend cannot decrypt password-protected PEM keys). Fatal
    /// configuration errors, never retried.
    pub fn from_config(config: &NetConfig) -> Result<Self, RequestError> {
        let client_pem = match &config.client_certificate {
            Some(cert_path) => {
                if config.client_certificate_password.is_some() {
                    return Err(RequestError::ClientCertificate {
                        reason: "password-protected client certificate keys are not supported \
                                 by this backend"
                            .to_string(),
                    });
                }
                let mut pem = read_pem(cert_path)?;
                if let Some(key_path) = &config.client_certificate_key {
                    pem.push(b'\n');
                    pem.extend(read_pem(key_path)?);
                }
                Some(pem)
            }
            None => None,
        };
        Ok(Self {
            verify: !config.nocheckcertificate,
            legacy_connect: config.legacyserverconnect,
            client_pem,
        })
    }

    /// The client identity to present, when one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::ClientCertificate`] when the PEM contents do
    /// not form a usable certificate/key pair.
    pub(crate) fn identity(&self) -> Result<Option<reqwest::Identity>, RequestError> {
        match &self.client_pem {
            Some(pem) => reqwest::Identity::from_pkcs8_pem(pem, pem)
                .map(Some)
                .map_err(|error| RequestError::ClientCertificate {
                    reason: error.to_string(),
                }),
            None => Ok(None),
        }
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, RequestError> {
    fs::read(path).map_err(|error| RequestError::ClientCertificate {
        reason: format!("{}: {error}", path.display()),
    })
}
