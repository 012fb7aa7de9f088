//! Transport security shared by the PostgreSQL and SQL Server drivers.
//!
//! The mode comes from `connection.options.ssl_mode`; when that is absent the
//! `connection.tls` flag selects `verify-full` or `disable`. PostgreSQL gets a
//! rustls connector, SQL Server gets the equivalent Tiberius encryption level.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tiberius::EncryptionLevel;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::error::{RestError, Result};

/// Certificate checking applied to an encrypted connection.
///
/// Names follow libpq's `sslmode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Plain TCP.
    #[default]
    Disable,
    /// Encrypt, accept any server certificate.
    Require,
    /// Encrypt and check the chain against the web PKI roots.
    VerifyCa,
    /// Encrypt, check the chain and the host name.
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }

    pub fn is_encrypted(&self) -> bool {
        *self != SslMode::Disable
    }
}

impl FromStr for SslMode {
    type Err = RestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "disable" | "off" => Ok(SslMode::Disable),
            "require" => Ok(SslMode::Require),
            "verify-ca" | "verify_ca" => Ok(SslMode::VerifyCa),
            "verify-full" | "verify_full" => Ok(SslMode::VerifyFull),
            other => Err(RestError::Config(format!(
                "Invalid ssl_mode '{}'. Valid values: disable, require, verify-ca, verify-full",
                other
            ))),
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved TLS settings for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TlsBuilder {
    mode: SslMode,
    trust_server_cert: bool,
}

impl TlsBuilder {
    pub fn new(mode: SslMode) -> Self {
        Self {
            mode,
            trust_server_cert: false,
        }
    }

    /// Read `ssl_mode`, `tls` and `trust_server_cert` from the connection settings.
    pub fn for_connection(connection: &ConnectionConfig) -> Result<Self> {
        let mode = match connection.option("ssl_mode") {
            Some(mode) => mode.parse()?,
            None if connection.tls => SslMode::VerifyFull,
            None => SslMode::Disable,
        };
        Ok(Self {
            mode,
            trust_server_cert: connection.option_flag("trust_server_cert"),
        })
    }

    pub fn mode(&self) -> SslMode {
        self.mode
    }

    /// Whether the server certificate is accepted without verification.
    pub fn skips_verification(&self) -> bool {
        match self.mode {
            SslMode::Disable => false,
            SslMode::Require => true,
            SslMode::VerifyCa | SslMode::VerifyFull => self.trust_server_cert,
        }
    }

    /// Connector for deadpool-postgres, `None` for plain TCP.
    pub fn postgres_connector(&self) -> Result<Option<MakeRustlsConnect>> {
        if !self.mode.is_encrypted() {
            return Ok(None);
        }
        Ok(Some(MakeRustlsConnect::new(self.client_config()?)))
    }

    fn client_config(&self) -> Result<ClientConfig> {
        if !self.mode.is_encrypted() {
            return Err(RestError::Config(
                "Cannot build TLS config for ssl_mode=disable".into(),
            ));
        }

        if self.skips_verification() {
            warn!(
                "ssl_mode={} accepts any server certificate; use verify-full outside development",
                self.mode
            );
            return Ok(ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
                .with_no_client_auth());
        }

        // rustls always checks the host name, so verify-ca behaves like verify-full
        if self.mode == SslMode::VerifyCa {
            debug!("ssl_mode=verify-ca also verifies the host name");
        }
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Ok(ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth())
    }

    /// Apply the settings to a Tiberius connection config.
    pub fn apply_to_tiberius(&self, config: &mut tiberius::Config) {
        if !self.mode.is_encrypted() {
            config.encryption(EncryptionLevel::NotSupported);
            return;
        }
        if self.skips_verification() {
            config.trust_cert();
        }
        config.encryption(EncryptionLevel::Required);
    }
}

/// Verifier for `ssl_mode=require` and `trust_server_cert`.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(tls: bool, options: &[(&str, &str)]) -> ConnectionConfig {
        ConnectionConfig {
            tls,
            options: options
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_ssl_mode_from_str() {
        assert_eq!("disable".parse::<SslMode>().unwrap(), SslMode::Disable);
        assert_eq!("".parse::<SslMode>().unwrap(), SslMode::Disable);
        assert_eq!("REQUIRE".parse::<SslMode>().unwrap(), SslMode::Require);
        assert_eq!("verify_ca".parse::<SslMode>().unwrap(), SslMode::VerifyCa);
        assert_eq!("verify-full".parse::<SslMode>().unwrap(), SslMode::VerifyFull);
        assert!("prefer".parse::<SslMode>().is_err());
        assert_eq!(SslMode::VerifyCa.to_string(), "verify-ca");
    }

    #[test]
    fn test_for_connection_picks_mode() {
        let plain = TlsBuilder::for_connection(&connection(false, &[])).unwrap();
        assert_eq!(plain.mode(), SslMode::Disable);

        let flagged = TlsBuilder::for_connection(&connection(true, &[])).unwrap();
        assert_eq!(flagged.mode(), SslMode::VerifyFull);
        assert!(!flagged.skips_verification());

        // ssl_mode wins over the flag
        let explicit =
            TlsBuilder::for_connection(&connection(true, &[("ssl_mode", "require")])).unwrap();
        assert_eq!(explicit.mode(), SslMode::Require);
        assert!(explicit.skips_verification());

        assert!(TlsBuilder::for_connection(&connection(false, &[("ssl_mode", "bogus")])).is_err());
    }

    #[test]
    fn test_trust_server_cert_skips_verification() {
        let tls =
            TlsBuilder::for_connection(&connection(true, &[("trust_server_cert", "yes")])).unwrap();
        assert_eq!(tls.mode(), SslMode::VerifyFull);
        assert!(tls.skips_verification());

        // meaningless without encryption
        let plain =
            TlsBuilder::for_connection(&connection(false, &[("trust_server_cert", "true")]))
                .unwrap();
        assert!(!plain.skips_verification());
    }

    #[test]
    fn test_postgres_connector() {
        assert!(TlsBuilder::new(SslMode::Disable)
            .postgres_connector()
            .unwrap()
            .is_none());
        assert!(TlsBuilder::new(SslMode::Require)
            .postgres_connector()
            .unwrap()
            .is_some());
        assert!(TlsBuilder::new(SslMode::VerifyFull)
            .postgres_connector()
            .unwrap()
            .is_some());
    }
}
