// wss 传输的 TLS 连接器
//
// 信任来源按优先级：ca_cert_path 指定的 CA > 系统 CA；
// skip_verify 时不校验证书链与主机名，但握手签名仍按 crypto provider 校验

use super::WsSetting;
use anyhow::{Context, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// 按 WebSocket 设置构建共享的 TLS 连接器
pub(super) fn client_connector(setting: &WsSetting) -> Result<TlsConnector> {
    let roots = match &setting.ca_cert_path {
        Some(path) => custom_roots(path)?,
        None if setting.skip_verify => RootCertStore::empty(),
        None => native_roots(),
    };

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    if setting.skip_verify {
        warn!(
            "TLS certificate verification to {} is disabled, any server certificate will be accepted",
            setting.host
        );
        let verifier = TrustAnyServer {
            provider: Arc::clone(config.crypto_provider()),
        };
        config.dangerous().set_certificate_verifier(Arc::new(verifier));
    }

    Ok(TlsConnector::from(Arc::new(config)))
}

fn custom_roots(path: &Path) -> Result<RootCertStore> {
    let file =
        File::open(path).with_context(|| format!("Failed to open CA cert file: {:?}", path))?;
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut BufReader::new(file)) {
        let cert = cert.with_context(|| format!("Failed to parse CA certificates in {:?}", path))?;
        roots
            .add(cert)
            .with_context(|| format!("Failed to add CA certificate from {:?}", path))?;
    }
    Ok(roots)
}

fn native_roots() -> RootCertStore {
    let loaded = rustls_native_certs::load_native_certs();
    for e in &loaded.errors {
        debug!("Skipping native certificate source: {}", e);
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    debug!("Loaded {} native CA certificates ({} ignored)", added, ignored);
    roots
}

/// 接受任何服务器证书，只校验握手签名
#[derive(Debug)]
struct TrustAnyServer {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for TrustAnyServer {
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
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
