//! TLS with pinned peer certificates.
//!
//! Both sides authenticate by comparing the peer's leaf certificate against
//! the single configured certificate. There is no CA chain and no hostname
//! verification; the pinned certificate is the identity.

use anyhow::{Context, Error};
use rustls::{
    CertificateError, DigitallySignedStruct, DistinguishedName, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature},
    server::danger::{ClientCertVerified, ClientCertVerifier},
};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime, pem::PemObject};
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

pub fn create_tls_acceptor(
    server_cert: &[u8],
    server_key: &[u8],
    client_cert: &[u8],
) -> Result<TlsAcceptor, Error> {
    let verifier = PinnedCertVerifier::new(
        CertificateDer::from_pem_slice(client_cert).context("failed to parse client tls cert")?,
    );
    let config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(Arc::new(verifier))
        .with_single_cert(
            vec![
                CertificateDer::from_pem_slice(server_cert)
                    .context("failed to parse server tls cert")?,
            ],
            PrivateKeyDer::from_pem_slice(server_key).context("failed to parse server tls key")?,
        )
        .context("invalid server certificate or key")?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

pub fn create_tls_connector(
    client_cert: &[u8],
    client_key: &[u8],
    server_cert: &[u8],
) -> Result<TlsConnector, Error> {
    let verifier = PinnedCertVerifier::new(
        CertificateDer::from_pem_slice(server_cert).context("failed to parse server tls cert")?,
    );
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_client_auth_cert(
            vec![
                CertificateDer::from_pem_slice(client_cert)
                    .context("failed to parse client tls cert")?,
            ],
            PrivateKeyDer::from_pem_slice(client_key).context("failed to parse client tls key")?,
        )
        .context("invalid client certificate or key")?;
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Accepts exactly one certificate: the configured peer certificate.
#[derive(Debug)]
struct PinnedCertVerifier {
    peer_cert: CertificateDer<'static>,
    provider: CryptoProvider,
}

impl PinnedCertVerifier {
    fn new(peer_cert: CertificateDer<'static>) -> Self {
        Self {
            peer_cert,
            provider: rustls::crypto::ring::default_provider(),
        }
    }

    fn check_pin(&self, end_entity: &CertificateDer<'_>) -> Result<(), rustls::Error> {
        if *end_entity == self.peer_cert {
            Ok(())
        } else {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ))
        }
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.check_pin(end_entity)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
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
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
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

impl ClientCertVerifier for PinnedCertVerifier {
    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        self.check_pin(end_entity)?;
        Ok(ClientCertVerified::assertion())
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
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
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
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

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rcgen::{DistinguishedName, DnType, KeyPair, SanType, date_time_ymd};
    use std::str::FromStr;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        sync::oneshot,
    };

    pub(crate) fn gen_cert_key_pair() -> (String, String) {
        let mut params = rcgen::CertificateParams::default();
        params.not_before = date_time_ymd(2025, 1, 1);
        params.not_after = date_time_ymd(2035, 1, 1);
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CountryName, "ID");
        params
            .distinguished_name
            .push(DnType::OrganizationName, "Seledri");
        params
            .subject_alt_names
            .push(SanType::IpAddress(std::net::IpAddr::from_str("127.0.0.1").unwrap()));

        let key_pair = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        (cert.pem(), key_pair.serialize_pem())
    }

    async fn run_server(
        port_tx: oneshot::Sender<u16>,
        server_cert: &str,
        server_key: &str,
        client_cert: &str,
    ) -> Result<Vec<u8>, Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        port_tx.send(listener.local_addr()?.port()).ok();
        let (stream, _) = listener.accept().await?;
        let acceptor = create_tls_acceptor(
            server_cert.as_bytes(),
            server_key.as_bytes(),
            client_cert.as_bytes(),
        )?;
        let mut stream = acceptor.accept(stream).await?;
        let buf = &mut [0; 5];
        stream.read_exact(buf).await?;
        Ok(buf.to_vec())
    }

    async fn run_client(
        port: u16,
        client_cert: &str,
        client_key: &str,
        server_cert: &str,
    ) -> Result<(), Error> {
        let stream = TcpStream::connect(("127.0.0.1", port)).await?;
        let connector = create_tls_connector(
            client_cert.as_bytes(),
            client_key.as_bytes(),
            server_cert.as_bytes(),
        )?;
        let name = ServerName::try_from("127.0.0.1".to_owned())?;
        let mut stream = connector.connect(name, stream).await?;
        stream.write_all(b"hello").await?;
        stream.flush().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_pinned_certs_handshake() {
        let (server_cert, server_key) = gen_cert_key_pair();
        let (client_cert, client_key) = gen_cert_key_pair();

        let (port_tx, port_rx) = oneshot::channel();

        let server = {
            let server_cert = server_cert.clone();
            let client_cert = client_cert.clone();
            tokio::spawn(
                async move { run_server(port_tx, &server_cert, &server_key, &client_cert).await },
            )
        };

        let port = port_rx.await.unwrap();
        run_client(port, &client_cert, &client_key, &server_cert)
            .await
            .unwrap();

        assert_eq!(server.await.unwrap().unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_unpinned_server_cert_is_rejected() {
        let (pinned_cert, _) = gen_cert_key_pair();
        let (server_cert, server_key) = gen_cert_key_pair();
        let (client_cert, client_key) = gen_cert_key_pair();

        let (port_tx, port_rx) = oneshot::channel();

        let _server = {
            let client_cert = client_cert.clone();
            tokio::spawn(
                async move { run_server(port_tx, &server_cert, &server_key, &client_cert).await },
            )
        };

        let port = port_rx.await.unwrap();
        // client pins a certificate the server does not present
        let err = run_client(port, &client_cert, &client_key, &pinned_cert)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid peer certificate"));
    }

    #[tokio::test]
    async fn test_unpinned_client_cert_is_rejected() {
        let (server_cert, server_key) = gen_cert_key_pair();
        let (pinned_cert, _) = gen_cert_key_pair();
        let (client_cert, client_key) = gen_cert_key_pair();

        let (port_tx, port_rx) = oneshot::channel();

        let server = {
            let server_cert = server_cert.clone();
            tokio::spawn(
                async move { run_server(port_tx, &server_cert, &server_key, &pinned_cert).await },
            )
        };

        let port = port_rx.await.unwrap();
        run_client(port, &client_cert, &client_key, &server_cert)
            .await
            .ok();

        assert!(server.await.unwrap().is_err());
    }
}
