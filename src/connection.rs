//! Internal module for establishing TLS connections to POP3 servers.

use crate::error::{Error, Result};
use rustls::ClientConfig;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument};
use webpki_roots::TLS_SERVER_ROOTS;

/// A TLS stream over TCP, used for POP3 communication.
pub type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

/// Establishes an implicit-TLS connection to a POP3 server.
#[instrument(
    name = "connection::establish_tls",
    skip_all,
    fields(host = %host, target_addr = %target_addr)
)]
pub(crate) async fn establish_tls_connection(host: &str, target_addr: &str) -> Result<TlsStream> {
    let connector = create_tls_connector();
    let server_name = parse_server_name(host)?;
    let tcp_stream = connect_direct(target_addr).await?;

    debug!("Performing TLS handshake");

    connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|source| Error::TlsConnect {
            target: target_addr.to_string(),
            source,
        })
}

/// Creates a TLS connector trusting the bundled webpki roots.
fn create_tls_connector() -> TlsConnector {
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    let tls_config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(tls_config))
}

/// Parses server name for TLS SNI.
fn parse_server_name(host: &str) -> Result<rustls::ServerName> {
    rustls::ServerName::try_from(host).map_err(|source| Error::InvalidDnsName {
        host: host.to_string(),
        source,
    })
}

#[instrument(name = "connection::direct", skip_all)]
async fn connect_direct(target_addr: &str) -> Result<TcpStream> {
    debug!(target = %target_addr, "Establishing TCP connection");

    TcpStream::connect(target_addr)
        .await
        .map_err(|source| Error::TcpConnect {
            target: target_addr.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_server_name() {
        assert!(parse_server_name("pop.gmail.com").is_ok());
    }

    #[test]
    fn test_parse_invalid_server_name() {
        assert!(parse_server_name("").is_err());
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = establish_tls_connection("localhost", &addr.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TcpConnect { .. }));
        assert!(err.desyncs_session());
    }
}
