use serde::Deserialize;
use std::path::PathBuf;

#[derive(Clone, Deserialize, Debug)]
pub struct ClientConfig {
    /// `host:port` of the server.
    pub server_addr: String,

    pub tls_cert_path: PathBuf,
    pub tls_key_path: PathBuf,

    /// The pinned server certificate.
    pub server_tls_cert_path: PathBuf,
}
