use serde::Deserialize;
use std::path::PathBuf;

#[derive(Clone, Deserialize, Debug)]
pub struct ServerConfig {
    pub port: u16,

    pub tls_cert_path: PathBuf,
    pub tls_key_path: PathBuf,

    /// The pinned client certificate.
    pub client_tls_cert_path: PathBuf,

    #[cfg(target_os = "linux")]
    #[serde(default)]
    pub linux: LinuxConfig,
}

#[cfg(target_os = "linux")]
#[derive(Clone, Default, Deserialize, Debug)]
pub struct LinuxConfig {
    pub keyboard_device: Option<PathBuf>,
    pub mouse_device: Option<PathBuf>,
}
