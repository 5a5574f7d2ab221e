//! Channel construction inputs.
//!
//! Credentials and channel options are opaque to the session: they are
//! carried from the caller to the [`Connector`](crate::Connector)
//! unchanged. Loading certificate material from disk belongs to the
//! workspace layer, so the TLS fields here are already-loaded PEM blobs.

/// Everything the connector needs to build a channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Target address, `host:port`.
    pub target: String,
    pub credentials: Credentials,
    pub options: ChannelOptions,
}

impl ChannelConfig {
    /// Plaintext channel to `target` with default options.
    pub fn insecure(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            credentials: Credentials::Insecure,
            options: ChannelOptions::default(),
        }
    }

    /// TLS channel to `target` with default options.
    pub fn tls(target: impl Into<String>, tls: TlsOptions) -> Self {
        Self {
            target: target.into(),
            credentials: Credentials::Tls(tls),
            options: ChannelOptions::default(),
        }
    }
}

/// Channel credential material.
#[derive(Debug, Clone)]
pub enum Credentials {
    Insecure,
    Tls(TlsOptions),
}

/// PEM blobs for a TLS channel. Any subset may be present; missing
/// fields fall back to the transport's defaults.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    pub root_certs: Option<Vec<u8>>,
    pub client_cert: Option<Vec<u8>>,
    pub client_key: Option<Vec<u8>>,
}

/// Per-channel knobs passed through to channel construction.
#[derive(Debug, Clone, Default)]
pub struct ChannelOptions {
    /// Expected server name when it differs from the target host
    /// (self-signed certificates, port forwards).
    pub tls_target_name_override: Option<String>,
}
