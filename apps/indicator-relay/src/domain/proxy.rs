//! Outbound proxy addresses.

use std::fmt;
use std::str::FromStr;

use url::Url;

/// Invalid proxy URL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyAddressError {
    /// Not a URL.
    #[error("invalid proxy url: {0}")]
    Invalid(String),
    /// Only HTTP proxies (CONNECT) are supported.
    #[error("unsupported proxy scheme: {0}")]
    UnsupportedScheme(String),
    /// URL has no host.
    #[error("proxy url has no host")]
    MissingHost,
}

/// An HTTP proxy, `http://[user:pass@]host:port`.
///
/// `Display` and `Debug` never print the credentials.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ProxyAddress {
    url: Url,
}

impl ProxyAddress {
    /// Parse a proxy URL.
    ///
    /// # Errors
    ///
    /// Returns `ProxyAddressError` for malformed URLs, non-HTTP schemes, or
    /// URLs without a host.
    pub fn parse(raw: &str) -> Result<Self, ProxyAddressError> {
        let url = Url::parse(raw.trim()).map_err(|e| ProxyAddressError::Invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProxyAddressError::UnsupportedScheme(url.scheme().to_string()));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(ProxyAddressError::MissingHost);
        }
        Ok(Self { url })
    }

    /// Proxy host.
    #[must_use]
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Proxy port, defaulting by scheme.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(80)
    }

    /// `(user, password)` if the URL carries credentials.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let user = self.url.username();
        if user.is_empty() {
            return None;
        }
        Some((user, self.url.password().unwrap_or_default()))
    }

    /// Full URL including credentials, for HTTP clients.
    #[must_use]
    pub const fn as_url(&self) -> &Url {
        &self.url
    }
}

impl FromStr for ProxyAddress {
    type Err = ProxyAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.url.scheme(), self.host(), self.port())
    }
}

impl fmt::Debug for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProxyAddress")
            .field(&self.to_string())
            .finish()
    }
}
