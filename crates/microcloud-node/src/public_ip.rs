use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;

/// Recorded in place of the external address when the lookup fails.
pub const UNAVAILABLE: &str = "Unavailable";

pub const DEFAULT_ECHO_URL: &str = "https://api.ipify.org";

/// Source of the address the fleet node is reachable at from outside.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// Never fails: lookup errors resolve to [`UNAVAILABLE`].
    async fn external_address(&self) -> String;
}

/// Asks a plain-text IP echo service. Anything but an IPv4 address is treated
/// as a failed lookup.
#[derive(Debug, Clone)]
pub struct HttpAddressResolver {
    http: reqwest::Client,
    url: String,
}

impl HttpAddressResolver {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    async fn fetch(&self) -> Result<String, reqwest::Error> {
        let body = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body.trim().to_string())
    }
}

#[async_trait]
impl AddressResolver for HttpAddressResolver {
    async fn external_address(&self) -> String {
        match self.fetch().await {
            Ok(body) => match body.parse::<Ipv4Addr>() {
                Ok(addr) => addr.to_string(),
                Err(_) => {
                    tracing::warn!(url=%self.url, body=%body, "ip echo did not return an ipv4 address");
                    UNAVAILABLE.to_string()
                }
            },
            Err(e) => {
                tracing::warn!(error=%e, url=%self.url, "external address lookup failed");
                UNAVAILABLE.to_string()
            }
        }
    }
}

/// Statically configured address, for hosts that know their own.
#[derive(Debug, Clone)]
pub struct FixedAddress(pub String);

#[async_trait]
impl AddressResolver for FixedAddress {
    async fn external_address(&self) -> String {
        self.0.clone()
    }
}
