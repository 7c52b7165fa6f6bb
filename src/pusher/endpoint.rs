use bon::Builder;
use url::Url;

use crate::Result;
use crate::error::Error;

const DEFAULT_HOST: &str = "ws.pusherapp.com";
const PROTOCOL_VERSION: &str = "7";

/// Where the broker lives.
///
/// ```
/// use pusher_client::pusher::Endpoint;
///
/// let endpoint = Endpoint::builder().cluster("eu").encrypted(true).build();
/// assert_eq!(
///     endpoint.url("abc123")?.as_str(),
///     "wss://ws-eu.pusherapp.com/app/abc123?protocol=7"
/// );
/// # Ok::<(), pusher_client::error::Error>(())
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Endpoint {
    /// Broker host, without scheme or port
    #[builder(default = DEFAULT_HOST.to_owned(), into)]
    pub host: String,
    /// Port override; the scheme's default when absent
    pub port: Option<u16>,
    /// Cluster name, which turns `ws.<domain>` into `ws-<cluster>.<domain>`
    #[builder(into)]
    pub cluster: Option<String>,
    /// Use `wss://` instead of `ws://`
    #[builder(default)]
    pub encrypted: bool,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: None,
            cluster: None,
            encrypted: false,
        }
    }
}

impl Endpoint {
    /// WebSocket URL for the application identified by `key`.
    pub fn url(&self, key: &str) -> Result<Url> {
        if key.is_empty() {
            return Err(Error::validation("identity key must not be empty"));
        }

        let scheme = if self.encrypted { "wss" } else { "ws" };
        let host = match &self.cluster {
            Some(cluster) => {
                let domain = self.host.strip_prefix("ws.").unwrap_or(&self.host);
                format!("ws-{cluster}.{domain}")
            }
            None => self.host.clone(),
        };

        let mut url = Url::parse(&format!("{scheme}://{host}"))?;
        url.set_port(self.port)
            .map_err(|()| Error::validation(format!("cannot set port on {url}")))?;
        url.path_segments_mut()
            .map_err(|()| Error::validation(format!("{host} cannot carry a path")))?
            .pop_if_empty()
            .push("app")
            .push(key);
        url.query_pairs_mut()
            .append_pair("protocol", PROTOCOL_VERSION);

        Ok(url)
    }
}
