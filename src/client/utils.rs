use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

use crate::client::config::Config;

/// The endpoint authenticates through the `key` query parameter rather than a header.
pub fn build_request(config: &Config) -> tokio_tungstenite::tungstenite::Result<Request> {
    let base_url = config.base_url();
    let authority = base_url.find("://").map_or(0, |i| i + 3);
    // a bare `ws://host:port` needs a path before the query
    let separator = if base_url[authority..].contains('/') { "" } else { "/" };
    format!("{}{}?key={}", base_url, separator, config.api_key().expose_secret())
        .into_client_request()
}
