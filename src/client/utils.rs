use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

use crate::client::config::Config;
use crate::client::consts::BIDI_SERVICE_PATH;

pub fn build_request(config: &Config) -> tokio_tungstenite::tungstenite::Result<Request> {
    format!(
        "{}/{}?key={}",
        config.base_url(),
        BIDI_SERVICE_PATH,
        config.api_key().expose_secret()
    )
    .into_client_request()
}
