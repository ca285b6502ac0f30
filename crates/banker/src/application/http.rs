use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};

use super::{ApplicationLayer, LayerError};

/// Application layer speaking plain HTTP to the master bank.
#[derive(Clone, Debug)]
pub struct HttpLayer {
    client: Client,
    base_url: String,
}

impl HttpLayer {
    pub fn new(base_url: &str) -> Result<Self, LayerError> {
        Ok(Self::with_client(Client::new(), base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ApplicationLayer for HttpLayer {
    async fn request(
        &self,
        verb: &str,
        path: &str,
        query: &[(&str, String)],
        body: String,
    ) -> Result<(u16, String), LayerError> {
        let method = Method::from_bytes(verb.as_bytes())
            .map_err(|_| LayerError::Network(format!("invalid method: {verb}")))?;

        let mut req = self.client.request(method, self.url(path));
        if !query.is_empty() {
            req = req.query(query);
        }
        if !body.is_empty() {
            req = req.header(CONTENT_TYPE, "application/json").body(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|err| LayerError::Network(err.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|err| LayerError::Network(err.to_string()))?;
        Ok((status, body))
    }
}
