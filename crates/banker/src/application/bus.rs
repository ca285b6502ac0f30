use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::{ApplicationLayer, LayerError};

/// One HTTP-shaped request traveling over the in-process bus.
#[derive(Debug)]
pub struct BusRequest {
    pub verb: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: String,
    /// Dropping the sender without replying fails the request on the
    /// caller's side.
    pub reply: oneshot::Sender<BusResponse>,
}

#[derive(Clone, Debug)]
pub struct BusResponse {
    pub status: u16,
    pub body: String,
}

impl BusResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": message }).to_string(),
        }
    }
}

/// Application layer speaking request/response over a message bus.
///
/// Requests flow through an unbounded channel to whichever endpoint drains
/// it (an embedded [`MemoryMaster`], a broker bridge, a test harness);
/// replies come back on a per-request oneshot.
///
/// [`MemoryMaster`]: crate::MemoryMaster
#[derive(Clone, Debug)]
pub struct BusLayer {
    tx: mpsc::UnboundedSender<BusRequest>,
}

impl BusLayer {
    /// Creates a connected layer/endpoint pair.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BusRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ApplicationLayer for BusLayer {
    async fn request(
        &self,
        verb: &str,
        path: &str,
        query: &[(&str, String)],
        body: String,
    ) -> Result<(u16, String), LayerError> {
        let (reply, response) = oneshot::channel();
        let request = BusRequest {
            verb: verb.to_string(),
            path: path.to_string(),
            query: query
                .iter()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect(),
            body,
            reply,
        };
        self.tx.send(request).map_err(|_| LayerError::Closed)?;
        let response = response.await.map_err(|_| LayerError::Closed)?;
        Ok((response.status, response.body))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn round_trips_through_the_endpoint() {
        let (layer, mut endpoint) = BusLayer::channel();
        tokio::spawn(async move {
            while let Some(request) = endpoint.recv().await {
                assert_eq!(request.verb, "GET");
                assert_eq!(request.path, "/ping");
                let _ = request.reply.send(BusResponse::ok("pong"));
            }
        });

        let (status, body) = layer.request("GET", "/ping", &[], String::new()).await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "pong");
    }

    #[tokio::test]
    async fn dropped_reply_surfaces_as_closed() {
        let (layer, mut endpoint) = BusLayer::channel();
        tokio::spawn(async move {
            while let Some(request) = endpoint.recv().await {
                drop(request.reply);
            }
        });

        let err = layer.request("GET", "/ping", &[], String::new()).await.unwrap_err();
        assert!(matches!(err, LayerError::Closed));
    }

    #[tokio::test]
    async fn closed_endpoint_surfaces_as_closed() {
        let (layer, endpoint) = BusLayer::channel();
        drop(endpoint);
        let err = layer.request("GET", "/ping", &[], String::new()).await.unwrap_err();
        assert!(matches!(err, LayerError::Closed));
    }
}
