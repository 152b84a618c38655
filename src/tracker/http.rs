use super::error::TrackerError;
use super::response::{
    InventoryReport, PeerListResponse, RegisterResponse, Registration, RemoveRequest,
};
use super::Tracker;
use crate::constants::{HTTP_TIMEOUT, USER_AGENT};
use crate::peer::{BlockId, PeerId};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

const REGISTER_PATH: &str = "registrar_peer";
const LIST_PATH: &str = "listar_peers";
const REMOVE_PATH: &str = "remover_peer";

/// JSON-over-HTTP tracker client.
pub struct HttpTracker {
    client: Client,
    url: String,
}

impl HttpTracker {
    pub fn new(url: &str) -> Result<Self, TrackerError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(TrackerError::InvalidUrl(url.to_string()));
        }

        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(TrackerError::Http)?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url, path)
    }
}

#[async_trait]
impl Tracker for HttpTracker {
    async fn register(&self, registration: &Registration) -> Result<RegisterResponse, TrackerError> {
        let response = self
            .client
            .post(self.endpoint(REGISTER_PATH))
            .json(registration)
            .send()
            .await?;

        let body: RegisterResponse = parse_json(response).await?;
        debug!(
            peers = body.peers.len(),
            granted = body.initial_blocks.len(),
            "registered with tracker"
        );
        Ok(body)
    }

    async fn refresh(
        &self,
        peer_id: &PeerId,
        blocks: &[BlockId],
    ) -> Result<PeerListResponse, TrackerError> {
        let response = self
            .client
            .get(self.endpoint(LIST_PATH))
            .query(&[("peer_id", peer_id.as_str())])
            .json(&InventoryReport { blocks })
            .send()
            .await?;

        parse_json(response).await
    }

    async fn deregister(&self, peer_id: &PeerId) -> Result<(), TrackerError> {
        let response = self
            .client
            .post(self.endpoint(REMOVE_PATH))
            .json(&RemoveRequest { peer_id })
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(TrackerError::UnknownPeer(peer_id.clone())),
            status => Err(TrackerError::Status(status.as_u16())),
        }
    }
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, TrackerError> {
    let status = response.status();
    if !status.is_success() {
        return Err(TrackerError::Status(status.as_u16()));
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| TrackerError::InvalidResponse(e.to_string()))
}
