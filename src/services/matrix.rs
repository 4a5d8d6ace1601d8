use async_trait::async_trait;
use matrix_sdk::{
    matrix_auth::{MatrixSession, MatrixSessionTokens},
    ruma::{events::room::message::RoomMessageEventContent, OwnedDeviceId, OwnedUserId, UserId},
    Client, SessionMeta,
};
use tokio::sync::OnceCell;
use tracing::{info, warn};
use url::Url;

use std::sync::Arc;

use crate::{config::MatrixConfig, error::AppError};

/// Out-of-band channel for driver nudges. Sends are best effort and may fail.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn send(&self, address: &str, message: &str) -> Result<(), AppError>;
}

/// Delivers messages as Matrix direct messages from a bot account.
#[derive(Clone)]
pub struct MatrixGateway {
    config: MatrixConfig,
    client: Arc<OnceCell<Client>>,
}

impl MatrixGateway {
    pub fn new(config: MatrixConfig) -> Self {
        Self {
            config,
            client: Arc::new(OnceCell::new()),
        }
    }

    async fn client(&self) -> Result<&Client, AppError> {
        self.client
            .get_or_try_init(|| self.prepare_client())
            .await
    }

    async fn prepare_client(&self) -> Result<Client, AppError> {
        let token = self.config.access_token.trim();
        let device_id = self.config.device_id.trim();
        if device_id.is_empty() {
            return Err(AppError::Config(
                "MATRIX_ACCESS_TOKEN is set but MATRIX_DEVICE_ID is missing".into(),
            ));
        }

        let homeserver = Url::parse(&self.config.homeserver_url)
            .map_err(|err| AppError::Config(format!("invalid MATRIX_HOMESERVER_URL: {err}")))?;

        let client = Client::builder()
            .homeserver_url(homeserver)
            .build()
            .await
            .map_err(|err| AppError::Gateway(err.to_string()))?;

        let user_id = UserId::parse(self.config.user_id.trim())
            .map_err(|_| AppError::Config("MATRIX_USER_ID is not a valid Matrix user id".into()))?;
        let device_id = OwnedDeviceId::try_from(device_id.to_string())
            .map_err(|_| AppError::Config("MATRIX_DEVICE_ID is invalid".into()))?;

        let session = MatrixSession {
            meta: SessionMeta { user_id, device_id },
            tokens: MatrixSessionTokens {
                access_token: token.to_string(),
                refresh_token: None,
            },
        };

        client
            .restore_session(session)
            .await
            .map_err(|err| AppError::Gateway(err.to_string()))?;

        info!(user = %self.config.user_id, "matrix gateway session restored");
        Ok(client)
    }
}

#[async_trait]
impl MessagingGateway for MatrixGateway {
    fn is_enabled(&self) -> bool {
        !self.config.access_token.trim().is_empty()
    }

    async fn send(&self, address: &str, message: &str) -> Result<(), AppError> {
        let trimmed = address.trim();
        let Ok(recipient) = OwnedUserId::try_from(trimmed.to_string()) else {
            warn!(contact = %trimmed, "matrix contact could not be parsed");
            return Err(AppError::Gateway(format!("invalid matrix address {trimmed:?}")));
        };
        let client = self.client().await?;
        let room = client
            .create_dm(recipient.as_ref())
            .await
            .map_err(|err| AppError::Gateway(err.to_string()))?;
        room.send(RoomMessageEventContent::text_plain(message))
            .await
            .map_err(|err| AppError::Gateway(err.to_string()))?;
        info!(contact = %trimmed, "matrix message sent");
        Ok(())
    }
}
