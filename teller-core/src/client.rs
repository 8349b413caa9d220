//! Request/response facade over the exchange engine.
//!
//! Every call becomes an [`EngineCommand`] with its own oneshot reply
//! channel. Callers wait at most `request_timeout` for the reply; a timed
//! out command is still processed by the engine, only its reply is dropped.

use crate::backends::{AddressAllocator, AllocatorError};
use crate::config::ClientConfig;
use crate::entities::DepositInfo;
use crate::events::{CommandKind, CommandSender, EngineCommand, Reply};
use crate::processors::ExchangeError;
use std::sync::Arc;
use teller_sdk::objects::RequestId;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Errors returned to client facade callers.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid destination address")]
    InvalidDestAddress,

    #[error("destination address already has {0} bound deposit addresses")]
    MaxBindReached(usize),

    #[error("address allocation failed: {0}")]
    Allocator(#[from] AllocatorError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("request timed out")]
    Timeout,

    #[error("exchange engine stopped")]
    EngineStopped,
}

/// Cloneable handle used by the HTTP layer to talk to the engine.
#[derive(Clone)]
pub struct ExchangeClient {
    commands: CommandSender,
    allocator: Arc<dyn AddressAllocator>,
    config: ClientConfig,
}

impl ExchangeClient {
    pub fn new(
        commands: CommandSender,
        allocator: Arc<dyn AddressAllocator>,
        config: ClientConfig,
    ) -> Self {
        Self {
            commands,
            allocator,
            config,
        }
    }

    /// Allocate a fresh deposit address and bind it to `dest_address`.
    pub async fn bind_address(&self, dest_address: &str) -> Result<String, ClientError> {
        self.bind_address_as(RequestId::new(), dest_address).await
    }

    /// [`Self::bind_address`] under a caller-chosen request id.
    pub async fn bind_address_as(
        &self,
        request_id: RequestId,
        dest_address: &str,
    ) -> Result<String, ClientError> {
        if dest_address.is_empty() || dest_address.trim() != dest_address {
            return Err(ClientError::InvalidDestAddress);
        }

        if let Some(max_bind) = self.config.max_bind {
            let bound = self.get_deposit_statuses_as(request_id, dest_address).await?;
            if bound.len() >= max_bind {
                warn!(%request_id, dest_address, bound = bound.len(), "Bind limit reached");
                return Err(ClientError::MaxBindReached(bound.len()));
            }
        }

        let source_address = self.allocator.next_address().await?;
        let dest = dest_address.to_owned();
        let source = source_address.clone();
        self.request(request_id, move |reply| CommandKind::Bind {
            source_address: source,
            dest_address: dest,
            reply,
        })
        .await?;

        info!(%request_id, %source_address, dest_address, "Bound deposit address");
        Ok(source_address)
    }

    /// Every binding of `dest_address`, in creation order.
    pub async fn get_deposit_statuses(
        &self,
        dest_address: &str,
    ) -> Result<Vec<DepositInfo>, ClientError> {
        self.get_deposit_statuses_as(RequestId::new(), dest_address).await
    }

    /// [`Self::get_deposit_statuses`] under a caller-chosen request id.
    pub async fn get_deposit_statuses_as(
        &self,
        request_id: RequestId,
        dest_address: &str,
    ) -> Result<Vec<DepositInfo>, ClientError> {
        let dest = dest_address.to_owned();
        self.request(request_id, move |reply| CommandKind::ListByDest {
            dest_address: dest,
            reply,
        })
        .await
    }

    /// Snapshot of the binding for `source_address`, if any.
    pub async fn get_deposit_info(
        &self,
        source_address: &str,
    ) -> Result<Option<DepositInfo>, ClientError> {
        self.get_deposit_info_as(RequestId::new(), source_address).await
    }

    /// [`Self::get_deposit_info`] under a caller-chosen request id.
    pub async fn get_deposit_info_as(
        &self,
        request_id: RequestId,
        source_address: &str,
    ) -> Result<Option<DepositInfo>, ClientError> {
        let source = source_address.to_owned();
        self.request(request_id, move |reply| CommandKind::GetDepositInfo {
            source_address: source,
            reply,
        })
        .await
    }

    async fn request<T>(
        &self,
        request_id: RequestId,
        build: impl FnOnce(Reply<T>) -> CommandKind,
    ) -> Result<T, ClientError> {
        let (reply, response) = oneshot::channel();
        let command = EngineCommand {
            request_id,
            kind: build(reply),
        };
        let name = command.kind.name();

        let exchange = async {
            self.commands
                .send(command)
                .await
                .map_err(|_| ClientError::EngineStopped)?;
            response.await.map_err(|_| ClientError::EngineStopped)
        };

        match tokio::time::timeout(self.config.request_timeout, exchange).await {
            Ok(result) => Ok(result??),
            Err(_) => {
                debug!(%request_id, command = name, "Request timed out");
                Err(ClientError::Timeout)
            }
        }
    }
}
