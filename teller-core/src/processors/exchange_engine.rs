//! ExchangeEngine processor.
//!
//! The ExchangeEngine is responsible for:
//! - Answering `EngineCommand`s (bind, status queries) from the client facade
//! - Receiving `DepositObserved` events and fixing each deposit's payout
//! - Dispatching payouts to the `PayoutSender` without blocking its loop
//! - Receiving `PayoutEvent`s and recording submission and confirmation
//! - Re-dispatching `AwaitingSend` records on startup and on a timer
//!
//! Every store write happens on the engine task, one item at a time, so
//! transitions of a single record can never interleave.

use crate::backends::{DepositScanner, PayoutSender, ScanError, SendError, Submission};
use crate::config::ExchangeConfig;
use crate::entities::deposit_info::{
    GetDepositInfo, InsertDepositInfo, ListDepositInfosByDest, ListDepositInfosByStatus,
};
use crate::entities::{DepositInfo, DepositStatus, StoreError, TransitionError};
use crate::events::{
    CommandKind, CommandReceiver, CommandSender, DepositObserved, DepositReceiver, EngineCommand,
    PayoutEvent, PayoutEventReceiver, PayoutEventSender, PayoutStatus, PayoutStatusReceiver,
    command_channel, payout_event_channel,
};
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Errors returned by engine commands.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("address already bound: {0}")]
    AddressAlreadyBound(String),

    #[error("deposit address not found: {0}")]
    NotFound(String),

    #[error("destination address already has {0} bound deposit addresses")]
    MaxBindReached(usize),

    #[error("scanner error: {0}")]
    Scanner(#[from] ScanError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("transition rejected: {0}")]
    Transition(#[from] TransitionError),
}

impl From<StoreError> for ExchangeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateAddress(address) => ExchangeError::AddressAlreadyBound(address),
            StoreError::NotFound(address) => ExchangeError::NotFound(address),
            other => ExchangeError::Store(other),
        }
    }
}

/// ExchangeEngine orchestrates deposits into payouts.
pub struct ExchangeEngine {
    db: DatabaseProcessor,
    config: ExchangeConfig,
    scanner: Arc<dyn DepositScanner>,
    sender: Arc<dyn PayoutSender>,
    command_rx: CommandReceiver,
    payout_tx: PayoutEventSender,
    payout_rx: PayoutEventReceiver,
    /// Source addresses with a payout task outstanding.
    in_flight: HashSet<String>,
    /// Submissions accepted by the sender whose store write failed, by
    /// source address. Retried on every sweep instead of resending.
    unrecorded_submissions: HashMap<String, String>,
    /// Deposits taken off the scanner stream whose store write failed, by
    /// source address. Retried on every sweep.
    unrecorded_deposits: HashMap<String, Decimal>,
    draining: bool,
}

impl ExchangeEngine {
    /// Create a new ExchangeEngine.
    ///
    /// Returns the engine and the command sender that client facades use to
    /// reach it.
    ///
    /// # Arguments
    ///
    /// * `db` - Deposit store
    /// * `config` - Exchange rate, sweep policy and queue size
    /// * `scanner` - Source-chain watcher
    /// * `sender` - Destination-chain payout submitter
    pub fn new(
        db: DatabaseProcessor,
        config: ExchangeConfig,
        scanner: Arc<dyn DepositScanner>,
        sender: Arc<dyn PayoutSender>,
    ) -> (Self, CommandSender) {
        let (command_tx, command_rx) = command_channel(config.command_buffer);
        let (payout_tx, payout_rx) = payout_event_channel();
        let engine = Self {
            db,
            config,
            scanner,
            sender,
            command_rx,
            payout_tx,
            payout_rx,
            in_flight: HashSet::new(),
            unrecorded_submissions: HashMap::new(),
            unrecorded_deposits: HashMap::new(),
            draining: false,
        };
        (engine, command_tx)
    }

    /// Run the ExchangeEngine until shutdown is signaled.
    ///
    /// Fails only if the store cannot be read during startup recovery. On
    /// shutdown, queued commands, deposits and payout events are processed
    /// before returning; payouts already submitted are left running.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), ExchangeError> {
        info!(rate = %self.config.rate, "ExchangeEngine started");

        self.recover().await?;

        let mut deposits = self.scanner.take_deposits();
        if deposits.is_none() {
            warn!("Scanner deposit stream unavailable, no deposits will be observed");
        }

        let mut sweep = self.config.sweep_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                // Check for shutdown
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("ExchangeEngine received shutdown signal");
                        break;
                    }
                }

                Some(command) = self.command_rx.recv() => {
                    self.handle_command(command).await;
                }

                Some(event) = self.payout_rx.recv() => {
                    self.handle_payout_event(event).await;
                }

                deposit = next_deposit(&mut deposits) => {
                    match deposit {
                        Some(deposit) => self.handle_deposit(deposit).await,
                        None => {
                            info!("Deposit stream closed, no further deposits expected");
                            deposits = None;
                        }
                    }
                }

                _ = next_sweep(&mut sweep) => {
                    self.sweep().await;
                }
            }
        }

        self.drain(deposits).await;

        info!("ExchangeEngine shutdown complete");
        Ok(())
    }

    /// Restore scanner registrations and confirmation tracking from the store.
    async fn recover(&mut self) -> Result<(), ExchangeError> {
        let waiting = self
            .db
            .process(ListDepositInfosByStatus {
                status: DepositStatus::AwaitingDeposit,
            })
            .await?;
        for info in &waiting {
            if let Err(e) = self.scanner.register_address(&info.source_address).await {
                warn!(
                    source_address = %info.source_address,
                    error = %e,
                    "Failed to re-register deposit address"
                );
            }
        }

        let confirming = self
            .db
            .process(ListDepositInfosByStatus {
                status: DepositStatus::AwaitingConfirm,
            })
            .await?;
        for info in &confirming {
            match &info.payout_tx_id {
                Some(tx_id) => self.spawn_tracking(info.source_address.clone(), tx_id.clone()),
                None => error!(
                    source_address = %info.source_address,
                    "AwaitingConfirm record has no payout tx id"
                ),
            }
        }

        info!(
            awaiting_deposit = waiting.len(),
            awaiting_confirm = confirming.len(),
            "ExchangeEngine recovered state"
        );

        if self.config.sweep_on_startup {
            self.try_sweep().await?;
        }
        Ok(())
    }

    /// Process queued work after shutdown was signaled.
    async fn drain(&mut self, mut deposits: Option<DepositReceiver>) {
        self.draining = true;
        self.command_rx.close();

        while let Some(command) = self.command_rx.recv().await {
            self.handle_command(command).await;
        }
        if let Some(rx) = deposits.as_mut() {
            while let Ok(deposit) = rx.try_recv() {
                self.handle_deposit(deposit).await;
            }
        }
        while let Ok(event) = self.payout_rx.try_recv() {
            self.handle_payout_event(event).await;
        }

        for (source_address, value) in &self.unrecorded_deposits {
            error!(
                %source_address,
                deposit_value = %value,
                "Deposit still unrecorded at shutdown"
            );
        }

        if !self.in_flight.is_empty() {
            info!(
                in_flight = self.in_flight.len(),
                "Leaving payouts in flight, the retry sweep picks them up after restart"
            );
        }
    }

    // -- Commands -----------------------------------------------------------

    async fn handle_command(&mut self, command: EngineCommand) {
        let EngineCommand { request_id, kind } = command;
        debug!(%request_id, command = kind.name(), "Received command");

        let delivered = match kind {
            CommandKind::Bind {
                source_address,
                dest_address,
                reply,
            } => {
                let result = self.bind(&source_address, &dest_address).await;
                if let Err(e) = &result {
                    warn!(
                        %request_id,
                        %source_address,
                        %dest_address,
                        error = %e,
                        "Bind rejected"
                    );
                }
                reply.send(result).is_ok()
            }
            CommandKind::GetDepositInfo {
                source_address,
                reply,
            } => {
                let result = self
                    .db
                    .process(GetDepositInfo { source_address })
                    .await
                    .map_err(ExchangeError::from);
                reply.send(result).is_ok()
            }
            CommandKind::ListByDest {
                dest_address,
                reply,
            } => {
                let result = self
                    .db
                    .process(ListDepositInfosByDest { dest_address })
                    .await
                    .map_err(ExchangeError::from);
                reply.send(result).is_ok()
            }
        };

        if !delivered {
            debug!(%request_id, "Caller stopped waiting, reply discarded");
        }
    }

    async fn bind(&self, source_address: &str, dest_address: &str) -> Result<(), ExchangeError> {
        let existing = self
            .db
            .process(GetDepositInfo {
                source_address: source_address.to_owned(),
            })
            .await?;
        if existing.is_some() {
            return Err(ExchangeError::AddressAlreadyBound(source_address.to_owned()));
        }

        if let Some(max_bind) = self.config.max_bind {
            let bound = self
                .db
                .process(ListDepositInfosByDest {
                    dest_address: dest_address.to_owned(),
                })
                .await?
                .len();
            if bound >= max_bind {
                return Err(ExchangeError::MaxBindReached(bound));
            }
        }

        self.scanner.register_address(source_address).await?;
        self.db
            .process(InsertDepositInfo {
                info: DepositInfo::new(source_address, dest_address),
            })
            .await?;

        info!(source_address, dest_address, "Deposit address bound");
        Ok(())
    }

    // -- Deposits -----------------------------------------------------------

    async fn handle_deposit(&mut self, deposit: DepositObserved) {
        let DepositObserved { address, value } = deposit;
        let rate = self.config.rate;

        let result = self
            .db
            .update_deposit_info(&address, |info| {
                info.record_deposit(value, rate).map_err(ExchangeError::from)
            })
            .await;

        if !matches!(result, Err(ExchangeError::Store(_))) {
            self.unrecorded_deposits.remove(&address);
        }

        match result {
            Ok(info) => {
                info!(
                    source_address = %address,
                    deposit_value = %value,
                    payout_amount = ?info.payout_amount,
                    "Deposit recorded"
                );
                self.dispatch_send(info);
            }
            Err(ExchangeError::NotFound(_)) => {
                info!(
                    source_address = %address,
                    deposit_value = %value,
                    "Deposit to unbound address dropped"
                );
            }
            Err(ExchangeError::Transition(e)) => {
                warn!(
                    source_address = %address,
                    deposit_value = %value,
                    error = %e,
                    "Deposit ignored"
                );
            }
            Err(e) => {
                error!(
                    source_address = %address,
                    deposit_value = %value,
                    error = %e,
                    "Failed to record deposit, will retry the write"
                );
                self.unrecorded_deposits.entry(address).or_insert(value);
            }
        }
    }

    // -- Payouts ------------------------------------------------------------

    /// Hand an `AwaitingSend` record to the sender on a separate task.
    fn dispatch_send(&mut self, info: DepositInfo) {
        let source_address = info.source_address;

        if info.status != DepositStatus::AwaitingSend {
            debug!(%source_address, status = ?info.status, "Not awaiting send, skipping payout");
            return;
        }
        let Some(amount) = info.payout_amount else {
            error!(%source_address, "AwaitingSend record has no payout amount");
            return;
        };
        if self.in_flight.contains(&source_address)
            || self.unrecorded_submissions.contains_key(&source_address)
        {
            debug!(%source_address, "Payout already in flight");
            return;
        }
        if self.draining {
            info!(%source_address, "Shutting down, payout deferred to next start");
            return;
        }
        if !self.sender.is_available() {
            warn!(
                %source_address,
                error = %SendError::Unavailable,
                "Payout deferred"
            );
            return;
        }

        info!(
            %source_address,
            dest_address = %info.dest_address,
            amount,
            "Dispatching payout"
        );
        self.in_flight.insert(source_address.clone());

        let sender = Arc::clone(&self.sender);
        let events = self.payout_tx.clone();
        let dest_address = info.dest_address;
        tokio::spawn(async move {
            run_payout(sender, events, source_address, dest_address, amount).await;
        });
    }

    fn spawn_tracking(&self, source_address: String, tx_id: String) {
        let sender = Arc::clone(&self.sender);
        let events = self.payout_tx.clone();
        tokio::spawn(async move {
            match sender.track(&tx_id).await {
                Ok(statuses) => forward_confirmation(events, source_address, tx_id, statuses).await,
                Err(e) => warn!(
                    %source_address,
                    %tx_id,
                    error = %e,
                    "Cannot resume confirmation tracking"
                ),
            }
        });
    }

    async fn handle_payout_event(&mut self, event: PayoutEvent) {
        match event {
            PayoutEvent::Submitted {
                source_address,
                tx_id,
            } => {
                self.in_flight.remove(&source_address);
                self.record_submission(source_address, tx_id).await;
            }
            PayoutEvent::Failed {
                source_address,
                error,
            } => {
                self.in_flight.remove(&source_address);
                match error {
                    SendError::Unavailable => warn!(
                        %source_address,
                        error = %error,
                        "Payout deferred, will retry"
                    ),
                    SendError::Rejected(_) => warn!(
                        %source_address,
                        error = %error,
                        "Payout submission failed, will retry"
                    ),
                }
            }
            PayoutEvent::Confirmed {
                source_address,
                tx_id,
            } => {
                if let Some(pending) = self.unrecorded_submissions.get(&source_address).cloned() {
                    self.record_submission(source_address.clone(), pending).await;
                }
                let result = self
                    .db
                    .update_deposit_info(&source_address, |info| {
                        info.record_confirmation(&tx_id).map_err(ExchangeError::from)
                    })
                    .await;
                match result {
                    Ok(_) => info!(%source_address, %tx_id, "Payout confirmed"),
                    Err(e) => error!(
                        %source_address,
                        %tx_id,
                        error = %e,
                        "Failed to record payout confirmation"
                    ),
                }
            }
        }
    }

    async fn record_submission(&mut self, source_address: String, tx_id: String) {
        let result = self
            .db
            .update_deposit_info(&source_address, |info| {
                info.record_submission(&tx_id).map_err(ExchangeError::from)
            })
            .await;

        match result {
            Ok(_) => {
                self.unrecorded_submissions.remove(&source_address);
                info!(%source_address, %tx_id, "Payout submitted");
            }
            Err(ExchangeError::Transition(e)) => {
                self.unrecorded_submissions.remove(&source_address);
                warn!(%source_address, %tx_id, error = %e, "Payout submission ignored");
            }
            Err(e) => {
                error!(
                    %source_address,
                    %tx_id,
                    error = %e,
                    "Failed to record payout submission, will retry the write"
                );
                self.unrecorded_submissions.insert(source_address, tx_id);
            }
        }
    }

    // -- Retry sweep --------------------------------------------------------

    async fn sweep(&mut self) {
        if let Err(e) = self.try_sweep().await {
            error!(error = %e, "Retry sweep failed");
        }
    }

    async fn try_sweep(&mut self) -> Result<(), ExchangeError> {
        let deposits: Vec<(String, Decimal)> = self.unrecorded_deposits.drain().collect();
        for (address, value) in deposits {
            self.handle_deposit(DepositObserved { address, value }).await;
        }

        let unrecorded: Vec<(String, String)> = self
            .unrecorded_submissions
            .iter()
            .map(|(source, tx)| (source.clone(), tx.clone()))
            .collect();
        for (source_address, tx_id) in unrecorded {
            self.record_submission(source_address, tx_id).await;
        }

        let records = self
            .db
            .process(ListDepositInfosByStatus {
                status: DepositStatus::AwaitingSend,
            })
            .await?;
        debug!(awaiting_send = records.len(), "Retry sweep");
        for info in records {
            self.dispatch_send(info);
        }
        Ok(())
    }
}

async fn next_deposit(deposits: &mut Option<DepositReceiver>) -> Option<DepositObserved> {
    match deposits {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_sweep(sweep: &mut Option<Interval>) {
    match sweep {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Submit one payout and report its progress back to the engine.
async fn run_payout(
    sender: Arc<dyn PayoutSender>,
    events: PayoutEventSender,
    source_address: String,
    dest_address: String,
    amount: u64,
) {
    match sender.submit(&dest_address, amount).await {
        Ok(Submission { tx_id, statuses }) => {
            let submitted = PayoutEvent::Submitted {
                source_address: source_address.clone(),
                tx_id: tx_id.clone(),
            };
            if events.send(submitted).await.is_err() {
                warn!(%source_address, %tx_id, "Engine stopped before payout submission was recorded");
                return;
            }
            forward_confirmation(events, source_address, tx_id, statuses).await;
        }
        Err(error) => {
            let failed = PayoutEvent::Failed {
                source_address,
                error,
            };
            if let Err(e) = events.send(failed).await {
                debug!(source_address = e.0.source_address(), "Engine stopped, payout failure dropped");
            }
        }
    }
}

/// Wait for confirmation of `tx_id` and report it to the engine.
async fn forward_confirmation(
    events: PayoutEventSender,
    source_address: String,
    tx_id: String,
    mut statuses: PayoutStatusReceiver,
) {
    while let Some(status) = statuses.recv().await {
        match status {
            PayoutStatus::Sent => debug!(%source_address, %tx_id, "Payout broadcast"),
            PayoutStatus::Confirmed => {
                let confirmed = PayoutEvent::Confirmed {
                    source_address,
                    tx_id,
                };
                if let Err(e) = events.send(confirmed).await {
                    debug!(
                        source_address = e.0.source_address(),
                        "Engine stopped, payout confirmation dropped"
                    );
                }
                return;
            }
        }
    }
    warn!(%source_address, %tx_id, "Payout status stream ended before confirmation");
}
