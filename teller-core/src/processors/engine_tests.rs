//! Scenario tests for the exchange engine.
//!
//! Each test runs a real engine on an in-memory store with scripted
//! scanner and sender doubles.

use super::{ExchangeEngine, ExchangeError};
use crate::backends::{
    AddressAllocator, DepositScanner, PayoutSender, PooledAllocator, ScanError, SendError,
    Submission,
};
use crate::client::{ClientError, ExchangeClient};
use crate::config::{ClientConfig, ExchangeConfig};
use crate::entities::deposit_info::GetDepositInfo;
use crate::entities::{DepositInfo, DepositStatus};
use crate::events::{
    CommandKind, CommandSender, DepositObserved, DepositReceiver, DepositSender, EngineCommand,
    PayoutStatus, PayoutStatusReceiver, PayoutStatusSender, deposit_channel,
    payout_status_channel,
};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use teller_sdk::objects::RequestId;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

// -- Doubles ----------------------------------------------------------------

struct MockScanner {
    deposits: Mutex<Option<DepositReceiver>>,
    registered: Mutex<Vec<String>>,
}

impl MockScanner {
    fn new() -> (Arc<Self>, DepositSender) {
        let (tx, rx) = deposit_channel();
        let scanner = Arc::new(Self {
            deposits: Mutex::new(Some(rx)),
            registered: Mutex::new(Vec::new()),
        });
        (scanner, tx)
    }

    fn registered(&self) -> Vec<String> {
        self.registered.lock().unwrap().clone()
    }
}

#[async_trait]
impl DepositScanner for MockScanner {
    async fn register_address(&self, address: &str) -> Result<(), ScanError> {
        self.registered.lock().unwrap().push(address.to_owned());
        Ok(())
    }

    fn take_deposits(&self) -> Option<DepositReceiver> {
        self.deposits.lock().unwrap().take()
    }
}

struct MockSender {
    available: AtomicBool,
    /// Number of upcoming submissions to reject.
    fail_next: AtomicUsize,
    /// Confirm each payout right after submission.
    auto_confirm: bool,
    attempts: AtomicUsize,
    sent: Mutex<Vec<(String, u64)>>,
    tracked: Mutex<Vec<String>>,
    /// Status senders of unconfirmed payouts, kept so their streams stay open.
    pending: Mutex<Vec<PayoutStatusSender>>,
}

impl MockSender {
    fn build(available: bool, fail_next: usize, auto_confirm: bool) -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(available),
            fail_next: AtomicUsize::new(fail_next),
            auto_confirm,
            attempts: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            tracked: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
        })
    }

    fn new() -> Arc<Self> {
        Self::build(true, 0, true)
    }

    fn unavailable() -> Arc<Self> {
        Self::build(false, 0, true)
    }

    fn failing(times: usize) -> Arc<Self> {
        Self::build(true, times, true)
    }

    fn never_confirming() -> Arc<Self> {
        Self::build(true, 0, false)
    }

    fn sent(&self) -> Vec<(String, u64)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PayoutSender for MockSender {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn submit(&self, dest_address: &str, amount: u64) -> Result<Submission, SendError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SendError::Rejected("insufficient funds".to_owned()));
        }

        let tx_id = {
            let mut sent = self.sent.lock().unwrap();
            sent.push((dest_address.to_owned(), amount));
            format!("tx{}", sent.len())
        };

        let (tx, statuses) = payout_status_channel();
        tx.send(PayoutStatus::Sent).await.unwrap();
        if self.auto_confirm {
            tx.send(PayoutStatus::Confirmed).await.unwrap();
        } else {
            self.pending.lock().unwrap().push(tx);
        }
        Ok(Submission { tx_id, statuses })
    }

    async fn track(&self, tx_id: &str) -> Result<PayoutStatusReceiver, SendError> {
        self.tracked.lock().unwrap().push(tx_id.to_owned());
        let (tx, statuses) = payout_status_channel();
        tx.send(PayoutStatus::Confirmed).await.unwrap();
        Ok(statuses)
    }
}

// -- Harness ----------------------------------------------------------------

struct Running {
    commands: CommandSender,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<Result<(), ExchangeError>>,
}

impl Running {
    async fn stop(self) {
        self.shutdown_tx.send(true).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

fn config() -> ExchangeConfig {
    ExchangeConfig {
        rate: Decimal::from(500),
        sweep_interval: None,
        sweep_on_startup: true,
        command_buffer: 16,
        max_bind: None,
    }
}

fn start(
    db: &DatabaseProcessor,
    config: ExchangeConfig,
    scanner: Arc<MockScanner>,
    sender: Arc<MockSender>,
) -> Running {
    let (engine, commands) = ExchangeEngine::new(db.clone(), config, scanner, sender);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(engine.run(shutdown_rx));
    Running {
        commands,
        shutdown_tx,
        handle,
    }
}

async fn client(
    db: &DatabaseProcessor,
    commands: &CommandSender,
    pool: &[&str],
    max_bind: Option<usize>,
) -> ExchangeClient {
    let addresses = pool.iter().map(|a| a.to_string()).collect();
    let allocator: Arc<dyn AddressAllocator> =
        Arc::new(PooledAllocator::new(db.clone(), addresses).await.unwrap());
    ExchangeClient::new(
        commands.clone(),
        allocator,
        ClientConfig {
            request_timeout: Duration::from_secs(5),
            max_bind,
        },
    )
}

fn deposit(address: &str, value: &str) -> DepositObserved {
    DepositObserved {
        address: address.to_owned(),
        value: Decimal::from_str(value).unwrap(),
    }
}

async fn get(db: &DatabaseProcessor, source: &str) -> Option<DepositInfo> {
    db.process(GetDepositInfo {
        source_address: source.to_owned(),
    })
    .await
    .unwrap()
}

async fn wait_for_status(db: &DatabaseProcessor, source: &str, status: DepositStatus) -> DepositInfo {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(info) = get(db, source).await {
                if info.status == status {
                    return info;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{source} never reached {status:?}"))
}

async fn bind_command(
    commands: &CommandSender,
    source: &str,
    dest: &str,
) -> oneshot::Receiver<Result<(), ExchangeError>> {
    let (reply, response) = oneshot::channel();
    commands
        .send(EngineCommand {
            request_id: RequestId::new(),
            kind: CommandKind::Bind {
                source_address: source.to_owned(),
                dest_address: dest.to_owned(),
                reply,
            },
        })
        .await
        .unwrap();
    response
}

// -- Scenarios --------------------------------------------------------------

#[tokio::test]
async fn test_happy_path() {
    let db = DatabaseProcessor::open_in_memory().await.unwrap();
    let (scanner, deposits) = MockScanner::new();
    let sender = MockSender::new();
    let running = start(&db, config(), scanner.clone(), sender.clone());
    let client = client(&db, &running.commands, &["B1", "B2"], None).await;

    let source = client.bind_address("S1").await.unwrap();
    assert_eq!(source, "B1");
    assert_eq!(scanner.registered(), vec!["B1"]);

    let bound = client.get_deposit_info("B1").await.unwrap().unwrap();
    assert_eq!(bound.status, DepositStatus::AwaitingDeposit);
    assert_eq!(bound.dest_address, "S1");

    deposits.send(deposit("B1", "0.002")).await.unwrap();
    let info = wait_for_status(&db, "B1", DepositStatus::Done).await;

    assert_eq!(info.deposit_value, Some(Decimal::from_str("0.002").unwrap()));
    assert_eq!(info.payout_amount, Some(1));
    assert_eq!(info.payout_tx_id.as_deref(), Some("tx1"));
    assert_eq!(sender.sent(), vec![("S1".to_owned(), 1)]);

    let statuses = client.get_deposit_statuses("S1").await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].status, DepositStatus::Done);

    running.stop().await;
}

#[tokio::test]
async fn test_unbound_deposit_is_dropped() {
    let db = DatabaseProcessor::open_in_memory().await.unwrap();
    let (scanner, deposits) = MockScanner::new();
    let sender = MockSender::new();
    let running = start(&db, config(), scanner, sender.clone());
    let client = client(&db, &running.commands, &["B1"], None).await;

    deposits.send(deposit("B9", "0.01")).await.unwrap();
    client.bind_address("S1").await.unwrap();
    deposits.send(deposit("B1", "0.004")).await.unwrap();
    wait_for_status(&db, "B1", DepositStatus::Done).await;

    assert!(client.get_deposit_info("B9").await.unwrap().is_none());
    assert_eq!(sender.sent(), vec![("S1".to_owned(), 2)]);

    running.stop().await;
}

#[tokio::test]
async fn test_send_failure_is_retried_by_sweep() {
    let db = DatabaseProcessor::open_in_memory().await.unwrap();
    let (scanner, deposits) = MockScanner::new();
    let sender = MockSender::failing(1);
    let config = ExchangeConfig {
        sweep_interval: Some(Duration::from_millis(50)),
        ..config()
    };
    let running = start(&db, config, scanner, sender.clone());
    let client = client(&db, &running.commands, &["B1"], None).await;

    client.bind_address("S1").await.unwrap();
    deposits.send(deposit("B1", "0.002")).await.unwrap();

    let info = wait_for_status(&db, "B1", DepositStatus::Done).await;
    assert_eq!(info.payout_tx_id.as_deref(), Some("tx1"));
    assert_eq!(sender.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(sender.sent().len(), 1);

    running.stop().await;
}

#[tokio::test]
async fn test_unavailable_sender_keeps_awaiting_send() {
    let db = DatabaseProcessor::open_in_memory().await.unwrap();
    let (scanner, deposits) = MockScanner::new();
    let sender = MockSender::unavailable();
    let running = start(&db, config(), scanner, sender.clone());
    let client = client(&db, &running.commands, &["B1"], None).await;

    client.bind_address("S1").await.unwrap();
    deposits.send(deposit("B1", "0.002")).await.unwrap();

    let info = wait_for_status(&db, "B1", DepositStatus::AwaitingSend).await;
    assert_eq!(info.payout_amount, Some(1));
    assert_eq!(sender.attempts.load(Ordering::SeqCst), 0);

    running.stop().await;
}

#[tokio::test]
async fn test_duplicate_bind_rejected() {
    let db = DatabaseProcessor::open_in_memory().await.unwrap();
    let (scanner, _deposits) = MockScanner::new();
    let running = start(&db, config(), scanner.clone(), MockSender::new());

    let first = bind_command(&running.commands, "B3", "S1").await;
    assert!(first.await.unwrap().is_ok());

    let second = bind_command(&running.commands, "B3", "S2").await;
    assert!(matches!(
        second.await.unwrap(),
        Err(ExchangeError::AddressAlreadyBound(a)) if a == "B3"
    ));

    let info = get(&db, "B3").await.unwrap();
    assert_eq!(info.dest_address, "S1");
    assert_eq!(scanner.registered(), vec!["B3"]);

    running.stop().await;
}

#[tokio::test]
async fn test_replayed_deposit_credits_once() {
    let db = DatabaseProcessor::open_in_memory().await.unwrap();
    let (scanner, deposits) = MockScanner::new();
    let sender = MockSender::new();
    let running = start(&db, config(), scanner, sender.clone());
    let client = client(&db, &running.commands, &["B1", "B2"], None).await;

    client.bind_address("S1").await.unwrap();
    client.bind_address("S2").await.unwrap();

    deposits.send(deposit("B1", "0.002")).await.unwrap();
    let first = wait_for_status(&db, "B1", DepositStatus::Done).await;

    // Replay with a different value, then sync on a second address.
    deposits.send(deposit("B1", "0.5")).await.unwrap();
    deposits.send(deposit("B2", "0.01")).await.unwrap();
    wait_for_status(&db, "B2", DepositStatus::Done).await;

    let replayed = get(&db, "B1").await.unwrap();
    assert_eq!(replayed.deposit_value, first.deposit_value);
    assert_eq!(replayed.payout_amount, Some(1));
    assert_eq!(replayed.status, DepositStatus::Done);
    assert_eq!(
        sender.sent(),
        vec![("S1".to_owned(), 1), ("S2".to_owned(), 5)]
    );

    running.stop().await;
}

#[tokio::test]
async fn test_closed_scanner_stream_keeps_serving() {
    let db = DatabaseProcessor::open_in_memory().await.unwrap();
    let (scanner, deposits) = MockScanner::new();
    let running = start(&db, config(), scanner, MockSender::new());
    let client = client(&db, &running.commands, &["B1"], None).await;

    drop(deposits);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(client.bind_address("S1").await.unwrap(), "B1");
    let info = client.get_deposit_info("B1").await.unwrap().unwrap();
    assert_eq!(info.status, DepositStatus::AwaitingDeposit);

    running.stop().await;
}

#[tokio::test]
async fn test_restart_resends_awaiting_send() {
    let db = DatabaseProcessor::open_in_memory().await.unwrap();

    let (scanner, deposits) = MockScanner::new();
    let running = start(&db, config(), scanner, MockSender::unavailable());
    let client = client(&db, &running.commands, &["B1", "B2"], None).await;
    client.bind_address("S1").await.unwrap();
    client.bind_address("S2").await.unwrap();
    deposits.send(deposit("B1", "0.002")).await.unwrap();
    wait_for_status(&db, "B1", DepositStatus::AwaitingSend).await;
    running.stop().await;

    let (scanner, _deposits) = MockScanner::new();
    let sender = MockSender::new();
    let running = start(&db, config(), scanner.clone(), sender.clone());

    wait_for_status(&db, "B1", DepositStatus::Done).await;
    assert_eq!(sender.sent(), vec![("S1".to_owned(), 1)]);
    assert_eq!(scanner.registered(), vec!["B2"]);

    running.stop().await;
}

#[tokio::test]
async fn test_restart_resumes_confirmation_tracking() {
    let db = DatabaseProcessor::open_in_memory().await.unwrap();

    let (scanner, deposits) = MockScanner::new();
    let first_sender = MockSender::never_confirming();
    let running = start(&db, config(), scanner, first_sender.clone());
    let client = client(&db, &running.commands, &["B1"], None).await;
    client.bind_address("S1").await.unwrap();
    deposits.send(deposit("B1", "0.002")).await.unwrap();
    wait_for_status(&db, "B1", DepositStatus::AwaitingConfirm).await;
    running.stop().await;

    let (scanner, _deposits) = MockScanner::new();
    let second_sender = MockSender::new();
    let running = start(&db, config(), scanner, second_sender.clone());

    let info = wait_for_status(&db, "B1", DepositStatus::Done).await;
    assert_eq!(info.payout_tx_id.as_deref(), Some("tx1"));
    assert_eq!(first_sender.sent().len(), 1);
    assert!(second_sender.sent().is_empty());
    assert_eq!(*second_sender.tracked.lock().unwrap(), vec!["tx1"]);

    running.stop().await;
}

#[tokio::test]
async fn test_abandoned_command_still_completes() {
    let db = DatabaseProcessor::open_in_memory().await.unwrap();
    let (scanner, _deposits) = MockScanner::new();
    let running = start(&db, config(), scanner, MockSender::new());

    let response = bind_command(&running.commands, "B1", "S1").await;
    drop(response);

    // A later command is answered only after the abandoned one ran.
    let (reply, info) = oneshot::channel();
    running
        .commands
        .send(EngineCommand {
            request_id: RequestId::new(),
            kind: CommandKind::GetDepositInfo {
                source_address: "B1".to_owned(),
                reply,
            },
        })
        .await
        .unwrap();
    let info = info.await.unwrap().unwrap().unwrap();
    assert_eq!(info.dest_address, "S1");

    running.stop().await;
}

#[tokio::test]
async fn test_queued_commands_drain_on_shutdown() {
    let db = DatabaseProcessor::open_in_memory().await.unwrap();
    let (scanner, _deposits) = MockScanner::new();
    let (engine, commands) = ExchangeEngine::new(db.clone(), config(), scanner, MockSender::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let response = bind_command(&commands, "B1", "S1").await;
    shutdown_tx.send(true).unwrap();
    engine.run(shutdown_rx).await.unwrap();

    assert!(response.await.unwrap().is_ok());
    assert!(get(&db, "B1").await.is_some());
    assert!(bind_command_rejected(&commands).await);
}

async fn bind_command_rejected(commands: &CommandSender) -> bool {
    let (reply, _response) = oneshot::channel();
    commands
        .send(EngineCommand {
            request_id: RequestId::new(),
            kind: CommandKind::Bind {
                source_address: "B2".to_owned(),
                dest_address: "S1".to_owned(),
                reply,
            },
        })
        .await
        .is_err()
}

#[tokio::test]
async fn test_max_bind_enforced() {
    let db = DatabaseProcessor::open_in_memory().await.unwrap();
    let (scanner, _deposits) = MockScanner::new();
    let running = start(&db, config(), scanner, MockSender::new());
    let client = client(&db, &running.commands, &["B1", "B2", "B3"], Some(2)).await;

    client.bind_address("S1").await.unwrap();
    client.bind_address("S1").await.unwrap();
    assert!(matches!(
        client.bind_address("S1").await,
        Err(ClientError::MaxBindReached(2))
    ));
    assert_eq!(client.bind_address("S2").await.unwrap(), "B3");

    running.stop().await;
}

#[tokio::test]
async fn test_engine_stopped_after_shutdown() {
    let db = DatabaseProcessor::open_in_memory().await.unwrap();
    let (scanner, _deposits) = MockScanner::new();
    let running = start(&db, config(), scanner, MockSender::new());
    let client = client(&db, &running.commands, &["B1"], None).await;

    running.stop().await;

    assert!(matches!(
        client.get_deposit_statuses("S1").await,
        Err(ClientError::EngineStopped)
    ));
}

#[tokio::test]
async fn test_concurrent_binds_respect_max_bind() {
    let db = DatabaseProcessor::open_in_memory().await.unwrap();
    let (scanner, _deposits) = MockScanner::new();
    let config = ExchangeConfig {
        max_bind: Some(1),
        ..config()
    };
    let running = start(&db, config, scanner, MockSender::new());
    let client = client(&db, &running.commands, &["B1", "B2", "B3"], Some(1)).await;

    let (a, b, c) = tokio::join!(
        client.bind_address("S1"),
        client.bind_address("S1"),
        client.bind_address("S1"),
    );

    let results = [a, b, c];
    let bound = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(bound, 1);
    for result in &results {
        if let Err(e) = result {
            assert!(matches!(
                e,
                ClientError::MaxBindReached(1)
                    | ClientError::Exchange(ExchangeError::MaxBindReached(1))
            ));
        }
    }
    assert_eq!(client.get_deposit_statuses("S1").await.unwrap().len(), 1);

    running.stop().await;
}

#[tokio::test]
async fn test_failed_deposit_write_is_retried() {
    let db = DatabaseProcessor::open_in_memory().await.unwrap();
    let (scanner, deposits) = MockScanner::new();
    let sender = MockSender::new();
    let config = ExchangeConfig {
        sweep_interval: Some(Duration::from_millis(50)),
        ..config()
    };
    let running = start(&db, config, scanner, sender.clone());
    let client = client(&db, &running.commands, &["B1"], None).await;
    client.bind_address("S1").await.unwrap();

    sqlx::query(
        "CREATE TRIGGER reject_updates BEFORE UPDATE ON deposit_infos \
         BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END",
    )
    .execute(&db.pool)
    .await
    .unwrap();

    deposits.send(deposit("B1", "0.002")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let pending = get(&db, "B1").await.unwrap();
    assert_eq!(pending.status, DepositStatus::AwaitingDeposit);
    assert!(sender.sent().is_empty());

    sqlx::query("DROP TRIGGER reject_updates")
        .execute(&db.pool)
        .await
        .unwrap();

    let info = wait_for_status(&db, "B1", DepositStatus::Done).await;
    assert_eq!(info.payout_amount, Some(1));
    assert_eq!(sender.sent(), vec![("S1".to_owned(), 1)]);

    running.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deposits_progress_under_command_load() {
    let db = DatabaseProcessor::open_in_memory().await.unwrap();
    let (scanner, deposits) = MockScanner::new();
    let sender = MockSender::new();
    let running = start(&db, config(), scanner, sender.clone());
    let client = client(&db, &running.commands, &["B1"], None).await;
    client.bind_address("S1").await.unwrap();

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut readers = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        let stop_rx = stop_rx.clone();
        readers.push(tokio::spawn(async move {
            while !*stop_rx.borrow() {
                let _ = client.get_deposit_statuses("S1").await;
            }
        }));
    }

    deposits.send(deposit("B1", "0.002")).await.unwrap();
    let info = wait_for_status(&db, "B1", DepositStatus::Done).await;
    assert_eq!(info.payout_amount, Some(1));

    stop_tx.send(true).unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
    running.stop().await;
}
