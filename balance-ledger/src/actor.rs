//! Actor-based concurrency for the ledger
//!
//! This module implements the single-writer pattern using Tokio actors:
//! - One task owns the [`Ledger`] and applies events strictly in arrival order
//! - Async message passing with backpressure (bounded mailbox)
//! - After a fatal error the actor halts and refuses further events
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │          Event source (indexer, JSONL replay)         │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │      Ledger::handle() → Repository (RocksDB)          │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::events::ChainEvent;
use crate::ledger::Ledger;
use crate::storage::Repository;
use crate::types::{Address, DailyBalanceRecord, DayKey};
use crate::{Error, Result};
use bigdecimal::BigDecimal;
use tokio::sync::{mpsc, oneshot};

/// Message sent to the ledger actor
pub enum LedgerMessage {
    /// Apply an event
    Submit {
        /// Event to apply
        event: ChainEvent,
        /// Reply channel
        response: oneshot::Sender<Result<()>>,
    },

    /// Current balance of a holder
    BalanceOf {
        /// Token contract
        token: Address,
        /// Holder
        holder: Address,
        /// Reply channel
        response: oneshot::Sender<Result<BigDecimal>>,
    },

    /// Records of a day's snapshot
    Snapshot {
        /// Token contract
        token: Address,
        /// Day
        day: DayKey,
        /// Reply channel
        response: oneshot::Sender<Result<Vec<DailyBalanceRecord>>>,
    },

    /// Prometheus text exposition of the ledger metrics
    Metrics {
        /// Reply channel
        response: oneshot::Sender<Result<String>>,
    },

    /// Shutdown actor
    Shutdown,
}

impl std::fmt::Debug for LedgerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerMessage::Submit { event, .. } => f.debug_struct("Submit").field("event", event).finish_non_exhaustive(),
            LedgerMessage::BalanceOf { token, holder, .. } => f
                .debug_struct("BalanceOf")
                .field("token", token)
                .field("holder", holder)
                .finish_non_exhaustive(),
            LedgerMessage::Snapshot { token, day, .. } => f
                .debug_struct("Snapshot")
                .field("token", token)
                .field("day", day)
                .finish_non_exhaustive(),
            LedgerMessage::Metrics { .. } => f.debug_struct("Metrics").finish_non_exhaustive(),
            LedgerMessage::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Actor that processes ledger messages
pub struct LedgerActor<R> {
    /// Ledger owned by this task
    ledger: Ledger<R>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Reason of the fatal error that stopped event processing
    halted: Option<String>,
}

impl<R> std::fmt::Debug for LedgerActor<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerActor")
            .field("ledger", &self.ledger)
            .field("halted", &self.halted)
            .finish_non_exhaustive()
    }
}

impl<R: Repository> LedgerActor<R> {
    /// Create new actor
    pub fn new(ledger: Ledger<R>, mailbox: mpsc::Receiver<LedgerMessage>) -> Self {
        Self {
            ledger,
            mailbox,
            halted: None,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Shutdown => break,
                msg => self.handle_message(msg),
            }
        }

        tracing::info!(halted = self.halted.is_some(), "Ledger actor stopped");
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::Submit { event, response } => {
                let result = self.submit(&event);
                let _ = response.send(result);
            }

            LedgerMessage::BalanceOf {
                token,
                holder,
                response,
            } => {
                let _ = response.send(self.ledger.balance_of(&token, &holder));
            }

            LedgerMessage::Snapshot { token, day, response } => {
                let _ = response.send(self.ledger.snapshot(&token, day));
            }

            LedgerMessage::Metrics { response } => {
                let _ = response.send(self.ledger.metrics().render().map_err(Error::from));
            }

            LedgerMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }

    fn submit(&mut self, event: &ChainEvent) -> Result<()> {
        if let Some(reason) = &self.halted {
            return Err(Error::Halted(reason.clone()));
        }

        self.ledger.handle(event).map_err(|e| {
            if e.is_fatal() {
                tracing::error!(block = event.block(), error = %e, "Fatal ledger error, halting");
                self.halted = Some(e.to_string());
            }
            e
        })
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Apply an event and wait for the outcome
    pub async fn submit(&self, event: ChainEvent) -> Result<()> {
        self.request(|response| LedgerMessage::Submit { event, response }).await
    }

    /// Current balance of a holder
    pub async fn balance_of(&self, token: Address, holder: Address) -> Result<BigDecimal> {
        self.request(|response| LedgerMessage::BalanceOf {
            token,
            holder,
            response,
        })
        .await
    }

    /// Records of a day's snapshot
    pub async fn snapshot(&self, token: Address, day: DayKey) -> Result<Vec<DailyBalanceRecord>> {
        self.request(|response| LedgerMessage::Snapshot { token, day, response })
            .await
    }

    /// Rendered ledger metrics
    pub async fn metrics(&self) -> Result<String> {
        self.request(|response| LedgerMessage::Metrics { response }).await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor<R>(ledger: Ledger<R>, mailbox_capacity: usize) -> LedgerHandle
where
    R: Repository + Send + 'static,
{
    let (tx, rx) = mpsc::channel(mailbox_capacity); // Bounded channel for backpressure
    let actor = LedgerActor::new(ledger, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}
