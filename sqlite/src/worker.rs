//! Single-owner worker thread for a [`Database`].
//!
//! A [`DatabaseWorker`] moves a database onto a dedicated thread and feeds
//! it one message at a time from a queue. Transactions submitted from any
//! number of threads are therefore executed strictly one after another, and
//! memory-pressure trims are posted onto the same queue so they can never
//! overlap a transaction.
//!
//! There is no timeout or cancellation: a transaction blocked inside SQLite
//! blocks the worker and everything queued behind it.
//!
//! # Example
//!
//! ```
//! use dbcommand_core::{Command, Status, Transaction};
//! use dbcommand_sqlite::{Database, DatabaseConfig, DatabaseWorker};
//!
//! let db = Database::new(DatabaseConfig::in_memory()).unwrap();
//! let worker = DatabaseWorker::spawn(db).unwrap();
//!
//! let response = worker.run_transaction(Transaction::new(1, 1).with_command(Command::initialize()));
//! assert_eq!(response.status, Status::Ok);
//! ```

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use dbcommand_core::{CommandResponse, Status, Transaction};
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::executor::Database;
use crate::lifecycle::PressureWaker;

enum Message {
    Run {
        transaction: Transaction,
        response: mpsc::Sender<CommandResponse>,
    },
    MemoryPressure,
    Shutdown,
}

/// Handle to a database running on its own thread.
///
/// The handle is `Send + Sync`; share it behind an `Arc` to submit from
/// several threads. Dropping it drains nothing: queued messages ahead of the
/// shutdown request still run, then the thread exits and is joined.
#[derive(Debug)]
pub struct DatabaseWorker {
    sender: mpsc::Sender<Message>,
    handle: Option<JoinHandle<()>>,
}

/// A response that has been queued but not yet received.
#[derive(Debug)]
pub struct PendingResponse {
    receiver: Option<mpsc::Receiver<CommandResponse>>,
}

impl PendingResponse {
    /// Blocks until the worker has processed the transaction.
    ///
    /// Returns a [`Status::ResponseError`] response if the worker stopped
    /// before answering.
    pub fn wait(self) -> CommandResponse {
        let Some(receiver) = self.receiver else {
            return CommandResponse::with_status(Status::ResponseError);
        };
        receiver.recv().unwrap_or_else(|_| {
            error!("database worker stopped before responding");
            CommandResponse::with_status(Status::ResponseError)
        })
    }
}

impl DatabaseWorker {
    /// Starts a worker thread that takes ownership of `database`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::IoError`](crate::SqliteError::IoError) if the
    /// thread cannot be spawned.
    pub fn spawn(mut database: Database) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();

        let wake = sender.clone();
        database.set_pressure_waker(PressureWaker::new(move || {
            // The worker may already be gone; the signal is then moot.
            let _ = wake.send(Message::MemoryPressure);
        }));
        database.detach_from_sequence();

        let handle = thread::Builder::new()
            .name("dbcommand-worker".to_string())
            .spawn(move || worker_loop(database, &receiver))?;

        Ok(Self {
            sender,
            handle: Some(handle),
        })
    }

    /// Queues a transaction without waiting for its response.
    pub fn submit(&self, transaction: Transaction) -> PendingResponse {
        let (response, receiver) = mpsc::channel();
        match self.sender.send(Message::Run {
            transaction,
            response,
        }) {
            Ok(()) => PendingResponse {
                receiver: Some(receiver),
            },
            Err(_) => {
                error!("database worker is not running");
                PendingResponse { receiver: None }
            }
        }
    }

    /// Queues a transaction and blocks until it has been processed.
    pub fn run_transaction(&self, transaction: Transaction) -> CommandResponse {
        self.submit(transaction).wait()
    }
}

impl Drop for DatabaseWorker {
    fn drop(&mut self) {
        let _ = self.sender.send(Message::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("database worker panicked");
            }
        }
    }
}

fn worker_loop(mut database: Database, receiver: &mpsc::Receiver<Message>) {
    debug!("database worker started");
    while let Ok(message) = receiver.recv() {
        match message {
            Message::Run {
                transaction,
                response,
            } => {
                let result = database.run_transaction(&transaction);
                if response.send(result).is_err() {
                    warn!("transaction response dropped, caller went away");
                }
            }
            Message::MemoryPressure => {
                database.service_memory_pressure();
            }
            Message::Shutdown => break,
        }
    }
    debug!("database worker stopped");
}
