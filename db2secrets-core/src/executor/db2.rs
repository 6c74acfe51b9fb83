//! IBM DB2 executor over ODBC.
//!
//! Connections go through the IBM Data Server Driver (CLI/ODBC) registered
//! with the system driver manager. Keyword strings reach the driver as
//! built by the rotation module, so `NEWPWD` is applied by the DB2 CLI
//! handshake itself. A `DRIVER=` attribute is prepended when the string
//! names neither a driver nor a DSN.
//!
//! ODBC connection handles stay on the thread that opened them: every
//! connection owns one worker thread and is driven over channels.

use super::{DatabaseConnection, DatabaseExecutor, DriverError, DriverResult};
use crate::rotation::connection_string::contains_keyword;
use async_trait::async_trait;
use odbc_api::{ConnectionOptions, Environment};
use tokio::sync::{mpsc, oneshot};
use zeroize::Zeroizing;

/// Driver name the IBM Data Server Driver registers by default
pub const DEFAULT_ODBC_DRIVER: &str = "IBM DB2 ODBC DRIVER";

/// SQLSTATE and DB2 message codes reported for rejected credentials
const AUTHENTICATION_MARKERS: &[&str] = &["28000", "SQL30082N"];

/// Executor for IBM DB2 through the ODBC driver manager.
#[derive(Debug, Clone)]
pub struct Db2Executor {
    driver: String,
}

impl Default for Db2Executor {
    fn default() -> Self {
        Self::with_driver(DEFAULT_ODBC_DRIVER)
    }
}

impl Db2Executor {
    /// Creates an executor using [`DEFAULT_ODBC_DRIVER`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an executor using the named ODBC driver.
    pub fn with_driver(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
        }
    }

    /// ODBC driver name in use.
    pub fn driver(&self) -> &str {
        &self.driver
    }

    fn odbc_connection_string(&self, connection_string: &str) -> Zeroizing<String> {
        if contains_keyword(connection_string, "DRIVER") || contains_keyword(connection_string, "DSN")
        {
            return Zeroizing::new(connection_string.to_string());
        }
        Zeroizing::new(format!("DRIVER={{{}}};{}", self.driver, connection_string))
    }
}

#[async_trait]
impl DatabaseExecutor for Db2Executor {
    async fn open(&self, connection_string: &str) -> DriverResult<Box<dyn DatabaseConnection>> {
        let odbc_string = self.odbc_connection_string(connection_string);
        let (opened_tx, opened_rx) = oneshot::channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name("db2-connection".to_string())
            .spawn(move || run_worker(odbc_string, opened_tx, commands_rx))
            .map_err(|e| DriverError::Connection(format!("could not start worker: {}", e)))?;

        // Dropping the receiver (timeout, cancellation) makes the worker
        // discard a connection that opens late.
        opened_rx
            .await
            .map_err(|_| DriverError::Connection("connection worker exited".to_string()))??;

        Ok(Box::new(Db2Connection {
            commands: commands_tx,
        }))
    }

    fn driver_name(&self) -> &'static str {
        "db2"
    }
}

enum Command {
    Exec {
        statement: String,
        reply: oneshot::Sender<DriverResult<()>>,
    },
    Close {
        reply: oneshot::Sender<DriverResult<()>>,
    },
}

fn run_worker(
    connection_string: Zeroizing<String>,
    opened: oneshot::Sender<DriverResult<()>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let environment = match Environment::new() {
        Ok(environment) => environment,
        Err(e) => {
            let _ = opened.send(Err(DriverError::Connection(format!(
                "ODBC environment unavailable: {}",
                e
            ))));
            return;
        }
    };

    let connection = match environment
        .connect_with_connection_string(&connection_string, ConnectionOptions::default())
    {
        Ok(connection) => connection,
        Err(e) => {
            let _ = opened.send(Err(classify_connect_error(e.to_string())));
            return;
        }
    };
    drop(connection_string);

    if opened.send(Ok(())).is_err() {
        return;
    }

    while let Some(command) = commands.blocking_recv() {
        match command {
            Command::Exec { statement, reply } => {
                let result = connection
                    .execute(&statement, (), None)
                    .map(|_cursor| ())
                    .map_err(|e| DriverError::Statement(e.to_string()));
                let _ = reply.send(result);
            }
            Command::Close { reply } => {
                drop(connection);
                let _ = reply.send(Ok(()));
                return;
            }
        }
    }
}

fn classify_connect_error(message: String) -> DriverError {
    if AUTHENTICATION_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
    {
        DriverError::Authentication(message)
    } else {
        DriverError::Connection(message)
    }
}

struct Db2Connection {
    commands: mpsc::UnboundedSender<Command>,
}

impl Db2Connection {
    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<DriverResult<()>>) -> Command,
    ) -> DriverResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .map_err(|_| DriverError::Connection("connection worker exited".to_string()))?;
        reply_rx
            .await
            .map_err(|_| DriverError::Connection("connection worker exited".to_string()))?
    }
}

#[async_trait]
impl DatabaseConnection for Db2Connection {
    async fn exec(&self, statement: &str) -> DriverResult<()> {
        let statement = statement.to_string();
        self.request(|reply| Command::Exec { statement, reply })
            .await
    }

    async fn close(self: Box<Self>) -> DriverResult<()> {
        self.request(|reply| Command::Close { reply }).await
    }
}
