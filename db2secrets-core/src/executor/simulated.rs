//! In-process DB2 account model.
//!
//! `SimulatedDatabase` behaves like a DB2 server as far as the rotation
//! protocol can observe: connections authenticate with `UID`/`PWD`, and a
//! `NEWPWD` attribute changes the account password as part of the
//! handshake. It backs the CLI rehearsal mode and the test suites.

use super::{DatabaseConnection, DatabaseExecutor, DriverError, DriverResult};
use crate::rotation::connection_string::{
    NEW_PASSWORD_KEYWORD, PASSWORD_KEYWORD, USER_KEYWORD, keyword_value, redact_connection_string,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

const AUTH_FAILED: &str =
    "SQL30082N Security processing failed with reason \"24\" (\"USERNAME AND/OR PASSWORD INVALID\")";

#[derive(Default)]
struct SimulatedState {
    accounts: Mutex<HashMap<String, Zeroizing<String>>>,
    attempts: Mutex<Vec<String>>,
    open_delay: Mutex<Duration>,
    ignore_password_changes: AtomicBool,
    fail_statements: AtomicBool,
    opened: AtomicUsize,
    closed: AtomicUsize,
    statements: AtomicUsize,
}

/// Simulated DB2 server holding a table of accounts.
///
/// Cloning shares the same server state.
///
/// # Example
/// ```rust
/// use db2secrets_core::executor::{DatabaseConnection, DatabaseExecutor, SimulatedDatabase};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let db = SimulatedDatabase::new();
/// db.create_account("svc", "old1").await;
///
/// let conn = db.open("HOST=db;UID=svc;PWD=old1;NEWPWD=new2").await.unwrap();
/// conn.close().await.unwrap();
/// assert!(db.password_matches("svc", "new2").await);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct SimulatedDatabase {
    state: Arc<SimulatedState>,
}

impl std::fmt::Debug for SimulatedDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDatabase")
            .field("opened", &self.total_opens())
            .field("open_connections", &self.open_connections())
            .finish_non_exhaustive()
    }
}

impl SimulatedDatabase {
    /// Creates an empty simulated server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces an account.
    pub async fn create_account(&self, username: &str, password: &str) {
        self.state
            .accounts
            .lock()
            .await
            .insert(username.to_string(), Zeroizing::new(password.to_string()));
    }

    /// Checks whether the account currently has the given password.
    pub async fn password_matches(&self, username: &str, password: &str) -> bool {
        self.state
            .accounts
            .lock()
            .await
            .get(username)
            .is_some_and(|current| current.as_str() == password)
    }

    /// Models a server that accepts `NEWPWD` but keeps the old password.
    pub fn ignore_password_changes(&self, ignore: bool) {
        self.state
            .ignore_password_changes
            .store(ignore, Ordering::SeqCst);
    }

    /// Makes every statement fail with a driver error.
    pub fn fail_statements(&self, fail: bool) {
        self.state.fail_statements.store(fail, Ordering::SeqCst);
    }

    /// Delays every connection attempt by the given duration.
    pub async fn set_open_delay(&self, delay: Duration) {
        *self.state.open_delay.lock().await = delay;
    }

    /// Total number of successful connection opens.
    pub fn total_opens(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Connections opened but not yet explicitly closed.
    pub fn open_connections(&self) -> usize {
        self.total_opens()
            .saturating_sub(self.state.closed.load(Ordering::SeqCst))
    }

    /// Number of statements executed successfully.
    pub fn statements_executed(&self) -> usize {
        self.state.statements.load(Ordering::SeqCst)
    }

    /// Redacted connection strings of every attempt, in order.
    pub async fn attempts(&self) -> Vec<String> {
        self.state.attempts.lock().await.clone()
    }

    async fn authenticate(&self, connection_string: &str) -> DriverResult<()> {
        let Some(username) = keyword_value(connection_string, USER_KEYWORD) else {
            if keyword_value(connection_string, NEW_PASSWORD_KEYWORD).is_some() {
                return Err(DriverError::Connection(
                    "SQL30082N NEWPWD requires an authenticated user".to_string(),
                ));
            }
            // Local connections without UID use the process identity.
            return Ok(());
        };
        let password = keyword_value(connection_string, PASSWORD_KEYWORD)
            .unwrap_or_else(|| Zeroizing::new(String::new()));

        let mut accounts = self.state.accounts.lock().await;
        let authenticated = accounts
            .get(username.as_str())
            .is_some_and(|current| current.as_str() == password.as_str());
        if !authenticated {
            return Err(DriverError::Authentication(AUTH_FAILED.to_string()));
        }

        if let Some(new_password) = keyword_value(connection_string, NEW_PASSWORD_KEYWORD) {
            if new_password.is_empty() {
                return Err(DriverError::Authentication(
                    "SQL30082N Security processing failed with reason \"23\" (\"NEW PASSWORD INVALID\")"
                        .to_string(),
                ));
            }
            if !self.state.ignore_password_changes.load(Ordering::SeqCst) {
                accounts.insert(username.to_string(), new_password);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseExecutor for SimulatedDatabase {
    async fn open(&self, connection_string: &str) -> DriverResult<Box<dyn DatabaseConnection>> {
        self.state
            .attempts
            .lock()
            .await
            .push(redact_connection_string(connection_string));

        let delay = *self.state.open_delay.lock().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.authenticate(connection_string).await?;
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedConnection {
            state: Arc::clone(&self.state),
        }))
    }

    fn driver_name(&self) -> &'static str {
        "simulated"
    }
}

struct SimulatedConnection {
    state: Arc<SimulatedState>,
}

#[async_trait]
impl DatabaseConnection for SimulatedConnection {
    async fn exec(&self, _statement: &str) -> DriverResult<()> {
        if self.state.fail_statements.load(Ordering::SeqCst) {
            return Err(DriverError::Statement(
                "SQL0204N Object does not exist".to_string(),
            ));
        }
        self.state.statements.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(self: Box<Self>) -> DriverResult<()> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_authenticates_known_account() {
        let db = SimulatedDatabase::new();
        db.create_account("svc", "old1").await;

        let conn = db.open("HOST=db;UID=svc;PWD=old1").await.unwrap();
        conn.exec("SELECT 1 FROM SYSIBM.SYSDUMMY1").await.unwrap();
        conn.close().await.unwrap();

        assert_eq!(db.total_opens(), 1);
        assert_eq!(db.open_connections(), 0);
        assert_eq!(db.statements_executed(), 1);
    }

    #[tokio::test]
    async fn test_rejects_wrong_password() {
        let db = SimulatedDatabase::new();
        db.create_account("svc", "old1").await;

        let result = db.open("HOST=db;UID=svc;PWD=nope").await;
        assert!(matches!(result, Err(DriverError::Authentication(_))));
        assert_eq!(db.total_opens(), 0);
    }

    #[tokio::test]
    async fn test_newpwd_changes_password() {
        let db = SimulatedDatabase::new();
        db.create_account("svc", "old1").await;

        let conn = db
            .open("HOST=db;UID=svc;PWD=old1;NEWPWD=new2")
            .await
            .unwrap();
        conn.close().await.unwrap();

        assert!(db.password_matches("svc", "new2").await);
        assert!(db.open("HOST=db;UID=svc;PWD=old1").await.is_err());
    }

    #[tokio::test]
    async fn test_ignore_password_changes() {
        let db = SimulatedDatabase::new();
        db.create_account("svc", "old1").await;
        db.ignore_password_changes(true);

        let conn = db
            .open("HOST=db;UID=svc;PWD=old1;NEWPWD=new2")
            .await
            .unwrap();
        conn.close().await.unwrap();

        assert!(db.password_matches("svc", "old1").await);
    }

    #[tokio::test]
    async fn test_attempts_are_redacted() {
        let db = SimulatedDatabase::new();
        db.create_account("svc", "old1").await;

        let _ = db.open("HOST=db;UID=svc;PWD=old1;NEWPWD=new2").await;
        let attempts = db.attempts().await;

        assert_eq!(attempts, vec!["HOST=db;UID=svc;PWD=****;NEWPWD=****"]);
    }

    #[tokio::test]
    async fn test_failing_statements() {
        let db = SimulatedDatabase::new();
        db.fail_statements(true);

        let conn = db.open("HOST=db").await.unwrap();
        let result = conn.exec("SELECT 1 FROM SYSIBM.SYSDUMMY1").await;
        assert!(matches!(result, Err(DriverError::Statement(_))));
        conn.close().await.unwrap();
    }
}
