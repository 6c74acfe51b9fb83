//! Shared fixtures for integration tests.

#![allow(dead_code, clippy::unwrap_used, unreachable_pub)]

use async_trait::async_trait;
use db2secrets_core::executor::{DatabaseConnection, DatabaseExecutor, DriverError, DriverResult};
use db2secrets_core::rotation::connection_string::{NEW_PASSWORD_KEYWORD, PASSWORD_KEYWORD, contains_keyword};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const SCENARIO_CONNECTION: &str = "HOST=db;PORT=50000;DATABASE=x";

/// How the scripted server answers one kind of request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Accept,
    Reject,
    Hang,
}

#[derive(Default)]
struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Executor whose answers are fixed per connection kind.
///
/// Strings with `NEWPWD` are rotate connections, strings with only `PWD`
/// are primary (verification) connections, anything else is accepted.
/// Every attempted connection string is recorded verbatim.
#[derive(Clone)]
pub struct ScriptedExecutor {
    rotate: Behavior,
    primary: Behavior,
    probe: Behavior,
    log: Arc<Mutex<Vec<String>>>,
    counters: Arc<Counters>,
}

impl ScriptedExecutor {
    pub fn new(rotate: Behavior, primary: Behavior) -> Self {
        Self {
            rotate,
            primary,
            probe: Behavior::Accept,
            log: Arc::default(),
            counters: Arc::default(),
        }
    }

    pub fn with_probe(mut self, probe: Behavior) -> Self {
        self.probe = probe;
        self
    }

    pub fn attempts(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn still_open(&self) -> usize {
        self.opened()
            .saturating_sub(self.counters.closed.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl DatabaseExecutor for ScriptedExecutor {
    async fn open(&self, connection_string: &str) -> DriverResult<Box<dyn DatabaseConnection>> {
        self.log.lock().unwrap().push(connection_string.to_string());

        let behavior = if contains_keyword(connection_string, NEW_PASSWORD_KEYWORD) {
            self.rotate
        } else if contains_keyword(connection_string, PASSWORD_KEYWORD) {
            self.primary
        } else {
            Behavior::Accept
        };

        match behavior {
            Behavior::Accept => {
                self.counters.opened.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(ScriptedConnection {
                    probe: self.probe,
                    counters: Arc::clone(&self.counters),
                }))
            }
            Behavior::Reject => Err(DriverError::Authentication(
                "SQL30082N reason 24".to_string(),
            )),
            Behavior::Hang => std::future::pending().await,
        }
    }

    fn driver_name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedConnection {
    probe: Behavior,
    counters: Arc<Counters>,
}

#[async_trait]
impl DatabaseConnection for ScriptedConnection {
    async fn exec(&self, _statement: &str) -> DriverResult<()> {
        match self.probe {
            Behavior::Accept => Ok(()),
            Behavior::Reject => Err(DriverError::Statement("SQL0204N".to_string())),
            Behavior::Hang => std::future::pending().await,
        }
    }

    async fn close(self: Box<Self>) -> DriverResult<()> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
