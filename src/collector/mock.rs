//! Scripted in-memory session for testing collectors without a cluster.
//!
//! A [`MockSession`] answers each statement with the first scripted response
//! whose pattern is a substring of the statement; unmatched statements return
//! no rows. Everything the session sees is recorded in a shared [`SessionLog`],
//! which stays readable after the session has been boxed and closed.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use super::session::{ClusterSession, ConnectParams, Connector, QueryRow, SessionError};

/// What a mock session observed.
#[derive(Debug, Default)]
pub struct SessionLog {
    /// Statements in execution order.
    pub statements: Vec<String>,
    /// `(user, password)` of each successful connect.
    pub connections: Vec<(String, String)>,
    pub closed: usize,
}

#[derive(Debug, Clone)]
struct Response {
    pattern: String,
    result: Result<Vec<QueryRow>, SessionError>,
    delay: Duration,
}

/// In-memory [`ClusterSession`].
#[derive(Debug, Clone, Default)]
pub struct MockSession {
    responses: Vec<Response>,
    log: Rc<RefCell<SessionLog>>,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers statements containing `pattern` with `rows`.
    pub fn on(self, pattern: impl Into<String>, rows: Vec<QueryRow>) -> Self {
        self.respond(pattern, Ok(rows), Duration::ZERO)
    }

    /// Like [`MockSession::on`], sleeping `delay` before answering.
    pub fn on_delayed(self, pattern: impl Into<String>, rows: Vec<QueryRow>, delay: Duration) -> Self {
        self.respond(pattern, Ok(rows), delay)
    }

    /// Fails statements containing `pattern`.
    pub fn fail_on(self, pattern: impl Into<String>, message: impl Into<String>) -> Self {
        self.respond(pattern, Err(SessionError::QueryError(message.into())), Duration::ZERO)
    }

    fn respond(
        mut self,
        pattern: impl Into<String>,
        result: Result<Vec<QueryRow>, SessionError>,
        delay: Duration,
    ) -> Self {
        self.responses.push(Response {
            pattern: pattern.into(),
            result,
            delay,
        });
        self
    }

    /// Shared handle to everything this session (and its clones) observed.
    pub fn log(&self) -> Rc<RefCell<SessionLog>> {
        Rc::clone(&self.log)
    }

    pub fn statements(&self) -> Vec<String> {
        self.log.borrow().statements.clone()
    }
}

impl ClusterSession for MockSession {
    fn query(&mut self, sql: &str) -> Result<Vec<QueryRow>, SessionError> {
        self.log.borrow_mut().statements.push(sql.to_string());

        match self.responses.iter().find(|r| sql.contains(&r.pattern)) {
            Some(response) => {
                if !response.delay.is_zero() {
                    std::thread::sleep(response.delay);
                }
                response.result.clone()
            }
            None => Ok(Vec::new()),
        }
    }

    fn close(self: Box<Self>) -> Result<(), SessionError> {
        self.log.borrow_mut().closed += 1;
        Ok(())
    }
}

/// [`Connector`] handing out clones of one scripted session.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    session: MockSession,
    failure: Option<SessionError>,
}

impl MockConnector {
    pub fn new(session: MockSession) -> Self {
        Self {
            session,
            failure: None,
        }
    }

    /// A connector whose every connect attempt fails.
    pub fn refusing(message: impl Into<String>) -> Self {
        Self {
            session: MockSession::new(),
            failure: Some(SessionError::ConnectionError(message.into())),
        }
    }

    pub fn log(&self) -> Rc<RefCell<SessionLog>> {
        self.session.log()
    }
}

impl Connector for MockConnector {
    fn connect(&self, params: &ConnectParams<'_>) -> Result<Box<dyn ClusterSession>, SessionError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        self.session
            .log
            .borrow_mut()
            .connections
            .push((params.user.to_string(), params.password.expose().to_string()));
        Ok(Box::new(self.session.clone()))
    }
}

/// Builds a row from optional text cells.
pub fn row(values: &[Option<&str>]) -> QueryRow {
    QueryRow::new(values.iter().map(|v| v.map(str::to_string)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_pattern_answers() {
        let mut session = MockSession::new()
            .on("svv_table_info", vec![row(&[Some("a")])])
            .fail_on("broken", "boom");

        assert_eq!(session.query("select * from svv_table_info").unwrap().len(), 1);
        assert!(session.query("select broken").is_err());
        assert!(session.query("select 1").unwrap().is_empty());
        assert_eq!(session.statements().len(), 3);
    }

    #[test]
    fn log_survives_close() {
        let session = MockSession::new();
        let log = session.log();
        let boxed: Box<dyn ClusterSession> = Box::new(session);
        boxed.close().unwrap();
        assert_eq!(log.borrow().closed, 1);
    }
}
