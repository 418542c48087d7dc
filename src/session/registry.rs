//! Session registry
//!
//! Owns the account store and the two maps binding usernames to chat
//! connections. Both maps are only ever changed together, so a username is
//! bound to at most one connection and vice versa.

use log::{info, warn};
use std::collections::HashMap;
use std::fmt;

use crate::auth::{AccountStore, validate_credentials};
use crate::error::AuthError;

/// Identifier the multiplexer assigns to each accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Registry for tracking active sessions
pub struct SessionRegistry {
    accounts: Box<dyn AccountStore + Send>,
    by_username: HashMap<String, ConnectionId>,
    by_connection: HashMap<ConnectionId, String>,
}

impl SessionRegistry {
    pub fn new(accounts: Box<dyn AccountStore + Send>) -> Self {
        Self {
            accounts,
            by_username: HashMap::new(),
            by_connection: HashMap::new(),
        }
    }

    /// Checks credentials and binds `username` to `connection` on success.
    ///
    /// An unknown username is registered with the given password on the
    /// spot. A username that already has a session is refused whatever the
    /// password.
    pub fn try_login(
        &mut self,
        connection: ConnectionId,
        username: &str,
        password: &str,
    ) -> Result<(), AuthError> {
        validate_credentials(username, password)?;

        if self.by_username.contains_key(username) {
            return Err(AuthError::AlreadyLoggedIn(username.to_string()));
        }
        if let Some(bound) = self.by_connection.get(&connection) {
            warn!("Connection {connection} already logged in as {bound}");
            return Err(AuthError::AlreadyLoggedIn(bound.clone()));
        }

        if !self.accounts.contains(username) {
            self.accounts
                .register(username, password)
                .map_err(AuthError::Store)?;
        } else if self.accounts.password(username) != Some(password) {
            return Err(AuthError::BadCredentials(username.to_string()));
        }

        self.by_username.insert(username.to_string(), connection);
        self.by_connection.insert(connection, username.to_string());
        info!(
            "User {username} logged in on {connection} ({} active)",
            self.by_username.len()
        );
        Ok(())
    }

    /// Removes the session bound to `connection`, returning its username.
    pub fn logout(&mut self, connection: ConnectionId) -> Option<String> {
        let username = self.by_connection.remove(&connection)?;
        self.by_username.remove(&username);
        info!(
            "User {username} logged out from {connection} ({} active)",
            self.by_username.len()
        );
        Some(username)
    }

    pub fn username_of(&self, connection: ConnectionId) -> Option<&str> {
        self.by_connection.get(&connection).map(String::as_str)
    }

    pub fn connection_of(&self, username: &str) -> Option<ConnectionId> {
        self.by_username.get(username).copied()
    }

    /// Snapshot of every active session.
    pub fn all_active(&self) -> Vec<(String, ConnectionId)> {
        self.by_username
            .iter()
            .map(|(username, connection)| (username.clone(), *connection))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_username.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_username.is_empty()
    }
}
