//! Collaborator traits: the database client and the factory that opens it.
//!
//! Both are injected so the pool never knows which database or wire
//! protocol sits underneath; tests use in-memory mocks.

use std::future::Future;
use std::pin::Pin;

use datagate_core::Credentials;
use serde_json::Value;

/// Boxed future returned by client and factory calls.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send + 'a>>;

/// A live handle to the backing store.
pub trait DatabaseClient: Send + std::fmt::Debug {
    /// Run a parameterized statement and return its result set.
    fn execute<'a>(&'a mut self, sql: &'a str, params: &'a [Value]) -> ClientFuture<'a, Value>;
    /// Close the underlying transport.
    fn close(&mut self);
}

/// Opens new clients — injected for testability.
pub trait ConnectionFactory: Send + Sync {
    /// Establish a new client using `credentials`.
    fn connect<'a>(&'a self, credentials: &'a Credentials) -> ClientFuture<'a, Box<dyn DatabaseClient>>;
}
