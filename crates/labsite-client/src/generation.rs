//! Request generations
//!
//! A client view issues requests keyed by what they load ("me", "login",
//! ...). When a newer request for the same key starts, the older one is
//! cancelled and its result must not be applied.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ClientError;

/// Handle for one in-flight request
#[derive(Debug, Clone)]
pub struct RequestTicket {
    key: String,
    generation: u64,
    cancel: CancellationToken,
}

impl RequestTicket {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once a newer request for the same key starts
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    cancel: CancellationToken,
}

/// Tracks the newest request per key
#[derive(Debug, Default)]
pub struct RequestGenerations {
    slots: Mutex<HashMap<String, Slot>>,
    counter: Mutex<u64>,
}

impl RequestGenerations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a request for `key`, cancelling the previous one
    pub fn begin(&self, key: &str) -> RequestTicket {
        let generation = {
            let mut counter = self.counter.lock();
            *counter += 1;
            *counter
        };
        let cancel = CancellationToken::new();

        let previous = self.slots.lock().insert(
            key.to_string(),
            Slot {
                generation,
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!("Superseding request {} for {}", previous.generation, key);
            previous.cancel.cancel();
        }

        RequestTicket {
            key: key.to_string(),
            generation,
            cancel,
        }
    }

    /// Whether `ticket` is still the newest request for its key
    pub fn is_current(&self, ticket: &RequestTicket) -> bool {
        !ticket.is_cancelled()
            && self
                .slots
                .lock()
                .get(&ticket.key)
                .is_some_and(|slot| slot.generation == ticket.generation)
    }

    /// Accept `result` only if `ticket` was not superseded meanwhile
    pub fn finish<T>(&self, ticket: &RequestTicket, result: T) -> Result<T, ClientError> {
        let mut slots = self.slots.lock();
        match slots.get(&ticket.key) {
            Some(slot) if slot.generation == ticket.generation && !ticket.is_cancelled() => {
                slots.remove(&ticket.key);
                Ok(result)
            }
            _ => Err(ClientError::Superseded),
        }
    }

    /// Run `request` as the newest request for `key`
    ///
    /// The future is dropped as soon as a newer request for the same key
    /// begins; a superseded result is discarded with `ClientError::Superseded`.
    pub async fn run<T, F>(&self, key: &str, request: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        let ticket = self.begin(key);
        let result = tokio::select! {
            _ = ticket.cancelled() => return Err(ClientError::Superseded),
            result = request => result?,
        };
        self.finish(&ticket, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_newer_ticket_supersedes_older() {
        let generations = RequestGenerations::new();
        let first = generations.begin("me");
        let second = generations.begin("me");

        assert!(first.is_cancelled());
        assert!(!generations.is_current(&first));
        assert!(generations.is_current(&second));

        assert!(matches!(generations.finish(&first, 1), Err(ClientError::Superseded)));
        assert_eq!(generations.finish(&second, 2).unwrap(), 2);
    }

    #[test]
    fn test_keys_are_independent() {
        let generations = RequestGenerations::new();
        let me = generations.begin("me");
        let directory = generations.begin("directory");

        assert!(generations.is_current(&me));
        assert!(generations.is_current(&directory));
        assert_eq!(directory.key(), "directory");
    }

    #[tokio::test]
    async fn test_run_discards_superseded_request() {
        let generations = Arc::new(RequestGenerations::new());

        let slow = {
            let generations = generations.clone();
            tokio::spawn(async move {
                generations
                    .run("me", async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok("stale")
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let fresh = generations.run("me", async { Ok("fresh") }).await.unwrap();
        assert_eq!(fresh, "fresh");

        let stale = slow.await.unwrap();
        assert!(matches!(stale, Err(ClientError::Superseded)));
    }
}
