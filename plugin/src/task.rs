// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Task set with cooperative shutdown.

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// A in-process task set that is cancelled when dropped.
pub struct InProcess {
    /// Cancellable task set.
    pub task_set: CancelTaskSet,
}

impl InProcess {
    /// Creates a new in-process task set.
    pub fn new(task_set: CancelTaskSet) -> Self {
        Self { task_set }
    }
}

impl Drop for InProcess {
    fn drop(&mut self) {
        self.task_set.cancellation_token().cancel();
    }
}

/// A combination of a [tokio::task::JoinSet] and
/// [tokio_util::sync::CancellationToken].
///
/// Tasks either observe the token themselves ([CancelTaskSet::spawn_task]) or are dropped
/// when it fires ([CancelTaskSet::spawn_cancellable_task]).
pub struct CancelTaskSet {
    /// Task set join set.
    pub join_set: JoinSet<Result<(), std::io::Error>>,
    cancellation_token: CancellationToken,
}

impl CancelTaskSet {
    /// Creates a new task set.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self::from_cancel_token(false, CancellationToken::new())
    }

    /// Creates a task set and registers a signal handler that calls `cancel()`
    /// on the cancellation token upon receiving `SIGINT` and `SIGTERM`.
    pub fn new_with_signal_handler() -> Self {
        Self::from_cancel_token(true, CancellationToken::new())
    }

    /// Creates a task set from an existing cancellation token.
    ///
    /// # Arguments
    /// * `register_signal_handler`: If true, a signal handler is registered that calls `cancel()`
    ///   on the cancellation token upon receiving `SIGINT` and `SIGTERM`.
    /// * `cancellation_token`: The cancellation token to use.
    pub fn from_cancel_token(
        register_signal_handler: bool,
        cancellation_token: CancellationToken,
    ) -> Self {
        let mut join_set = JoinSet::new();
        if register_signal_handler {
            join_set.spawn(shutdown_signal(cancellation_token.clone()));
        }
        CancelTaskSet {
            join_set,
            cancellation_token,
        }
    }

    /// Returns a clone of the cancellation token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Spawns a task that is responsible for observing the cancellation token itself.
    pub fn spawn_task<Fut>(&mut self, task: Fut)
    where
        Fut: Future<Output = Result<(), std::io::Error>> + Send + 'static,
    {
        self.join_set.spawn(task);
    }

    /// Spawns a task that will run until it is cancelled or completes.
    pub fn spawn_cancellable_task<Fut>(&mut self, task: Fut)
    where
        Fut: Future<Output = Result<(), std::io::Error>> + Send + 'static,
    {
        let token = self.cancellation_token();
        self.join_set.spawn(async move {
            match token.run_until_cancelled(task).await {
                Some(result) => result,
                None => Ok(()),
            }
        });
    }

    /// Joins all tasks in the set. If any task fails to join or returns an error, cancel the token
    /// to signal a graceful shutdown to the remaining tasks.
    ///
    /// Returns the first task error.
    pub async fn join_all(&mut self) -> Result<(), std::io::Error> {
        let mut first_error = None;
        while let Some(result) = self.join_set.join_next().await {
            let error = match result {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => {
                    error!(error=%e, "Task failed");
                    e
                }
                Err(e) => {
                    error!(error=%e, "Task join failed");
                    std::io::Error::other(e)
                }
            };
            self.cancellation_token.cancel();
            first_error.get_or_insert(error);
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for CancelTaskSet {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
        self.join_set.abort_all();
    }
}

async fn shutdown_signal(cancellation_token: CancellationToken) -> Result<(), std::io::Error> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            debug!("Received SIGINT, cancelling token");
            cancellation_token.cancel();
        },
        _ = sigterm.recv() => {
            debug!("Received SIGTERM, cancelling token");
            cancellation_token.cancel();
        },
        _ = cancellation_token.cancelled() => {
            debug!("Cancellation token cancelled, exiting shutdown handler");
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn cancellable_tasks_stop_on_cancel() {
        let mut tasks = CancelTaskSet::new();
        tasks.spawn_cancellable_task(async {
            std::future::pending::<()>().await;
            Ok(())
        });
        tasks.cancellation_token().cancel();
        tasks.join_all().await.unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn failing_task_cancels_the_others() {
        let mut tasks = CancelTaskSet::new();
        let token = tasks.cancellation_token();
        tasks.spawn_task(async move {
            token.cancelled().await;
            Ok(())
        });
        tasks.spawn_task(async { Err(std::io::Error::other("boom")) });

        let err = tasks.join_all().await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert!(tasks.cancellation_token().is_cancelled());
    }
}
