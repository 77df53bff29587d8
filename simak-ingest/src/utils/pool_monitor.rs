//! Monitored transactions
//!
//! Wraps `pool.begin()` to log how long a caller waited for a connection and
//! how long it held it. With many jobs persisting student groups at once,
//! these are the first signs of pool saturation.

use simak_common::Result;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::time::Instant;

pub struct MonitoredTransaction<'c> {
    tx: Transaction<'c, Sqlite>,
    caller: &'static str,
    acquired_at: Instant,
}

impl<'c> MonitoredTransaction<'c> {
    /// Connection for queries inside the transaction
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<()> {
        let held_ms = self.acquired_at.elapsed().as_millis();
        self.tx.commit().await?;
        log_release(self.caller, held_ms, "commit");
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        let held_ms = self.acquired_at.elapsed().as_millis();
        self.tx.rollback().await?;
        log_release(self.caller, held_ms, "rollback");
        Ok(())
    }
}

fn log_release(caller: &'static str, held_ms: u128, how: &'static str) {
    if held_ms > 2000 {
        tracing::warn!(caller, held_ms, how, "Long transaction held a pooled connection");
    } else {
        tracing::debug!(caller, held_ms, how, "Connection released");
    }
}

/// Begin a transaction, logging acquisition wait
///
/// Dropping the result without `commit` rolls back.
pub async fn begin_monitored<'c>(
    pool: &'c SqlitePool,
    caller: &'static str,
) -> Result<MonitoredTransaction<'c>> {
    let start = Instant::now();
    let tx = pool.begin().await?;
    let wait_ms = start.elapsed().as_millis();

    if wait_ms > 1000 {
        tracing::warn!(caller, wait_ms, "Slow connection acquisition, pool may be saturated");
    } else {
        tracing::debug!(caller, wait_ms, "Connection acquired");
    }

    Ok(MonitoredTransaction {
        tx,
        caller,
        acquired_at: Instant::now(),
    })
}
