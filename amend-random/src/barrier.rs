//! Rendezvous points that pin schema changes inside open transactions.
//!
//! A round has D DDL mutators and W DML workers, coordinated through three
//! counting rendezvous:
//!
//! ```text
//!   mutator                          worker
//!   plan ──► ready_dml (D) ─────────► wait, then BEGIN + statements
//!   wait ◄── ready_ddl (W) ◄──────── arrive
//!   DDL  ──► ready_commit (D) ──────► wait, then COMMIT
//! ```
//!
//! Arrival never blocks. Waiting blocks until every expected arrival has
//! happened; a rendezvous created with count 0 is already open. There is no
//! timeout here: a participant that never arrives is caught by the round
//! deadline.
//!
//! Participants hold arrival handles ([`MutatorArrivals`], [`WorkerArrivals`])
//! that arrive at every outstanding point when dropped, so a participant that
//! fails early releases its peers instead of hanging the round.

use std::sync::Arc;

use tokio::sync::watch;

/// A single counting rendezvous.
#[derive(Debug, Clone)]
pub struct Rendezvous {
    remaining: Arc<watch::Sender<usize>>,
}

impl Rendezvous {
    #[must_use]
    pub fn new(count: usize) -> Self {
        let (tx, _rx) = watch::channel(count);
        Self {
            remaining: Arc::new(tx),
        }
    }

    /// Record one arrival. Extra arrivals are ignored.
    pub fn arrive(&self) {
        self.remaining.send_modify(|n| *n = n.saturating_sub(1));
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        *self.remaining.borrow()
    }

    /// Wait until every expected arrival has happened.
    pub async fn wait(&self) {
        let mut rx = self.remaining.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// The three rendezvous of one round. Never reused across rounds.
#[derive(Debug, Clone)]
pub struct BarrierSet {
    ready_dml: Rendezvous,
    ready_ddl: Rendezvous,
    ready_commit: Rendezvous,
}

impl BarrierSet {
    /// Barriers for `ddl_tasks` mutators and `dml_workers` workers.
    #[must_use]
    pub fn new(ddl_tasks: usize, dml_workers: usize) -> Self {
        Self {
            ready_dml: Rendezvous::new(ddl_tasks),
            ready_ddl: Rendezvous::new(dml_workers),
            ready_commit: Rendezvous::new(ddl_tasks),
        }
    }

    #[must_use]
    pub const fn ready_dml(&self) -> &Rendezvous {
        &self.ready_dml
    }

    #[must_use]
    pub const fn ready_ddl(&self) -> &Rendezvous {
        &self.ready_ddl
    }

    #[must_use]
    pub const fn ready_commit(&self) -> &Rendezvous {
        &self.ready_commit
    }

    /// Arrival handle for one mutator.
    #[must_use]
    pub fn mutator(&self) -> MutatorArrivals {
        MutatorArrivals {
            barriers: self.clone(),
            planned: false,
            mutated: false,
        }
    }

    /// Arrival handle for one worker.
    #[must_use]
    pub fn worker(&self) -> WorkerArrivals {
        WorkerArrivals {
            barriers: self.clone(),
            opened: false,
        }
    }
}

/// A mutator's view of the barriers.
#[derive(Debug)]
pub struct MutatorArrivals {
    barriers: BarrierSet,
    planned: bool,
    mutated: bool,
}

impl MutatorArrivals {
    /// Planning is done; workers may open their transactions.
    pub fn planned(&mut self) {
        if !self.planned {
            self.planned = true;
            self.barriers.ready_dml.arrive();
        }
    }

    /// Wait until every worker has an open transaction.
    pub async fn wait_for_open_transactions(&self) {
        self.barriers.ready_ddl.wait().await;
    }

    /// The schema changes have returned; workers may commit.
    pub fn mutated(&mut self) {
        self.planned();
        if !self.mutated {
            self.mutated = true;
            self.barriers.ready_commit.arrive();
        }
    }
}

impl Drop for MutatorArrivals {
    fn drop(&mut self) {
        self.mutated();
    }
}

/// A worker's view of the barriers.
#[derive(Debug)]
pub struct WorkerArrivals {
    barriers: BarrierSet,
    opened: bool,
}

impl WorkerArrivals {
    /// Wait until every mutator has planned.
    pub async fn wait_for_plans(&self) {
        self.barriers.ready_dml.wait().await;
    }

    /// The transaction is open and its first statements issued.
    pub fn opened(&mut self) {
        if !self.opened {
            self.opened = true;
            self.barriers.ready_ddl.arrive();
        }
    }

    /// Wait until every mutator's schema changes have returned.
    pub async fn wait_for_mutations(&self) {
        self.barriers.ready_commit.wait().await;
    }
}

impl Drop for WorkerArrivals {
    fn drop(&mut self) {
        self.opened();
    }
}
