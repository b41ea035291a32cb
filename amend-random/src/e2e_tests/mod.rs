//! End-to-end rounds against the in-memory store.
//!
//! Each test file covers one scenario, driving whole rounds through
//! [`crate::round::RoundController`] with seeded inputs.

#![cfg(test)]

mod helpers;

mod test_add_column;
mod test_barrier_ordering;
mod test_ddl_failure;
mod test_dml_only;
mod test_duplicate_key;
mod test_replica_divergence;
mod test_round_timeout;
