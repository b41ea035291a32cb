// Life of a round:
// 1. Recreate the database and the checkpoint table
// 2. Generate a random schema and create the table
// 3. Mutators plan their schema changes against the live model
// 4. Workers open transactions against a snapshot of the schema
// 5. Mutators change the schema while every transaction is open
// 6. Workers commit
// 7. Check the data: against the replica, or with the store's own check
//
// System components:
//  - Schema model and generators
//  - Barrier protocol ordering mutators against workers
//  - Stores: MySQL protocol, or in memory for tests
//  - Execution log, flushed for failed rounds

#![cfg_attr(test, allow(clippy::disallowed_methods, clippy::unwrap_used))]

pub mod barrier;
pub mod config;
pub mod ddl;
pub mod dml;
pub mod driver;
pub mod exec_log;
pub mod oracle;
pub mod round;
pub mod schema;
pub mod store;
pub mod time;

#[cfg(test)]
mod e2e_tests;
