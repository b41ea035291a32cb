//! DDL mutators: the schema-change side of a round.
//!
//! Each selected [`DdlMode`] runs as one [`Mutator`] task:
//!
//! 1. plan against the live schema model (see [`plan`])
//! 2. run setup statements, if the mode has any
//! 3. arrive at ready-DML, wait at ready-DDL
//! 4. issue the planned schema changes
//! 5. arrive at ready-commit
//!
//! Setup statements are logged under `setup-<mode>`, schema changes under
//! `ddl-<mode>`.

mod plan;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rand::rngs::StdRng;

pub use plan::{DdlPlan, plan};

use crate::barrier::MutatorArrivals;
use crate::exec_log::{ExecutionLog, ThreadLog};
use crate::round::{Participant, ParticipantReport, RoundError, RoundState};
use crate::store::{Statement, Store, StoreErrorKind};

/// A category of schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DdlMode {
    CreateIndex,
    DropIndex,
    CreateUniqueIndex,
    DropUniqueIndex,
    AddColumn,
    DropColumn,
    ChangeColumnSize,
    ChangeColumnType,
}

/// Error returned for an unrecognized mode name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownModeError(pub String);

impl fmt::Display for UnknownModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mode {} not supported", self.0)
    }
}

impl std::error::Error for UnknownModeError {}

impl DdlMode {
    pub const ALL: [Self; 8] = [
        Self::CreateIndex,
        Self::DropIndex,
        Self::CreateUniqueIndex,
        Self::DropUniqueIndex,
        Self::AddColumn,
        Self::DropColumn,
        Self::ChangeColumnSize,
        Self::ChangeColumnType,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CreateIndex => "create-index",
            Self::DropIndex => "drop-index",
            Self::CreateUniqueIndex => "create-unique-index",
            Self::DropUniqueIndex => "drop-unique-index",
            Self::AddColumn => "add-column",
            Self::DropColumn => "drop-column",
            Self::ChangeColumnSize => "change-column-size",
            Self::ChangeColumnType => "change-column-type",
        }
    }

    /// Parse a comma-separated list. Empty items are skipped and repeated
    /// modes kept once, in first-seen order.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownModeError`] for the first unrecognized name.
    pub fn parse_list(list: &str) -> Result<Vec<Self>, UnknownModeError> {
        let mut modes = Vec::new();
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let mode: Self = item.parse()?;
            if !modes.contains(&mode) {
                modes.push(mode);
            }
        }
        Ok(modes)
    }

    /// Whether a schema change of this mode failing with `kind` is noise
    /// rather than a bug.
    #[must_use]
    pub const fn tolerates(self, kind: StoreErrorKind) -> bool {
        kind.is_benign_ddl()
            || (self.creates_unique_index() && matches!(kind, StoreErrorKind::DuplicateKey))
    }

    /// Whether this mode creates a unique index, in its mutations or its
    /// setup, and so may reject rows the workers write.
    #[must_use]
    pub const fn creates_unique_index(self) -> bool {
        matches!(self, Self::CreateUniqueIndex | Self::DropUniqueIndex)
    }
}

impl fmt::Display for DdlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DdlMode {
    type Err = UnknownModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.name() == s)
            .ok_or_else(|| UnknownModeError(s.to_string()))
    }
}

/// One mutator task.
pub struct Mutator {
    pub mode: DdlMode,
    pub table: String,
    /// Upper bound of planned changes.
    pub count: usize,
    pub store: Arc<dyn Store>,
    pub state: Arc<Mutex<RoundState>>,
    pub log: Arc<ExecutionLog>,
    pub rng: StdRng,
    pub arrivals: MutatorArrivals,
}

/// Issue one schema change. `Ok(false)` when it failed in a way `mode`
/// tolerates.
async fn issue(
    store: &dyn Store,
    thread: &ThreadLog,
    mode: DdlMode,
    statement: &Statement,
) -> Result<bool, RoundError> {
    let sql = statement.to_string();
    match thread.run(&sql, store.execute(statement)).await {
        Ok(()) => Ok(true),
        Err(error) if mode.tolerates(error.kind()) => {
            tracing::warn!(thread = thread.name(), %sql, "ignored: {error}");
            Ok(false)
        }
        Err(error) => Err(RoundError::store(thread.name(), sql, error)),
    }
}

#[async_trait]
impl Participant for Mutator {
    async fn run(self: Box<Self>) -> Result<ParticipantReport, RoundError> {
        let Self {
            mode,
            table,
            count,
            store,
            state,
            log,
            mut rng,
            mut arrivals,
        } = *self;
        let thread = log.register_thread(&format!("ddl-{mode}"))?;
        let mut report = ParticipantReport::new(thread.name());

        let planned = {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            plan(mode, &mut state, &table, count, &mut rng)
        };
        tracing::debug!(
            %mode,
            setup = planned.setup.len(),
            mutations = planned.mutations.len(),
            "planned"
        );

        if !planned.setup.is_empty() {
            let setup = log.register_thread(&format!("setup-{mode}"))?;
            for statement in &planned.setup {
                issue(store.as_ref(), &setup, mode, statement).await?;
            }
        }
        arrivals.planned();

        arrivals.wait_for_open_transactions().await;
        for statement in &planned.mutations {
            if issue(store.as_ref(), &thread, mode, statement).await? {
                report.executed += 1;
            } else {
                report.tolerated += 1;
            }
        }
        arrivals.mutated();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names_round_trip() {
        for mode in DdlMode::ALL {
            assert_eq!(mode.name().parse::<DdlMode>(), Ok(mode));
        }
        assert_eq!(
            "rename-column".parse::<DdlMode>(),
            Err(UnknownModeError("rename-column".to_string()))
        );
    }

    #[test]
    fn test_parse_list_dedupes_and_skips_empty() {
        let modes = DdlMode::parse_list("add-column, ,drop-index,add-column,").unwrap();
        assert_eq!(modes, vec![DdlMode::AddColumn, DdlMode::DropIndex]);
        assert!(DdlMode::parse_list("").unwrap().is_empty());
        assert!(DdlMode::parse_list("add-column,bogus").is_err());
    }

    #[test]
    fn test_tolerated_errors() {
        assert!(DdlMode::AddColumn.tolerates(StoreErrorKind::AlreadyExists));
        assert!(DdlMode::DropColumn.tolerates(StoreErrorKind::MissingObject));
        assert!(!DdlMode::AddColumn.tolerates(StoreErrorKind::Other));
        assert!(DdlMode::CreateUniqueIndex.tolerates(StoreErrorKind::DuplicateKey));
        assert!(!DdlMode::CreateIndex.tolerates(StoreErrorKind::DuplicateKey));
        assert!(DdlMode::DropUniqueIndex.creates_unique_index());
        assert!(!DdlMode::AddColumn.creates_unique_index());
    }
}
