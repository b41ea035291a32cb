//! Planning of schema changes against the live schema model.
//!
//! Planning happens before any transaction opens. Every mutator plans under
//! the round-state lock, so plans never race on the model: a column one
//! mutator claims (to drop or redefine it) is invisible to every other
//! mutator, and index mutators only use columns nobody claimed.

use rand::Rng;
use rand::seq::IndexedRandom;

use crate::round::RoundState;
use crate::schema::{Column, DataType};
use crate::store::Statement;

use super::DdlMode;

/// Statements a mutator will issue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DdlPlan {
    /// Run before workers open their transactions.
    pub setup: Vec<Statement>,
    /// Run while every worker holds an open transaction.
    pub mutations: Vec<Statement>,
}

/// Columns an index may use: not part of the key, not claimed, and short
/// enough that two of them fit the store's key length limit.
fn indexable(state: &RoundState) -> Vec<&Column> {
    state
        .schema
        .columns()
        .iter()
        .filter(|c| {
            !state.schema.is_key_column(&c.name)
                && !state.claimed.contains(&c.name)
                && c.length <= c.data_type.default_length()
        })
        .collect()
}

/// Columns nobody else depends on: not key, not claimed, not indexed.
fn unclaimed(state: &RoundState) -> Vec<&Column> {
    state
        .schema
        .columns()
        .iter()
        .filter(|c| {
            !state.schema.is_key_column(&c.name)
                && !state.claimed.contains(&c.name)
                && !state.indexes.indexes_column(&c.name)
        })
        .collect()
}

/// Plan one index over 1-2 random columns and register it. `None` when no
/// columns are left or the unique tuple is already taken.
fn plan_index<R: Rng + ?Sized>(
    state: &mut RoundState,
    table: &str,
    unique: bool,
    rng: &mut R,
) -> Option<Statement> {
    let candidates = indexable(state);
    let width = rng.random_range(1..=2).min(candidates.len());
    if width == 0 {
        return None;
    }
    let columns: Vec<String> = candidates
        .choose_multiple(rng, width)
        .map(|c| c.name.clone())
        .collect();
    let name = state
        .indexes
        .allocate_name(if unique { "uidx" } else { "idx" });
    if let Err(e) = state.indexes.register(&name, &columns, unique) {
        tracing::debug!("index not planned: {e}");
        return None;
    }
    Some(Statement::CreateIndex {
        table: table.to_string(),
        name,
        columns,
        unique,
    })
}

fn plan_add_column<R: Rng + ?Sized>(state: &mut RoundState, table: &str, rng: &mut R) -> Statement {
    let data_type = DataType::ALL[rng.random_range(0..DataType::ALL.len())];
    let column = Column::generated(state.schema.next_ordinal(), data_type, true);
    state.claimed.insert(column.name.clone());
    state.schema.push_column(column.clone());
    Statement::AddColumn {
        table: table.to_string(),
        column,
    }
}

fn plan_drop_column<R: Rng + ?Sized>(
    state: &mut RoundState,
    table: &str,
    rng: &mut R,
) -> Option<Statement> {
    let name = unclaimed(state).choose(rng)?.name.clone();
    state.claimed.insert(name.clone());
    state.schema.remove_column(&name);
    Some(Statement::DropColumn {
        table: table.to_string(),
        column: name,
    })
}

fn plan_change_size<R: Rng + ?Sized>(
    state: &mut RoundState,
    table: &str,
    rng: &mut R,
) -> Option<Statement> {
    let name = unclaimed(state)
        .into_iter()
        .filter(|c| c.data_type.is_string() && c.length < c.data_type.max_length())
        .collect::<Vec<_>>()
        .choose(rng)?
        .name
        .clone();
    state.claimed.insert(name.clone());
    let column = state.schema.column_mut(&name)?;
    column.length = rng.random_range(column.length + 1..=column.data_type.max_length());
    Some(Statement::ModifyColumn {
        table: table.to_string(),
        column: column.clone(),
    })
}

fn plan_change_type<R: Rng + ?Sized>(
    state: &mut RoundState,
    table: &str,
    rng: &mut R,
) -> Option<Statement> {
    let name = unclaimed(state)
        .into_iter()
        .filter(|c| c.data_type.widened().is_some())
        .collect::<Vec<_>>()
        .choose(rng)?
        .name
        .clone();
    state.claimed.insert(name.clone());
    let column = state.schema.column_mut(&name)?;
    column.data_type = column.data_type.widened()?;
    Some(Statement::ModifyColumn {
        table: table.to_string(),
        column: column.clone(),
    })
}

/// Plan up to `count` changes of `mode`. Stops early when the schema has no
/// more suitable columns.
pub fn plan<R: Rng + ?Sized>(
    mode: DdlMode,
    state: &mut RoundState,
    table: &str,
    count: usize,
    rng: &mut R,
) -> DdlPlan {
    let mut plan = DdlPlan::default();
    for _ in 0..count {
        match mode {
            DdlMode::CreateIndex | DdlMode::CreateUniqueIndex => {
                let unique = mode == DdlMode::CreateUniqueIndex;
                match plan_index(state, table, unique, rng) {
                    Some(statement) => plan.mutations.push(statement),
                    None => break,
                }
            }
            DdlMode::DropIndex | DdlMode::DropUniqueIndex => {
                let unique = mode == DdlMode::DropUniqueIndex;
                let Some(create) = plan_index(state, table, unique, rng) else {
                    break;
                };
                if let Statement::CreateIndex { name, .. } = &create {
                    plan.mutations.push(Statement::DropIndex {
                        table: table.to_string(),
                        name: name.clone(),
                    });
                }
                plan.setup.push(create);
            }
            DdlMode::AddColumn => plan.mutations.push(plan_add_column(state, table, rng)),
            DdlMode::DropColumn => match plan_drop_column(state, table, rng) {
                Some(statement) => plan.mutations.push(statement),
                None => break,
            },
            DdlMode::ChangeColumnSize => match plan_change_size(state, table, rng) {
                Some(statement) => plan.mutations.push(statement),
                None => break,
            },
            DdlMode::ChangeColumnType => match plan_change_type(state, table, rng) {
                Some(statement) => plan.mutations.push(statement),
                None => break,
            },
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Schema, derive_primary_key};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn state() -> RoundState {
        let mut columns = vec![
            Column::generated(0, DataType::Int, false),
            Column::generated(1, DataType::Int, false),
            Column::generated(2, DataType::Int, false),
            Column::generated(3, DataType::TinyInt, true),
            Column::generated(4, DataType::VarChar, true),
            Column::generated(5, DataType::Date, true),
            Column::generated(6, DataType::SmallInt, true),
        ];
        let key = derive_primary_key(&mut columns);
        let mut state = RoundState::new(Schema::new(columns, key.clone()));
        state.indexes.register("primary", &key, true).unwrap();
        state
    }

    #[test]
    fn test_add_column_extends_live_schema() {
        let mut state = state();
        let mut rng = StdRng::seed_from_u64(1);
        let plan = plan(DdlMode::AddColumn, &mut state, "t", 3, &mut rng);
        assert_eq!(plan.mutations.len(), 3);
        assert!(plan.setup.is_empty());
        assert!(state.schema.column("col_7").is_some());
        assert!(state.schema.column("col_9").is_some_and(|c| c.nullable));
    }

    #[test]
    fn test_drop_column_spares_key_and_stops_when_exhausted() {
        let mut state = state();
        let mut rng = StdRng::seed_from_u64(2);
        let plan = plan(DdlMode::DropColumn, &mut state, "t", 100, &mut rng);
        assert_eq!(plan.mutations.len(), 4);
        assert_eq!(state.schema.columns().len(), 3);
        for statement in &plan.mutations {
            let Statement::DropColumn { column, .. } = statement else {
                panic!("unexpected {statement}");
            };
            assert!(!["col_0", "col_1", "col_2"].contains(&column.as_str()));
        }
    }

    #[test]
    fn test_drop_index_creates_target_in_setup() {
        let mut state = state();
        let mut rng = StdRng::seed_from_u64(3);
        let plan = plan(DdlMode::DropUniqueIndex, &mut state, "t", 2, &mut rng);
        assert_eq!(plan.setup.len(), plan.mutations.len());
        for (create, drop) in plan.setup.iter().zip(&plan.mutations) {
            let (Statement::CreateIndex { name, unique, .. }, Statement::DropIndex { name: dropped, .. }) =
                (create, drop)
            else {
                panic!("unexpected plan {plan:?}");
            };
            assert!(unique);
            assert_eq!(name, dropped);
        }
    }

    #[test]
    fn test_claimed_columns_not_shared_between_modes() {
        let mut state = state();
        let mut rng = StdRng::seed_from_u64(4);
        let drops = plan(DdlMode::DropColumn, &mut state, "t", 100, &mut rng);
        assert!(!drops.mutations.is_empty());
        // Every non-key column is claimed now.
        let indexes = plan(DdlMode::CreateIndex, &mut state, "t", 5, &mut rng);
        assert!(indexes.mutations.is_empty());
        let types = plan(DdlMode::ChangeColumnType, &mut state, "t", 5, &mut rng);
        assert!(types.mutations.is_empty());
    }

    #[test]
    fn test_change_type_widens_integers() {
        let mut state = state();
        let mut rng = StdRng::seed_from_u64(5);
        let plan = plan(DdlMode::ChangeColumnType, &mut state, "t", 10, &mut rng);
        assert_eq!(plan.mutations.len(), 2);
        assert_eq!(state.schema.column("col_3").unwrap().data_type, DataType::SmallInt);
        assert_eq!(state.schema.column("col_6").unwrap().data_type, DataType::Int);
    }

    #[test]
    fn test_change_size_grows_length() {
        let mut state = state();
        let mut rng = StdRng::seed_from_u64(6);
        let plan = plan(DdlMode::ChangeColumnSize, &mut state, "t", 10, &mut rng);
        assert_eq!(plan.mutations.len(), 1);
        assert!(state.schema.column("col_4").unwrap().length > 64);
    }

    #[test]
    fn test_unique_indexes_never_share_tuple() {
        let mut state = state();
        let mut rng = StdRng::seed_from_u64(7);
        let plan = plan(DdlMode::CreateUniqueIndex, &mut state, "t", 50, &mut rng);
        let mut tuples: Vec<&Vec<String>> = plan
            .mutations
            .iter()
            .filter_map(|s| match s {
                Statement::CreateIndex { columns, .. } => Some(columns),
                _ => None,
            })
            .collect();
        let planned = tuples.len();
        tuples.sort();
        tuples.dedup();
        assert_eq!(tuples.len(), planned);
    }
}
