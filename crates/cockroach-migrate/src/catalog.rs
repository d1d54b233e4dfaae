//! Metadata catalog bound to a session.
//!
//! The catalog mirrors the schema effect of every statement the database has
//! confirmed, for the tables it knows about. It is where the primary key
//! rebuild reads the columns it copies, and where tests compare schemas
//! before and after an operation.

use std::collections::BTreeSet;

use crate::connection::is_primary_index_name;
use crate::constraint::column_foreign_key_name;
use crate::ddl::{AlterColumnChange, DdlStatement};
use crate::error::{MigrateError, Result};
use crate::schema::{DatabaseSchema, IndexSchema, TableSchema, UniqueConstraint};

/// Tracked schema of the tables a session has seen.
#[derive(Debug, Default)]
pub struct SchemaState {
    schema: DatabaseSchema,
    validated: BTreeSet<(String, String)>,
    reflected: BTreeSet<String>,
    stale: BTreeSet<String>,
}

fn missing_table(name: &str) -> MigrateError {
    MigrateError::InvalidState(format!("Table '{}' does not exist", name))
}

fn missing_column(column: &str, table: &str) -> MigrateError {
    MigrateError::InvalidState(format!(
        "Column '{}' does not exist in table '{}'",
        column, table
    ))
}

impl SchemaState {
    /// Creates a new empty schema state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a state that already tracks `schema`.
    #[must_use]
    pub fn from_schema(schema: DatabaseSchema) -> Self {
        Self {
            schema,
            validated: BTreeSet::new(),
            reflected: BTreeSet::new(),
            stale: BTreeSet::new(),
        }
    }

    /// Returns the current schema.
    #[must_use]
    pub fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    /// Returns a tracked table.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.schema.get_table(name)
    }

    /// Starts tracking a table reflected from the database.
    ///
    /// Replaces any previous definition with the same name. Reflection only
    /// covers columns and the primary key, so the indexes and constraints of
    /// a tracked table stay unknown until it is recreated.
    pub fn track(&mut self, table: TableSchema) {
        self.schema.tables.retain(|t| t.name != table.name);
        self.stale.remove(&table.name);
        self.reflected.insert(table.name.clone());
        self.schema.tables.push(table);
    }

    /// Returns true if the full index list of `table` is known.
    #[must_use]
    pub fn knows_indexes(&self, table: &str) -> bool {
        self.schema.get_table(table).is_some()
            && !self.reflected.contains(table)
            && !self.stale.contains(table)
    }

    /// Returns true if the tracked definition of `table` may no longer match
    /// the database.
    ///
    /// Stale tables are reflected again before their definition is used.
    #[must_use]
    pub fn is_stale(&self, table: &str) -> bool {
        self.stale.contains(table)
    }

    /// Marks `table` as possibly out of step with the database.
    pub fn invalidate(&mut self, table: &str) {
        if self.schema.get_table(table).is_some() {
            self.stale.insert(table.to_string());
        }
    }

    /// Marks every tracked table as possibly out of step with the database.
    pub fn invalidate_all(&mut self) {
        self.stale
            .extend(self.schema.tables.iter().map(|t| t.name.clone()));
    }

    fn forget(&mut self, table: &str) {
        self.schema.tables.retain(|t| t.name != table);
        self.reflected.remove(table);
        self.stale.remove(table);
        self.validated.retain(|(t, _)| t != table);
    }

    /// Returns true if `VALIDATE CONSTRAINT` has run for the constraint.
    #[must_use]
    pub fn is_validated(&self, table: &str, constraint: &str) -> bool {
        self.validated
            .contains(&(table.to_string(), constraint.to_string()))
    }

    /// Returns true if applying `statement` would touch a tracked table.
    #[must_use]
    pub fn tracks(&self, statement: &DdlStatement) -> bool {
        match statement {
            DdlStatement::CreateTable { .. } => true,
            DdlStatement::Raw(_) => true,
            DdlStatement::DropIndex {
                table: None, name, ..
            } => self
                .schema
                .tables
                .iter()
                .any(|t| t.get_index(name).is_some()),
            other => other
                .table()
                .is_some_and(|name| self.schema.get_table(name).is_some()),
        }
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut TableSchema> {
        self.schema
            .get_table_mut(name)
            .ok_or_else(|| missing_table(name))
    }

    /// Applies a confirmed statement to the schema state.
    ///
    /// Column and constraint changes to a stale table are not checked and
    /// not recorded; creating, dropping or renaming it still is.
    pub fn apply(&mut self, statement: &DdlStatement) -> Result<()> {
        if let Some(name) = statement.table() {
            if self.stale.contains(name) {
                match statement {
                    DdlStatement::CreateTable { .. } => {
                        let name = name.to_string();
                        self.forget(&name);
                    }
                    DdlStatement::DropTable { .. } | DdlStatement::RenameTable { .. } => {}
                    _ => return Ok(()),
                }
            }
        }

        match statement {
            DdlStatement::CreateTable {
                table,
                if_not_exists,
            } => {
                if self.schema.get_table(&table.name).is_some() {
                    if *if_not_exists {
                        return Ok(());
                    }
                    return Err(MigrateError::InvalidState(format!(
                        "Table '{}' already exists",
                        table.name
                    )));
                }

                let mut created = table.clone();
                for column in &mut created.columns {
                    column.primary_key = table.primary_key.contains(&column.name);
                }
                for column in &table.columns {
                    if let Some(ref reference) = column.references {
                        created.foreign_keys.push(reference.to_foreign_key(
                            column_foreign_key_name(&table.name, &column.name),
                            &column.name,
                        ));
                    }
                }
                self.reflected.remove(&created.name);
                self.schema.tables.push(created);
            }

            DdlStatement::DropTable {
                name,
                if_exists,
                cascade,
            } => {
                let Some(idx) = self.schema.tables.iter().position(|t| t.name == *name) else {
                    if *if_exists {
                        return Ok(());
                    }
                    return Err(missing_table(name));
                };
                self.schema.tables.remove(idx);
                self.reflected.remove(name);
                self.stale.remove(name);
                self.validated.retain(|(t, _)| t != name);

                if *cascade {
                    // Dependent foreign keys go with the table.
                    for t in &mut self.schema.tables {
                        t.foreign_keys.retain(|fk| fk.references_table != *name);
                    }
                }
            }

            DdlStatement::RenameTable { old_name, new_name } => {
                if self.schema.get_table(new_name).is_some() {
                    return Err(MigrateError::InvalidState(format!(
                        "Table '{}' already exists",
                        new_name
                    )));
                }
                self.table_mut(old_name)?.name = new_name.clone();
                if self.reflected.remove(old_name) {
                    self.reflected.insert(new_name.clone());
                }
                if self.stale.remove(old_name) {
                    self.stale.insert(new_name.clone());
                }
                for t in &mut self.schema.tables {
                    for fk in &mut t.foreign_keys {
                        if fk.references_table == *old_name {
                            fk.references_table = new_name.clone();
                        }
                    }
                }
                self.validated = std::mem::take(&mut self.validated)
                    .into_iter()
                    .map(|(t, c)| if t == *old_name { (new_name.clone(), c) } else { (t, c) })
                    .collect();
            }

            DdlStatement::AddColumn { table, column } => {
                let t = self.table_mut(table)?;
                if t.get_column(&column.name).is_some() {
                    return Err(MigrateError::InvalidState(format!(
                        "Column '{}' already exists in table '{}'",
                        column.name, table
                    )));
                }

                if let Some(ref reference) = column.references {
                    t.foreign_keys.push(reference.to_foreign_key(
                        column_foreign_key_name(table, &column.name),
                        &column.name,
                    ));
                }
                if column.primary_key && !t.primary_key.contains(&column.name) {
                    t.primary_key.push(column.name.clone());
                }
                t.columns.push(column.clone());
            }

            DdlStatement::DropColumn { table, column } => {
                let t = self.table_mut(table)?;
                let idx = t
                    .columns
                    .iter()
                    .position(|c| c.name == *column)
                    .ok_or_else(|| missing_column(column, table))?;
                t.columns.remove(idx);

                // Objects over the column are dropped with it.
                let uses = |cols: &[String]| cols.iter().any(|c| c == column);
                t.indexes.retain(|i| !uses(&i.columns));
                t.foreign_keys.retain(|fk| !uses(&fk.columns));
                t.unique_constraints.retain(|uc| !uses(&uc.columns));
                t.primary_key.retain(|c| c != column);
            }

            DdlStatement::RenameColumn {
                table,
                old_name,
                new_name,
            } => {
                let t = self.table_mut(table)?;
                let col = t
                    .get_column_mut(old_name)
                    .ok_or_else(|| missing_column(old_name, table))?;
                col.name = new_name.clone();

                let rename = |cols: &mut Vec<String>| {
                    for c in cols.iter_mut().filter(|c| *c == old_name) {
                        *c = new_name.clone();
                    }
                };
                rename(&mut t.primary_key);
                t.indexes.iter_mut().for_each(|i| rename(&mut i.columns));
                t.foreign_keys.iter_mut().for_each(|fk| rename(&mut fk.columns));
                t.unique_constraints
                    .iter_mut()
                    .for_each(|uc| rename(&mut uc.columns));
            }

            DdlStatement::AlterColumn {
                table,
                column,
                change,
            } => {
                let t = self.table_mut(table)?;
                let col = t
                    .get_column_mut(column)
                    .ok_or_else(|| missing_column(column, table))?;

                match change {
                    AlterColumnChange::SetType(sql_type) => col.sql_type = sql_type.clone(),
                    AlterColumnChange::SetNullable(nullable) => col.nullable = *nullable,
                    AlterColumnChange::SetDefault(default) => col.default = default.clone(),
                    AlterColumnChange::DropDefault => {
                        col.default = crate::schema::DefaultValue::None;
                    }
                }
            }

            DdlStatement::CreateIndex { table, index } => {
                let t = self.table_mut(table)?;
                if t.get_index(&index.name).is_some() {
                    return Err(MigrateError::InvalidState(format!(
                        "Index '{}' already exists on table '{}'",
                        index.name, table
                    )));
                }
                t.indexes.push(index.clone());
            }

            DdlStatement::DropIndex { table, name, .. } => {
                // Indexes the database creates implicitly are not tracked, so
                // an unknown name is not an error here.
                for t in &mut self.schema.tables {
                    if table.as_ref().is_some_and(|table_name| t.name != *table_name) {
                        continue;
                    }
                    let before = t.indexes.len() + t.unique_constraints.len();
                    t.indexes.retain(|i| i.name != *name);
                    // A unique constraint goes with its backing index.
                    t.unique_constraints.retain(|uc| uc.name != *name);
                    if t.indexes.len() + t.unique_constraints.len() != before {
                        break;
                    }
                }
            }

            DdlStatement::AddPrimaryKey { table, columns } => {
                let t = self.table_mut(table)?;
                for column in columns {
                    if t.get_column(column).is_none() {
                        return Err(missing_column(column, table));
                    }
                }
                for column in &mut t.columns {
                    column.primary_key = columns.contains(&column.name);
                    if column.primary_key {
                        column.nullable = false;
                    }
                }
                t.primary_key = columns.clone();
            }

            DdlStatement::AddForeignKey { table, foreign_key } => {
                let t = self.table_mut(table)?;
                for column in &foreign_key.columns {
                    if t.get_column(column).is_none() {
                        return Err(missing_column(column, table));
                    }
                }
                t.foreign_keys.push(foreign_key.clone());
            }

            DdlStatement::AddUnique {
                table,
                name,
                columns,
            } => {
                let t = self.table_mut(table)?;
                t.unique_constraints.push(UniqueConstraint {
                    name: name.clone(),
                    columns: columns.clone(),
                });
                // CockroachDB backs every unique constraint with an index of the same name.
                t.indexes.push(IndexSchema {
                    name: name.clone(),
                    columns: columns.clone(),
                    unique: true,
                    condition: None,
                });
            }

            DdlStatement::DropConstraint { table, name, .. } => {
                let t = self.table_mut(table)?;
                if is_primary_index_name(table, name) {
                    t.primary_key.clear();
                    t.columns.iter_mut().for_each(|c| c.primary_key = false);
                }
                t.foreign_keys.retain(|fk| fk.name != *name);
                t.unique_constraints.retain(|uc| uc.name != *name);
                t.indexes.retain(|i| !(i.unique && i.name == *name));
                self.validated.remove(&(table.clone(), name.clone()));
            }

            DdlStatement::ValidateConstraint { table, name } => {
                let t = self
                    .schema
                    .get_table(table)
                    .ok_or_else(|| missing_table(table))?;
                let exists = t.get_foreign_key(name).is_some()
                    || t.unique_constraints.iter().any(|uc| uc.name == *name);
                if !exists {
                    return Err(MigrateError::InvalidState(format!(
                        "Constraint '{}' does not exist in table '{}'",
                        name, table
                    )));
                }
                self.validated.insert((table.clone(), name.clone()));
            }

            DdlStatement::CopyRows {
                target,
                source,
                columns,
            } => {
                for table in [source, target] {
                    let t = self
                        .schema
                        .get_table(table)
                        .ok_or_else(|| missing_table(table))?;
                    for column in columns {
                        if t.get_column(column).is_none() {
                            return Err(missing_column(column, table));
                        }
                    }
                }
            }

            // Raw SQL may have changed any table.
            DdlStatement::Raw(_) => self.invalidate_all(),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnReference, ColumnSchema, ForeignKeySchema, SqlType};

    fn users() -> TableSchema {
        TableSchema::new("users")
            .column(ColumnSchema::new("id", SqlType::BigInt).primary_key())
            .column(ColumnSchema::new("email", SqlType::Varchar(255)))
    }

    fn state_with_users() -> SchemaState {
        let mut state = SchemaState::new();
        state
            .apply(&DdlStatement::CreateTable {
                table: users(),
                if_not_exists: false,
            })
            .unwrap();
        state
    }

    #[test]
    fn test_create_table() {
        let state = state_with_users();
        let users = state.table("users").unwrap();
        assert_eq!(users.columns.len(), 2);
        assert_eq!(users.primary_key, vec!["id"]);
    }

    #[test]
    fn test_duplicate_table_error() {
        let mut state = state_with_users();
        let result = state.apply(&DdlStatement::CreateTable {
            table: users(),
            if_not_exists: false,
        });
        assert!(matches!(result, Err(MigrateError::InvalidState(_))));
    }

    #[test]
    fn test_inline_reference_becomes_foreign_key() {
        let mut state = state_with_users();
        state
            .apply(&DdlStatement::AddColumn {
                table: "users".to_string(),
                column: ColumnSchema::new("org_id", SqlType::BigInt)
                    .references(ColumnReference::new("orgs", "id")),
            })
            .unwrap();

        let users = state.table("users").unwrap();
        assert!(users.get_foreign_key("users_org_id_fkey").is_some());
    }

    #[test]
    fn test_drop_table_cascade_removes_dependent_foreign_keys() {
        let mut state = state_with_users();
        state
            .apply(&DdlStatement::CreateTable {
                table: TableSchema::new("posts")
                    .column(ColumnSchema::new("id", SqlType::BigInt).primary_key())
                    .column(
                        ColumnSchema::new("author_id", SqlType::BigInt)
                            .references(ColumnReference::new("users", "id")),
                    ),
                if_not_exists: false,
            })
            .unwrap();
        assert_eq!(state.table("posts").unwrap().foreign_keys.len(), 1);

        state
            .apply(&DdlStatement::DropTable {
                name: "users".to_string(),
                if_exists: false,
                cascade: true,
            })
            .unwrap();

        assert!(state.table("users").is_none());
        assert!(state.table("posts").unwrap().foreign_keys.is_empty());
    }

    #[test]
    fn test_unique_constraint_has_backing_index() {
        let mut state = state_with_users();
        state
            .apply(&DdlStatement::AddUnique {
                table: "users".to_string(),
                name: "users_email_key".to_string(),
                columns: vec!["email".to_string()],
            })
            .unwrap();

        let index = state
            .table("users")
            .unwrap()
            .get_index("users_email_key")
            .unwrap();
        assert!(index.unique);

        state
            .apply(&DdlStatement::DropIndex {
                table: Some("users".to_string()),
                name: "users_email_key".to_string(),
                if_exists: false,
            })
            .unwrap();
        assert!(state.table("users").unwrap().unique_constraints.is_empty());
    }

    #[test]
    fn test_validate_requires_existing_constraint() {
        let mut state = state_with_users();
        let result = state.apply(&DdlStatement::ValidateConstraint {
            table: "users".to_string(),
            name: "nope".to_string(),
        });
        assert!(matches!(result, Err(MigrateError::InvalidState(_))));
    }

    #[test]
    fn test_validate_marks_constraint() {
        let mut state = state_with_users();
        state
            .apply(&DdlStatement::AddColumn {
                table: "users".to_string(),
                column: ColumnSchema::new("org_id", SqlType::BigInt),
            })
            .unwrap();
        state
            .apply(&DdlStatement::AddForeignKey {
                table: "users".to_string(),
                foreign_key: ForeignKeySchema {
                    name: "users_org_fk".to_string(),
                    columns: vec!["org_id".to_string()],
                    references_table: "orgs".to_string(),
                    references_columns: vec!["id".to_string()],
                    on_delete: None,
                    on_update: None,
                },
            })
            .unwrap();
        assert!(!state.is_validated("users", "users_org_fk"));

        state
            .apply(&DdlStatement::ValidateConstraint {
                table: "users".to_string(),
                name: "users_org_fk".to_string(),
            })
            .unwrap();
        assert!(state.is_validated("users", "users_org_fk"));
    }

    #[test]
    fn test_rename_column_updates_key_lists() {
        let mut state = state_with_users();
        state
            .apply(&DdlStatement::RenameColumn {
                table: "users".to_string(),
                old_name: "id".to_string(),
                new_name: "user_id".to_string(),
            })
            .unwrap();

        let users = state.table("users").unwrap();
        assert_eq!(users.primary_key, vec!["user_id"]);
        assert!(users.get_column("id").is_none());
    }

    #[test]
    fn test_add_primary_key_replaces_key() {
        let mut state = state_with_users();
        state
            .apply(&DdlStatement::AddPrimaryKey {
                table: "users".to_string(),
                columns: vec!["email".to_string()],
            })
            .unwrap();

        let users = state.table("users").unwrap();
        assert_eq!(users.primary_key, vec!["email"]);
        assert!(!users.get_column("id").unwrap().primary_key);
        assert!(!users.get_column("email").unwrap().nullable);
    }

    #[test]
    fn test_reflected_tables_have_unknown_indexes() {
        let mut state = state_with_users();
        state.track(TableSchema::new("legacy").column(ColumnSchema::new("id", SqlType::BigInt)));

        assert!(state.knows_indexes("users"));
        assert!(!state.knows_indexes("legacy"));
        assert!(!state.knows_indexes("missing"));

        // Unknown objects of a reflected table can still be dropped.
        state
            .apply(&DdlStatement::DropIndex {
                table: Some("legacy".to_string()),
                name: "legacy_id_idx".to_string(),
                if_exists: false,
            })
            .unwrap();
        state
            .apply(&DdlStatement::DropConstraint {
                table: "legacy".to_string(),
                name: "legacy_ref_fkey".to_string(),
                cascade: false,
            })
            .unwrap();
    }

    #[test]
    fn test_copy_rows_checks_columns() {
        let mut state = state_with_users();
        let result = state.apply(&DdlStatement::CopyRows {
            target: "users".to_string(),
            source: "users".to_string(),
            columns: vec!["missing".to_string()],
        });
        assert!(matches!(result, Err(MigrateError::InvalidState(_))));
    }

    #[test]
    fn test_tracks_only_known_tables() {
        let state = state_with_users();
        assert!(state.tracks(&DdlStatement::DropColumn {
            table: "users".to_string(),
            column: "email".to_string(),
        }));
        assert!(!state.tracks(&DdlStatement::DropColumn {
            table: "elsewhere".to_string(),
            column: "email".to_string(),
        }));
        assert!(state.tracks(&DdlStatement::Raw("SELECT 1".to_string())));
    }

    #[test]
    fn test_raw_sql_marks_tables_stale() {
        let mut state = state_with_users();
        state
            .apply(&DdlStatement::Raw(
                "ALTER TABLE users ADD COLUMN extra INT".to_string(),
            ))
            .unwrap();

        assert!(state.is_stale("users"));
        assert!(!state.knows_indexes("users"));

        // Not checked against the stale definition, and not recorded.
        state
            .apply(&DdlStatement::DropColumn {
                table: "users".to_string(),
                column: "extra".to_string(),
            })
            .unwrap();
        assert_eq!(state.table("users").unwrap().columns.len(), 2);

        let mut reloaded = users();
        reloaded.columns.push(ColumnSchema::new("extra", SqlType::Integer));
        state.track(reloaded);
        assert!(!state.is_stale("users"));
        assert_eq!(state.table("users").unwrap().columns.len(), 3);
    }

    #[test]
    fn test_stale_table_can_be_recreated_and_renamed() {
        let mut state = state_with_users();
        state.invalidate("users");
        state.invalidate("missing");
        assert!(!state.is_stale("missing"));

        state
            .apply(&DdlStatement::RenameTable {
                old_name: "users".to_string(),
                new_name: "accounts".to_string(),
            })
            .unwrap();
        assert!(state.is_stale("accounts"));

        state
            .apply(&DdlStatement::CreateTable {
                table: TableSchema::new("accounts")
                    .column(ColumnSchema::new("id", SqlType::BigInt).primary_key()),
                if_not_exists: false,
            })
            .unwrap();
        assert!(!state.is_stale("accounts"));
        assert!(state.knows_indexes("accounts"));
        assert_eq!(state.table("accounts").unwrap().columns.len(), 1);
    }
}
