use crate::core::{Privilege, SessionId, Value};
use crate::transaction::{AccessMode, Behavior};

/// Normalized leading verb of a statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandTag {
    Select,
    Insert,
    Replace,
    Update,
    Delete,
    Create,
    Alter,
    Drop,
    Pragma,
    Vacuum,
    Attach,
    Detach,
    Analyze,
    Reindex,
    Explain,
    With,
    Begin,
    Commit,
    Rollback,
    Savepoint,
    Release,
    Set,
    Show,
    Kill,
    Do,
    Grant,
    Revoke,
    Other(String),
}

/// What the privilege gate must see before a statement runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeRequirement {
    None,
    Privilege(Privilege),
    /// Every listed privilege is needed
    All(&'static [Privilege]),
    Superuser,
}

impl CommandTag {
    #[must_use]
    pub fn from_keyword(word: &str) -> Self {
        match word.to_uppercase().as_str() {
            "SELECT" | "VALUES" => Self::Select,
            "INSERT" => Self::Insert,
            "REPLACE" => Self::Replace,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "CREATE" => Self::Create,
            "ALTER" => Self::Alter,
            "DROP" => Self::Drop,
            "PRAGMA" => Self::Pragma,
            "VACUUM" => Self::Vacuum,
            "ATTACH" => Self::Attach,
            "DETACH" => Self::Detach,
            "ANALYZE" => Self::Analyze,
            "REINDEX" => Self::Reindex,
            "EXPLAIN" => Self::Explain,
            "WITH" => Self::With,
            "BEGIN" | "START" => Self::Begin,
            "COMMIT" | "END" => Self::Commit,
            "ROLLBACK" => Self::Rollback,
            "SAVEPOINT" => Self::Savepoint,
            "RELEASE" => Self::Release,
            "SET" => Self::Set,
            "SHOW" => Self::Show,
            "KILL" => Self::Kill,
            "DO" => Self::Do,
            "GRANT" => Self::Grant,
            "REVOKE" => Self::Revoke,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Replace => "REPLACE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Create => "CREATE",
            Self::Alter => "ALTER",
            Self::Drop => "DROP",
            Self::Pragma => "PRAGMA",
            Self::Vacuum => "VACUUM",
            Self::Attach => "ATTACH",
            Self::Detach => "DETACH",
            Self::Analyze => "ANALYZE",
            Self::Reindex => "REINDEX",
            Self::Explain => "EXPLAIN",
            Self::With => "WITH",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Rollback => "ROLLBACK",
            Self::Savepoint => "SAVEPOINT",
            Self::Release => "RELEASE",
            Self::Set => "SET",
            Self::Show => "SHOW",
            Self::Kill => "KILL",
            Self::Do => "DO",
            Self::Grant => "GRANT",
            Self::Revoke => "REVOKE",
            Self::Other(word) => word,
        }
    }

    /// Produces rows
    #[must_use]
    pub const fn is_query(&self) -> bool {
        matches!(self, Self::Select | Self::Pragma | Self::Explain | Self::With | Self::Show)
    }

    /// Changes the database; the engine's own read-only check refines this for native statements
    #[must_use]
    pub const fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Insert
                | Self::Replace
                | Self::Update
                | Self::Delete
                | Self::Create
                | Self::Alter
                | Self::Drop
                | Self::Vacuum
                | Self::Analyze
                | Self::Reindex
        )
    }

    /// VACUUM, ATTACH and DETACH refuse to run inside a SQLite transaction
    #[must_use]
    pub const fn forbids_transaction(&self) -> bool {
        matches!(self, Self::Vacuum | Self::Attach | Self::Detach)
    }

    #[must_use]
    pub const fn required_privilege(&self) -> PrivilegeRequirement {
        match self {
            Self::Select | Self::With | Self::Explain => PrivilegeRequirement::Privilege(Privilege::Select),
            Self::Insert => PrivilegeRequirement::Privilege(Privilege::Insert),
            // REPLACE deletes the rows it conflicts with
            Self::Replace => PrivilegeRequirement::All(&[Privilege::Insert, Privilege::Delete]),
            Self::Update => PrivilegeRequirement::Privilege(Privilege::Update),
            Self::Delete => PrivilegeRequirement::Privilege(Privilege::Delete),
            Self::Create => PrivilegeRequirement::Privilege(Privilege::Create),
            Self::Alter | Self::Analyze | Self::Reindex => PrivilegeRequirement::Privilege(Privilege::Alter),
            Self::Drop => PrivilegeRequirement::Privilege(Privilege::Drop),
            Self::Pragma => PrivilegeRequirement::Privilege(Privilege::Pragma),
            Self::Vacuum => PrivilegeRequirement::Privilege(Privilege::Vacuum),
            Self::Attach | Self::Detach => PrivilegeRequirement::Privilege(Privilege::Attach),
            Self::Begin
            | Self::Commit
            | Self::Rollback
            | Self::Savepoint
            | Self::Release
            | Self::Set
            | Self::Show
            | Self::Kill
            | Self::Do => PrivilegeRequirement::None,
            Self::Grant | Self::Revoke | Self::Other(_) => PrivilegeRequirement::Superuser,
        }
    }
}

impl std::fmt::Display for CommandTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parts of `INSERT ... RETURNING` needed by the watermark emulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturningSpec {
    pub schema: Option<String>,
    pub table: String,
    /// Explicit column list, empty when the INSERT has none
    pub columns: Vec<String>,
    /// `INSERT ... DEFAULT VALUES`
    pub default_values: bool,
    /// The INSERT with its RETURNING clause cut off
    pub insert_sql: String,
    /// Result expressions, used verbatim in the follow-up SELECT
    pub returning: String,
    /// The column list names rowid, oid or _rowid_
    pub explicit_rowid: bool,
}

impl ReturningSpec {
    /// Quoted `"schema"."table"` for synthesized queries
    #[must_use]
    pub fn qualified_table(&self) -> String {
        let quote = |s: &str| format!("\"{}\"", s.replace('"', "\"\""));
        match &self.schema {
            Some(schema) => format!("{}.{}", quote(schema), quote(&self.table)),
            None => quote(&self.table),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// Passed to SQLite as-is
    Native,
    InsertReturning(ReturningSpec),
    /// `SELECT SLEEP(n)` / `DO SLEEP(n)`; `None` for NULL
    Sleep { seconds: Option<f64> },
    Begin {
        access: Option<AccessMode>,
        behavior: Option<Behavior>,
    },
    Commit,
    Rollback,
    Savepoint(String),
    Release(String),
    RollbackTo(String),
    SetTransaction {
        access: Option<AccessMode>,
        behavior: Option<Behavior>,
    },
    SetAutocommit(bool),
    SetReadOnly(bool),
    ShowProcessList,
    Kill {
        session: SessionId,
        query_only: bool,
    },
    CreateUser {
        username: String,
        password: String,
        is_superuser: bool,
    },
    Grant {
        privileges: Vec<Privilege>,
        database: Option<String>,
        username: String,
    },
    Revoke {
        privileges: Vec<Privilege>,
        database: Option<String>,
        username: String,
    },
}

/// A classified statement, ready to be turned into an executable one
#[derive(Debug, Clone, PartialEq)]
pub struct StatementDescriptor {
    pub sql: String,
    pub command: CommandTag,
    pub kind: StatementKind,
    pub params: Vec<Value>,
}

impl StatementDescriptor {
    #[must_use]
    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub const fn is_query(&self) -> bool {
        match self.kind {
            StatementKind::InsertReturning(_) | StatementKind::Sleep { .. } | StatementKind::ShowProcessList => true,
            _ => self.command.is_query(),
        }
    }

    /// Handled by the server itself, outside the statement engine
    #[must_use]
    pub const fn is_administrative(&self) -> bool {
        matches!(
            self.kind,
            StatementKind::CreateUser { .. } | StatementKind::Grant { .. } | StatementKind::Revoke { .. }
        )
    }

    #[must_use]
    pub const fn required_privilege(&self) -> PrivilegeRequirement {
        match self.kind {
            StatementKind::Sleep { .. } | StatementKind::ShowProcessList => PrivilegeRequirement::None,
            StatementKind::CreateUser { .. } | StatementKind::Grant { .. } | StatementKind::Revoke { .. } => {
                PrivilegeRequirement::Superuser
            }
            _ => self.command.required_privilege(),
        }
    }
}
