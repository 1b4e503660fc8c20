// Statement classifier: turns SQL text into typed descriptors.
// Only the statements the engine treats specially are parsed; everything else
// is handed to SQLite verbatim.

mod admin;
mod common;
mod dml;
mod meta;
mod statement;
mod transaction;

pub use statement::{CommandTag, PrivilegeRequirement, ReturningSpec, StatementDescriptor, StatementKind};

use crate::core::DatabaseError;
use nom::branch::alt;

fn leading_keyword(sql: &str) -> &str {
    let end = sql
        .find(|c: char| !(c.is_ascii_alphabetic() || c == '_'))
        .unwrap_or(sql.len());
    &sql[..end]
}

/// INSERT OR REPLACE is a REPLACE; a WITH prefix takes the verb of its main statement
fn command_tag(sql: &str) -> CommandTag {
    match CommandTag::from_keyword(leading_keyword(sql)) {
        CommandTag::Insert if dml::is_insert_or_replace(sql) => CommandTag::Replace,
        CommandTag::With => ["SELECT", "VALUES", "INSERT", "REPLACE", "UPDATE", "DELETE"]
            .into_iter()
            .filter_map(|verb| common::find_top_level_keyword(sql, verb).map(|at| (at, verb)))
            .min_by_key(|(at, _)| *at)
            .map_or(CommandTag::With, |(at, verb)| match CommandTag::from_keyword(verb) {
                CommandTag::Insert if dml::is_insert_or_replace(&sql[at..]) => CommandTag::Replace,
                tag => tag,
            }),
        tag => tag,
    }
}

pub fn parse_statement(input: &str) -> Result<StatementDescriptor, DatabaseError> {
    let sql = input.trim().trim_end_matches(';').trim_end();
    if sql.is_empty() {
        return Err(DatabaseError::ParseError("Empty statement".to_string()));
    }

    let command = command_tag(sql);

    let special = alt((
        alt((
            transaction::begin_transaction,
            transaction::commit_transaction,
            transaction::rollback_to_savepoint,
            transaction::rollback_transaction,
            transaction::savepoint,
            transaction::release_savepoint,
            transaction::set_transaction,
            transaction::set_variable,
        )),
        alt((
            meta::sleep,
            meta::show_processlist,
            meta::kill,
            admin::create_user,
            admin::grant,
            admin::revoke,
        )),
    ))(sql);

    let kind = match special {
        Ok((remaining, kind)) if remaining.trim().is_empty() => kind,
        _ => match command {
            CommandTag::Insert | CommandTag::Replace => {
                dml::insert_returning(sql).unwrap_or(StatementKind::Native)
            }
            CommandTag::Set | CommandTag::Kill | CommandTag::Grant | CommandTag::Revoke | CommandTag::Show => {
                return Err(DatabaseError::ParseError(format!("Unsupported {command} statement: {sql}")));
            }
            _ => StatementKind::Native,
        },
    };

    Ok(StatementDescriptor {
        sql: sql.to_string(),
        command,
        kind,
        params: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Privilege;
    use crate::transaction::Behavior;

    #[test]
    fn test_parse_native_select() {
        let stmt = parse_statement("SELECT * FROM t WHERE id = 1;").unwrap();
        assert_eq!(stmt.command, CommandTag::Select);
        assert_eq!(stmt.kind, StatementKind::Native);
        assert_eq!(stmt.sql, "SELECT * FROM t WHERE id = 1");
        assert!(stmt.is_query());
        assert_eq!(stmt.required_privilege(), PrivilegeRequirement::Privilege(Privilege::Select));
    }

    #[test]
    fn test_parse_insert_returning() {
        let stmt = parse_statement("INSERT INTO t(v) VALUES ('a') RETURNING id").unwrap();
        assert_eq!(stmt.command, CommandTag::Insert);
        assert!(matches!(stmt.kind, StatementKind::InsertReturning(_)));
        assert!(stmt.is_query());
    }

    #[test]
    fn test_parse_plain_insert() {
        let stmt = parse_statement("INSERT INTO t(v) VALUES ('a')").unwrap();
        assert_eq!(stmt.kind, StatementKind::Native);
        assert!(!stmt.is_query());
        assert!(stmt.command.is_write());
    }

    #[test]
    fn test_replace_needs_insert_and_delete() {
        let both = PrivilegeRequirement::All(&[Privilege::Insert, Privilege::Delete]);
        assert_eq!(parse_statement("REPLACE INTO t(v) VALUES (1)").unwrap().required_privilege(), both);
        let stmt = parse_statement("insert or replace into t(v) values (1) returning id").unwrap();
        assert_eq!(stmt.command, CommandTag::Replace);
        assert!(matches!(stmt.kind, StatementKind::InsertReturning(_)));
        assert_eq!(stmt.required_privilege(), both);
        assert_eq!(parse_statement("INSERT OR IGNORE INTO t(v) VALUES (1)").unwrap().command, CommandTag::Insert);
    }

    #[test]
    fn test_with_takes_main_statement_verb() {
        let stmt = parse_statement("WITH x AS (SELECT 1) INSERT INTO t SELECT * FROM x").unwrap();
        assert_eq!(stmt.command, CommandTag::Insert);
        assert_eq!(stmt.required_privilege(), PrivilegeRequirement::Privilege(Privilege::Insert));

        let stmt = parse_statement("WITH RECURSIVE d(n) AS (SELECT 1) DELETE FROM t WHERE v IN (SELECT n FROM d)").unwrap();
        assert_eq!(stmt.required_privilege(), PrivilegeRequirement::Privilege(Privilege::Delete));

        let stmt = parse_statement("WITH x AS (DELETE FROM t) UPDATE t SET v = 1").unwrap();
        assert_eq!(stmt.command, CommandTag::Update);

        let stmt = parse_statement("WITH x AS (SELECT 1) SELECT * FROM x").unwrap();
        assert_eq!(stmt.command, CommandTag::Select);
        assert!(stmt.is_query());
    }

    #[test]
    fn test_parse_transaction_control() {
        assert_eq!(
            parse_statement("BEGIN EXCLUSIVE").unwrap().kind,
            StatementKind::Begin { access: None, behavior: Some(Behavior::Exclusive) }
        );
        assert_eq!(parse_statement("commit").unwrap().kind, StatementKind::Commit);
        assert_eq!(parse_statement("ROLLBACK").unwrap().kind, StatementKind::Rollback);
        assert_eq!(
            parse_statement("ROLLBACK TO a").unwrap().kind,
            StatementKind::RollbackTo("a".into())
        );
        assert_eq!(parse_statement("SAVEPOINT a").unwrap().kind, StatementKind::Savepoint("a".into()));
    }

    #[test]
    fn test_parse_sleep_needs_no_privilege() {
        let stmt = parse_statement("SELECT SLEEP(1)").unwrap();
        assert_eq!(stmt.kind, StatementKind::Sleep { seconds: Some(1.0) });
        assert_eq!(stmt.required_privilege(), PrivilegeRequirement::None);
    }

    #[test]
    fn test_parse_admin_statements() {
        let stmt = parse_statement("GRANT SELECT ON main TO bob").unwrap();
        assert!(stmt.is_administrative());
        assert_eq!(stmt.required_privilege(), PrivilegeRequirement::Superuser);
    }

    #[test]
    fn test_parse_unsupported_set() {
        assert!(matches!(
            parse_statement("SET NAMES utf8"),
            Err(DatabaseError::ParseError(_))
        ));
        assert!(parse_statement("   ;").is_err());
    }

    #[test]
    fn test_unknown_command_requires_superuser() {
        let stmt = parse_statement("FROBNICATE everything").unwrap();
        assert_eq!(stmt.command, CommandTag::Other("FROBNICATE".into()));
        assert_eq!(stmt.required_privilege(), PrivilegeRequirement::Superuser);
    }
}
