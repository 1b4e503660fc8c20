use super::common::{find_top_level_keyword, identifier, keyword, qualified_name, ws};
use super::statement::{ReturningSpec, StatementKind};
use nom::{
    branch::alt,
    character::complete::{char, multispace0, multispace1},
    combinator::opt,
    multi::separated_list1,
    sequence::{delimited, pair, tuple},
    IResult,
};

const ROWID_ALIASES: [&str; 3] = ["rowid", "oid", "_rowid_"];

fn conflict_clause(input: &str) -> IResult<&str, &str> {
    let (input, _) = pair(keyword("OR"), multispace1)(input)?;
    alt((
        keyword("REPLACE"),
        keyword("ROLLBACK"),
        keyword("ABORT"),
        keyword("FAIL"),
        keyword("IGNORE"),
    ))(input)
}

fn insert_verb(input: &str) -> IResult<&str, ()> {
    let (input, _) = keyword("INSERT")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = opt(pair(conflict_clause, multispace1))(input)?;
    Ok((input, ()))
}

/// `INSERT OR REPLACE ...`
pub fn is_insert_or_replace(sql: &str) -> bool {
    tuple((keyword("INSERT"), multispace1, keyword("OR"), multispace1, keyword("REPLACE")))(sql).is_ok()
}

fn replace_verb(input: &str) -> IResult<&str, ()> {
    let (input, _) = keyword("REPLACE")(input)?;
    let (input, _) = multispace1(input)?;
    Ok((input, ()))
}

/// Target of `INSERT [OR ...] INTO [schema.]table [(columns)]` / `REPLACE INTO ...`
fn insert_target(input: &str) -> IResult<&str, (Option<String>, String, Option<Vec<String>>)> {
    let (input, ()) = alt((insert_verb, replace_verb))(input)?;
    let (input, (_, _, (schema, table), _)) =
        tuple((keyword("INTO"), multispace1, qualified_name, multispace0))(input)?;
    let (input, columns) = opt(delimited(
        char('('),
        separated_list1(char(','), ws(identifier)),
        char(')'),
    ))(input)?;
    Ok((input, (schema, table, columns)))
}

/// Recognizes `INSERT ... RETURNING <exprs>`; plain INSERTs yield `None`
pub fn insert_returning(sql: &str) -> Option<StatementKind> {
    let (rest, (schema, table, columns)) = insert_target(sql).ok()?;
    let default_values = tuple((multispace0, keyword("DEFAULT"), multispace1, keyword("VALUES")))(rest).is_ok();
    let at = find_top_level_keyword(sql, "RETURNING")?;
    let returning = sql[at + "RETURNING".len()..].trim().to_string();
    let insert_sql = sql[..at].trim_end().to_string();
    let columns = columns.unwrap_or_default();
    let explicit_rowid = columns
        .iter()
        .any(|c| ROWID_ALIASES.iter().any(|alias| c.eq_ignore_ascii_case(alias)));
    Some(StatementKind::InsertReturning(ReturningSpec {
        schema,
        table,
        columns,
        default_values,
        insert_sql,
        returning,
        explicit_rowid,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(sql: &str) -> ReturningSpec {
        match insert_returning(sql) {
            Some(StatementKind::InsertReturning(spec)) => spec,
            other => panic!("Expected INSERT ... RETURNING, got {other:?}"),
        }
    }

    #[test]
    fn test_insert_values_returning() {
        let spec = spec("INSERT INTO t(v) VALUES ('a'),('b') RETURNING id, v");
        assert_eq!(spec.table, "t");
        assert_eq!(spec.schema, None);
        assert_eq!(spec.insert_sql, "INSERT INTO t(v) VALUES ('a'),('b')");
        assert_eq!(spec.returning, "id, v");
        assert_eq!(spec.columns, vec!["v".to_string()]);
        assert!(!spec.explicit_rowid);
    }

    #[test]
    fn test_insert_select_returning_with_schema() {
        let spec = spec("INSERT OR REPLACE INTO main.log (msg) SELECT msg FROM staging RETURNING *");
        assert_eq!(spec.schema.as_deref(), Some("main"));
        assert_eq!(spec.table, "log");
        assert_eq!(spec.returning, "*");
        assert_eq!(spec.qualified_table(), "\"main\".\"log\"");
    }

    #[test]
    fn test_explicit_rowid_detected() {
        assert!(spec("INSERT INTO t(rowid, v) VALUES (5, 'x') RETURNING v").explicit_rowid);
        assert!(spec("REPLACE INTO t(_ROWID_, v) VALUES (5, 'x') RETURNING v").explicit_rowid);
    }

    #[test]
    fn test_insert_without_column_list() {
        let spec = spec("INSERT INTO t VALUES (1000, 'a'), (500, 'b') RETURNING id, v");
        assert!(spec.columns.is_empty());
        assert!(!spec.default_values);
        assert!(self::spec("insert into t default values returning id").default_values);
        assert!(!self::spec("INSERT INTO t(v) SELECT 'default values' RETURNING id").default_values);
    }

    #[test]
    fn test_insert_or_replace_detected() {
        assert!(is_insert_or_replace("INSERT OR REPLACE INTO t VALUES (1)"));
        assert!(is_insert_or_replace("insert  or\nreplace into t VALUES (1)"));
        assert!(!is_insert_or_replace("INSERT OR IGNORE INTO t VALUES (1)"));
        assert!(!is_insert_or_replace("INSERT INTO t VALUES (1)"));
    }

    #[test]
    fn test_plain_insert_is_not_returning() {
        assert!(insert_returning("INSERT INTO t(v) VALUES ('returning')").is_none());
        assert!(insert_returning("UPDATE t SET v = 1 RETURNING v").is_none());
    }
}
