use super::common::{assignment, flag, identifier, keyword, ws};
use super::statement::StatementKind;
use crate::transaction::{AccessMode, Behavior};
use nom::{
    branch::alt,
    bytes::complete::tag_no_case,
    character::complete::{multispace0, multispace1},
    combinator::{map, opt, value},
    sequence::{pair, preceded, tuple},
    IResult,
};

fn behavior(input: &str) -> IResult<&str, Behavior> {
    alt((
        value(Behavior::Deferred, keyword("DEFERRED")),
        value(Behavior::Immediate, keyword("IMMEDIATE")),
        value(Behavior::Exclusive, keyword("EXCLUSIVE")),
    ))(input)
}

fn access(input: &str) -> IResult<&str, AccessMode> {
    alt((
        value(
            AccessMode::ReadOnly,
            tuple((keyword("READ"), multispace1, keyword("ONLY"))),
        ),
        value(
            AccessMode::ReadWrite,
            tuple((keyword("READ"), multispace1, keyword("WRITE"))),
        ),
    ))(input)
}

/// `BEGIN [DEFERRED|IMMEDIATE|EXCLUSIVE] [TRANSACTION|WORK] [READ ONLY|READ WRITE]`
/// or `START TRANSACTION [READ ONLY|READ WRITE]`
pub fn begin_transaction(input: &str) -> IResult<&str, StatementKind> {
    alt((
        map(
            tuple((
                keyword("BEGIN"),
                opt(ws(behavior)),
                opt(ws(alt((keyword("TRANSACTION"), keyword("WORK"))))),
                opt(ws(access)),
            )),
            |(_, behavior, _, access)| StatementKind::Begin { access, behavior },
        ),
        map(
            tuple((
                keyword("START"),
                ws(keyword("TRANSACTION")),
                opt(ws(access)),
            )),
            |(_, _, access)| StatementKind::Begin { access, behavior: None },
        ),
    ))(input)
}

pub fn commit_transaction(input: &str) -> IResult<&str, StatementKind> {
    value(
        StatementKind::Commit,
        pair(
            alt((keyword("COMMIT"), keyword("END"))),
            opt(ws(alt((keyword("TRANSACTION"), keyword("WORK"))))),
        ),
    )(input)
}

/// `ROLLBACK [TRANSACTION|WORK] TO [SAVEPOINT] name`
pub fn rollback_to_savepoint(input: &str) -> IResult<&str, StatementKind> {
    map(
        tuple((
            keyword("ROLLBACK"),
            opt(ws(alt((keyword("TRANSACTION"), keyword("WORK"))))),
            ws(keyword("TO")),
            opt(ws(keyword("SAVEPOINT"))),
            identifier,
        )),
        |(_, _, _, _, name)| StatementKind::RollbackTo(name),
    )(input)
}

pub fn rollback_transaction(input: &str) -> IResult<&str, StatementKind> {
    value(
        StatementKind::Rollback,
        pair(
            keyword("ROLLBACK"),
            opt(ws(alt((keyword("TRANSACTION"), keyword("WORK"))))),
        ),
    )(input)
}

pub fn savepoint(input: &str) -> IResult<&str, StatementKind> {
    map(preceded(pair(keyword("SAVEPOINT"), multispace1), identifier), StatementKind::Savepoint)(input)
}

pub fn release_savepoint(input: &str) -> IResult<&str, StatementKind> {
    map(
        tuple((
            keyword("RELEASE"),
            multispace1,
            opt(pair(keyword("SAVEPOINT"), multispace1)),
            identifier,
        )),
        |(_, _, _, name)| StatementKind::Release(name),
    )(input)
}

/// `SET [SESSION] TRANSACTION {READ ONLY | READ WRITE | DEFERRED | IMMEDIATE | EXCLUSIVE}`
pub fn set_transaction(input: &str) -> IResult<&str, StatementKind> {
    let (input, _) = tuple((
        keyword("SET"),
        multispace1,
        opt(pair(keyword("SESSION"), multispace1)),
        keyword("TRANSACTION"),
        multispace0,
    ))(input)?;
    alt((
        map(access, |access| StatementKind::SetTransaction {
            access: Some(access),
            behavior: None,
        }),
        map(behavior, |behavior| StatementKind::SetTransaction {
            access: None,
            behavior: Some(behavior),
        }),
    ))(input)
}

/// `SET [SESSION] autocommit = 0|1` and `SET [SESSION] {transaction_read_only|read_only} = 0|1`
pub fn set_variable(input: &str) -> IResult<&str, StatementKind> {
    let (input, _) = tuple((
        keyword("SET"),
        multispace1,
        opt(alt((
            pair(keyword("SESSION"), multispace1),
            pair(tag_no_case("@@session."), multispace0),
            pair(tag_no_case("@@"), multispace0),
        ))),
    ))(input)?;
    alt((
        map(preceded(pair(keyword("autocommit"), assignment), flag), StatementKind::SetAutocommit),
        map(
            preceded(
                pair(alt((keyword("transaction_read_only"), keyword("read_only"))), assignment),
                flag,
            ),
            StatementKind::SetReadOnly,
        ),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_variants() {
        assert_eq!(
            begin_transaction("BEGIN").unwrap().1,
            StatementKind::Begin { access: None, behavior: None }
        );
        assert_eq!(
            begin_transaction("begin immediate transaction").unwrap().1,
            StatementKind::Begin { access: None, behavior: Some(Behavior::Immediate) }
        );
        assert_eq!(
            begin_transaction("START TRANSACTION READ ONLY").unwrap().1,
            StatementKind::Begin { access: Some(AccessMode::ReadOnly), behavior: None }
        );
    }

    #[test]
    fn test_rollback_to() {
        assert_eq!(
            rollback_to_savepoint("ROLLBACK TO SAVEPOINT sp1").unwrap().1,
            StatementKind::RollbackTo("sp1".to_string())
        );
        assert!(rollback_to_savepoint("ROLLBACK").is_err());
    }

    #[test]
    fn test_release() {
        assert_eq!(release_savepoint("RELEASE sp").unwrap().1, StatementKind::Release("sp".into()));
        assert_eq!(
            release_savepoint("RELEASE SAVEPOINT sp").unwrap().1,
            StatementKind::Release("sp".into())
        );
    }

    #[test]
    fn test_set_transaction() {
        assert_eq!(
            set_transaction("SET TRANSACTION READ ONLY").unwrap().1,
            StatementKind::SetTransaction { access: Some(AccessMode::ReadOnly), behavior: None }
        );
        assert_eq!(
            set_transaction("SET SESSION TRANSACTION EXCLUSIVE").unwrap().1,
            StatementKind::SetTransaction { access: None, behavior: Some(Behavior::Exclusive) }
        );
    }

    #[test]
    fn test_set_variable() {
        assert_eq!(set_variable("SET autocommit = 0").unwrap().1, StatementKind::SetAutocommit(false));
        assert_eq!(set_variable("SET @@autocommit=ON").unwrap().1, StatementKind::SetAutocommit(true));
        assert_eq!(
            set_variable("SET SESSION transaction_read_only = 1").unwrap().1,
            StatementKind::SetReadOnly(true)
        );
    }
}
