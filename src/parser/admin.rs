use super::common::{identifier, keyword, name_or_string, string_literal, ws};
use super::statement::StatementKind;
use crate::core::Privilege;
use nom::{
    branch::alt,
    character::complete::{char, multispace1},
    combinator::{map, map_opt, opt, value},
    multi::separated_list1,
    sequence::{pair, tuple},
    IResult,
};

/// `CREATE USER name IDENTIFIED BY 'password' [SUPERUSER]`
pub fn create_user(input: &str) -> IResult<&str, StatementKind> {
    map(
        tuple((
            keyword("CREATE"),
            ws(keyword("USER")),
            name_or_string,
            ws(keyword("IDENTIFIED")),
            keyword("BY"),
            ws(string_literal),
            opt(keyword("SUPERUSER")),
        )),
        |(_, _, username, _, _, password, superuser)| StatementKind::CreateUser {
            username,
            password,
            is_superuser: superuser.is_some(),
        },
    )(input)
}

fn privilege_list(input: &str) -> IResult<&str, Vec<Privilege>> {
    separated_list1(
        ws(char(',')),
        map_opt(
            pair(identifier, opt(pair(multispace1, keyword("PRIVILEGES")))),
            |(name, _)| Privilege::from_name(&name),
        ),
    )(input)
}

/// `ON db` / `ON *`; `None` means the session's own database
fn target_database(input: &str) -> IResult<&str, Option<String>> {
    let (input, _) = ws(keyword("ON"))(input)?;
    alt((value(None, char('*')), map(identifier, Some)))(input)
}

/// `GRANT priv[, ...] ON db TO user`
pub fn grant(input: &str) -> IResult<&str, StatementKind> {
    map(
        tuple((
            keyword("GRANT"),
            multispace1,
            privilege_list,
            target_database,
            ws(keyword("TO")),
            name_or_string,
        )),
        |(_, _, privileges, database, _, username)| StatementKind::Grant {
            privileges,
            database,
            username,
        },
    )(input)
}

/// `REVOKE priv[, ...] ON db FROM user`
pub fn revoke(input: &str) -> IResult<&str, StatementKind> {
    map(
        tuple((
            keyword("REVOKE"),
            multispace1,
            privilege_list,
            target_database,
            ws(keyword("FROM")),
            name_or_string,
        )),
        |(_, _, privileges, database, _, username)| StatementKind::Revoke {
            privileges,
            database,
            username,
        },
    )(input)
}
