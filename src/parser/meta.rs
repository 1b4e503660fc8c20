use super::common::{keyword, number, unsigned, ws};
use super::statement::StatementKind;
use nom::{
    branch::alt,
    character::complete::{char, multispace1},
    combinator::{map, opt, value},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

fn sleep_call(input: &str) -> IResult<&str, Option<f64>> {
    preceded(
        keyword("SLEEP"),
        delimited(
            ws(char('(')),
            alt((map(number, Some), value(None, keyword("NULL")))),
            ws(char(')')),
        ),
    )(input)
}

/// `SELECT SLEEP(n) [AS alias]` or `DO SLEEP(n)`
pub fn sleep(input: &str) -> IResult<&str, StatementKind> {
    let (input, _) = pair(alt((keyword("SELECT"), keyword("DO"))), multispace1)(input)?;
    let (input, seconds) = sleep_call(input)?;
    let (input, _) = opt(tuple((ws(keyword("AS")), super::common::identifier)))(input)?;
    Ok((input, StatementKind::Sleep { seconds }))
}

pub fn show_processlist(input: &str) -> IResult<&str, StatementKind> {
    value(
        StatementKind::ShowProcessList,
        tuple((
            keyword("SHOW"),
            multispace1,
            opt(pair(keyword("FULL"), multispace1)),
            keyword("PROCESSLIST"),
        )),
    )(input)
}

/// `KILL [QUERY | CONNECTION] id`
pub fn kill(input: &str) -> IResult<&str, StatementKind> {
    let (input, _) = pair(keyword("KILL"), multispace1)(input)?;
    let (input, mode) = opt(pair(
        alt((value(true, keyword("QUERY")), value(false, keyword("CONNECTION")))),
        multispace1,
    ))(input)?;
    let (input, session) = unsigned(input)?;
    Ok((
        input,
        StatementKind::Kill {
            session,
            query_only: mode.is_some_and(|(query, _)| query),
        },
    ))
}
