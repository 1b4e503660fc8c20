use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{alpha1, char, digit1, multispace0, multispace1},
    combinator::{map, map_res, opt, recognize},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

pub fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

/// Keyword that must be followed by a word boundary
pub fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    move |input: &'a str| {
        let (rest, matched) = tag_no_case(word)(input)?;
        if rest.chars().next().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)));
        }
        Ok((rest, matched))
    }
}

pub fn identifier(input: &str) -> IResult<&str, String> {
    alt((
        map(delimited(char('"'), take_while1(|c| c != '"'), char('"')), str::to_string),
        map(delimited(char('`'), take_while1(|c| c != '`'), char('`')), str::to_string),
        map(delimited(char('['), take_while1(|c| c != ']'), char(']')), str::to_string),
        map(
            recognize(pair(
                alt((alpha1, tag("_"))),
                take_while(|c: char| c.is_alphanumeric() || c == '_' || c == '$'),
            )),
            str::to_string,
        ),
    ))(input)
}

/// `[schema.]name`
pub fn qualified_name(input: &str) -> IResult<&str, (Option<String>, String)> {
    let (input, first) = identifier(input)?;
    let (input, second) = opt(preceded(char('.'), identifier))(input)?;
    Ok(match second {
        Some(name) => (input, (Some(first), name)),
        None => (input, (None, first)),
    })
}

pub fn string_literal(input: &str) -> IResult<&str, String> {
    let (mut rest, _) = char('\'')(input)?;
    let mut out = String::new();
    loop {
        let Some(idx) = rest.find('\'') else {
            return Err(nom::Err::Error(nom::error::Error::new(rest, nom::error::ErrorKind::Char)));
        };
        out.push_str(&rest[..idx]);
        rest = &rest[idx + 1..];
        if let Some(after) = rest.strip_prefix('\'') {
            out.push('\'');
            rest = after;
        } else {
            return Ok((rest, out));
        }
    }
}

/// Identifier or quoted string, as MySQL accepts for user names
pub fn name_or_string(input: &str) -> IResult<&str, String> {
    alt((string_literal, identifier))(input)
}

pub fn unsigned(input: &str) -> IResult<&str, u64> {
    map_res(digit1, str::parse::<u64>)(input)
}

/// Decimal number with optional sign and fraction
pub fn number(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize(tuple((
            opt(alt((char('-'), char('+')))),
            digit1,
            opt(pair(char('.'), digit1)),
        ))),
        str::parse::<f64>,
    )(input)
}

/// `= value` or `TO value`
pub fn assignment(input: &str) -> IResult<&str, ()> {
    map(alt((ws(tag("=")), delimited(multispace1, keyword("TO"), multispace1))), |_| ())(input)
}

/// Boolean setting value: 0/1, ON/OFF, TRUE/FALSE
pub fn flag(input: &str) -> IResult<&str, bool> {
    alt((
        map(alt((tag("1"), keyword("ON"), keyword("TRUE"))), |_| true),
        map(alt((tag("0"), keyword("OFF"), keyword("FALSE"))), |_| false),
    ))(input)
}

/// Byte offset of `word` at nesting depth zero, outside quotes and comments
pub fn find_top_level_keyword(sql: &str, word: &str) -> Option<usize> {
    let bytes = sql.as_bytes();
    let mut depth = 0i32;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            q @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() && bytes[i] != q {
                    i += 1;
                }
            }
            b'[' => {
                while i < bytes.len() && bytes[i] != b']' {
                    i += 1;
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 1;
            }
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ if depth == 0 && is_word_at(sql, i, word) => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

fn is_word_at(sql: &str, at: usize, word: &str) -> bool {
    let bytes = sql.as_bytes();
    let end = at + word.len();
    if end > bytes.len() || !sql.is_char_boundary(at) || !sql.is_char_boundary(end) {
        return false;
    }
    let boundary = |b: u8| !(b.is_ascii_alphanumeric() || b == b'_');
    sql[at..end].eq_ignore_ascii_case(word)
        && (at == 0 || boundary(bytes[at - 1]))
        && bytes.get(end).is_none_or(|b| boundary(*b))
}
