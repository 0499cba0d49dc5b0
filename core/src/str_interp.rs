//! `#{name}` interpolation for build and run command templates.
//! `##` produces a literal `#`.

use std::{borrow::Borrow, collections::HashMap, hash::Hash};

pub type Result<T = String> = std::result::Result<T, InterpError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterpError {
    #[error("Undefined variable '{0}' at {}", .1+1)]
    UndefinedVar(String, usize),

    #[error("Unclosed brace (found open brace at {})", .0+1)]
    UnclosedBrace(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece<'a> {
    Text(&'a str),
    Var { name: &'a str, at: usize },
}

fn pieces(fmt: &str) -> Result<Vec<Piece<'_>>> {
    let mut res = Vec::new();
    let mut rest = fmt;
    let mut offset = 0;

    while let Some(i) = rest.find('#') {
        res.push(Piece::Text(&rest[..i]));
        let after = &rest[i + 1..];
        if after.starts_with('#') {
            res.push(Piece::Text("#"));
            rest = &after[1..];
            offset += i + 2;
        } else if let Some(body) = after.strip_prefix('{') {
            let brace_at = offset + i + 1;
            let Some(close) = body.find('}') else {
                return Err(InterpError::UnclosedBrace(brace_at));
            };
            res.push(Piece::Var {
                name: &body[..close],
                at: brace_at,
            });
            rest = &body[close + 1..];
            offset = brace_at + close + 2;
        } else {
            res.push(Piece::Text("#"));
            rest = after;
            offset += i + 1;
        }
    }
    res.push(Piece::Text(rest));
    Ok(res)
}

/// Replaces every `#{name}` in `fmt` with `variables[name]`.
pub fn interp<K, V>(fmt: &str, variables: &HashMap<K, V>) -> Result
where
    K: Borrow<str> + Hash + Eq,
    V: AsRef<str>,
{
    let mut res = String::with_capacity(fmt.len() * 2);
    for piece in pieces(fmt)? {
        match piece {
            Piece::Text(s) => res.push_str(s),
            Piece::Var { name, at } => {
                let Some(value) = variables.get(name) else {
                    return Err(InterpError::UndefinedVar(name.to_owned(), at));
                };
                res.push_str(value.as_ref());
            }
        }
    }
    Ok(res)
}

/// Names referenced by `fmt`, in order of appearance.
pub fn variables(fmt: &str) -> Result<Vec<&str>> {
    Ok(pieces(fmt)?
        .into_iter()
        .filter_map(|p| match p {
            Piece::Var { name, .. } => Some(name),
            Piece::Text(_) => None,
        })
        .collect())
}
