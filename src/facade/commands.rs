//! Parser for append batches
//!
//! A batch is a bracketed list of bracketed operations:
//!
//! ```text
//! [[:append 1 10][:append 1 20] [:r 1 nil]]
//! ```
//!
//! Each operation has exactly three tokens, `op key value`. Keys and
//! values stay as the client wrote them; the integer columns of the store
//! reject anything that is not a number when the batch executes.

use crate::common::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// `[:r key nil]`
    Read { key: String },
    /// `[:append key value]`
    Append { key: String, value: String },
}

pub fn parse_batch(document: &str) -> Result<Vec<Op>> {
    let document = document.trim();
    let inner = document
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| Error::MalformedBatch("batch must be enclosed in brackets".into()))?;

    let mut ops = Vec::new();
    let mut rest = inner.trim_start();
    while !rest.is_empty() {
        let body = rest.strip_prefix('[').ok_or_else(|| {
            Error::MalformedBatch(format!("expected '[' before {:?}", excerpt(rest)))
        })?;
        let end = body.find(']').ok_or_else(|| {
            Error::MalformedBatch(format!("unterminated operation {:?}", excerpt(rest)))
        })?;
        ops.push(parse_op(&body[..end])?);
        rest = body[end + 1..].trim_start();
    }

    Ok(ops)
}

fn parse_op(element: &str) -> Result<Op> {
    if element.contains('[') {
        return Err(Error::MalformedBatch(format!(
            "nested brackets in operation [{}]",
            element
        )));
    }

    let tokens: Vec<&str> = element.split_whitespace().collect();
    let [op, key, value] = tokens.as_slice() else {
        return Err(Error::MalformedBatch(format!(
            "expected 3 tokens in [{}], got {}",
            element,
            tokens.len()
        )));
    };

    match *op {
        ":r" => {
            if *value != "nil" {
                return Err(Error::MalformedBatch(format!(
                    "read of {} must carry nil, got {}",
                    key, value
                )));
            }
            Ok(Op::Read {
                key: key.to_string(),
            })
        }
        ":append" => Ok(Op::Append {
            key: key.to_string(),
            value: value.to_string(),
        }),
        other => Err(Error::UnknownOperation(other.to_string())),
    }
}

fn excerpt(s: &str) -> &str {
    match s.char_indices().nth(16) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append(key: &str, value: &str) -> Op {
        Op::Append {
            key: key.into(),
            value: value.into(),
        }
    }

    fn read(key: &str) -> Op {
        Op::Read { key: key.into() }
    }

    #[test]
    fn test_parse_batch() {
        let ops = parse_batch("[[:append 1 10][:append 1 20][:r 1 nil]]").unwrap();
        assert_eq!(ops, vec![append("1", "10"), append("1", "20"), read("1")]);
    }

    #[test]
    fn test_separators_and_padding() {
        let ops = parse_batch("  [ [:r 3 nil]  [ :append  3   4 ] ]\n").unwrap();
        assert_eq!(ops, vec![read("3"), append("3", "4")]);
    }

    #[test]
    fn test_empty_batch() {
        assert!(parse_batch("[]").unwrap().is_empty());
    }

    #[test]
    fn test_tokens_are_kept_verbatim() {
        let ops = parse_batch("[[:append k v]]").unwrap();
        assert_eq!(ops, vec![append("k", "v")]);
    }

    #[test]
    fn test_missing_outer_brackets() {
        for doc in ["", "[", "]", "[:r 1 nil]x", "(:r 1 nil)"] {
            assert!(
                matches!(parse_batch(doc), Err(Error::MalformedBatch(_))),
                "{:?} should be rejected",
                doc
            );
        }
    }

    #[test]
    fn test_bad_elements() {
        for doc in [
            "[[:r 1 nil] :r 2 nil]",
            "[[:r 1 nil]",
            "[[:append 1]]",
            "[[:append 1 2 3]]",
            "[[:append 1 [2]]]",
            "[[:r 1 2]]",
            "[[]]",
        ] {
            assert!(
                matches!(parse_batch(doc), Err(Error::MalformedBatch(_))),
                "{:?} should be rejected",
                doc
            );
        }
    }

    #[test]
    fn test_unknown_operation() {
        let err = parse_batch("[[:r 1 nil][:cas 1 2]]").unwrap_err();
        assert!(matches!(err, Error::UnknownOperation(op) if op == ":cas"));
    }

    #[test]
    fn test_deterministic() {
        let doc = "[[:append 9 1][:r 9 nil][:append 9 2]]";
        assert_eq!(parse_batch(doc).unwrap(), parse_batch(doc).unwrap());
    }
}
