//! Integer list grammar used on the command line:
//!
//! ```text
//! list := item ("," item)*
//! item := int | int ":" int     (inclusive range)
//! ```

use crate::domain::ChainError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("empty value list")]
    Empty,
    #[error("invalid integer '{0}' in value list")]
    InvalidInteger(String),
    #[error("range '{start}:{end}' runs backwards")]
    Reversed { start: u32, end: u32 },
    #[error("malformed range item '{0}'")]
    Malformed(String),
}

impl From<RangeError> for ChainError {
    fn from(error: RangeError) -> Self {
        ChainError::config("CONFIG.RANGE", error.to_string())
    }
}

pub fn parse_value_list(list: &str) -> Result<Vec<u32>, RangeError> {
    if list.trim().is_empty() {
        return Err(RangeError::Empty);
    }

    let mut values = Vec::new();
    for item in list.split(',') {
        let item = item.trim();
        if item.is_empty() {
            return Err(RangeError::Malformed(list.to_string()));
        }

        match item.split_once(':') {
            Some((start, end)) => {
                if end.contains(':') {
                    return Err(RangeError::Malformed(item.to_string()));
                }
                let start = parse_integer(start)?;
                let end = parse_integer(end)?;
                if end < start {
                    return Err(RangeError::Reversed { start, end });
                }
                values.extend(start..=end);
            }
            None => values.push(parse_integer(item)?),
        }
    }
    Ok(values)
}

fn parse_integer(token: &str) -> Result<u32, RangeError> {
    let token = token.trim();
    token
        .parse::<u32>()
        .map_err(|_| RangeError::InvalidInteger(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{RangeError, parse_value_list};

    #[test]
    fn accepts_single_values_lists_and_inclusive_ranges() {
        assert_eq!(parse_value_list("7").unwrap(), vec![7]);
        assert_eq!(parse_value_list("1, 4,9").unwrap(), vec![1, 4, 9]);
        assert_eq!(parse_value_list("2:5").unwrap(), vec![2, 3, 4, 5]);
        assert_eq!(parse_value_list("0:1,8").unwrap(), vec![0, 1, 8]);
        assert_eq!(parse_value_list("3:3").unwrap(), vec![3]);
    }

    #[test]
    fn rejects_expressions_outside_the_grammar() {
        assert_eq!(parse_value_list("  "), Err(RangeError::Empty));
        assert_eq!(
            parse_value_list("range(3)"),
            Err(RangeError::InvalidInteger("range(3)".to_string()))
        );
        assert_eq!(
            parse_value_list("5:2"),
            Err(RangeError::Reversed { start: 5, end: 2 })
        );
        assert_eq!(
            parse_value_list("1:2:3"),
            Err(RangeError::Malformed("1:2:3".to_string()))
        );
        assert!(matches!(parse_value_list("1,,2"), Err(RangeError::Malformed(_))));
        assert!(matches!(parse_value_list("-1"), Err(RangeError::InvalidInteger(_))));
    }
}
