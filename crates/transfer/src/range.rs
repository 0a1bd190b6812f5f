//! `Range` header resolution.
//!
//! Only a single `bytes` range is served. Headers that do not parse fall
//! back to the whole file; well-formed ranges outside the file, and range
//! sets with more than one range, are rejected.

use gameshelf_protocol::ByteInterval;

/// Why a `Range` header cannot be served.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("range {header:?} is not satisfiable for a {file_size} byte file")]
    NotSatisfiable { header: String, file_size: u64 },

    #[error("multiple ranges are not supported: {header:?}")]
    MultipleRanges { header: String },
}

enum Parsed {
    Malformed,
    Multiple,
    Single(RangeSpec),
}

enum RangeSpec {
    /// `bytes=a-b`
    Bounded(u64, u64),
    /// `bytes=a-`
    From(u64),
    /// `bytes=-n`
    Suffix(u64),
    /// Digits that do not fit in a u64.
    Overflow,
}

/// Resolves `header` against a file of `file_size` bytes.
///
/// No header, or one outside the `bytes=<start>-<end>`, `bytes=<start>-`,
/// `bytes=-<suffix>` grammar, selects the whole file. An empty file has no
/// interval at all and is always [`RangeError::NotSatisfiable`].
pub fn resolve_range(header: Option<&str>, file_size: u64) -> Result<ByteInterval, RangeError> {
    let raw = header.unwrap_or_default();
    let not_satisfiable = || RangeError::NotSatisfiable {
        header: raw.to_string(),
        file_size,
    };

    let spec = match header.map(parse) {
        None | Some(Parsed::Malformed) => {
            return ByteInterval::full(file_size).ok_or_else(not_satisfiable);
        }
        Some(Parsed::Multiple) => {
            return Err(RangeError::MultipleRanges {
                header: raw.to_string(),
            });
        }
        Some(Parsed::Single(spec)) => spec,
    };

    let last = file_size.checked_sub(1).ok_or_else(not_satisfiable)?;
    let (start, end) = match spec {
        RangeSpec::Bounded(start, end) if start <= end && end <= last => (start, end),
        RangeSpec::From(start) if start <= last => (start, last),
        RangeSpec::Suffix(len) if len > 0 => (file_size.saturating_sub(len), last),
        _ => return Err(not_satisfiable()),
    };
    Ok(ByteInterval::new(start, end))
}

fn parse(header: &str) -> Parsed {
    let Some((unit, set)) = header.trim().split_once('=') else {
        return Parsed::Malformed;
    };
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return Parsed::Malformed;
    }
    // A set is only a multi-range request if every element parses.
    let mut specs = Vec::new();
    for part in set.split(',') {
        match parse_spec(part) {
            Some(spec) => specs.push(spec),
            None => return Parsed::Malformed,
        }
    }
    match specs.pop() {
        Some(spec) if specs.is_empty() => Parsed::Single(spec),
        Some(_) => Parsed::Multiple,
        None => Parsed::Malformed,
    }
}

/// One `<start>-<end>` element; `None` when it is outside the grammar.
fn parse_spec(part: &str) -> Option<RangeSpec> {
    let (start, end) = part.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());
    if (start.is_empty() && end.is_empty()) || !is_digits(start) || !is_digits(end) {
        return None;
    }

    let spec = if start.is_empty() {
        end.parse().map_or(RangeSpec::Overflow, RangeSpec::Suffix)
    } else {
        match (start.parse::<u64>(), end) {
            (Err(_), _) => RangeSpec::Overflow,
            (Ok(start), "") => RangeSpec::From(start),
            (Ok(start), end) => end
                .parse()
                .map_or(RangeSpec::Overflow, |end| RangeSpec::Bounded(start, end)),
        }
    };
    Some(spec)
}

/// Empty or ASCII digits only.
fn is_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}
