//! Compressed integer-set ("idset") grammar shared by the constraint
//! evaluator's `ranks` predicate (spec §6.2) and the emitters' range
//! compression rule (spec §4.7).
//!
//! Grammar: `idset = run ("," run)*`, `run = int | int "-" int`. Encoding
//! always emits sorted, deduplicated runs; singleton runs never carry a
//! dash. Decoding accepts out-of-order or overlapping runs and folds them.

use std::collections::BTreeSet;

use crate::error::CoreError;

/// Parse a compressed idset string (`"0-3,5,9-9"`) into a sorted, deduped
/// vector of ids. `9-9` collapses to the singleton `9`.
pub fn decode(s: &str) -> Result<Vec<u32>, CoreError> {
    let mut set = BTreeSet::new();
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    for run in trimmed.split(',') {
        let run = run.trim();
        if run.is_empty() {
            return Err(CoreError::invalid_input(format!("empty run in idset '{s}'")));
        }
        match run.split_once('-') {
            Some((lo, hi)) => {
                let lo: u32 = lo
                    .trim()
                    .parse()
                    .map_err(|_| CoreError::invalid_input(format!("bad idset run '{run}'")))?;
                let hi: u32 = hi
                    .trim()
                    .parse()
                    .map_err(|_| CoreError::invalid_input(format!("bad idset run '{run}'")))?;
                if lo > hi {
                    return Err(CoreError::invalid_input(format!(
                        "descending idset run '{run}'"
                    )));
                }
                set.extend(lo..=hi);
            }
            None => {
                let v: u32 = run
                    .parse()
                    .map_err(|_| CoreError::invalid_input(format!("bad idset entry '{run}'")))?;
                set.insert(v);
            }
        }
    }
    Ok(set.into_iter().collect())
}

/// Compress a set of ids into the canonical run-length encoded string.
/// `compress(decode(s))` is idempotent on an already-canonical `s`, and
/// `compress` is the left inverse of `decode` up to sort+dedup — i.e.
/// `decode(compress(ids))` reproduces the sorted unique input set.
pub fn compress<I: IntoIterator<Item = u32>>(ids: I) -> String {
    let set: BTreeSet<u32> = ids.into_iter().collect();
    let mut runs = Vec::new();
    let mut iter = set.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while let Some(&next) = iter.peek() {
            if next == end + 1 {
                end = next;
                iter.next();
            } else {
                break;
            }
        }
        if start == end {
            runs.push(start.to_string());
        } else {
            runs.push(format!("{start}-{end}"));
        }
    }
    runs.join(",")
}

/// Expand an `host[lo-hi,lo2-hi2]`-shaped hostlist entry into individual
/// hostnames, e.g. `"foo[2-4]"` -> `["foo2", "foo3", "foo4"]`. A bare
/// hostname with no bracket expands to itself.
pub fn expand_hostlist(entry: &str) -> Result<Vec<String>, CoreError> {
    let entry = entry.trim();
    let Some(open) = entry.find('[') else {
        return Ok(vec![entry.to_string()]);
    };
    let Some(close) = entry.rfind(']') else {
        return Err(CoreError::invalid_input(format!(
            "unbalanced '[' in hostlist entry '{entry}'"
        )));
    };
    if close < open {
        return Err(CoreError::invalid_input(format!(
            "unbalanced brackets in hostlist entry '{entry}'"
        )));
    }
    let prefix = &entry[..open];
    let body = &entry[open + 1..close];
    let suffix = &entry[close + 1..];
    let ids = decode(body)?;
    Ok(ids
        .into_iter()
        .map(|id| format!("{prefix}{id}{suffix}"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_sorts_and_dedupes() {
        assert_eq!(decode("5,0-3,3").unwrap(), vec![0, 1, 2, 3, 5]);
    }

    #[test]
    fn decode_collapses_singleton_run() {
        assert_eq!(decode("9-9").unwrap(), vec![9]);
    }

    #[test]
    fn decode_empty_string_is_empty_set() {
        assert_eq!(decode("").unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn decode_rejects_descending_run() {
        assert!(decode("5-2").is_err());
    }

    #[test]
    fn compress_emits_runs_and_singletons() {
        assert_eq!(compress([0, 1, 2, 3, 5]), "0-3,5");
        assert_eq!(compress([9]), "9");
        assert_eq!(compress([]), "");
    }

    #[test]
    fn compress_decode_round_trip_is_sorted_unique() {
        let ids = vec![7u32, 1, 1, 3, 4, 5, 9];
        let mut expected: Vec<u32> = ids.clone();
        expected.sort_unstable();
        expected.dedup();
        let round_tripped = decode(&compress(ids)).unwrap();
        assert_eq!(round_tripped, expected);
    }

    #[test]
    fn expand_hostlist_bracket_range() {
        assert_eq!(
            expand_hostlist("foo[2-4]").unwrap(),
            vec!["foo2", "foo3", "foo4"]
        );
    }

    #[test]
    fn expand_hostlist_bare_hostname() {
        assert_eq!(expand_hostlist("foo7").unwrap(), vec!["foo7"]);
    }

    #[test]
    fn expand_hostlist_mixed_list_and_singleton() {
        assert_eq!(
            expand_hostlist("foo[0,2-3]").unwrap(),
            vec!["foo0", "foo2", "foo3"]
        );
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_compress_then_decode_is_sorted_dedup(mut ids in proptest::collection::vec(0u32..500, 0..40)) {
                let encoded = compress(ids.iter().copied());
                let decoded = decode(&encoded).unwrap();
                ids.sort_unstable();
                ids.dedup();
                prop_assert_eq!(decoded, ids);
            }
        }
    }
}
