//! Paired-File Grouping
//!
//! Groups a flat enumeration of files into keyed tuples, the way
//! paired-end sequencing reads are discovered: `sample_R1.fastq` and
//! `sample_R2.fastq` share the key `sample` and pair into one tuple.
//!
//! Recognized member suffixes on the file stem are `_R<n>` and `_<n>`,
//! where `n` is the 1-based member slot. A key with a malformed shape
//! (slot out of range, two files claiming the same slot) is a
//! configuration error; a key still incomplete when the enumeration ends
//! is an orphan, reported as a warning and excluded from the result.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::warn;

use crate::channel::item::Item;
use crate::error::{EngineError, Result};

/// Result of grouping an enumeration of files.
#[derive(Debug)]
pub struct PairingOutcome {
    /// One entry per complete key, in sorted key order. Members are
    /// ordered by their slot.
    pub pairs: Vec<(String, Vec<PathBuf>)>,
    /// Warnings for keys whose member count never reached the expected
    /// arity. These keys emit nothing.
    pub orphans: Vec<String>,
}

impl PairingOutcome {
    /// Converts each complete pair into a `Tuple[key, member...]` item.
    pub fn into_items(self) -> Vec<Item> {
        self.pairs
            .into_iter()
            .map(|(key, members)| {
                let mut fields = vec![Item::Str(key)];
                fields.extend(members.into_iter().map(Item::File));
                Item::Tuple(fields)
            })
            .collect()
    }
}

/// Groups `paths` by shared key, expecting exactly `arity` members per key.
pub fn pair_files(paths: &[PathBuf], arity: usize) -> Result<PairingOutcome> {
    if arity == 0 {
        return Err(EngineError::Configuration(
            "pairing arity must be at least 1".to_string(),
        ));
    }

    // BTreeMap keeps keys sorted so pairs emit deterministically.
    let mut groups: BTreeMap<String, Vec<Option<PathBuf>>> = BTreeMap::new();

    for path in paths {
        let stem = file_key_stem(path);
        let (key, slot) = split_pair_suffix(&stem).ok_or_else(|| {
            EngineError::Configuration(format!(
                "cannot derive a pair key from '{}': no _R<n> or _<n> suffix",
                path.display()
            ))
        })?;

        if slot >= arity {
            return Err(EngineError::Configuration(format!(
                "file '{}' claims member {} but key '{}' expects arity {}",
                path.display(),
                slot + 1,
                key,
                arity
            )));
        }

        let members = groups.entry(key.clone()).or_insert_with(|| vec![None; arity]);
        if members[slot].is_some() {
            return Err(EngineError::Configuration(format!(
                "key '{}' has two files claiming member {}: '{}' and '{}'",
                key,
                slot + 1,
                members[slot].as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
                path.display()
            )));
        }
        members[slot] = Some(path.clone());
    }

    let mut pairs = Vec::new();
    let mut orphans = Vec::new();

    for (key, members) in groups {
        let present = members.iter().filter(|m| m.is_some()).count();
        if present == arity {
            pairs.push((key, members.into_iter().flatten().collect()));
        } else {
            let message = format!(
                "incomplete join for key '{}': observed {} of {} expected members",
                key, present, arity
            );
            warn!("{}", message);
            orphans.push(message);
        }
    }

    Ok(PairingOutcome { pairs, orphans })
}

/// Returns the file name up to the first dot, so multi-part extensions
/// like `.fastq.gz` do not hide the member suffix.
fn file_key_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    match name.split_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => name,
    }
}

/// Splits a stem into (key, zero-based slot) by stripping a trailing
/// `_R<n>` or `_<n>` token. Returns `None` if no such token exists.
fn split_pair_suffix(stem: &str) -> Option<(String, usize)> {
    let digits_start = stem
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + c_len(stem, i))?;
    if digits_start >= stem.len() {
        return None;
    }

    let n: usize = stem[digits_start..].parse().ok()?;
    if n == 0 {
        return None;
    }

    let head = &stem[..digits_start];
    let key = if let Some(k) = head.strip_suffix("_R") {
        k
    } else if let Some(k) = head.strip_suffix('_') {
        k
    } else {
        return None;
    };

    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), n - 1))
}

/// Byte length of the char starting at index `i`.
fn c_len(s: &str, i: usize) -> usize {
    s[i..].chars().next().map(char::len_utf8).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_split_pair_suffix() {
        assert_eq!(
            split_pair_suffix("sample_R1"),
            Some(("sample".to_string(), 0))
        );
        assert_eq!(
            split_pair_suffix("sample_R2"),
            Some(("sample".to_string(), 1))
        );
        assert_eq!(split_pair_suffix("liver_2"), Some(("liver".to_string(), 1)));
        assert_eq!(split_pair_suffix("noslot"), None);
        assert_eq!(split_pair_suffix("bad_R0"), None);
        assert_eq!(split_pair_suffix("_1"), None);
    }

    #[test]
    fn test_pair_complete_keys() {
        let outcome = pair_files(
            &paths(&["/d/a_R1.fastq", "/d/a_R2.fastq", "/d/b_R2.fastq", "/d/b_R1.fastq"]),
            2,
        )
        .unwrap();

        assert_eq!(outcome.pairs.len(), 2);
        assert!(outcome.orphans.is_empty());
        // Sorted keys, members in slot order regardless of arrival order.
        assert_eq!(outcome.pairs[0].0, "a");
        assert_eq!(outcome.pairs[1].0, "b");
        assert_eq!(
            outcome.pairs[1].1,
            paths(&["/d/b_R1.fastq", "/d/b_R2.fastq"])
        );
    }

    #[test]
    fn test_incomplete_key_is_orphan_not_pair() {
        let outcome = pair_files(
            &paths(&["/d/a_1.txt", "/d/a_2.txt", "/d/b_1.txt"]),
            2,
        )
        .unwrap();

        assert_eq!(outcome.pairs.len(), 1);
        assert_eq!(outcome.pairs[0].0, "a");
        assert_eq!(outcome.orphans.len(), 1);
        assert!(outcome.orphans[0].contains("'b'"));
        assert!(outcome.orphans[0].contains("1 of 2"));
    }

    #[test]
    fn test_slot_out_of_range_is_configuration_error() {
        let result = pair_files(&paths(&["/d/a_R3.fastq"]), 2);
        assert!(result.is_err());
        assert!(result.unwrap_err().is_configuration());
    }

    #[test]
    fn test_duplicate_slot_is_configuration_error() {
        // Same key and slot from two distinct files.
        let result = pair_files(&paths(&["/d/a_R1.fastq", "/e/a_R1.fastq"]), 2);
        assert!(result.is_err());
        assert!(result.unwrap_err().is_configuration());
    }

    #[test]
    fn test_unrecognized_suffix_is_configuration_error() {
        let result = pair_files(&paths(&["/d/reads.fastq"]), 2);
        assert!(result.is_err());
    }

    #[test]
    fn test_multi_part_extension() {
        let outcome =
            pair_files(&paths(&["/d/s_R1.fastq.gz", "/d/s_R2.fastq.gz"]), 2).unwrap();
        assert_eq!(outcome.pairs.len(), 1);
        assert_eq!(outcome.pairs[0].0, "s");
    }

    #[test]
    fn test_into_items_builds_keyed_tuples() {
        let outcome = pair_files(&paths(&["/d/a_R1.fq", "/d/a_R2.fq"]), 2).unwrap();
        let items = outcome.into_items();

        assert_eq!(items.len(), 1);
        match &items[0] {
            Item::Tuple(fields) => {
                assert_eq!(fields[0], Item::str("a"));
                assert_eq!(fields.len(), 3);
            }
            other => panic!("expected tuple, got {:?}", other),
        }
    }

    #[test]
    fn test_arity_three() {
        let outcome = pair_files(
            &paths(&["/d/x_1.bin", "/d/x_2.bin", "/d/x_3.bin"]),
            3,
        )
        .unwrap();
        assert_eq!(outcome.pairs[0].1.len(), 3);
    }

    #[test]
    fn test_zero_arity_rejected() {
        assert!(pair_files(&[], 0).is_err());
    }
}
