//! Channel Item Model
//!
//! Every value flowing between tasks is an [`Item`]. Scalars carry plain
//! values, `File` carries a path, `List` is an ordered (possibly nested)
//! collection, and `Tuple` is a correlated record whose leading field is
//! the join key.

use std::path::PathBuf;

/// A typed value carried on a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// Plain string value.
    Str(String),
    /// Integer value.
    Int(i64),
    /// A file handle. Renders as its file name, matching the staged
    /// (sandbox-local) name after input staging.
    File(PathBuf),
    /// Ordered collection, possibly nested.
    List(Vec<Item>),
    /// Correlated record. The first member is the join key; the rest is
    /// the payload.
    Tuple(Vec<Item>),
}

impl Item {
    /// Convenience constructor for a file item.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Item::File(path.into())
    }

    /// Convenience constructor for a string item.
    pub fn str(value: impl Into<String>) -> Self {
        Item::Str(value.into())
    }

    /// Short tag naming the item's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Item::Str(_) => "string",
            Item::Int(_) => "integer",
            Item::File(_) => "file",
            Item::List(_) => "list",
            Item::Tuple(_) => "tuple",
        }
    }

    /// Renders the item as shell text for command substitution.
    ///
    /// Files render as their file name (the staged name inside a sandbox),
    /// lists join their members with spaces, and tuples join their payload
    /// members (the join key is not part of the rendered text).
    pub fn shell_word(&self) -> String {
        match self {
            Item::Str(s) => s.clone(),
            Item::Int(n) => n.to_string(),
            Item::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned()),
            Item::List(items) => items
                .iter()
                .map(Item::shell_word)
                .collect::<Vec<_>>()
                .join(" "),
            Item::Tuple(members) => members
                .iter()
                .skip(1)
                .map(Item::shell_word)
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// Returns the join key for key-based correlation.
    ///
    /// Tuples yield their leading field, files their stem, scalars their
    /// rendered value. Lists have no key.
    pub fn join_key(&self) -> Option<String> {
        match self {
            Item::Tuple(members) => members.first().map(Item::shell_word),
            Item::File(path) => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned()),
            Item::Str(s) => Some(s.clone()),
            Item::Int(n) => Some(n.to_string()),
            Item::List(_) => None,
        }
    }

    /// Returns true if the item is a list containing at least one nested
    /// list or tuple.
    pub fn is_nested(&self) -> bool {
        match self {
            Item::List(items) => items
                .iter()
                .any(|i| matches!(i, Item::List(_) | Item::Tuple(_))),
            _ => false,
        }
    }

    /// Collects every file path reachable inside the item, in order.
    pub fn collect_files(&self, out: &mut Vec<PathBuf>) {
        match self {
            Item::File(path) => out.push(path.clone()),
            Item::List(items) | Item::Tuple(items) => {
                for item in items {
                    item.collect_files(out);
                }
            }
            Item::Str(_) | Item::Int(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_word_scalars() {
        assert_eq!(Item::str("hello").shell_word(), "hello");
        assert_eq!(Item::Int(42).shell_word(), "42");
    }

    #[test]
    fn test_shell_word_file_uses_name() {
        let item = Item::file("/data/reads/sample_R1.fastq");
        assert_eq!(item.shell_word(), "sample_R1.fastq");
    }

    #[test]
    fn test_shell_word_list_joins() {
        let item = Item::List(vec![Item::file("/a/x.txt"), Item::file("/b/y.txt")]);
        assert_eq!(item.shell_word(), "x.txt y.txt");
    }

    #[test]
    fn test_shell_word_tuple_skips_key() {
        let item = Item::Tuple(vec![
            Item::str("sample"),
            Item::file("/d/sample_R1.fastq"),
            Item::file("/d/sample_R2.fastq"),
        ]);
        assert_eq!(item.shell_word(), "sample_R1.fastq sample_R2.fastq");
    }

    #[test]
    fn test_join_key_tuple() {
        let item = Item::Tuple(vec![Item::str("sample_a"), Item::file("/d/f.txt")]);
        assert_eq!(item.join_key(), Some("sample_a".to_string()));
    }

    #[test]
    fn test_join_key_file_stem() {
        let item = Item::file("/data/sample.fastq");
        assert_eq!(item.join_key(), Some("sample".to_string()));
    }

    #[test]
    fn test_join_key_list_is_none() {
        let item = Item::List(vec![Item::Int(1)]);
        assert_eq!(item.join_key(), None);
    }

    #[test]
    fn test_is_nested() {
        let flat = Item::List(vec![Item::Int(1), Item::Int(2)]);
        let nested = Item::List(vec![Item::List(vec![Item::Int(1)])]);
        assert!(!flat.is_nested());
        assert!(nested.is_nested());
        assert!(!Item::Int(3).is_nested());
    }

    #[test]
    fn test_collect_files_recurses() {
        let item = Item::List(vec![
            Item::file("/a.txt"),
            Item::Tuple(vec![Item::str("k"), Item::file("/b.txt")]),
            Item::Int(1),
        ]);
        let mut files = Vec::new();
        item.collect_files(&mut files);
        assert_eq!(files, vec![PathBuf::from("/a.txt"), PathBuf::from("/b.txt")]);
    }

    #[test]
    fn test_type_name() {
        assert_eq!(Item::Int(1).type_name(), "integer");
        assert_eq!(Item::List(vec![]).type_name(), "list");
        assert_eq!(Item::Tuple(vec![]).type_name(), "tuple");
    }
}
