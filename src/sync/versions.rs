// ABOUTME: Hard-fork version table mapping activation block heights to node binaries

use std::collections::BTreeMap;
use std::str::FromStr;

use thiserror::Error;

/// Errors parsing or building a version table
#[derive(Error, Debug, PartialEq, Eq)]
pub enum VersionTableError {
    /// A clause is not of the form `height=binary`
    #[error("Invalid version clause '{0}', expected height=binary")]
    InvalidClause(String),

    /// The activation height is not an unsigned integer
    #[error("Invalid activation height '{0}'")]
    InvalidHeight(String),

    /// The binary name is blank
    #[error("Empty binary name for height {0}")]
    EmptyBinary(u64),

    /// The same height is listed twice
    #[error("Duplicate activation height {0}")]
    DuplicateHeight(u64),

    /// There is no entry for block 0
    #[error("Version table must start at block 0")]
    MissingBase,
}

/// Ordered mapping from activation height to the binary to run from that height on.
///
/// Always contains an entry for height 0, so every block height selects a binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTable(BTreeMap<u64, String>);

impl VersionTable {
    /// Build a table from `(height, binary)` pairs
    pub fn new(
        entries: impl IntoIterator<Item = (u64, impl Into<String>)>,
    ) -> Result<Self, VersionTableError> {
        let mut table = BTreeMap::new();
        for (height, binary) in entries {
            let binary: String = binary.into();
            if binary.trim().is_empty() {
                return Err(VersionTableError::EmptyBinary(height));
            }
            if table.insert(height, binary).is_some() {
                return Err(VersionTableError::DuplicateHeight(height));
            }
        }

        if !table.contains_key(&0) {
            return Err(VersionTableError::MissingBase);
        }

        Ok(Self(table))
    }

    /// Table that always selects one binary
    pub fn single(binary: impl Into<String>) -> Result<Self, VersionTableError> {
        Self::new([(0, binary)])
    }

    /// Parse `height=binary[,height=binary...]`
    pub fn parse(input: &str) -> Result<Self, VersionTableError> {
        let mut entries = Vec::new();
        for clause in input.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let (height, binary) = clause
                .split_once('=')
                .filter(|(_, binary)| !binary.contains('='))
                .ok_or_else(|| VersionTableError::InvalidClause(clause.to_string()))?;

            let height = height
                .trim()
                .parse::<u64>()
                .map_err(|_| VersionTableError::InvalidHeight(height.trim().to_string()))?;

            entries.push((height, binary.trim().to_string()));
        }

        Self::new(entries)
    }

    /// Binary for a block height: the entry with the greatest activation height not above it
    pub fn select(&self, height: u64) -> &str {
        self.0
            .range(..=height)
            .next_back()
            .map_or_else(|| self.base(), |(_, binary)| binary.as_str())
    }

    /// Binary active from block 0
    pub fn base(&self) -> &str {
        self.0.get(&0).map_or("", String::as_str)
    }

    /// Whether a binary appears anywhere in the table
    pub fn contains_binary(&self, binary: &str) -> bool {
        self.0.values().any(|b| b == binary)
    }

    /// Entries in activation order
    pub fn iter(&self) -> impl Iterator<Item = (u64, &str)> {
        self.0.iter().map(|(height, binary)| (*height, binary.as_str()))
    }
}

impl FromStr for VersionTable {
    type Err = VersionTableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_select_greatest_height_not_above_block() {
        let table = VersionTable::parse("0=namada-v0.39, 100=namada-v0.40, 250=namada-v1.0").unwrap();

        assert_eq!(table.select(0), "namada-v0.39");
        assert_eq!(table.select(99), "namada-v0.39");
        assert_eq!(table.select(100), "namada-v0.40");
        assert_eq!(table.select(249), "namada-v0.40");
        assert_eq!(table.select(250), "namada-v1.0");
        assert_eq!(table.select(u64::MAX), "namada-v1.0");
    }

    #[test]
    fn test_parse_order_does_not_matter() {
        let table: VersionTable = "100=b,0=a".parse().unwrap();
        assert_eq!(table.iter().collect::<Vec<_>>(), vec![(0, "a"), (100, "b")]);
    }

    #[test]
    fn test_single_binary_table() {
        let table = VersionTable::single("namada").unwrap();
        assert_eq!(table.base(), "namada");
        assert_eq!(table.select(1_000_000), "namada");
        assert!(table.contains_binary("namada"));
    }

    #[test]
    fn test_missing_base_is_rejected() {
        assert_eq!(VersionTable::parse("5=a"), Err(VersionTableError::MissingBase));
        assert_eq!(VersionTable::parse(""), Err(VersionTableError::MissingBase));
    }

    #[test]
    fn test_malformed_clauses_are_rejected() {
        assert_eq!(
            VersionTable::parse("0=a,100"),
            Err(VersionTableError::InvalidClause("100".to_string()))
        );
        assert_eq!(
            VersionTable::parse("0=a=b"),
            Err(VersionTableError::InvalidClause("0=a=b".to_string()))
        );
        assert_eq!(
            VersionTable::parse("0=a,-5=b"),
            Err(VersionTableError::InvalidHeight("-5".to_string()))
        );
        assert_eq!(VersionTable::parse("0= "), Err(VersionTableError::EmptyBinary(0)));
        assert_eq!(
            VersionTable::parse("0=a,0=b"),
            Err(VersionTableError::DuplicateHeight(0))
        );
    }

    #[test]
    fn test_blank_clauses_are_skipped() {
        let table = VersionTable::parse(" 0=a, ,100=b,").unwrap();
        assert_eq!(table.select(100), "b");
    }
}
