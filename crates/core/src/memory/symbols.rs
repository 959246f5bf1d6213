//! Symbol table mapping labels to instruction or data addresses.
//!
//! Labels are unique case-insensitively. The table keeps the line each label
//! was defined on so duplicate definitions can point back at the original.

use std::collections::HashMap;

/// What a label points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    /// An instruction address in the code segment.
    Code,
    /// A cell address in the data segment.
    Data,
}

/// A label definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    /// The address the label resolves to.
    pub address: u32,
    /// Code or data segment.
    pub kind: SymbolKind,
    /// Source line of the definition.
    pub line: usize,
}

/// Returned on duplicate label registration; carries the first definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuplicateLabel {
    /// The label name as written.
    pub name: String,
    /// Line of the first definition.
    pub first_line: usize,
}

/// Case-insensitive label → address mapping.
#[derive(Clone, Default, Debug)]
pub struct SymbolTable {
    map: HashMap<String, Symbol>,
}

impl SymbolTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a label. Fails when the label (compared case-insensitively)
    /// is already defined.
    pub fn insert(
        &mut self,
        name: &str,
        address: u32,
        kind: SymbolKind,
        line: usize,
    ) -> Result<(), DuplicateLabel> {
        let key = name.to_uppercase();
        if let Some(existing) = self.map.get(&key) {
            return Err(DuplicateLabel {
                name: name.to_string(),
                first_line: existing.line,
            });
        }
        self.map.insert(
            key,
            Symbol {
                address,
                kind,
                line,
            },
        );
        Ok(())
    }

    /// Looks up a label, ignoring case.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.map.get(&name.to_uppercase())
    }

    /// Number of defined labels.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when no labels are defined.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates over `(name, symbol)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Symbol)> {
        self.map.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut table = SymbolTable::new();
        table.insert("loop", 8, SymbolKind::Code, 3).unwrap();
        let sym = table.lookup("loop").unwrap();
        assert_eq!(sym.address, 8);
        assert_eq!(sym.kind, SymbolKind::Code);
    }

    #[test]
    fn test_lookup_case_insensitive() {
        let mut table = SymbolTable::new();
        table.insert("Data_Start", 0, SymbolKind::Data, 1).unwrap();
        assert!(table.lookup("data_start").is_some());
        assert!(table.lookup("DATA_START").is_some());
    }

    #[test]
    fn test_duplicate_rejected_across_case() {
        let mut table = SymbolTable::new();
        table.insert("x", 0, SymbolKind::Data, 2).unwrap();
        let err = table.insert("X", 8, SymbolKind::Data, 5).unwrap_err();
        assert_eq!(err.first_line, 2);
    }
}
