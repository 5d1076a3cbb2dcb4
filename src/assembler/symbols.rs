use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SymbolError {
    #[error("Symbol '{0}' already exists")]
    AlreadyExists(String),
}

/// Which references a temporary label answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporaryKind {
    /// Defined with `/`; found by both `+` and `-` references
    Any,
    /// Defined with `+`; found by forward references only
    Forward,
    /// Defined with `-`; found by backward references only
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TemporaryEntry {
    kind: TemporaryKind,
    address: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SymbolEntry {
    address: u16,
    serial: usize,
}

/// Named symbols plus the ordered list of anonymous temporaries.
///
/// Each named symbol carries a serial number so the symbol dump can print
/// in definition order. Temporaries are kept sorted by address; references
/// like `++` or `-` are resolved by walking from the referencing address in
/// the indicated direction.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, SymbolEntry>,
    temporaries: Vec<TemporaryEntry>,
    next_serial: usize,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a name to an address; a name may be bound only once.
    pub fn define(&mut self, name: &str, address: u16) -> Result<(), SymbolError> {
        if self.symbols.contains_key(name) {
            return Err(SymbolError::AlreadyExists(name.to_owned()));
        }
        let serial = self.next_serial;
        self.next_serial += 1;
        self.symbols.insert(name.to_owned(), SymbolEntry { address, serial });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<u16> {
        self.symbols.get(name).map(|entry| entry.address)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    /// Records an anonymous temporary at the given address.
    pub fn define_temporary(&mut self, kind: TemporaryKind, address: u16) {
        let entry = TemporaryEntry { kind, address };
        if self
            .temporaries
            .last()
            .map_or(true, |last| address > last.address)
        {
            self.temporaries.push(entry);
            return;
        }
        let index = self
            .temporaries
            .partition_point(|existing| existing.address < address);
        if self.temporaries[index].address != address {
            self.temporaries.insert(index, entry);
        }
    }

    /// Resolves a `±delta` temporary reference from the given address.
    ///
    /// Walking forward counts `Any` and `Forward` entries; walking backward
    /// counts `Any` and `Backward` entries. Returns `None` when the walk
    /// runs off either end of the list.
    pub fn temporary(&self, address: u16, delta: i32) -> Option<u16> {
        if delta == 0 {
            return None;
        }
        let temps = &self.temporaries;
        let count = temps.len() as isize;
        let mut index = temps.partition_point(|entry| entry.address < address) as isize;

        if delta > 0 {
            let mut delta = delta;
            if index != count && temps[index as usize].address != address {
                index -= 1;
            }
            while delta != 0 {
                index += 1;
                if index >= count {
                    return None;
                }
                if matches!(
                    temps[index as usize].kind,
                    TemporaryKind::Any | TemporaryKind::Forward
                ) {
                    delta -= 1;
                }
            }
            return Some(temps[index as usize].address);
        }

        // The delta is negative, so walk toward lower addresses.
        let mut delta = delta;
        while delta != 0 && index > 0 {
            index -= 1;
            if matches!(
                temps[index as usize].kind,
                TemporaryKind::Any | TemporaryKind::Backward
            ) {
                delta += 1;
            }
        }
        if delta == 0 {
            Some(temps[index as usize].address)
        } else {
            None
        }
    }

    /// All named symbols in definition order.
    pub fn dump(&self) -> Vec<(String, u16)> {
        let mut entries: Vec<_> = self.symbols.iter().collect();
        entries.sort_by_key(|(_, entry)| entry.serial);
        entries
            .into_iter()
            .map(|(name, entry)| (name.clone(), entry.address))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_define_and_get() {
        let mut table = SymbolTable::new();
        table.define("screen", 0x0400).unwrap();
        table.define("border", 0xd020).unwrap();
        assert_eq!(table.get("screen"), Some(0x0400));
        assert_eq!(table.get("border"), Some(0xd020));
        assert_eq!(table.get("missing"), None);
        assert!(table.contains("screen"));
    }

    #[test]
    fn test_duplicate_definition() {
        let mut table = SymbolTable::new();
        table.define("twice", 0x1000).unwrap();
        assert_eq!(
            table.define("twice", 0x2000),
            Err(SymbolError::AlreadyExists("twice".to_owned()))
        );
    }

    #[test]
    fn test_dump_in_definition_order() {
        let mut table = SymbolTable::new();
        table.define("zz", 3).unwrap();
        table.define("aa", 1).unwrap();
        table.define("mm", 2).unwrap();
        let names: Vec<_> = table.dump().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["zz", "aa", "mm"]);
    }

    #[test]
    fn test_temporary_backward() {
        let mut table = SymbolTable::new();
        table.define_temporary(TemporaryKind::Backward, 0x2000);
        assert_eq!(table.temporary(0x2002, -1), Some(0x2000));
        assert_eq!(table.temporary(0x2002, -2), None);
        // A backward-only entry is invisible to forward references.
        assert_eq!(table.temporary(0x1ff0, 1), None);
    }

    #[test]
    fn test_temporary_forward() {
        let mut table = SymbolTable::new();
        table.define_temporary(TemporaryKind::Forward, 0x2010);
        table.define_temporary(TemporaryKind::Forward, 0x2020);
        assert_eq!(table.temporary(0x2000, 1), Some(0x2010));
        assert_eq!(table.temporary(0x2000, 2), Some(0x2020));
        assert_eq!(table.temporary(0x2000, 3), None);
        assert_eq!(table.temporary(0x2012, 1), Some(0x2020));
    }

    #[test]
    fn test_temporary_both_directions() {
        let mut table = SymbolTable::new();
        table.define_temporary(TemporaryKind::Any, 0x1000);
        table.define_temporary(TemporaryKind::Any, 0x1010);
        assert_eq!(table.temporary(0x1008, 1), Some(0x1010));
        assert_eq!(table.temporary(0x1008, -1), Some(0x1000));
    }

    #[test]
    fn test_temporary_direction_filter() {
        let mut table = SymbolTable::new();
        table.define_temporary(TemporaryKind::Backward, 0x1000);
        table.define_temporary(TemporaryKind::Forward, 0x1010);
        table.define_temporary(TemporaryKind::Backward, 0x1020);
        // Forward walk skips the backward-only entry at $1020.
        assert_eq!(table.temporary(0x1004, 1), Some(0x1010));
        assert_eq!(table.temporary(0x1004, 2), None);
        // Backward walk skips the forward-only entry at $1010.
        assert_eq!(table.temporary(0x1018, -1), Some(0x1000));
    }

    #[test]
    fn test_temporary_no_zero_delta() {
        let mut table = SymbolTable::new();
        table.define_temporary(TemporaryKind::Any, 0x1000);
        assert_eq!(table.temporary(0x1000, 0), None);
    }
}
