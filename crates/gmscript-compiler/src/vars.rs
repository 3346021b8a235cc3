//! Variable table of one function.
//!
//! Parameters take the first slots in order. A Local declaration only records
//! the class: the slot is taken on first use, so a declared but unused local
//! costs nothing. Member and Global entries have no slot.

use indexmap::{IndexMap, IndexSet};

use gmscript_ast::StorageClass;

/// Where a name lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Storage {
    /// Stack slot.
    Local(u32),
    /// Field of the receiver.
    Member,
    /// Global table.
    Global,
}

impl Storage {
    /// Storage class without the slot.
    pub const fn class(self) -> StorageClass {
        match self {
            Self::Local(_) => StorageClass::Local,
            Self::Member => StorageClass::Member,
            Self::Global => StorageClass::Global,
        }
    }
}

/// Outcome of a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Declared {
    /// New entry.
    New(StorageClass),
    /// Same class declared again.
    Again(StorageClass),
    /// Already declared with another class; the first declaration is kept.
    Conflict {
        /// Kept class.
        kept: StorageClass,
        /// Class requested by the new declaration.
        requested: StorageClass,
    },
}

/// Names of one function and their storage.
#[derive(Debug, Clone, Default)]
pub struct VariableTable {
    classes: IndexMap<String, StorageClass>,
    /// Slot = insertion index.
    slots: IndexSet<String>,
    params: u32,
}

impl VariableTable {
    /// Empty table.
    pub fn new() -> Self { Self::default() }

    fn slot(&mut self, name: &str) -> u32 {
        let (index, _) = self.slots.insert_full(name.to_owned());
        index as u32
    }

    /// Declares a parameter. Fails on duplicates.
    pub fn declare_param(&mut self, name: &str) -> Option<u32> {
        if self.classes.contains_key(name) {
            return None;
        }
        self.classes.insert(name.to_owned(), StorageClass::Local);
        self.params += 1;
        Some(self.slot(name))
    }

    /// Records a declaration. No slot is allocated here.
    pub fn declare(&mut self, name: &str, class: StorageClass) -> Declared {
        if let Some(&kept) = self.classes.get(name) {
            return if kept == class {
                Declared::Again(kept)
            } else {
                Declared::Conflict { kept, requested: class }
            };
        }
        self.classes.insert(name.to_owned(), class);
        Declared::New(class)
    }

    /// Declared class of a known name.
    pub fn class(&self, name: &str) -> Option<StorageClass> { self.classes.get(name).copied() }

    /// Storage of a known name. A Local gets its slot on the first call.
    pub fn resolve(&mut self, name: &str) -> Option<Storage> {
        Some(match self.class(name)? {
            StorageClass::Local => Storage::Local(self.slot(name)),
            StorageClass::Member => Storage::Member,
            StorageClass::Global => Storage::Global,
        })
    }

    /// Slot of `name`, declaring it Local when unseen.
    /// `None` when the name is known with another class.
    pub fn local_slot(&mut self, name: &str) -> Option<u32> {
        match self.class(name) {
            Some(StorageClass::Local) => Some(self.slot(name)),
            Some(_) => None,
            None => {
                self.classes.insert(name.to_owned(), StorageClass::Local);
                Some(self.slot(name))
            }
        }
    }

    /// Parameter count.
    pub fn num_params(&self) -> u32 { self.params }

    /// Local count, parameters excluded.
    pub fn num_locals(&self) -> u32 { self.slots.len() as u32 - self.params }

    /// Slot names, parameters first.
    pub fn symbols(&self) -> Vec<String> { self.slots.iter().cloned().collect() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn slots_follow_first_use() {
        let mut v = VariableTable::new();
        assert_eq!(v.declare_param("p"), Some(0));
        assert_eq!(v.declare_param("p"), None);
        assert_eq!(v.declare("g", StorageClass::Global), Declared::New(StorageClass::Global));
        assert_eq!(v.declare("a", StorageClass::Local), Declared::New(StorageClass::Local));
        assert_eq!(v.declare("unused", StorageClass::Local), Declared::New(StorageClass::Local));
        assert_eq!(v.num_locals(), 0);
        assert_eq!(v.local_slot("b"), Some(1));
        assert_eq!(v.resolve("a"), Some(Storage::Local(2)));
        assert_eq!(v.resolve("a"), Some(Storage::Local(2)));
        assert_eq!(v.local_slot("g"), None);
        assert_eq!(v.resolve("p"), Some(Storage::Local(0)));
        assert_eq!(v.num_params(), 1);
        assert_eq!(v.num_locals(), 2);
        assert_eq!(v.symbols(), ["p", "b", "a"]);
        assert_eq!(v.class("unused"), Some(StorageClass::Local));
    }

    #[test]
    fn conflicting_redeclaration_keeps_first() {
        let mut v = VariableTable::new();
        v.declare("x", StorageClass::Member);
        assert_eq!(
            v.declare("x", StorageClass::Local),
            Declared::Conflict { kept: StorageClass::Member, requested: StorageClass::Local }
        );
        assert_eq!(v.declare("x", StorageClass::Member), Declared::Again(StorageClass::Member));
        assert_eq!(v.resolve("x"), Some(Storage::Member));
    }
}
