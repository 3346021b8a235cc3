//! Code generation hooks: how the compiler obtains ids and hands finished
//! functions to its host.

use indexmap::IndexSet;

use gmscript_core::{FunctionInfo, SourceId, SourceTable};

/// Rejection of a finished function by the host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HookError {
    /// Reason given by the host.
    pub message: String,
}

impl HookError {
    /// New rejection.
    pub fn new(message: impl Into<String>) -> Self { Self { message: message.into() } }
}

/// Host side of a compilation.
///
/// `begin` and `end` bracket every compilation, successful or not.
/// `add_function` is called once per function of a successful unit, nested
/// functions before their enclosing function, the root last.
pub trait CodeGenHooks {
    /// Start of a unit.
    fn begin(&mut self, debug: bool);
    /// A finished function.
    fn add_function(&mut self, info: FunctionInfo) -> Result<(), HookError>;
    /// End of a unit, with its error count.
    fn end(&mut self, errors: usize);
    /// New function id.
    fn function_id(&mut self) -> u64;
    /// Interned symbol id.
    fn symbol_id(&mut self, name: &str) -> u64;
    /// Interned string constant id.
    fn string_id(&mut self, text: &str) -> u64;
}

/// Everything a [`ProgramHooks`] collected.
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// Functions in delivery order.
    pub functions: Vec<FunctionInfo>,
    /// Root function id of the last successful unit.
    pub root: Option<u64>,
    /// Symbols by id.
    pub symbols: Vec<String>,
    /// String constants by id.
    pub strings: Vec<String>,
    /// Sources registered in debug mode.
    pub sources: SourceTable,
    /// Source of the last unit, if registered.
    pub source: Option<SourceId>,
    /// Error count reported by the last `end`.
    pub errors: usize,
}

impl Program {
    /// Function by id.
    pub fn function(&self, id: u64) -> Option<&FunctionInfo> { self.functions.iter().find(|f| f.id == id) }

    /// Root function.
    pub fn root_function(&self) -> Option<&FunctionInfo> { self.function(self.root?) }

    /// Symbol name by id.
    pub fn symbol(&self, id: u64) -> Option<&str> {
        self.symbols.get(usize::try_from(id).ok()?).map(String::as_str)
    }

    /// String constant by id.
    pub fn string(&self, id: u64) -> Option<&str> {
        self.strings.get(usize::try_from(id).ok()?).map(String::as_str)
    }
}

/// Ready-made hooks: interns symbols and strings by insertion order, counts
/// function ids, collects functions and registers the source in debug mode.
#[derive(Debug, Default)]
pub struct ProgramHooks {
    next_function: u64,
    symbols: IndexSet<String>,
    strings: IndexSet<String>,
    pending_source: Option<(String, String)>,
    program: Program,
}

impl ProgramHooks {
    /// Empty hooks.
    pub fn new() -> Self { Self::default() }

    /// Source text (and name) registered when a unit starts in debug mode.
    #[must_use]
    pub fn with_source(mut self, name: &str, text: &str) -> Self {
        self.pending_source = Some((name.to_owned(), text.to_owned()));
        self
    }

    /// Collected program.
    pub fn finish(mut self) -> Program {
        self.program.symbols = self.symbols.into_iter().collect();
        self.program.strings = self.strings.into_iter().collect();
        self.program
    }
}

fn intern(set: &mut IndexSet<String>, s: &str) -> u64 {
    let idx = match set.get_index_of(s) {
        Some(i) => i,
        None => set.insert_full(s.to_owned()).0,
    };
    idx as u64
}

impl CodeGenHooks for ProgramHooks {
    fn begin(&mut self, debug: bool) {
        self.program.source = None;
        if debug {
            if let Some((name, text)) = &self.pending_source {
                let id = self.program.sources.add(text, Some(name));
                log::debug!("registered source `{name}` as {id:#010x}");
                self.program.source = Some(id);
            }
        }
    }

    fn add_function(&mut self, info: FunctionInfo) -> Result<(), HookError> {
        if self.program.functions.iter().any(|f| f.id == info.id) {
            return Err(HookError::new(format!("duplicate function id {}", info.id)));
        }
        if info.root {
            self.program.root = Some(info.id);
        }
        self.program.functions.push(info);
        Ok(())
    }

    fn end(&mut self, errors: usize) { self.program.errors = errors; }

    fn function_id(&mut self) -> u64 {
        let id = self.next_function;
        self.next_function += 1;
        id
    }

    fn symbol_id(&mut self, name: &str) -> u64 { intern(&mut self.symbols, name) }

    fn string_id(&mut self, text: &str) -> u64 { intern(&mut self.strings, text) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn interning_is_stable() {
        let mut h = ProgramHooks::new();
        assert_eq!(h.symbol_id("x"), 0);
        assert_eq!(h.symbol_id("y"), 1);
        assert_eq!(h.symbol_id("x"), 0);
        assert_eq!(h.string_id("x"), 0);
        assert_eq!(h.function_id(), 0);
        assert_eq!(h.function_id(), 1);
        let p = h.finish();
        assert_eq!(p.symbols, vec!["x".to_owned(), "y".to_owned()]);
        assert_eq!(p.symbol(1), Some("y"));
    }

    #[test]
    fn source_registered_only_in_debug() {
        let mut h = ProgramHooks::new().with_source("a.gm", "x = 1;");
        h.begin(false);
        h.end(0);
        h.begin(true);
        h.end(0);
        let p = h.finish();
        assert_eq!(p.sources.len(), 1);
        assert_eq!(p.source, Some(SourceTable::source_id("x = 1;")));
    }

    #[test]
    fn duplicate_function_is_rejected() {
        let mut h = ProgramHooks::new();
        let f = FunctionInfo { id: 3, ..FunctionInfo::default() };
        assert!(h.add_function(f.clone()).is_ok());
        assert!(h.add_function(f).is_err());
    }
}
