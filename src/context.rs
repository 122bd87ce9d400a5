use indexmap::IndexMap;
use tracing::warn;

use crate::ast::ValueType;
use crate::builtins::FunctionTable;
use crate::error::Diagnostic;
use crate::util::to_base36;

/// The 27 scalar variables of the target, in allocation order.
pub const ALPHABET: [char; 27] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R',
    'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'θ',
];

/// List that stores variables past the alphabet.
pub const OVERFLOW_LIST: &str = "__GLOBALS";

/// Internal variable holding the id of the user function being called.
pub const FUNCTION_SELECTOR: &str = "@fn";

/// Target string variables, in allocation order.
const STRING_SLOTS: usize = 10;

/// Physical home of a scalar variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Letter(char),
    /// 1-based index into the overflow list.
    Overflow(usize),
}

#[derive(Debug, Clone)]
struct VariableEntry {
    uses: usize,
    ty: ValueType,
}

/// Registries for one compilation. Created per compile, threaded through the
/// parser and code generator, dropped afterwards.
#[derive(Debug)]
pub struct Context {
    variables: IndexMap<String, VariableEntry>,
    /// Rank of each variable, fixed at first render.
    slots: Option<IndexMap<String, usize>>,
    lists: IndexMap<String, usize>,
    strings: IndexMap<String, usize>,
    functions: FunctionTable,
    temporaries: usize,
    diagnostics: Vec<Diagnostic>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        let mut ctx = Self {
            variables: IndexMap::new(),
            slots: None,
            lists: IndexMap::new(),
            strings: IndexMap::new(),
            functions: FunctionTable::new(),
            temporaries: 0,
            diagnostics: Vec::new(),
        };
        ctx.list_name(OVERFLOW_LIST);
        ctx
    }

    // ── Variables ──────────────────────────────────────────────────

    /// Record one use of `name` and return its registry key.
    pub fn reference_variable(&mut self, name: &str) -> String {
        let key = name.to_ascii_lowercase();
        self.variables
            .entry(key.clone())
            .and_modify(|v| v.uses += 1)
            .or_insert(VariableEntry {
                uses: 1,
                ty: ValueType::Number,
            });
        key
    }

    /// A fresh compiler-generated variable.
    pub fn temporary(&mut self) -> String {
        let name = format!("@{}", self.temporaries);
        self.temporaries += 1;
        self.reference_variable(&name)
    }

    pub fn usage(&self, name: &str) -> usize {
        self.variables
            .get(&name.to_ascii_lowercase())
            .map_or(0, |v| v.uses)
    }

    pub fn variable_type(&self, name: &str) -> ValueType {
        self.variables
            .get(&name.to_ascii_lowercase())
            .map_or(ValueType::Number, |v| v.ty)
    }

    pub fn set_variable_type(&mut self, name: &str, ty: ValueType) {
        if let Some(entry) = self.variables.get_mut(&name.to_ascii_lowercase()) {
            entry.ty = ty;
        }
    }

    /// Slot of a scalar variable. The ranking is computed from usage counts
    /// on the first call and never revised; later variables are appended.
    pub fn slot(&mut self, name: &str) -> Slot {
        let variables = &self.variables;
        let slots = self.slots.get_or_insert_with(|| rank(variables));
        let next = slots.len();
        let index = *slots.entry(name.to_ascii_lowercase()).or_insert(next);
        match ALPHABET.get(index) {
            Some(letter) => Slot::Letter(*letter),
            None => Slot::Overflow(index - ALPHABET.len() + 1),
        }
    }

    // ── Lists and strings ──────────────────────────────────────────

    /// Target name of a list, e.g. `ARR1`. Assigned on first use.
    pub fn list_name(&mut self, name: &str) -> String {
        let next = self.lists.len();
        let id = *self.lists.entry(name.to_uppercase()).or_insert(next);
        format!("ARR{}", to_base36(id))
    }

    /// Target string variable (`Str1`..`Str9`, `Str0`), or `None` once all
    /// ten are taken.
    pub fn string_slot(&mut self, name: &str) -> Option<String> {
        let next = self.strings.len();
        let key = name.to_ascii_lowercase();
        let index = match self.strings.get(&key) {
            Some(index) => *index,
            None if next < STRING_SLOTS => {
                self.strings.insert(key, next);
                next
            }
            None => return None,
        };
        Some(format!("Str{}", (index + 1) % STRING_SLOTS))
    }

    // ── Functions ──────────────────────────────────────────────────

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut FunctionTable {
        &mut self.functions
    }

    // ── Diagnostics ────────────────────────────────────────────────

    /// Record a soft diagnostic. Never aborts compilation.
    pub fn warn(&mut self, message: impl Into<String>, line: Option<usize>) {
        let message = message.into();
        warn!(line = ?line, "{message}");
        self.diagnostics.push(Diagnostic { message, line });
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

/// Rank by descending use; ties keep first-seen order.
fn rank(variables: &IndexMap<String, VariableEntry>) -> IndexMap<String, usize> {
    let mut names: Vec<(&String, usize)> = variables.iter().map(|(k, v)| (k, v.uses)).collect();
    names.sort_by(|a, b| b.1.cmp(&a.1));
    names
        .into_iter()
        .enumerate()
        .map(|(i, (name, _))| (name.clone(), i))
        .collect()
}
