use interp_debug::{FrameScope, NamedValue, Value, ValueKind};

use crate::dap::types::Variable;
use crate::format::{self, field_name, ValuePrinter};
use crate::handles::{Epoch, HandleTable};

/// A lazily expanded source of `(name, value)` children behind a `variablesReference`.
#[derive(Clone, Debug)]
pub enum VariableScope {
    /// Locals or closure captures of one frame.
    Frame(FrameScope),
    /// Target of a pointer or the dynamic value of an interface.
    Pointee(Value),
    /// Array or slice elements, named by index.
    Elements(Value),
    /// Struct fields.
    Fields(Value),
    /// Map entries, named by their rendered key.
    Entries(Value),
}

impl VariableScope {
    /// Child scope to register for `value`, if it can be expanded.
    pub fn for_value(value: &Value) -> Option<Self> {
        if value.is_nil() {
            return None;
        }
        match &value.kind {
            ValueKind::Pointer(_) | ValueKind::Interface(_) => {
                Some(VariableScope::Pointee(value.clone()))
            }
            ValueKind::Array(_) | ValueKind::Slice(_) => {
                Some(VariableScope::Elements(value.clone()))
            }
            ValueKind::Struct(_) => Some(VariableScope::Fields(value.clone())),
            ValueKind::Map(_) => Some(VariableScope::Entries(value.clone())),
            _ => None,
        }
    }

    /// Enumerate the children; map keys are rendered with `max_key_length`.
    pub fn children(&self, max_key_length: usize) -> Vec<NamedValue> {
        match self {
            VariableScope::Frame(scope) => scope.variables.clone(),
            VariableScope::Pointee(value) => match &value.kind {
                ValueKind::Pointer(Some(target)) | ValueKind::Interface(Some(target)) => {
                    vec![NamedValue::new("", target.get())]
                }
                _ => Vec::new(),
            },
            VariableScope::Elements(value) => {
                let elements: &[Value] = match &value.kind {
                    ValueKind::Array(elements) => &elements[..],
                    ValueKind::Slice(Some(elements)) => &elements[..],
                    _ => &[],
                };
                elements
                    .iter()
                    .enumerate()
                    .map(|(i, element)| NamedValue::new(i.to_string(), element.clone()))
                    .collect()
            }
            VariableScope::Fields(value) => match &value.kind {
                ValueKind::Struct(fields) => fields
                    .iter()
                    .map(|field| {
                        NamedValue::new(field_name(&field.name, &field.value), field.value.clone())
                    })
                    .collect(),
                _ => Vec::new(),
            },
            VariableScope::Entries(value) => match &value.kind {
                ValueKind::Map(Some(entries)) => {
                    let mut printer = ValuePrinter::new(max_key_length);
                    entries
                        .iter()
                        .map(|(key, val)| NamedValue::new(printer.print_string(key), val.clone()))
                        .collect()
                }
                _ => Vec::new(),
            },
        }
    }
}

/// The Variable Table plus the rendering limits applied to every variable it hands out.
pub struct VariableTable {
    scopes: HandleTable<VariableScope>,
    max_value_length: usize,
    max_key_length: usize,
}

impl VariableTable {
    pub fn new(max_value_length: usize, max_key_length: usize) -> Self {
        Self {
            scopes: HandleTable::new(),
            max_value_length,
            max_key_length,
        }
    }

    pub fn epoch(&self) -> Epoch {
        self.scopes.epoch()
    }

    pub fn add_in(&self, epoch: Epoch, scope: VariableScope) -> Option<i64> {
        self.scopes.add_in(epoch, scope)
    }

    pub fn purge(&self) {
        self.scopes.purge();
    }

    /// Build the DAP view of one value, registering a child scope in `epoch` when it is
    /// expandable. `None` once the table has moved past `epoch`.
    pub fn variable_in(&self, epoch: Epoch, name: &str, value: &Value) -> Option<Variable> {
        let variables_reference = match VariableScope::for_value(value) {
            Some(scope) => self.add_in(epoch, scope)?,
            None => 0,
        };
        Some(Variable {
            name: name.to_string(),
            value: format::render(value, self.max_value_length),
            type_name: Some(value.type_name.clone()),
            variables_reference,
        })
    }

    /// Children of a previously issued reference, or `None` if it is unknown or stale.
    ///
    /// A purge that lands while the children are being registered makes the whole expansion
    /// stale, so no child handle outlives the epoch of its parent.
    pub fn expand(&self, reference: i64) -> Option<Vec<Variable>> {
        let (scope, epoch) = self.scopes.lookup(reference)?;
        scope
            .children(self.max_key_length)
            .iter()
            .map(|child| self.variable_in(epoch, &child.name, &child.value))
            .collect()
    }
}
