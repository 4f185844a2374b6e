//! Named sweep values and per-point binding.
//!
//! A [`Variable`] is an ordered sequence of scalar values with a cursor
//! selecting the "current" value. A [`VariableTable`] groups variables that
//! must be swept together (a *zipped group*, sharing one sweep axis) and
//! compiles the whole collection down to a Cartesian product of per-point
//! [`UpdateCommand`]s.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CompileError;

/// Identifies a [`Variable`] within a [`VariableTable`] by its name.
pub type VariableId = String;

/// A named, ordered sequence of scalar sweep values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variable {
    name: String,
    values: Vec<f64>,
    unit: String,
    current: usize,
}

impl Variable {
    /// Create a new variable. `values` must be non-empty.
    pub fn new(name: impl Into<String>, values: Vec<f64>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values,
            unit: unit.into(),
            current: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The value at the current cursor position.
    pub fn value(&self) -> f64 {
        self.values[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Move the cursor to `index`, panicking if out of range. Only called
    /// internally by [`VariableTable::apply`] with indices it produced itself.
    pub(crate) fn set_index(&mut self, index: usize) {
        self.current = index;
    }
}

/// One resolved sweep point: variable name -> selected index. Names whose
/// value did not change since the previous point are omitted (incremental
/// update discipline).
pub type UpdateCommand = BTreeMap<String, usize>;

/// A group of variable names that are swept in lock-step (zipped).
#[derive(Debug, Clone)]
struct Group {
    names: Vec<String>,
    size: usize,
}

/// An ordered collection of variable groups. Exposes the Cartesian product
/// of the groups' indices as a sequence of [`UpdateCommand`]s.
#[derive(Debug, Clone, Default)]
pub struct VariableTable {
    variables: BTreeMap<String, Variable>,
    groups: Vec<Group>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single variable (its own group of one).
    pub fn register(&mut self, variable: Variable) -> Result<(), CompileError> {
        self.register_group(vec![variable])
    }

    /// Register a zipped group of variables that must share length.
    pub fn register_group(&mut self, variables: Vec<Variable>) -> Result<(), CompileError> {
        if variables.is_empty() {
            return Ok(());
        }
        let sizes: Vec<usize> = variables.iter().map(Variable::len).collect();
        if sizes.iter().any(|&s| s != sizes[0]) {
            return Err(CompileError::VariableSizeMismatch { sizes });
        }
        let mut names = Vec::with_capacity(variables.len());
        for variable in &variables {
            if self.variables.contains_key(variable.name()) || names.contains(&variable.name().to_string()) {
                return Err(CompileError::DuplicateVariable {
                    name: variable.name().to_string(),
                });
            }
            names.push(variable.name().to_string());
        }
        for variable in variables {
            self.variables.insert(variable.name().to_string(), variable);
        }
        self.groups.push(Group {
            names,
            size: sizes[0],
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    /// Set a variable's current index by name, per an [`UpdateCommand`].
    pub fn apply(&mut self, command: &UpdateCommand) -> Result<(), CompileError> {
        for (name, index) in command {
            let variable = self
                .variables
                .get_mut(name)
                .ok_or_else(|| CompileError::UnknownVariable { name: name.clone() })?;
            variable.set_index(*index);
        }
        Ok(())
    }

    /// Compile the Cartesian product of group indices into update commands,
    /// omitting unchanged names between consecutive points.
    pub fn compile(&self) -> Vec<UpdateCommand> {
        if self.groups.is_empty() {
            return Vec::new();
        }

        let axis_sizes: Vec<usize> = self.groups.iter().map(|g| g.size).collect();
        let total: usize = axis_sizes.iter().product();

        let mut commands = Vec::with_capacity(total);
        let mut last_value: BTreeMap<&str, f64> = BTreeMap::new();

        for flat in 0..total {
            let indices = unflatten(flat, &axis_sizes);
            let mut command = UpdateCommand::new();
            for (group, &idx) in self.groups.iter().zip(indices.iter()) {
                for name in &group.names {
                    let variable = &self.variables[name];
                    let value = variable.values[idx];
                    let changed = last_value.get(name.as_str()) != Some(&value);
                    if changed {
                        last_value.insert(name.as_str(), value);
                        command.insert(name.clone(), idx);
                    }
                }
            }
            commands.push(command);
        }
        commands
    }
}

/// Convert a flat Cartesian index into per-axis indices (row-major, last
/// axis fastest-varying — matches `itertools.product`'s iteration order).
fn unflatten(mut flat: usize, axis_sizes: &[usize]) -> Vec<usize> {
    let mut indices = vec![0; axis_sizes.len()];
    for i in (0..axis_sizes.len()).rev() {
        let size = axis_sizes[i].max(1);
        indices[i] = flat % size;
        flat /= size;
    }
    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_variable_sweep() {
        let mut table = VariableTable::new();
        table
            .register(Variable::new("amp", vec![0.1, 0.2, 0.3], "V"))
            .unwrap();
        let commands = table.compile();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].get("amp"), Some(&0));
        assert_eq!(commands[1].get("amp"), Some(&1));
        assert_eq!(commands[2].get("amp"), Some(&2));
    }

    #[test]
    fn zipped_group_rejects_mismatched_sizes() {
        let mut table = VariableTable::new();
        let err = table
            .register_group(vec![
                Variable::new("a", vec![0.0, 1.0], "V"),
                Variable::new("b", vec![0.0], "V"),
            ])
            .unwrap_err();
        assert!(matches!(err, CompileError::VariableSizeMismatch { .. }));
    }

    #[test]
    fn register_group_rejects_reused_name() {
        let mut table = VariableTable::new();
        table
            .register(Variable::new("amp", vec![0.1, 0.2], "V"))
            .unwrap();
        let err = table
            .register(Variable::new("amp", vec![0.3, 0.4], "V"))
            .unwrap_err();
        assert!(matches!(err, CompileError::DuplicateVariable { name } if name == "amp"));
    }

    #[test]
    fn duplicate_axis_product_is_cartesian() {
        let mut table = VariableTable::new();
        table
            .register(Variable::new("x", vec![0.0, 1.0], ""))
            .unwrap();
        table
            .register(Variable::new("y", vec![10.0, 20.0, 30.0], ""))
            .unwrap();
        let commands = table.compile();
        assert_eq!(commands.len(), 6);
    }

    #[test]
    fn incremental_update_omits_unchanged_names() {
        let mut table = VariableTable::new();
        table
            .register_group(vec![
                Variable::new("x", vec![0.0, 0.0, 1.0], ""),
                Variable::new("y", vec![5.0, 6.0, 6.0], ""),
            ])
            .unwrap();
        let commands = table.compile();
        assert_eq!(commands.len(), 3);
        // point 0: both set for the first time
        assert!(commands[0].contains_key("x"));
        assert!(commands[0].contains_key("y"));
        // point 1: x unchanged (0.0 -> 0.0), y changed (5.0 -> 6.0)
        assert!(!commands[1].contains_key("x"));
        assert!(commands[1].contains_key("y"));
        // point 2: x changed, y unchanged
        assert!(commands[2].contains_key("x"));
        assert!(!commands[2].contains_key("y"));
    }

    #[test]
    fn apply_sets_current_value() {
        let mut table = VariableTable::new();
        table
            .register(Variable::new("amp", vec![0.1, 0.2, 0.3], "V"))
            .unwrap();
        let mut command = UpdateCommand::new();
        command.insert("amp".to_string(), 2);
        table.apply(&command).unwrap();
        assert_eq!(table.get("amp").unwrap().value(), 0.3);
    }

    #[test]
    fn apply_unknown_variable_errors() {
        let mut table = VariableTable::new();
        let mut command = UpdateCommand::new();
        command.insert("missing".to_string(), 0);
        assert!(matches!(
            table.apply(&command),
            Err(CompileError::UnknownVariable { .. })
        ));
    }
}
