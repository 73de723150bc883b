//! Traversal bytecode: ordered step and source instruction lists.

use crate::value::Value;
use std::collections::HashMap;

/// One traversal instruction: an operator name and its arguments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Instruction {
    pub operator: String,
    pub arguments: Vec<Value>,
}

impl Instruction {
    pub fn new(operator: impl Into<String>, arguments: Vec<Value>) -> Instruction {
        Instruction {
            operator: operator.into(),
            arguments,
        }
    }
}

/// A bound value substituted into a traversal by an upstream builder.
///
/// Bindings travel in the bytecode's side table, not inside the serialized
/// instruction arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub key: String,
    pub value: Box<Value>,
}

/// A structured traversal: step instructions, traversal-source instructions,
/// and a bindings table.
///
/// The bindings are input metadata for the server and are never serialized
/// as part of the instruction body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bytecode {
    pub step_instructions: Vec<Instruction>,
    pub source_instructions: Vec<Instruction>,
    pub bindings: HashMap<String, Value>,
}

impl Bytecode {
    pub fn new() -> Bytecode {
        Bytecode::default()
    }

    /// Appends a step instruction.
    pub fn add_step(&mut self, operator: impl Into<String>, arguments: Vec<Value>) {
        self.step_instructions
            .push(Instruction::new(operator, arguments));
    }

    /// Appends a traversal-source instruction.
    pub fn add_source(&mut self, operator: impl Into<String>, arguments: Vec<Value>) {
        self.source_instructions
            .push(Instruction::new(operator, arguments));
    }

    /// Records a binding in the side table.
    pub fn bind(&mut self, key: impl Into<String>, value: Value) {
        self.bindings.insert(key.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_order_preserved() {
        let mut bc = Bytecode::new();
        bc.add_source("withStrategies", vec![Value::from("ReadOnlyStrategy")]);
        bc.add_step("V", vec![]);
        bc.add_step("has", vec![Value::from("name"), Value::from("marko")]);
        bc.add_step("out", vec![Value::from("knows")]);

        let ops: Vec<&str> = bc
            .step_instructions
            .iter()
            .map(|i| i.operator.as_str())
            .collect();
        assert_eq!(ops, ["V", "has", "out"]);
        assert_eq!(bc.source_instructions.len(), 1);
    }

    #[test]
    fn test_bindings_are_side_table() {
        let mut bc = Bytecode::new();
        bc.add_step("has", vec![Value::from("age"), Value::Int(29)]);
        bc.bind("x", Value::Int(29));
        assert_eq!(bc.bindings.get("x"), Some(&Value::Int(29)));
        // The instruction body is unaffected by binding.
        assert_eq!(bc.step_instructions[0].arguments.len(), 2);
    }
}
