//! Read-only table of the function signatures of a unit.
//!
//! The table is finalized once, before any function is analysed, and is
//! then shared by reference between all per-function analyses.
use std::collections::BTreeMap;

use crate::{
    modules::{Function, FunctionFlags, Param, Unit, operand::Expr},
    types::Type,
    utils::Error,
};

/// Everything a caller needs to know about a function.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    /// Position of the function within its unit.
    pub index: usize,
    pub params: Vec<Param>,
    pub ret: Option<Type>,
    pub preconditions: Vec<Expr>,
    pub postconditions: Vec<Expr>,
    pub flags: FunctionFlags,
}

impl Signature {
    pub fn of(index: usize, function: &Function) -> Self {
        Self {
            name: function.name.clone(),
            index,
            params: function.params.clone(),
            ret: function.ret.clone(),
            preconditions: function.preconditions.clone(),
            postconditions: function.postconditions.clone(),
            flags: function.flags,
        }
    }

    pub fn is_suspendible(&self) -> bool {
        self.flags.contains(FunctionFlags::SUSPENDIBLE)
    }
}

#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    functions: BTreeMap<String, Signature>,
}

impl SymbolTable {
    /// Collects the signatures of `unit`. Function names must be unique.
    pub fn from_unit(unit: &Unit) -> Result<Self, Error> {
        let mut functions = BTreeMap::new();
        for (index, function) in unit.functions.iter().enumerate() {
            let sig = Signature::of(index, function);
            if functions.insert(function.name.clone(), sig).is_some() {
                return Err(Error::DuplicateFunction(function.name.clone()));
            }
        }
        Ok(Self { functions })
    }

    pub fn get(&self, name: &str) -> Option<&Signature> {
        self.functions.get(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Signatures ordered by declaration.
    pub fn iter(&self) -> impl Iterator<Item = &Signature> {
        let mut sigs: Vec<_> = self.functions.values().collect();
        sigs.sort_by_key(|s| s.index);
        sigs.into_iter()
    }
}
