use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use super::computation::Computation;
use super::verify::verify_computation;
use crate::error::{IrError, ModuleIoError};

/// Ordered set of uniquely named computations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    computations: Vec<Computation>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            computations: Vec::new(),
        }
    }

    /// Adds a computation, rejecting duplicate names.
    pub fn add_computation(&mut self, computation: Computation) -> Result<(), IrError> {
        if self.computation(computation.name()).is_some() {
            return Err(IrError::DuplicateComputation {
                name: computation.name().to_string(),
            });
        }
        self.computations.push(computation);
        Ok(())
    }

    pub fn with_computation(mut self, computation: Computation) -> Result<Self, IrError> {
        self.add_computation(computation)?;
        Ok(self)
    }

    pub fn computation(&self, name: &str) -> Option<&Computation> {
        self.computations.iter().find(|c| c.name() == name)
    }

    pub fn computation_mut(&mut self, name: &str) -> Option<&mut Computation> {
        self.computations.iter_mut().find(|c| c.name() == name)
    }

    pub fn computations(&self) -> &[Computation] {
        &self.computations
    }

    pub fn computations_mut(&mut self) -> &mut [Computation] {
        &mut self.computations
    }

    pub fn to_json_string(&self) -> Result<String, ModuleIoError> {
        serde_json::to_string_pretty(self).map_err(ModuleIoError::from)
    }

    /// Parses a module, re-checks computation name uniqueness and verifies every
    /// computation. Nothing that fails the verifier is handed back.
    pub fn from_json_str(src: &str) -> Result<Self, ModuleIoError> {
        let parsed: Module = serde_json::from_str(src)?;
        let mut module = Module::new(parsed.name);
        for computation in parsed.computations {
            verify_computation(&computation)?;
            module.add_computation(computation)?;
        }
        Ok(module)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ModuleIoError> {
        let contents = self.to_json_string()?;
        fs::write(path, contents).map_err(ModuleIoError::from)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, ModuleIoError> {
        let contents = fs::read_to_string(path)?;
        Module::from_json_str(&contents)
    }

    pub fn to_text(&self) -> String {
        format!("{self}")
    }
}
