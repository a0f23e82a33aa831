//! Installing compiled routines into plugin modules.

use std::sync::Arc;

use tracing::debug;

use crate::bytecode::routine::{OverrideSlot, Routine};

use super::{MethodBody, PluginModule};

/// Patch-time errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// No class with the given name in the module
    ClassNotFound(String),
    /// The class has no overridable method for the slot
    ModuleSlotNotFound { class: String, slot: String },
}

impl std::fmt::Display for PatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClassNotFound(name) => write!(f, "Class not found: {}", name),
            Self::ModuleSlotNotFound { class, slot } => {
                write!(f, "Class {} has no override slot {}", class, slot)
            }
        }
    }
}

impl std::error::Error for PatchError {}

/// Result type for patching
pub type PatchResult<T> = Result<T, PatchError>;

/// Installs a routine into a class's override slot
///
/// The module is consumed and returned updated; everything except the
/// slot's body is left unchanged.
pub trait ModulePatcher {
    fn patch(
        &self,
        module: PluginModule,
        routine: Arc<Routine>,
        class: &str,
        slot: &OverrideSlot,
    ) -> PatchResult<PluginModule>;
}

/// Patcher that replaces the slot method's body in place
#[derive(Debug, Clone, Copy, Default)]
pub struct SlotPatcher;

impl ModulePatcher for SlotPatcher {
    fn patch(
        &self,
        mut module: PluginModule,
        routine: Arc<Routine>,
        class: &str,
        slot: &OverrideSlot,
    ) -> PatchResult<PluginModule> {
        let module_name = module.name().to_string();
        let target = module
            .class_mut(class)
            .ok_or_else(|| PatchError::ClassNotFound(class.to_string()))?;
        let full_name = target.full_name();
        let method = target
            .slot_mut(slot)
            .ok_or_else(|| PatchError::ModuleSlotNotFound {
                class: full_name.clone(),
                slot: slot.signature(),
            })?;

        let bytes = routine.len();
        method.set_body(MethodBody::Routine(routine));
        debug!(
            target: "hookdispatch::patcher",
            module = %module_name,
            class = %full_name,
            slot = %slot,
            bytes,
            "installed dispatch routine"
        );
        Ok(module)
    }
}
