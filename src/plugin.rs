//! Plugin loading
//!
//! [`compile_class`] runs the whole pipeline for one class: discover its
//! handlers, compile them into a routine and install the routine into the
//! class's override slot. [`PluginInstance::load`] then picks the dispatch
//! implementation once, from what the slot holds.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::bytecode::compiler::{compile_routine_arc, CompileError};
use crate::bytecode::routine::OverrideSlot;
use crate::bytecode::vm::{VmConfig, VmResult};
use crate::config::DispatchConfig;
use crate::dispatch::{CompiledDispatch, DispatchKind, FallbackDispatch, HookDispatch};
use crate::handler::HookValue;
use crate::module::{MethodBody, ModulePatcher, PatchError, PluginModule};

/// Error building a dispatch routine for a class
#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
    Compile(CompileError),
    Patch(PatchError),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile(e) => write!(f, "Compile error: {}", e),
            Self::Patch(e) => write!(f, "Patch error: {}", e),
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Compile(e) => Some(e),
            Self::Patch(e) => Some(e),
        }
    }
}

impl From<CompileError> for BuildError {
    fn from(e: CompileError) -> Self {
        BuildError::Compile(e)
    }
}

impl From<PatchError> for BuildError {
    fn from(e: PatchError) -> Self {
        BuildError::Patch(e)
    }
}

/// Discover, compile and install a dispatch routine for `class`
pub fn compile_class(
    module: PluginModule,
    class: &str,
    slot: &OverrideSlot,
    config: &DispatchConfig,
    patcher: &dyn ModulePatcher,
) -> Result<PluginModule, BuildError> {
    let handlers = module
        .class(class)
        .ok_or_else(|| PatchError::ClassNotFound(class.to_string()))?
        .handlers();
    let routine = compile_routine_arc(slot.clone(), handlers, &config.compiler)?;
    Ok(patcher.patch(module, routine, class, slot)?)
}

/// A loaded plugin class, ready to dispatch hooks
pub struct PluginInstance {
    class: Arc<str>,
    dispatch: Box<dyn HookDispatch>,
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("class", &self.class)
            .field("dispatch", &self.dispatch.kind())
            .finish()
    }
}

impl PluginInstance {
    /// Load `class` from the module.
    ///
    /// Uses the installed routine when the slot has one and the generic
    /// fallback otherwise. A class without the slot dispatches through the
    /// fallback as well.
    pub fn load(
        module: &PluginModule,
        class: &str,
        slot: &OverrideSlot,
        config: &VmConfig,
    ) -> Result<Self, PatchError> {
        let plugin_class = module
            .class(class)
            .ok_or_else(|| PatchError::ClassNotFound(class.to_string()))?;

        let dispatch: Box<dyn HookDispatch> = match plugin_class.slot(slot).map(|m| m.body()) {
            Some(MethodBody::Routine(routine)) => {
                Box::new(CompiledDispatch::with_config(routine.clone(), config.clone()))
            }
            _ => Box::new(FallbackDispatch::new(plugin_class.handlers())),
        };
        debug!(
            target: "hookdispatch::plugin",
            class = %plugin_class.full_name(),
            dispatch = %dispatch.kind(),
            "loaded plugin"
        );

        Ok(Self {
            class: plugin_class.full_name().into(),
            dispatch,
        })
    }

    /// Full name of the loaded class
    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn dispatch_kind(&self) -> DispatchKind {
        self.dispatch.kind()
    }

    /// Dispatch a hook by name
    pub fn call_hook(&self, key: &str, out: &mut Option<HookValue>, args: &[HookValue]) -> VmResult<bool> {
        self.dispatch.call_hook(key, out, args)
    }

    /// Dispatch a hook, returning its result if one was found and produced
    pub fn call(&self, key: &str, args: &[HookValue]) -> VmResult<Option<HookValue>> {
        let mut out = None;
        self.call_hook(key, &mut out, args)?;
        Ok(out)
    }
}
