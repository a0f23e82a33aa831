//! Hookdispatch - Direct-Call Hook Dispatch Compiler
//!
//! This library replaces the generic name-lookup path a plugin host uses to
//! call hook handlers with a routine compiled per plugin class. The routine
//! walks the hook name one char at a time through a prefix trie of the
//! class's handler names, so dispatch costs O(name length) and never
//! consults a map.
//!
//! # Architecture
//!
//! The pipeline consists of four stages:
//!
//! 1. **Discovery** (`module` module)
//!    - The non-public instance methods of a plugin class are its handlers
//!
//! 2. **Compilation** (`bytecode` module)
//!    - Builds a prefix trie over the handler names
//!    - Emits compare/branch/call instructions with placeholder branches
//!    - Binds every placeholder once all targets exist
//!    - Encodes to compact byte code with branch relaxation
//!
//! 3. **Installation** (`module` module)
//!    - A `ModulePatcher` installs the routine into the class's override slot
//!
//! 4. **Dispatch** (`dispatch` and `plugin` modules)
//!    - `PluginInstance::load` picks the compiled or fallback path once
//!
//! # Example
//!
//! ```rust
//! use hookdispatch::*;
//!
//! let module = PluginModule::new("DebugPlugin.dll").with_class(
//!     PluginClass::new("Oxide.Plugins", "DebugPlugin")
//!         .with_method(MethodDef::slot(&OverrideSlot::default()))
//!         .with_method(MethodDef::handler("OnMy", &[ParamType::Str], |args| {
//!             Some(HookValue::from(format!("OnMy got {}", args[0])))
//!         })),
//! );
//!
//! let slot = OverrideSlot::default();
//! let patched = compile_class(module, "DebugPlugin", &slot, &DispatchConfig::default(), &SlotPatcher)
//!     .expect("build failed");
//! let plugin = PluginInstance::load(&patched, "DebugPlugin", &slot, &VmConfig::default())
//!     .expect("load failed");
//!
//! let mut out = None;
//! assert!(plugin.call_hook("OnMy", &mut out, &["test".into()]).unwrap());
//! assert!(!plugin.call_hook("OnMy2", &mut out, &["test2".into()]).unwrap());
//! ```
//!
//! # Dispatch Semantics
//!
//! - **Found**: the handler's result is stored in `out` (`None` if it produced none)
//! - **Not found**: `out` is `None` and the call returns `false`
//! - **Arguments**: bound positionally; missing or wrong-typed arguments pass null

pub mod bytecode;
pub mod config;
pub mod dispatch;
pub mod handler;
pub mod module;
pub mod plugin;

pub use bytecode::{
    compile_routine, CompileError, CompileResult, OverrideSlot, Routine, RoutineVm, VmError, VmResult,
};
pub use config::{CompilerConfig, ConfigError, DispatchConfig, VmConfig};
pub use dispatch::{CompiledDispatch, DispatchKind, FallbackDispatch, HookDispatch};
pub use handler::{HandlerDescriptor, HandlerFn, HookValue, ParamType};
pub use module::{
    MethodBody, MethodDef, ModulePatcher, PatchError, PatchResult, PluginClass, PluginModule, SlotPatcher,
    Visibility,
};
pub use plugin::{compile_class, BuildError, PluginInstance};
