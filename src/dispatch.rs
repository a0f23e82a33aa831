//! Hook dispatch
//!
//! A plugin instance answers `call_hook(key, out, args) -> found` through
//! one of two implementations, chosen once when the instance is loaded:
//!
//! - [`FallbackDispatch`]: the generic path, a name → handler map consulted
//!   on every call
//! - [`CompiledDispatch`]: a compiled routine executed by the [`RoutineVm`]
//!
//! Both observe the same contract. On a match `out` holds the handler's
//! result (or `None` if it produced none) and the call returns `true`; an
//! unknown key leaves `out` at `None` and returns `false`. Arguments bind
//! positionally, with missing or wrong-typed arguments passed as null.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::bytecode::routine::Routine;
use crate::bytecode::vm::{RoutineVm, VmConfig, VmResult};
use crate::handler::{marshal_args, HandlerDescriptor, HookValue};

/// Which implementation backs a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchKind {
    Fallback,
    Compiled,
}

impl fmt::Display for DispatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchKind::Fallback => write!(f, "fallback"),
            DispatchKind::Compiled => write!(f, "compiled"),
        }
    }
}

/// String-keyed hook dispatch capability
pub trait HookDispatch: Send + Sync {
    /// Dispatch `key`, returning whether a handler matched
    fn call_hook(&self, key: &str, out: &mut Option<HookValue>, args: &[HookValue]) -> VmResult<bool>;

    fn kind(&self) -> DispatchKind;
}

/// Generic name-lookup dispatch
///
/// Handlers are stored by declaration order with a name → index map.
/// When two handlers share a name the first one declared wins.
pub struct FallbackDispatch {
    handlers: Vec<HandlerDescriptor>,
    name_to_id: HashMap<Arc<str>, usize>,
}

impl fmt::Debug for FallbackDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackDispatch")
            .field("handler_count", &self.handlers.len())
            .field("names", &self.name_to_id.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FallbackDispatch {
    pub fn new(handlers: impl IntoIterator<Item = HandlerDescriptor>) -> Self {
        let mut dispatch = Self {
            handlers: Vec::new(),
            name_to_id: HashMap::new(),
        };
        for handler in handlers {
            dispatch.register(handler);
        }
        dispatch
    }

    /// Register a handler; returns false if the name was already taken
    pub fn register(&mut self, handler: HandlerDescriptor) -> bool {
        if self.name_to_id.contains_key(handler.name()) {
            return false;
        }
        let id = self.handlers.len();
        self.name_to_id.insert(handler.name().into(), id);
        self.handlers.push(handler);
        true
    }

    pub fn get(&self, name: &str) -> Option<&HandlerDescriptor> {
        self.name_to_id.get(name).map(|&id| &self.handlers[id])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.name_to_id.contains_key(name)
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered handlers in declaration order
    pub fn handlers(&self) -> &[HandlerDescriptor] {
        &self.handlers
    }
}

impl HookDispatch for FallbackDispatch {
    fn call_hook(&self, key: &str, out: &mut Option<HookValue>, args: &[HookValue]) -> VmResult<bool> {
        *out = None;
        let Some(handler) = self.get(key) else {
            trace!(target: "hookdispatch::dispatch", key, "no handler");
            return Ok(false);
        };
        let bound = marshal_args(handler.params(), args);
        if let Some(value) = handler.invoke(&bound) {
            *out = Some(value);
        }
        Ok(true)
    }

    fn kind(&self) -> DispatchKind {
        DispatchKind::Fallback
    }
}

/// Dispatch through a compiled routine
#[derive(Debug, Clone)]
pub struct CompiledDispatch {
    vm: RoutineVm,
}

impl CompiledDispatch {
    pub fn new(routine: Arc<Routine>) -> Self {
        Self::with_config(routine, VmConfig::default())
    }

    pub fn with_config(routine: Arc<Routine>, config: VmConfig) -> Self {
        Self {
            vm: RoutineVm::with_config(routine, config),
        }
    }

    pub fn routine(&self) -> &Arc<Routine> {
        self.vm.routine()
    }
}

impl HookDispatch for CompiledDispatch {
    fn call_hook(&self, key: &str, out: &mut Option<HookValue>, args: &[HookValue]) -> VmResult<bool> {
        self.vm.run(key, out, args)
    }

    fn kind(&self) -> DispatchKind {
        DispatchKind::Compiled
    }
}
