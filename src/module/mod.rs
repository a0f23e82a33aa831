//! In-memory plugin module model
//!
//! A [`PluginModule`] is a named collection of [`PluginClass`]es. Each class
//! declares methods in order; a method is either a handler carrying a native
//! body, or an overridable slot whose body is the generic fallback until a
//! compiled routine is installed into it.
//!
//! Handler discovery follows the loader's rule: every non-public, non-static
//! method with a native body is a hook handler, in declaration order.

mod patcher;

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::bytecode::routine::{OverrideSlot, Routine};
use crate::handler::{HandlerDescriptor, HandlerFn, HookValue, ParamType};

pub use patcher::{ModulePatcher, PatchError, PatchResult, SlotPatcher};

/// Method accessibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    Protected,
    Internal,
    Private,
}

impl Visibility {
    #[inline]
    pub fn is_public(self) -> bool {
        self == Visibility::Public
    }
}

/// Body of a method
#[derive(Clone)]
pub enum MethodBody {
    /// A callable implemented by the plugin
    Native(HandlerFn),
    /// The inherited generic name-lookup implementation
    Fallback,
    /// A compiled dispatch routine
    Routine(Arc<Routine>),
}

impl fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodBody::Native(_) => write!(f, "Native"),
            MethodBody::Fallback => write!(f, "Fallback"),
            MethodBody::Routine(r) => write!(f, "Routine({} bytes)", r.len()),
        }
    }
}

/// A method declared on a plugin class
#[derive(Debug, Clone)]
pub struct MethodDef {
    name: Arc<str>,
    visibility: Visibility,
    is_static: bool,
    params: SmallVec<[ParamType; 4]>,
    body: MethodBody,
}

impl MethodDef {
    /// Private instance method with a native body
    pub fn handler<F>(name: impl Into<Arc<str>>, params: &[ParamType], body: F) -> Self
    where
        F: Fn(&[HookValue]) -> Option<HookValue> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            visibility: Visibility::Private,
            is_static: false,
            params: SmallVec::from_slice(params),
            body: MethodBody::Native(Arc::new(body)),
        }
    }

    /// Overridable slot, initially backed by the fallback path
    pub fn slot(slot: &OverrideSlot) -> Self {
        Self {
            name: slot.name().into(),
            visibility: Visibility::Public,
            is_static: false,
            params: SmallVec::from_slice(slot.params()),
            body: MethodBody::Fallback,
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    #[inline]
    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    #[inline]
    pub fn body(&self) -> &MethodBody {
        &self.body
    }

    pub(crate) fn set_body(&mut self, body: MethodBody) {
        self.body = body;
    }

    /// True when this non-native method has the slot's name and parameters
    pub fn overrides(&self, slot: &OverrideSlot) -> bool {
        !matches!(self.body, MethodBody::Native(_))
            && self.name() == slot.name()
            && self.params() == slot.params()
    }

    /// True for non-public instance methods with a native body
    pub fn is_hook_handler(&self) -> bool {
        !self.visibility.is_public() && !self.is_static && matches!(self.body, MethodBody::Native(_))
    }

    /// Handler descriptor for a hook handler method
    pub fn descriptor(&self) -> Option<HandlerDescriptor> {
        match &self.body {
            MethodBody::Native(body) if self.is_hook_handler() => Some(HandlerDescriptor::from_fn(
                self.name.clone(),
                &self.params,
                body.clone(),
            )),
            _ => None,
        }
    }
}

/// A class declared in a plugin module
#[derive(Debug, Clone)]
pub struct PluginClass {
    namespace: Arc<str>,
    name: Arc<str>,
    methods: Vec<MethodDef>,
}

impl PluginClass {
    pub fn new(namespace: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Add a method, builder style
    pub fn with_method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    pub fn add_method(&mut self, method: MethodDef) {
        self.methods.push(method);
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `namespace.name`, or just the name without a namespace
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.to_string()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// Check whether `name` refers to this class, by full or simple name
    pub fn is_named(&self, name: &str) -> bool {
        &*self.name == name || self.full_name() == name
    }

    pub fn methods(&self) -> &[MethodDef] {
        &self.methods
    }

    /// First method named `name`
    pub fn method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.name() == name)
    }

    /// The overridable method backing `slot`, matched by name and parameters
    pub fn slot(&self, slot: &OverrideSlot) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.overrides(slot))
    }

    pub(crate) fn slot_mut(&mut self, slot: &OverrideSlot) -> Option<&mut MethodDef> {
        self.methods.iter_mut().find(|m| m.overrides(slot))
    }

    /// Hook handlers in declaration order
    pub fn handlers(&self) -> Vec<HandlerDescriptor> {
        self.methods.iter().filter_map(MethodDef::descriptor).collect()
    }
}

/// A loaded plugin module
#[derive(Debug, Clone)]
pub struct PluginModule {
    name: Arc<str>,
    classes: Vec<PluginClass>,
}

impl PluginModule {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            classes: Vec::new(),
        }
    }

    pub fn with_class(mut self, class: PluginClass) -> Self {
        self.classes.push(class);
        self
    }

    pub fn add_class(&mut self, class: PluginClass) {
        self.classes.push(class);
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn classes(&self) -> &[PluginClass] {
        &self.classes
    }

    /// Look up a class by full or simple name
    pub fn class(&self, name: &str) -> Option<&PluginClass> {
        self.classes.iter().find(|c| c.is_named(name))
    }

    pub(crate) fn class_mut(&mut self, name: &str) -> Option<&mut PluginClass> {
        self.classes.iter_mut().find(|c| c.is_named(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debug_plugin() -> PluginClass {
        PluginClass::new("Oxide.Plugins", "DebugPlugin")
            .with_method(MethodDef::slot(&OverrideSlot::default()))
            .with_method(MethodDef::handler("OnMy", &[ParamType::Str], |_| None))
            .with_method(MethodDef::handler("Helper", &[], |_| None).with_visibility(Visibility::Public))
            .with_method(MethodDef::handler("Shared", &[], |_| None).with_static(true))
            .with_method(MethodDef::handler("OnYour", &[ParamType::Str], |_| None).with_visibility(Visibility::Protected))
    }

    #[test]
    fn test_handler_discovery() {
        let class = debug_plugin();
        let names: Vec<String> = class.handlers().iter().map(|h| h.name().to_string()).collect();
        assert_eq!(names, vec!["OnMy", "OnYour"]);
        assert_eq!(class.handlers()[0].params(), &[ParamType::Str]);
    }

    #[test]
    fn test_slot_is_not_a_handler() {
        let class = debug_plugin();
        let slot = class.slot(&OverrideSlot::default()).unwrap();
        assert!(!slot.is_hook_handler());
        assert!(matches!(slot.body(), MethodBody::Fallback));
        assert!(class.slot(&OverrideSlot::new("OnMy")).is_none());
    }

    #[test]
    fn test_slot_matches_parameter_shape() {
        let narrow = OverrideSlot::default().with_params(&[ParamType::Str]);
        let class = PluginClass::new("Oxide.Plugins", "Odd").with_method(MethodDef::slot(&narrow));
        assert!(class.slot(&OverrideSlot::default()).is_none());
        assert!(class.slot(&narrow).is_some());
        assert_eq!(class.slot(&narrow).unwrap().params(), &[ParamType::Str]);
    }

    #[test]
    fn test_class_lookup_by_name() {
        let module = PluginModule::new("DebugPlugin.dll").with_class(debug_plugin());
        assert!(module.class("DebugPlugin").is_some());
        assert!(module.class("Oxide.Plugins.DebugPlugin").is_some());
        assert!(module.class("Other").is_none());
        assert_eq!(module.classes()[0].full_name(), "Oxide.Plugins.DebugPlugin");
    }
}
