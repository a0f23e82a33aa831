//! Test utilities for hook dispatch integration tests
//!
//! This module provides shared utilities for integration tests, including:
//! - Log output through `tracing-subscriber`
//! - Recording handlers that remember what they were called with
//! - The demo plugin module used across tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};

use hookdispatch::{HandlerDescriptor, HookValue, MethodDef, OverrideSlot, ParamType, PluginClass, PluginModule};

static INIT: Once = Once::new();

/// Route `tracing` output to the test writer (once per test binary)
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// Calls observed by recording handlers: (handler name, arguments)
pub type CallLog = Arc<Mutex<Vec<(String, Vec<HookValue>)>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Handler that records its call and returns `"<name>:<arg0>"`
pub fn recording(name: &str, params: &[ParamType], log: &CallLog) -> HandlerDescriptor {
    let log = log.clone();
    let owned = name.to_string();
    HandlerDescriptor::new(name, params, move |args| {
        log.lock().unwrap().push((owned.clone(), args.to_vec()));
        let first = args.first().map(|v| v.to_string()).unwrap_or_default();
        Some(HookValue::from(format!("{}:{}", owned, first)))
    })
}

/// Recording handlers with a single `str` parameter
pub fn recording_set(names: &[&str], log: &CallLog) -> Vec<HandlerDescriptor> {
    names.iter().map(|n| recording(n, &[ParamType::Str], log)).collect()
}

/// Method recording into `log` and returning `"<name>:<arg0>"`
pub fn recording_method(name: &str, log: &CallLog) -> MethodDef {
    let log = log.clone();
    let owned = name.to_string();
    MethodDef::handler(name, &[ParamType::Str], move |args| {
        log.lock().unwrap().push((owned.clone(), args.to_vec()));
        Some(HookValue::from(format!("{}:{}", owned, args[0])))
    })
}

/// `Oxide.Plugins.DebugPlugin` with the `OnMy`/`OnYour` handlers
pub fn debug_plugin_module(log: &CallLog) -> PluginModule {
    PluginModule::new("DebugPlugin.dll").with_class(
        PluginClass::new("Oxide.Plugins", "DebugPlugin")
            .with_method(recording_method("OnMy", log))
            .with_method(recording_method("OnYour", log))
            .with_method(MethodDef::slot(&OverrideSlot::default())),
    )
}

/// Names of the handlers recorded so far, in call order
pub fn called(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().iter().map(|(name, _)| name.clone()).collect()
}
