//! Dispatch Routine Bytecode Module
//!
//! This module compiles a fixed set of named hook handlers into a compact
//! byte-code routine that maps a string key to its handler in time
//! proportional to the key length, and provides the VM that executes it.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                     Handler descriptors                           │
//! └───────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                    TrieBuilder (trie)                             │
//! │                names → prefix trie                                │
//! └───────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                  DispatchCompiler (compiler)                      │
//! │   trie → logical instructions + placeholder map                   │
//! │   JumpResolver (compiler::fixup): placeholders → targets          │
//! └───────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                    Encoder (encoder)                              │
//! │   compact forms + branch relaxation → Routine                     │
//! └───────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                    RoutineVm (vm)                                 │
//! │   (key, out, args) → found                                        │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`trie`]: Prefix trie over handler names
//! - [`ir`]: Logical instruction arena
//! - [`compiler`]: Emitter and jump fix-up
//! - [`opcodes`]: Concrete instruction set
//! - [`encoder`]: Lowering and branch relaxation
//! - [`routine`]: Encoded routine, decoder and disassembler
//! - [`vm`]: Virtual machine execution engine
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use hookdispatch::bytecode::{compile_routine, OverrideSlot, RoutineVm};
//! use hookdispatch::{CompilerConfig, HandlerDescriptor, HookValue, ParamType};
//!
//! let greet = HandlerDescriptor::new("OnGreet", &[ParamType::Str], |args| {
//!     Some(HookValue::from(format!("hello {}", args[0])))
//! });
//! let routine = compile_routine(OverrideSlot::default(), vec![greet], &CompilerConfig::default())
//!     .expect("compile failed");
//!
//! let vm = RoutineVm::new(Arc::new(routine));
//! let mut out = None;
//! assert!(vm.run("OnGreet", &mut out, &["bob".into()]).expect("execution failed"));
//! assert_eq!(out, Some(HookValue::from("hello \"bob\"")));
//! ```

pub mod compiler;
pub mod encoder;
pub mod ir;
pub mod opcodes;
pub mod routine;
pub mod trie;
pub mod vm;

pub use compiler::{compile_routine, compile_routine_arc, CompileError, CompileResult, DispatchCompiler};
pub use encoder::{EncodedProgram, EncodingStats};
pub use opcodes::Opcode;
pub use routine::{DecodedInstruction, OverrideSlot, Routine};
pub use trie::{Trie, TrieBuilder};
pub use vm::{RoutineVm, VmConfig, VmError, VmResult};
