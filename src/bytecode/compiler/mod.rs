//! Dispatch routine compiler
//!
//! This module turns a set of hook handlers into an encoded [`Routine`].
//! The pipeline is:
//!
//! 1. Build a prefix trie over the handler names ([`Trie`])
//! 2. Walk the trie depth-first, emitting logical instructions that compare
//!    the key one char at a time. Mismatch branches point at code that does
//!    not exist yet and are emitted as placeholders.
//! 3. Append the shared "not found" epilogue
//! 4. Bind every placeholder ([`JumpResolver`])
//! 5. Measure the deepest operand stack any path reaches
//! 6. Lower to bytes ([`encode`])
//!
//! # Emitted layout
//!
//! ```text
//! prologue:  clrout; ldkey; key_len; stloc LEN; push 0; stloc POS
//! node(c):   ldkey; ldloc POS; key_char; push c; bne <next sibling | end>
//!            ldloc POS; push 1; add; stloc POS
//! terminal:  ldloc POS; ldloc LEN; bne <first child | end>
//!            (ldargs; push i; ldelem; isinst T)*  call h; stout; push 1; ret
//! children:  node(c') ...
//! end:       push 0; ret
//! ```

pub mod depth;
mod error;
pub mod fixup;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use super::encoder::encode;
use super::ir::{InstrId, InstructionArena, Op, Operand};
use super::routine::{OverrideSlot, Routine};
use super::trie::{NodeId, Trie};
use crate::config::CompilerConfig;
use crate::handler::HandlerDescriptor;

pub use error::{CompileError, CompileResult};
pub use fixup::{Fixup, JumpResolver, PlaceholderMap};

/// Local slot holding the key length
pub const LOCAL_KEY_LEN: u16 = 0;
/// Local slot holding the current match position
pub const LOCAL_POS: u16 = 1;
/// Number of locals a dispatch routine uses
pub const LOCAL_COUNT: u16 = 2;

/// Emits the logical instruction stream for one handler set
pub struct DispatchCompiler<'a> {
    config: &'a CompilerConfig,
    /// Handler table; a handler's index is its call operand
    handlers: Vec<HandlerDescriptor>,
    handler_ids: HashMap<Arc<str>, u16>,
    arena: InstructionArena,
    /// First instruction of each emitted node, in preorder
    subtree_starts: Vec<InstrId>,
    placeholders: PlaceholderMap,
}

/// Output of emission, before fix-up and encoding
#[derive(Debug)]
pub struct EmittedProgram {
    pub arena: InstructionArena,
    pub subtree_starts: Vec<InstrId>,
    pub placeholders: PlaceholderMap,
    pub epilogue: InstrId,
}

impl<'a> DispatchCompiler<'a> {
    /// Create a compiler for a handler set
    pub fn new(config: &'a CompilerConfig, handlers: Vec<HandlerDescriptor>) -> CompileResult<Self> {
        if handlers.len() > u16::MAX as usize + 1 {
            return Err(CompileError::TooManyHandlers(handlers.len()));
        }
        let mut handler_ids = HashMap::with_capacity(handlers.len());
        for (index, handler) in handlers.iter().enumerate() {
            let name: Arc<str> = handler.name().into();
            if handler_ids.insert(name, index as u16).is_some() {
                return Err(CompileError::DuplicateHandlerName(handler.name().to_string()));
            }
        }
        Ok(Self {
            config,
            handlers,
            handler_ids,
            arena: InstructionArena::new(),
            subtree_starts: Vec::new(),
            placeholders: PlaceholderMap::new(),
        })
    }

    /// Run the full pipeline and produce an encoded routine
    pub fn compile(self, slot: OverrideSlot) -> CompileResult<Routine> {
        let trie = Trie::build(self.handlers.iter().map(|h| h.name()))?;
        let config = self.config;
        let (program, handlers) = self.emit(&trie)?;
        let EmittedProgram {
            mut arena,
            subtree_starts,
            placeholders,
            epilogue,
        } = program;

        let bound = JumpResolver::new(&subtree_starts, epilogue).resolve(&mut arena, &placeholders)?;
        let stack_depth = depth::max_stack_depth(&arena, &handlers)?;
        let encoded = encode(&arena, config)?;
        debug!(
            target: "hookdispatch::compiler",
            slot = %slot,
            handlers = handlers.len(),
            trie_nodes = trie.len(),
            instructions = arena.len(),
            placeholders = bound,
            stack_depth,
            bytes = encoded.code.len(),
            passes = encoded.stats.passes,
            "compiled dispatch routine"
        );

        let routine = Routine::new(slot, encoded, handlers, LOCAL_COUNT).with_max_stack_depth(stack_depth);
        if config.trace_listing {
            debug!(target: "hookdispatch::compiler", "\n{}", routine.disassemble());
        }
        Ok(routine)
    }

    /// Emit the prologue, every trie node and the epilogue
    pub fn emit(mut self, trie: &Trie) -> CompileResult<(EmittedProgram, Vec<HandlerDescriptor>)> {
        self.emit_prologue();

        let sizes = trie.subtree_sizes();
        let root = trie.root();
        let sibling_count = root.edges().len();
        for (n, &(ch, child)) in root.edges().iter().enumerate() {
            self.build_node(trie, &sizes, ch, child, n + 1, sibling_count)?;
        }

        // No handler matched
        let epilogue = self.emit_return(false);

        let program = EmittedProgram {
            arena: self.arena,
            subtree_starts: self.subtree_starts,
            placeholders: self.placeholders,
            epilogue,
        };
        Ok((program, self.handlers))
    }

    fn emit_prologue(&mut self) {
        self.push(Op::ClearOut, Operand::None);

        self.push(Op::LoadKey, Operand::None);
        self.push(Op::KeyLength, Operand::None);
        self.push(Op::StoreLocal, Operand::Local(LOCAL_KEY_LEN));

        self.push(Op::LoadConst, Operand::Const(0));
        self.push(Op::StoreLocal, Operand::Local(LOCAL_POS));
    }

    fn build_node(
        &mut self,
        trie: &Trie,
        sizes: &[usize],
        ch: char,
        id: NodeId,
        sibling_index: usize,
        sibling_count: usize,
    ) -> CompileResult<()> {
        let node = trie.node(id);
        trace!(
            target: "hookdispatch::compiler::emit",
            ch = %ch,
            depth = node.depth(),
            sibling_index,
            sibling_count,
            "build node"
        );

        // Compare key[pos] with this node's char
        let preorder = self.subtree_starts.len();
        let first = self.push(Op::LoadKey, Operand::None);
        self.subtree_starts.push(first);
        self.push(Op::LoadLocal, Operand::Local(LOCAL_POS));
        self.push(Op::KeyCharAt, Operand::None);
        self.push(Op::LoadConst, Operand::Const(ch as i64));
        if sibling_index < sibling_count {
            // Next sibling starts right after this whole subtree
            self.jump_to(Fixup::Subtree(preorder + sizes[id]));
        } else {
            self.jump_to(Fixup::Epilogue);
        }

        // Char matched, advance
        self.push(Op::LoadLocal, Operand::Local(LOCAL_POS));
        self.push(Op::LoadConst, Operand::Const(1));
        self.push(Op::Add, Operand::None);
        self.push(Op::StoreLocal, Operand::Local(LOCAL_POS));

        if let Some(name) = node.terminal() {
            // Longer key: keep matching in the children
            self.push(Op::LoadLocal, Operand::Local(LOCAL_POS));
            self.push(Op::LoadLocal, Operand::Local(LOCAL_KEY_LEN));
            if node.edges().is_empty() {
                self.jump_to(Fixup::Epilogue);
            } else {
                self.jump_to(Fixup::Subtree(preorder + 1));
            }

            let handler = self
                .handler_ids
                .get(name)
                .copied()
                .ok_or_else(|| CompileError::UnknownHandler(name.to_string()))?;
            self.call_handler(handler);
            self.emit_return(true);
        }

        let count = node.edges().len();
        for (n, &(child_ch, child)) in node.edges().iter().enumerate() {
            self.build_node(trie, sizes, child_ch, child, n + 1, count)?;
        }
        Ok(())
    }

    /// Marshal arguments, invoke the handler and store its result
    fn call_handler(&mut self, index: u16) {
        let params: Vec<_> = self.handlers[index as usize].params().to_vec();
        for (i, ty) in params.into_iter().enumerate() {
            self.push(Op::LoadArgs, Operand::None);
            self.push(Op::LoadConst, Operand::Const(i as i64));
            self.push(Op::LoadElem, Operand::None);
            self.push(Op::CastTo, Operand::Type(ty));
        }
        self.push(Op::CallHandler, Operand::Handler(index));
        self.push(Op::StoreOut, Operand::None);
    }

    /// Emit `push found; ret`, returning the first instruction
    fn emit_return(&mut self, found: bool) -> InstrId {
        let first = self.push(Op::LoadConst, Operand::Const(found as i64));
        self.push(Op::Return, Operand::None);
        first
    }

    /// Emit a placeholder branch-on-mismatch
    fn jump_to(&mut self, fixup: Fixup) -> InstrId {
        let at = self.push(Op::BranchNe, Operand::Pending);
        self.placeholders.insert(at, fixup);
        at
    }

    #[inline]
    fn push(&mut self, op: Op, operand: Operand) -> InstrId {
        self.arena.push(op, operand)
    }
}

/// Compile a handler set into a routine for the given override slot
pub fn compile_routine(
    slot: OverrideSlot,
    handlers: Vec<HandlerDescriptor>,
    config: &CompilerConfig,
) -> CompileResult<Routine> {
    DispatchCompiler::new(config, handlers)?.compile(slot)
}

/// Compile and wrap in Arc
pub fn compile_routine_arc(
    slot: OverrideSlot,
    handlers: Vec<HandlerDescriptor>,
    config: &CompilerConfig,
) -> CompileResult<Arc<Routine>> {
    compile_routine(slot, handlers, config).map(Arc::new)
}
