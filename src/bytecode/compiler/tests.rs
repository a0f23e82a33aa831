//! Tests for the dispatch routine compiler.

use super::*;
use crate::bytecode::ir::Operand;
use crate::bytecode::opcodes::Opcode;
use crate::handler::ParamType;

fn handler(name: &str) -> HandlerDescriptor {
    HandlerDescriptor::new(name, &[ParamType::Str], |_| None)
}

fn handlers(names: &[&str]) -> Vec<HandlerDescriptor> {
    names.iter().map(|n| handler(n)).collect()
}

fn emit(names: &[&str]) -> EmittedProgram {
    let config = CompilerConfig::default();
    let set = handlers(names);
    let trie = Trie::build(names.iter().copied()).unwrap();
    let (program, _) = DispatchCompiler::new(&config, set).unwrap().emit(&trie).unwrap();
    program
}

fn bind(program: &mut EmittedProgram) {
    JumpResolver::new(&program.subtree_starts, program.epilogue)
        .resolve(&mut program.arena, &program.placeholders)
        .unwrap();
}

fn compile(names: &[&str]) -> Routine {
    compile_routine(OverrideSlot::default(), handlers(names), &CompilerConfig::default())
        .expect("routine should compile")
}

#[test]
fn test_prologue_layout() {
    let program = emit(&["a"]);
    let ops: Vec<Op> = program.arena.as_slice()[..6].iter().map(|i| i.op).collect();
    assert_eq!(
        ops,
        vec![Op::ClearOut, Op::LoadKey, Op::KeyLength, Op::StoreLocal, Op::LoadConst, Op::StoreLocal]
    );
    assert_eq!(program.arena.get(3).unwrap().operand, Operand::Local(LOCAL_KEY_LEN));
    assert_eq!(program.arena.get(5).unwrap().operand, Operand::Local(LOCAL_POS));
}

#[test]
fn test_one_subtree_start_per_trie_node() {
    let program = emit(&["OnMy", "OnMy2", "OnYour"]);
    // O n M y 2 Y o u r
    assert_eq!(program.subtree_starts.len(), 9);
    for &start in &program.subtree_starts {
        assert_eq!(program.arena.get(start).unwrap().op, Op::LoadKey);
    }
}

#[test]
fn test_every_branch_starts_as_placeholder() {
    let program = emit(&["OnMy", "OnYour"]);
    let branches: Vec<InstrId> = program
        .arena
        .iter()
        .filter(|(_, i)| i.is_branch())
        .map(|(id, _)| id)
        .collect();
    assert_eq!(branches, program.placeholders.keys().copied().collect::<Vec<_>>());
    assert!(branches
        .iter()
        .all(|&id| program.arena.get(id).unwrap().operand == Operand::Pending));
}

#[test]
fn test_sibling_mismatch_targets_next_sibling() {
    let mut program = emit(&["OnMy", "OnYour"]);
    bind(&mut program);

    // Preorder: O=0 n=1 M=2 y=3 Y=4 ...; M's compare branches to Y
    let m_start = program.subtree_starts[2];
    let y_start = program.subtree_starts[4];
    let branch = program.arena.get(m_start + 4).unwrap();
    assert!(branch.is_branch());
    assert_eq!(branch.target(), Some(y_start));

    // Y is the last sibling: mismatch goes to the epilogue
    let branch = program.arena.get(y_start + 4).unwrap();
    assert_eq!(branch.target(), Some(program.epilogue));
}

#[test]
fn test_terminal_with_children_continues_into_first_child() {
    let mut program = emit(&["On", "OnMy"]);
    bind(&mut program);

    // n is terminal; its length check branches to M
    let n_start = program.subtree_starts[1];
    let m_start = program.subtree_starts[2];
    let length_check = n_start + 11;
    let branch = program.arena.get(length_check).unwrap();
    assert!(branch.is_branch());
    assert_eq!(branch.target(), Some(m_start));
}

#[test]
fn test_terminal_leaf_length_mismatch_goes_to_epilogue() {
    let mut program = emit(&["ab"]);
    bind(&mut program);
    let b_start = program.subtree_starts[1];
    let branch = program.arena.get(b_start + 11).unwrap();
    assert!(branch.is_branch());
    assert_eq!(branch.target(), Some(program.epilogue));
}

#[test]
fn test_epilogue_returns_not_found() {
    let program = emit(&["a", "b"]);
    let epilogue = program.arena.get(program.epilogue).unwrap();
    assert_eq!(epilogue.operand, Operand::Const(0));
    assert_eq!(program.arena.get(program.epilogue + 1).unwrap().op, Op::Return);
    assert_eq!(program.arena.len(), program.epilogue + 2);
}

#[test]
fn test_argument_marshalling_per_parameter() {
    let config = CompilerConfig::default();
    let set = vec![HandlerDescriptor::new(
        "h",
        &[ParamType::Long, ParamType::Any],
        |_| None,
    )];
    let trie = Trie::build(["h"]).unwrap();
    let (program, _) = DispatchCompiler::new(&config, set).unwrap().emit(&trie).unwrap();

    let casts: Vec<Operand> = program
        .arena
        .iter()
        .filter(|(_, i)| i.op == Op::CastTo)
        .map(|(_, i)| i.operand)
        .collect();
    assert_eq!(casts, vec![Operand::Type(ParamType::Long), Operand::Type(ParamType::Any)]);
    let calls = program.arena.iter().filter(|(_, i)| i.op == Op::CallHandler).count();
    assert_eq!(calls, 1);
}

#[test]
fn test_routine_records_handlers_and_instruction_count() {
    let config = CompilerConfig::default();
    let names = ["OnMy", "OnMy2", "OnYour"];
    let trie = Trie::build(names).unwrap();
    let (program, _) = DispatchCompiler::new(&config, handlers(&names))
        .unwrap()
        .emit(&trie)
        .unwrap();

    let routine = compile(&names);
    assert_eq!(routine.instruction_count(), program.arena.len());
    let table: Vec<&str> = routine.handlers().iter().map(|h| h.name()).collect();
    assert_eq!(table, names.to_vec());
    assert_eq!(routine.local_count(), LOCAL_COUNT);
}

#[test]
fn test_encoded_branches_land_on_instruction_boundaries() {
    let routine = compile(&["OnMy", "OnMy2", "OnYour", "On", "Other", "X"]);
    let boundaries: Vec<usize> = routine.decode().map(|i| i.offset).collect();
    assert_eq!(boundaries.len(), routine.instruction_count());
    for target in routine.branch_targets() {
        assert!(boundaries.contains(&target), "branch into the middle of an instruction: {:04x}", target);
    }
}

#[test]
fn test_long_names_force_long_branches() {
    let long_a = format!("A{}", "a".repeat(60));
    let long_b = format!("B{}", "b".repeat(60));
    let routine = compile(&[long_a.as_str(), long_b.as_str()]);
    assert!(routine.stats().long_branches > 0);
    assert!(routine.stats().passes >= 2);
    assert!(routine
        .decode()
        .any(|i| i.opcode == Opcode::BranchNe));
}

#[test]
fn test_recompile_is_deterministic() {
    let names = ["OnMy", "OnMy2", "OnYour"];
    let first = compile(&names);
    let second = compile(&names);
    assert_eq!(first.code(), second.code());
    assert_eq!(first.offsets(), second.offsets());
}

#[test]
fn test_empty_handler_set_compiles_to_not_found() {
    let routine = compile(&[]);
    let ops: Vec<Opcode> = routine.decode().map(|i| i.opcode).collect();
    assert_eq!(ops.last(), Some(&Opcode::Return));
    assert!(routine.branch_targets().is_empty());
}

#[test]
fn test_duplicate_handler_rejected() {
    let err = compile_routine(
        OverrideSlot::default(),
        handlers(&["OnMy", "OnMy"]),
        &CompilerConfig::default(),
    )
    .unwrap_err();
    assert_eq!(err, CompileError::DuplicateHandlerName("OnMy".to_string()));
}

#[test]
fn test_empty_handler_name_rejected() {
    let err = compile_routine(OverrideSlot::default(), handlers(&[""]), &CompilerConfig::default())
        .unwrap_err();
    assert_eq!(err, CompileError::EmptyHandlerName);
}

#[test]
fn test_too_many_handlers_rejected() {
    let set: Vec<HandlerDescriptor> = (0..=u16::MAX as usize + 1)
        .map(|i| handler(&format!("h{}", i)))
        .collect();
    let err = compile_routine(OverrideSlot::default(), set, &CompilerConfig::default()).unwrap_err();
    assert_eq!(err, CompileError::TooManyHandlers(u16::MAX as usize + 2));
}

#[test]
fn test_trace_listing_does_not_change_code() {
    let names = ["OnMy", "OnYour"];
    let traced = compile_routine(
        OverrideSlot::default(),
        handlers(&names),
        &CompilerConfig {
            trace_listing: true,
            ..CompilerConfig::default()
        },
    )
    .unwrap();
    assert_eq!(traced.code(), compile(&names).code());
}

#[test]
fn test_stack_depth_tracks_widest_handler() {
    let wide = HandlerDescriptor::new("OnWide", &[ParamType::Any; 300], |_| None);
    let routine = compile_routine(
        OverrideSlot::default(),
        vec![handler("OnMy"), wide],
        &CompilerConfig::default(),
    )
    .unwrap();
    // 299 bound arguments plus args and index for the last one
    assert_eq!(routine.max_stack_depth(), 301);

    // Key compare and one-argument marshalling both peak at two
    assert_eq!(compile(&["OnMy"]).max_stack_depth(), 2);
    assert_eq!(compile(&[]).max_stack_depth(), 1);
}
