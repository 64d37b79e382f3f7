use std::sync::Arc;

use crate::compiler::{CompileError, CompileMemo, Compiler};
use crate::expr::Expr;
use crate::graph::Graph;
use crate::node::{Node, NodeId};
use crate::node_type::TypeLib;
use crate::subgraph::{SubgraphKey, SubgraphLib};
use crate::tests::support::{
    passthrough_type, test_type_lib, unpack3_type, TestTypeHooks,
};

fn add_node(graph: &mut Graph, type_lib: &TypeLib, type_name: &str) -> NodeId {
    let node = Node::from_type(
        type_lib
            .by_name(type_name)
            .unwrap_or_else(|| panic!("Node type named \"{}\" not found", type_name)),
    );
    let id = node.id;
    graph.add_node(node);
    id
}

fn full_type_lib() -> TypeLib {
    let mut type_lib = test_type_lib(TestTypeHooks::default());
    type_lib.add(passthrough_type());
    type_lib.add(unpack3_type());
    type_lib
}

fn base_of(accessor: &Arc<Expr>) -> Arc<Expr> {
    let mut expr = accessor.clone();
    loop {
        expr = match expr.as_ref() {
            Expr::Invoke { .. } => return expr.clone(),
            Expr::Head(list) => list.clone(),
            Expr::Tail(list) => list.clone(),
            Expr::Skip { list, .. } => list.clone(),
            Expr::Lambda { body, .. } => body.clone(),
            other => panic!("unexpected expression shape: {:?}", other),
        };
    }
}

#[test]
fn formal_names_use_port_name_and_index() -> anyhow::Result<()> {
    let type_lib = full_type_lib();
    let mut graph = Graph::default();
    let a_id = add_node(&mut graph, &type_lib, "get_a");
    let b_id = add_node(&mut graph, &type_lib, "get_b");
    let sum_id = add_node(&mut graph, &type_lib, "sum");
    graph.connect(sum_id, 0, a_id, 0).unwrap();
    graph.connect(sum_id, 1, b_id, 0).unwrap();

    let registry = SubgraphLib::default();
    let compiler = Compiler::new(&registry);
    let mut memo = CompileMemo::default();
    let expr = compiler.compile_for_output(&mut graph, sum_id, 0, &mut memo)?;

    let Expr::Invoke { params, args, .. } = expr.as_ref() else {
        panic!("expected an application, got {:?}", expr);
    };
    assert_eq!(params, &["a0".to_string(), "b1".to_string()]);
    assert!(args.iter().all(|arg| arg.is_some()));

    Ok(())
}

#[test]
fn multi_output_accessors_share_one_base() -> anyhow::Result<()> {
    let type_lib = full_type_lib();
    let mut graph = Graph::default();
    let a_id = add_node(&mut graph, &type_lib, "get_a");
    let d_id = add_node(&mut graph, &type_lib, "unpack3");
    let x_id = add_node(&mut graph, &type_lib, "pass");
    let z_id = add_node(&mut graph, &type_lib, "pass");
    graph.connect(d_id, 0, a_id, 0).unwrap();
    // only outputs 0 and 2 are consumed
    graph.connect(x_id, 0, d_id, 0).unwrap();
    graph.connect(z_id, 0, d_id, 2).unwrap();

    let registry = SubgraphLib::default();
    let compiler = Compiler::new(&registry);
    let mut memo = CompileMemo::default();

    let out0 = compiler.compile_for_output(&mut graph, d_id, 0, &mut memo)?;
    let out2 = compiler.compile_for_output(&mut graph, d_id, 2, &mut memo)?;

    // out0 extracts the head of the aggregate directly
    let Expr::Head(list0) = out0.as_ref() else {
        panic!("expected a head accessor, got {:?}", out0);
    };
    assert!(matches!(list0.as_ref(), Expr::Invoke { .. }));

    // out2 skips two positions in one combined step
    let Expr::Head(list2) = out2.as_ref() else {
        panic!("expected a head accessor, got {:?}", out2);
    };
    let Expr::Skip { count, list } = list2.as_ref() else {
        panic!("expected a skip accessor, got {:?}", list2);
    };
    assert_eq!(*count, 2);
    assert!(Arc::ptr_eq(list0, list));

    // one compile for unpack3, one for its producer
    assert_eq!(memo.len(), 2);

    Ok(())
}

#[test]
fn consumers_share_compiled_producer() -> anyhow::Result<()> {
    let type_lib = full_type_lib();
    let mut graph = Graph::default();
    let a_id = add_node(&mut graph, &type_lib, "get_a");
    let b_id = add_node(&mut graph, &type_lib, "pass");
    let c_id = add_node(&mut graph, &type_lib, "pass");
    graph.connect(b_id, 0, a_id, 0).unwrap();
    graph.connect(c_id, 0, a_id, 0).unwrap();

    let registry = SubgraphLib::default();
    let compiler = Compiler::new(&registry);
    let mut memo = CompileMemo::default();

    let b_expr = compiler.compile_node(&mut graph, b_id, &mut memo)?;
    let c_expr = compiler.compile_node(&mut graph, c_id, &mut memo)?;

    let Expr::Invoke { args: b_args, .. } = b_expr.as_ref() else {
        panic!("expected an application");
    };
    let Expr::Invoke { args: c_args, .. } = c_expr.as_ref() else {
        panic!("expected an application");
    };
    let b_arg = b_args[0].as_ref().expect("bound argument");
    let c_arg = c_args[0].as_ref().expect("bound argument");
    assert!(Arc::ptr_eq(b_arg, c_arg));

    Ok(())
}

#[test]
fn unbound_input_compiles_to_partial_application() -> anyhow::Result<()> {
    let type_lib = full_type_lib();
    let mut graph = Graph::default();
    let a_id = add_node(&mut graph, &type_lib, "get_a");
    let sum_id = add_node(&mut graph, &type_lib, "sum");
    graph.connect(sum_id, 0, a_id, 0).unwrap();

    let registry = SubgraphLib::default();
    let compiler = Compiler::new(&registry);
    let mut memo = CompileMemo::default();
    let expr = compiler.compile_for_output(&mut graph, sum_id, 0, &mut memo)?;

    assert!(expr.is_partial());
    assert_eq!(expr.free_params(), vec!["b1"]);

    // compiling a partial application satisfies the recompute obligation
    assert!(!graph.by_id(sum_id).unwrap().dirty);

    Ok(())
}

#[test]
fn partial_multi_output_wraps_accessors_in_lambda() -> anyhow::Result<()> {
    let type_lib = full_type_lib();
    let mut graph = Graph::default();
    let d_id = add_node(&mut graph, &type_lib, "unpack3");

    let registry = SubgraphLib::default();
    let compiler = Compiler::new(&registry);
    let mut memo = CompileMemo::default();
    let expr = compiler.compile_for_output(&mut graph, d_id, 0, &mut memo)?;

    let Expr::Lambda { params, body } = expr.as_ref() else {
        panic!("expected a lambda, got {:?}", expr);
    };
    assert_eq!(params, &["seed0".to_string()]);

    let Expr::Head(list) = body.as_ref() else {
        panic!("expected a head accessor");
    };
    let Expr::Invoke { args, .. } = list.as_ref() else {
        panic!("expected an application");
    };
    // the free formal is wired as a symbol the lambda closes over
    let Some(arg) = args[0].as_ref() else {
        panic!("free formal should be symbol-bound in a multi-output node");
    };
    assert!(matches!(arg.as_ref(), Expr::Symbol(name) if name == "seed0"));

    Ok(())
}

#[test]
fn recompile_after_edit_reuses_upstream_memo() -> anyhow::Result<()> {
    let type_lib = full_type_lib();
    let mut graph = Graph::default();
    let a_id = add_node(&mut graph, &type_lib, "get_a");
    let b_id = add_node(&mut graph, &type_lib, "get_b");
    let sum_id = add_node(&mut graph, &type_lib, "sum");
    graph.connect(sum_id, 0, a_id, 0).unwrap();

    let registry = SubgraphLib::default();
    let compiler = Compiler::new(&registry);
    let mut memo = CompileMemo::default();

    let partial = compiler.compile_for_output(&mut graph, sum_id, 0, &mut memo)?;
    assert!(partial.is_partial());
    let Expr::Invoke { args, .. } = partial.as_ref() else {
        panic!("expected an application");
    };
    let a_expr = args[0].as_ref().expect("bound argument").clone();

    // provide the missing input, evict only the edited node
    graph.connect(sum_id, 1, b_id, 0).unwrap();
    memo.invalidate(sum_id);

    let complete = compiler.compile_for_output(&mut graph, sum_id, 0, &mut memo)?;
    assert!(!complete.is_partial());
    let Expr::Invoke { args, .. } = complete.as_ref() else {
        panic!("expected an application");
    };
    let a_expr_again = args[0].as_ref().expect("bound argument");
    assert!(Arc::ptr_eq(&a_expr, a_expr_again));
    assert_eq!(
        args[1].as_ref().and_then(|arg| arg.as_invoke()),
        Some(b_id)
    );

    Ok(())
}

#[test]
fn compile_node_collects_all_outputs() -> anyhow::Result<()> {
    let type_lib = full_type_lib();
    let mut graph = Graph::default();
    let a_id = add_node(&mut graph, &type_lib, "get_a");
    let d_id = add_node(&mut graph, &type_lib, "unpack3");
    graph.connect(d_id, 0, a_id, 0).unwrap();

    let registry = SubgraphLib::default();
    let compiler = Compiler::new(&registry);
    let mut memo = CompileMemo::default();
    let expr = compiler.compile_node(&mut graph, d_id, &mut memo)?;

    let Expr::Collect(items) = expr.as_ref() else {
        panic!("expected a collect, got {:?}", expr);
    };
    assert_eq!(items.len(), 3);

    // unconsumed outputs derive from the same base without recompiling
    let bases: Vec<Arc<Expr>> = items.iter().map(base_of).collect();
    assert!(Arc::ptr_eq(&bases[0], &bases[1]));
    assert!(Arc::ptr_eq(&bases[0], &bases[2]));

    Ok(())
}

#[test]
fn missing_subgraph_definition_flags_error_without_aborting() -> anyhow::Result<()> {
    let type_lib = full_type_lib();
    let mut graph = Graph::default();
    let r_id = add_node(&mut graph, &type_lib, "get_a");
    let key = SubgraphKey::unique();
    graph.by_id_mut(r_id).unwrap().subgraph_key = Some(key);

    let registry = SubgraphLib::default();
    let compiler = Compiler::new(&registry);
    let mut memo = CompileMemo::default();
    let expr = compiler.compile_for_output(&mut graph, r_id, 0, &mut memo)?;

    assert!(matches!(expr.as_ref(), Expr::Invoke { .. }));
    let node = graph.by_id(r_id).unwrap();
    assert_eq!(node.state, crate::node::NodeState::Error);
    assert!(node
        .diagnostic
        .as_deref()
        .unwrap()
        .contains("Definition not found"));

    Ok(())
}

#[test]
fn compile_errors_on_unknown_node_and_bad_output() {
    let type_lib = full_type_lib();
    let mut graph = Graph::default();
    let a_id = add_node(&mut graph, &type_lib, "get_a");

    let registry = SubgraphLib::default();
    let compiler = Compiler::new(&registry);
    let mut memo = CompileMemo::default();

    let unknown = NodeId::unique();
    let err = compiler
        .compile_for_output(&mut graph, unknown, 0, &mut memo)
        .unwrap_err();
    assert_eq!(err, CompileError::NodeNotFound { node_id: unknown });

    let err = compiler
        .compile_for_output(&mut graph, a_id, 1, &mut memo)
        .unwrap_err();
    assert_eq!(
        err,
        CompileError::OutputOutOfRange {
            node_id: a_id,
            output_idx: 1
        }
    );
}
