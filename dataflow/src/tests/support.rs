use crate::data::{DataType, Value};
use crate::evaluator::{EvalResult, Evaluator};
use crate::expr::Expr;
use crate::graph::Graph;
use crate::node::{Node, NodeId, PortSpec};
use crate::node_type::{NodeLogic, NodeType, NodeTypeId, TypeLib};

pub const GET_A_TYPE_ID: NodeTypeId =
    NodeTypeId::from_u128(0xd4d27137_5a14_437a_8bb5_b2f7be0941a2);
pub const GET_B_TYPE_ID: NodeTypeId =
    NodeTypeId::from_u128(0xa937baff_822d_48fd_9154_58751539b59b);
pub const SUM_TYPE_ID: NodeTypeId = NodeTypeId::from_u128(0x2d3b389d_7b58_44d9_b3d1_a595765b21a5);
pub const MULT_TYPE_ID: NodeTypeId =
    NodeTypeId::from_u128(0x432b9bf1_f478_476c_a9c9_9a6e190124fc);
pub const PRINT_TYPE_ID: NodeTypeId =
    NodeTypeId::from_u128(0xf22cd316_1cdf_4a80_b86c_1277acd1408a);

pub const PASS_TYPE_ID: NodeTypeId = NodeTypeId::from_u128(0x5e0d2c77_9a41_4b6b_bf55_b1a9c0d4e001);
pub const UNPACK3_TYPE_ID: NodeTypeId =
    NodeTypeId::from_u128(0x5e0d2c77_9a41_4b6b_bf55_b1a9c0d4e002);

/// 1-in 1-out identity.
pub fn passthrough_type() -> NodeType {
    NodeType {
        id: PASS_TYPE_ID,
        name: "pass".to_string(),
        category: "Debug".to_string(),
        inputs: vec![int_port("value")],
        outputs: vec![int_port("value")],
        logic: NodeLogic::new(|args, outputs| {
            outputs[0] = Some(args[0].clone());
            Ok(())
        }),
        ..Default::default()
    }
}

/// 1-in 3-out: seed, seed * 2, seed * 3.
pub fn unpack3_type() -> NodeType {
    NodeType {
        id: UNPACK3_TYPE_ID,
        name: "unpack3".to_string(),
        category: "Debug".to_string(),
        inputs: vec![int_port("seed")],
        outputs: vec![int_port("x"), int_port("y"), int_port("z")],
        logic: NodeLogic::new(|args, outputs| {
            let seed = args[0].as_int();
            outputs[0] = Some(seed.into());
            outputs[1] = Some((seed * 2).into());
            outputs[2] = Some((seed * 3).into());
            Ok(())
        }),
        ..Default::default()
    }
}

pub struct TestTypeHooks {
    pub get_a: Box<dyn Fn() -> i64 + Send + Sync>,
    pub get_b: Box<dyn Fn() -> i64 + Send + Sync>,
    pub print: Box<dyn Fn(i64) + Send + Sync>,
}

impl Default for TestTypeHooks {
    fn default() -> Self {
        Self {
            get_a: Box::new(|| 2),
            get_b: Box::new(|| 5),
            print: Box::new(|_| {}),
        }
    }
}

pub fn int_port(name: &str) -> PortSpec {
    PortSpec {
        name: name.to_string(),
        description: "".to_string(),
        data_type: DataType::Int,
    }
}

pub fn test_type_lib(hooks: TestTypeHooks) -> TypeLib {
    let TestTypeHooks { get_a, get_b, print } = hooks;

    [
        NodeType {
            id: GET_A_TYPE_ID,
            name: "get_a".to_string(),
            category: "Debug".to_string(),
            outputs: vec![int_port("value")],
            logic: NodeLogic::new(move |_args, outputs| {
                outputs[0] = Some(get_a().into());
                Ok(())
            }),
            ..Default::default()
        },
        NodeType {
            id: GET_B_TYPE_ID,
            name: "get_b".to_string(),
            category: "Debug".to_string(),
            outputs: vec![int_port("value")],
            logic: NodeLogic::new(move |_args, outputs| {
                outputs[0] = Some(get_b().into());
                Ok(())
            }),
            ..Default::default()
        },
        NodeType {
            id: SUM_TYPE_ID,
            name: "sum".to_string(),
            category: "Debug".to_string(),
            inputs: vec![int_port("a"), int_port("b")],
            outputs: vec![int_port("sum")],
            logic: NodeLogic::new(|args, outputs| {
                outputs[0] = Some((args[0].as_int() + args[1].as_int()).into());
                Ok(())
            }),
            ..Default::default()
        },
        NodeType {
            id: MULT_TYPE_ID,
            name: "mult".to_string(),
            category: "Debug".to_string(),
            inputs: vec![int_port("a"), int_port("b")],
            outputs: vec![int_port("prod")],
            logic: NodeLogic::new(|args, outputs| {
                outputs[0] = Some((args[0].as_int() * args[1].as_int()).into());
                Ok(())
            }),
            ..Default::default()
        },
        NodeType {
            id: PRINT_TYPE_ID,
            name: "print".to_string(),
            category: "Debug".to_string(),
            inputs: vec![int_port("message")],
            logic: NodeLogic::new(move |args, _outputs| {
                print(args[0].as_int());
                Ok(())
            }),
            ..Default::default()
        },
    ]
    .into()
}

/// get_a -> sum.0, get_b -> sum.1, sum -> mult.0, get_b -> mult.1,
/// mult -> print.0
pub fn test_graph(type_lib: &TypeLib) -> Graph {
    let mut graph = Graph::default();

    let node_ids: Vec<NodeId> = ["get_a", "get_b", "sum", "mult", "print"]
        .iter()
        .map(|name| {
            let node = Node::from_type(
                type_lib
                    .by_name(name)
                    .unwrap_or_else(|| panic!("Node type named \"{}\" not found", name)),
            );
            let id = node.id;
            graph.add_node(node);
            id
        })
        .collect();
    let (a_id, b_id, sum_id, mult_id, print_id) =
        (node_ids[0], node_ids[1], node_ids[2], node_ids[3], node_ids[4]);

    graph.connect(sum_id, 0, a_id, 0).unwrap();
    graph.connect(sum_id, 1, b_id, 0).unwrap();
    graph.connect(mult_id, 0, sum_id, 0).unwrap();
    graph.connect(mult_id, 1, b_id, 0).unwrap();
    graph.connect(print_id, 0, mult_id, 0).unwrap();

    graph
}

/// Minimal tree-walking interpreter standing in for the external execution
/// runtime: reduces accessors eagerly and calls back into the evaluator for
/// every application. Partial applications are not reducible here.
pub fn run_expr(evaluator: &Evaluator, graph: &mut Graph, expr: &Expr) -> EvalResult<Value> {
    match expr {
        Expr::Symbol(name) => panic!("test runtime cannot evaluate free symbol \"{}\"", name),
        Expr::Lambda { .. } => panic!("test runtime cannot evaluate a lambda"),
        Expr::Invoke { node_id, args, .. } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args.iter() {
                let arg = arg
                    .as_ref()
                    .expect("test runtime cannot apply a partial node");
                values.push(run_expr(evaluator, graph, arg)?);
            }
            evaluator.evaluate_if_needed(graph, *node_id, &values)
        }
        Expr::Collect(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items.iter() {
                values.push(run_expr(evaluator, graph, item)?);
            }
            Ok(Value::List(values))
        }
        Expr::Head(list) => Ok(run_expr(evaluator, graph, list)?.as_list()[0].clone()),
        Expr::Tail(list) => Ok(Value::List(
            run_expr(evaluator, graph, list)?.as_list()[1..].to_vec(),
        )),
        Expr::Skip { count, list } => Ok(Value::List(
            run_expr(evaluator, graph, list)?.as_list()[*count..].to_vec(),
        )),
    }
}
