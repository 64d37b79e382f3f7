use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};
use tracing::info;

use crate::data::DataType;
use crate::node::PortSpec;
use crate::node_type::{NodeLogic, NodeType, NodeTypeId, TypeLib};

/// Built-in node types: constants, float math, integer division and a
/// terminal display node. Hosts merge this into their own registry.
#[derive(Debug)]
pub struct BasicTypeLib {
    type_lib: TypeLib,
}

#[derive(Debug, Display, EnumIter, Copy, Clone)]
enum Math2Op {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Math2Op {
    fn type_id(&self) -> NodeTypeId {
        match self {
            Math2Op::Add => NodeTypeId::from_u128(0x7a1c8e02_bb14_42cf_9d31_0f65a27e1a01),
            Math2Op::Subtract => NodeTypeId::from_u128(0x7a1c8e02_bb14_42cf_9d31_0f65a27e1a02),
            Math2Op::Multiply => NodeTypeId::from_u128(0x7a1c8e02_bb14_42cf_9d31_0f65a27e1a03),
            Math2Op::Divide => NodeTypeId::from_u128(0x7a1c8e02_bb14_42cf_9d31_0f65a27e1a04),
        }
    }

    fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            Math2Op::Add => a + b,
            Math2Op::Subtract => a - b,
            Math2Op::Multiply => a * b,
            Math2Op::Divide => a / b,
        }
    }
}

fn float_port(name: &str) -> PortSpec {
    PortSpec {
        name: name.to_string(),
        description: "".to_string(),
        data_type: DataType::Float,
    }
}

fn int_port(name: &str) -> PortSpec {
    PortSpec {
        name: name.to_string(),
        description: "".to_string(),
        data_type: DataType::Int,
    }
}

impl Default for BasicTypeLib {
    fn default() -> Self {
        let mut type_lib = TypeLib::default();

        type_lib.add(NodeType {
            id: NodeTypeId::from_u128(0x3f94d0ab_51c6_4e9e_8f2a_6b7c3d1e0aa1),
            name: "pi".to_string(),
            category: "Math".to_string(),
            description: Some("The circle constant".to_string()),
            outputs: vec![float_port("value")],
            logic: NodeLogic::new(|_args, outputs| {
                outputs[0] = Some(std::f64::consts::PI.into());
                Ok(())
            }),
            ..Default::default()
        });

        for op in Math2Op::iter() {
            type_lib.add(NodeType {
                id: op.type_id(),
                name: op.to_string().to_lowercase(),
                category: "Math".to_string(),
                search_tags: vec!["math".to_string(), "arithmetic".to_string()],
                inputs: vec![float_port("a"), float_port("b")],
                outputs: vec![float_port("result")],
                logic: NodeLogic::new(move |args, outputs| {
                    outputs[0] = Some(op.apply(args[0].as_float(), args[1].as_float()).into());
                    Ok(())
                }),
                ..Default::default()
            });
        }

        type_lib.add(NodeType {
            id: NodeTypeId::from_u128(0x3f94d0ab_51c6_4e9e_8f2a_6b7c3d1e0aa2),
            name: "negate".to_string(),
            category: "Math".to_string(),
            inputs: vec![float_port("a")],
            outputs: vec![float_port("result")],
            logic: NodeLogic::new(|args, outputs| {
                outputs[0] = Some((-args[0].as_float()).into());
                Ok(())
            }),
            ..Default::default()
        });

        type_lib.add(NodeType {
            id: NodeTypeId::from_u128(0x3f94d0ab_51c6_4e9e_8f2a_6b7c3d1e0aa3),
            name: "divmod".to_string(),
            category: "Math".to_string(),
            description: Some("Integer quotient and remainder".to_string()),
            inputs: vec![int_port("a"), int_port("b")],
            outputs: vec![int_port("quotient"), int_port("remainder")],
            logic: NodeLogic::new(|args, outputs| {
                let a = args[0].as_int();
                let b = args[1].as_int();
                if b == 0 {
                    anyhow::bail!("Division by zero");
                }
                outputs[0] = Some((a / b).into());
                outputs[1] = Some((a % b).into());
                Ok(())
            }),
            ..Default::default()
        });

        type_lib.add(NodeType {
            id: NodeTypeId::from_u128(0x3f94d0ab_51c6_4e9e_8f2a_6b7c3d1e0aa4),
            name: "display".to_string(),
            category: "Debug".to_string(),
            interactive: true,
            inputs: vec![PortSpec {
                name: "value".to_string(),
                description: "".to_string(),
                data_type: DataType::Null,
            }],
            logic: NodeLogic::new(|args, _outputs| {
                info!("display: {:?}", args.first());
                Ok(())
            }),
            ..Default::default()
        });

        Self { type_lib }
    }
}

impl BasicTypeLib {
    pub fn type_lib(&self) -> &TypeLib {
        &self.type_lib
    }

    pub fn into_type_lib(self) -> TypeLib {
        self.type_lib
    }
}

impl From<BasicTypeLib> for TypeLib {
    fn from(basic: BasicTypeLib) -> Self {
        basic.type_lib
    }
}
