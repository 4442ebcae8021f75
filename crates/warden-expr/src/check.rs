use crate::ast::{BinaryOp, Expr, Literal, UnaryOp};
use crate::error::ExprError;

/// Static types the checker tracks. Values read out of a dynamic map are
/// `Dyn` and accepted wherever a more specific type is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Bool,
    Int,
    Str,
    Null,
    Map,
    List,
    Dyn,
}

impl Type {
    pub fn name(&self) -> &'static str {
        match self {
            Type::Bool => "bool",
            Type::Int => "int",
            Type::Str => "string",
            Type::Null => "null",
            Type::Map => "map",
            Type::List => "list",
            Type::Dyn => "dyn",
        }
    }
}

/// The fixed variable environment every policy expression compiles against.
/// All variables are bound from the decision request.
const ENVIRONMENT: &[(&str, Type)] = &[
    ("subject", Type::Map),
    ("resource", Type::Str),
    ("action", Type::Str),
    ("metadata", Type::Map),
    ("protocol", Type::Str),
    ("platform", Type::Str),
    ("cloud", Type::Str),
];

/// Type-check an expression against the declared environment and return its
/// static type.
pub fn check(expr: &Expr) -> Result<Type, ExprError> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            Literal::Null => Type::Null,
            Literal::Bool(_) => Type::Bool,
            Literal::Int(_) => Type::Int,
            Literal::Str(_) => Type::Str,
        }),
        Expr::Var(name) => ENVIRONMENT
            .iter()
            .find(|(n, _)| *n == name.as_str())
            .map(|(_, ty)| *ty)
            .ok_or_else(|| ExprError::Type(format!("undeclared variable '{name}'"))),
        Expr::Member { object, field } => match check(object)? {
            Type::Map | Type::Dyn => Ok(Type::Dyn),
            other => Err(ExprError::Type(format!(
                "cannot access field '{field}' on {}",
                other.name()
            ))),
        },
        Expr::Index { object, index } => {
            let object_ty = check(object)?;
            let index_ty = check(index)?;
            match object_ty {
                Type::Map => expect_index(index_ty, Type::Str, "map"),
                Type::List => expect_index(index_ty, Type::Int, "list"),
                Type::Dyn => match index_ty {
                    Type::Str | Type::Int | Type::Dyn => Ok(Type::Dyn),
                    other => Err(ExprError::Type(format!(
                        "cannot index with {}",
                        other.name()
                    ))),
                },
                other => Err(ExprError::Type(format!("cannot index {}", other.name()))),
            }
        }
        Expr::List(items) => {
            for item in items {
                check(item)?;
            }
            Ok(Type::List)
        }
        Expr::Unary { op: UnaryOp::Not, operand } => match check(operand)? {
            Type::Bool | Type::Dyn => Ok(Type::Bool),
            other => Err(ExprError::Type(format!(
                "operand of '!' must be a boolean, got {}",
                other.name()
            ))),
        },
        Expr::Binary { op, lhs, rhs } => {
            let lhs_ty = check(lhs)?;
            let rhs_ty = check(rhs)?;
            match op {
                BinaryOp::Or | BinaryOp::And => {
                    for ty in [lhs_ty, rhs_ty] {
                        if !matches!(ty, Type::Bool | Type::Dyn) {
                            return Err(ExprError::Type(format!(
                                "operand of '{}' must be a boolean, got {}",
                                op.symbol(),
                                ty.name()
                            )));
                        }
                    }
                    Ok(Type::Bool)
                }
                BinaryOp::Eq | BinaryOp::Ne => Ok(Type::Bool),
                BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                    let ordered = matches!(
                        (lhs_ty, rhs_ty),
                        (Type::Int, Type::Int)
                            | (Type::Str, Type::Str)
                            | (Type::Dyn, _)
                            | (_, Type::Dyn)
                    );
                    if ordered {
                        Ok(Type::Bool)
                    } else {
                        Err(ExprError::Type(format!(
                            "cannot order {} and {}",
                            lhs_ty.name(),
                            rhs_ty.name()
                        )))
                    }
                }
                BinaryOp::In => match rhs_ty {
                    Type::List | Type::Map | Type::Dyn => Ok(Type::Bool),
                    other => Err(ExprError::Type(format!(
                        "'in' requires a list or map on the right, got {}",
                        other.name()
                    ))),
                },
            }
        }
    }
}

fn expect_index(index_ty: Type, wanted: Type, container: &str) -> Result<Type, ExprError> {
    if index_ty == wanted || index_ty == Type::Dyn {
        Ok(Type::Dyn)
    } else {
        Err(ExprError::Type(format!(
            "{container} index must be {}, got {}",
            wanted.name(),
            index_ty.name()
        )))
    }
}
