use std::cmp::Ordering;

use serde_json::Value;

use crate::ast::{BinaryOp, Expr, Literal, UnaryOp};
use crate::check::{check, Type};
use crate::error::{EvalError, ExprError};
use crate::parser::parse;

/// A compiled policy predicate: parsed, type-checked, and ready to evaluate
/// against request bindings.
#[derive(Debug, Clone)]
pub struct Program {
    ast: Expr,
}

/// Parse, type-check, and compile expression source.
///
/// The expression must check to a boolean (or to `dyn`, in which case the
/// boolean requirement is enforced at evaluation time).
pub fn compile(source: &str) -> Result<Program, ExprError> {
    if source.trim().is_empty() {
        return Err(ExprError::Type("expression must not be empty".to_string()));
    }
    let ast = parse(source)?;
    let ty = check(&ast)?;
    if !matches!(ty, Type::Bool | Type::Dyn) {
        return Err(ExprError::Type(format!(
            "expression must evaluate to a boolean, got {}",
            ty.name()
        )));
    }
    Ok(Program { ast })
}

/// Write-time validation: succeeds iff the source compiles under the
/// declared variable environment.
pub fn validate(source: &str) -> Result<(), ExprError> {
    compile(source).map(|_| ())
}

impl Program {
    /// Evaluate against the request bindings, requiring a boolean result.
    pub fn eval_bool(
        &self,
        bindings: &serde_json::Map<String, Value>,
    ) -> Result<bool, EvalError> {
        match eval(&self.ast, bindings)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::NonBoolean(type_name(&other))),
        }
    }
}

fn eval(expr: &Expr, bindings: &serde_json::Map<String, Value>) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(n) => Value::from(*n),
            Literal::Str(s) => Value::String(s.clone()),
        }),
        Expr::Var(name) => bindings
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UndefinedVariable(name.clone())),
        Expr::Member { object, field } => match eval(object, bindings)? {
            Value::Object(map) => map
                .get(field)
                .cloned()
                .ok_or_else(|| EvalError::NoSuchKey(field.clone())),
            other => Err(EvalError::TypeMismatch(format!(
                "cannot access field '{field}' on {}",
                type_name(&other)
            ))),
        },
        Expr::Index { object, index } => {
            let object = eval(object, bindings)?;
            let index = eval(index, bindings)?;
            match (object, index) {
                (Value::Object(map), Value::String(key)) => map
                    .get(&key)
                    .cloned()
                    .ok_or(EvalError::NoSuchKey(key)),
                (Value::Array(items), Value::Number(n)) => {
                    let idx = n
                        .as_i64()
                        .ok_or_else(|| EvalError::TypeMismatch("list index must be an integer".to_string()))?;
                    usize::try_from(idx)
                        .ok()
                        .and_then(|i| items.get(i).cloned())
                        .ok_or(EvalError::IndexOutOfRange(idx))
                }
                (object, index) => Err(EvalError::TypeMismatch(format!(
                    "cannot index {} with {}",
                    type_name(&object),
                    type_name(&index)
                ))),
            }
        }
        Expr::List(items) => items
            .iter()
            .map(|item| eval(item, bindings))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Unary { op: UnaryOp::Not, operand } => match eval(operand, bindings)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(EvalError::TypeMismatch(format!(
                "operand of '!' must be a boolean, got {}",
                type_name(&other)
            ))),
        },
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, bindings),
    }
}

fn eval_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    bindings: &serde_json::Map<String, Value>,
) -> Result<Value, EvalError> {
    match op {
        // Connectives short-circuit.
        BinaryOp::Or => {
            if bool_operand(lhs, op, bindings)? {
                Ok(Value::Bool(true))
            } else {
                bool_operand(rhs, op, bindings).map(Value::Bool)
            }
        }
        BinaryOp::And => {
            if !bool_operand(lhs, op, bindings)? {
                Ok(Value::Bool(false))
            } else {
                bool_operand(rhs, op, bindings).map(Value::Bool)
            }
        }
        // Equality is total: values of different types are simply not equal.
        BinaryOp::Eq => Ok(Value::Bool(eval(lhs, bindings)? == eval(rhs, bindings)?)),
        BinaryOp::Ne => Ok(Value::Bool(eval(lhs, bindings)? != eval(rhs, bindings)?)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = compare(&eval(lhs, bindings)?, &eval(rhs, bindings)?)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                BinaryOp::Ge => ord != Ordering::Less,
                _ => unreachable!(),
            }))
        }
        BinaryOp::In => {
            let needle = eval(lhs, bindings)?;
            match eval(rhs, bindings)? {
                Value::Array(items) => Ok(Value::Bool(items.contains(&needle))),
                Value::Object(map) => match needle {
                    Value::String(key) => Ok(Value::Bool(map.contains_key(&key))),
                    other => Err(EvalError::TypeMismatch(format!(
                        "map membership requires a string key, got {}",
                        type_name(&other)
                    ))),
                },
                other => Err(EvalError::TypeMismatch(format!(
                    "'in' requires a list or map, got {}",
                    type_name(&other)
                ))),
            }
        }
    }
}

fn bool_operand(
    expr: &Expr,
    op: BinaryOp,
    bindings: &serde_json::Map<String, Value>,
) -> Result<bool, EvalError> {
    match eval(expr, bindings)? {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::TypeMismatch(format!(
            "operand of '{}' must be a boolean, got {}",
            op.symbol(),
            type_name(&other)
        ))),
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering, EvalError> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                return Ok(a.cmp(&b));
            }
            let (a, b) = (a.as_f64(), b.as_f64());
            match (a, b) {
                (Some(a), Some(b)) => a.partial_cmp(&b).ok_or_else(|| {
                    EvalError::TypeMismatch("cannot order NaN".to_string())
                }),
                _ => Err(EvalError::TypeMismatch(
                    "cannot order these numbers".to_string(),
                )),
            }
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (lhs, rhs) => Err(EvalError::TypeMismatch(format!(
            "cannot order {} and {}",
            type_name(lhs),
            type_name(rhs)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(v: serde_json::Value) -> serde_json::Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("bindings must be an object"),
        }
    }

    fn request_bindings() -> serde_json::Map<String, Value> {
        bindings(serde_json::json!({
            "subject": {"role": "admin", "level": 4, "mfa": true, "groups": ["ops", "sre"]},
            "resource": "aws:s3:bucket/b/x",
            "action": "s3:GetObject",
            "metadata": {},
            "protocol": "",
            "platform": "linux",
            "cloud": "aws",
        }))
    }

    fn eval_src(src: &str) -> Result<bool, EvalError> {
        compile(src).unwrap().eval_bool(&request_bindings())
    }

    #[test]
    fn literals_and_variables() {
        assert!(eval_src("true").unwrap());
        assert!(!eval_src("false").unwrap());
        assert!(eval_src(r#"cloud == "aws""#).unwrap());
        assert!(eval_src(r#"protocol == """#).unwrap());
    }

    #[test]
    fn member_access_reads_the_subject() {
        assert!(eval_src(r#"subject.role == "admin""#).unwrap());
        assert!(!eval_src(r#"subject.role == "analyst""#).unwrap());
        assert!(eval_src(r#"subject["role"] == "admin""#).unwrap());
    }

    #[test]
    fn missing_key_is_a_runtime_error() {
        assert_eq!(
            eval_src(r#"subject.team == "core""#),
            Err(EvalError::NoSuchKey("team".to_string()))
        );
    }

    #[test]
    fn numeric_and_string_ordering() {
        assert!(eval_src("subject.level >= 3").unwrap());
        assert!(!eval_src("subject.level < 4").unwrap());
        assert!(eval_src(r#"action > "a""#).unwrap());
    }

    #[test]
    fn ordering_mismatched_runtime_types_raises() {
        assert!(matches!(
            eval_src(r#"subject.role < 3"#),
            Err(EvalError::TypeMismatch(_))
        ));
    }

    #[test]
    fn equality_across_types_is_false_not_an_error() {
        assert!(!eval_src(r#"subject.level == "4""#).unwrap());
        assert!(eval_src(r#"subject.level != "4""#).unwrap());
    }

    #[test]
    fn membership_in_list_and_map() {
        assert!(eval_src(r#"subject.role in ["admin", "operator"]"#).unwrap());
        assert!(!eval_src(r#"subject.role in ["operator"]"#).unwrap());
        assert!(eval_src(r#""ops" in subject.groups"#).unwrap());
        assert!(eval_src(r#""role" in subject"#).unwrap());
        assert!(!eval_src(r#""team" in subject"#).unwrap());
    }

    #[test]
    fn list_indexing() {
        assert!(eval_src(r#"subject.groups[0] == "ops""#).unwrap());
        assert_eq!(
            eval_src(r#"subject.groups[9] == "ops""#),
            Err(EvalError::IndexOutOfRange(9))
        );
    }

    #[test]
    fn connectives_short_circuit() {
        // The right operand would raise NoSuchKey if evaluated.
        assert!(eval_src(r#"subject.mfa || subject.missing"#).unwrap());
        assert!(!eval_src(r#"subject.role == "analyst" && subject.missing"#).unwrap());
        // Without short-circuiting, the error surfaces.
        assert!(matches!(
            eval_src(r#"subject.role == "admin" && subject.missing"#),
            Err(EvalError::NoSuchKey(_))
        ));
    }

    #[test]
    fn non_boolean_operand_of_connective_raises() {
        assert!(matches!(
            eval_src(r#"subject.role || true"#),
            Err(EvalError::TypeMismatch(_))
        ));
    }

    #[test]
    fn non_boolean_result_raises() {
        assert_eq!(
            eval_src("subject.role"),
            Err(EvalError::NonBoolean("string"))
        );
        assert_eq!(eval_src("subject.level"), Err(EvalError::NonBoolean("number")));
    }

    #[test]
    fn not_negates() {
        assert!(!eval_src("!subject.mfa").unwrap());
        assert!(eval_src(r#"!(subject.role == "analyst")"#).unwrap());
    }

    #[test]
    fn compile_rejects_bad_expressions() {
        assert!(compile("").is_err());
        assert!(compile("   ").is_err());
        assert!(compile("subject.role ==").is_err());
        assert!(compile("principal == 3").is_err());
        // Statically non-boolean results are rejected at compile time.
        assert!(compile(r#""admin""#).is_err());
        assert!(compile("resource").is_err());
    }

    #[test]
    fn validate_mirrors_compile() {
        assert!(validate(r#"subject.role == "admin""#).is_ok());
        assert!(validate("subject.role ==").is_err());
        assert!(validate("").is_err());
    }
}
