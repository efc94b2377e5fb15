//! Expression evaluator adapter (module A).
//!
//! Wraps a conforming CEL dialect, compiling each rule/derived-role condition
//! once at policy-load time and evaluating it against an immutable activation
//! built per request. The activation exposes three shortcuts: `P` (principal),
//! `R` (resource), `A` (auxiliary/request context) plus their long-form
//! aliases `principal`/`resource`/`auxData`.
//!
//! Evaluation never panics and never returns a hard engine error: it produces
//! a tri-valued result so callers (the decision engine, derived-role
//! resolution) can decide locally how to treat `Error` without escalating it.

use crate::error::EvalError;
use crate::value::{AttributeMap, Value};
use cel_interpreter::objects::{Key, Map as CelMap, Value as CelValue};
use cel_interpreter::{Context, Program};
use dashmap::DashMap;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of evaluating a condition: matches the spec's tri-valued result.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutcome {
    True,
    False,
    Error(EvalError),
}

impl EvalOutcome {
    pub fn is_true(&self) -> bool {
        matches!(self, EvalOutcome::True)
    }
}

/// The activation built for a single request: immutable for the lifetime of
/// that request's evaluation.
#[derive(Debug, Clone, Default)]
pub struct Activation {
    pub principal: AttributeMap,
    pub resource: AttributeMap,
    pub aux: AttributeMap,
    /// Extra named variables (e.g. derived-role intermediate results).
    pub variables: HashMap<String, Value>,
}

impl Activation {
    pub fn new(principal: AttributeMap, resource: AttributeMap, aux: AttributeMap) -> Self {
        Self {
            principal,
            resource,
            aux,
            variables: HashMap::new(),
        }
    }

    fn to_cel_context(&self) -> Context<'static> {
        let mut ctx = Context::default();
        let principal = map_to_cel(&self.principal);
        let resource = map_to_cel(&self.resource);
        let aux = map_to_cel(&self.aux);

        let _ = ctx.add_variable("principal", principal.clone());
        let _ = ctx.add_variable("P", principal);
        let _ = ctx.add_variable("resource", resource.clone());
        let _ = ctx.add_variable("R", resource);
        let _ = ctx.add_variable("auxData", aux.clone());
        let _ = ctx.add_variable("A", aux);

        for (name, value) in &self.variables {
            let _ = ctx.add_variable(name.clone(), json_to_cel(&value.to_json()));
        }

        ctx
    }
}

fn map_to_cel(map: &AttributeMap) -> CelValue {
    let mut out: HashMap<Key, CelValue> = HashMap::new();
    for (k, v) in map {
        out.insert(Key::from(k.clone()), json_to_cel(&v.to_json()));
    }
    CelValue::Map(CelMap { map: Arc::new(out) })
}

fn json_to_cel(value: &JsonValue) -> CelValue {
    match value {
        JsonValue::Null => CelValue::Null,
        JsonValue::Bool(b) => CelValue::Bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                CelValue::Int(i)
            } else if let Some(f) = n.as_f64() {
                CelValue::Float(f)
            } else {
                CelValue::Null
            }
        }
        JsonValue::String(s) => CelValue::String(Arc::new(s.clone())),
        JsonValue::Array(items) => {
            CelValue::List(Arc::new(items.iter().map(json_to_cel).collect()))
        }
        JsonValue::Object(obj) => {
            let mut map = HashMap::new();
            for (k, v) in obj.iter() {
                map.insert(Key::from(k.clone()), json_to_cel(v));
            }
            CelValue::Map(CelMap { map: Arc::new(map) })
        }
    }
}

/// Compiles and evaluates conditions, caching compiled programs by source
/// text so a rule with the same expression text across policies compiles
/// once.
pub struct ExprEvaluator {
    cache: DashMap<String, Arc<Program>>,
}

impl ExprEvaluator {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    /// Compile once per distinct expression; cheap to call repeatedly.
    pub fn compile(&self, expr: &str) -> Result<Arc<Program>, EvalError> {
        if let Some(prog) = self.cache.get(expr) {
            return Ok(prog.clone());
        }
        let program =
            Program::compile(expr).map_err(|e| EvalError::Compile(format!("{e:?}")))?;
        let program = Arc::new(program);
        self.cache.insert(expr.to_string(), program.clone());
        Ok(program)
    }

    /// Evaluate an already-compiled program against an activation.
    pub fn eval(&self, program: &Program, activation: &Activation) -> EvalOutcome {
        let ctx = activation.to_cel_context();
        match program.execute(&ctx) {
            Ok(CelValue::Bool(b)) => {
                if b {
                    EvalOutcome::True
                } else {
                    EvalOutcome::False
                }
            }
            Ok(_) => EvalOutcome::Error(EvalError::NonBoolean),
            Err(e) => EvalOutcome::Error(EvalError::Evaluate(format!("{e:?}"))),
        }
    }

    /// Compile-then-evaluate convenience used for ad-hoc expressions (e.g.
    /// tests). Production paths should compile once at load time and reuse
    /// the program.
    pub fn evaluate(&self, expr: &str, activation: &Activation) -> EvalOutcome {
        match self.compile(expr) {
            Ok(program) => self.eval(&program, activation),
            Err(e) => EvalOutcome::Error(e),
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

impl Default for ExprEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activation_with(principal_role: &str, resource_owner: &str) -> Activation {
        let mut principal = AttributeMap::new();
        principal.insert("id".into(), Value::from("u1"));
        principal.insert("role".into(), Value::from(principal_role));

        let mut resource = AttributeMap::new();
        resource.insert("ownerId".into(), Value::from(resource_owner));

        Activation::new(principal, resource, AttributeMap::new())
    }

    #[test]
    fn evaluates_simple_boolean_literals() {
        let evaluator = ExprEvaluator::new();
        let act = activation_with("viewer", "u1");
        assert_eq!(evaluator.evaluate("true", &act), EvalOutcome::True);
        assert_eq!(evaluator.evaluate("false", &act), EvalOutcome::False);
    }

    #[test]
    fn evaluates_principal_and_resource_shortcuts() {
        let evaluator = ExprEvaluator::new();
        let act = activation_with("admin", "u1");
        assert!(evaluator.evaluate("P.role == 'admin'", &act).is_true());
        assert!(evaluator.evaluate("P.id == R.ownerId", &act).is_true());
    }

    #[test]
    fn compile_errors_surface_as_error_outcome() {
        let evaluator = ExprEvaluator::new();
        let act = activation_with("admin", "u1");
        let outcome = evaluator.evaluate("not valid cel @@@", &act);
        assert!(matches!(outcome, EvalOutcome::Error(EvalError::Compile(_))));
    }

    #[test]
    fn non_boolean_result_is_an_error_outcome() {
        let evaluator = ExprEvaluator::new();
        let act = activation_with("admin", "u1");
        let outcome = evaluator.evaluate("'hello'", &act);
        assert!(matches!(outcome, EvalOutcome::Error(EvalError::NonBoolean)));
    }

    #[test]
    fn program_cache_deduplicates_identical_expressions() {
        let evaluator = ExprEvaluator::new();
        let act = activation_with("admin", "u1");
        evaluator.evaluate("true", &act);
        evaluator.evaluate("true", &act);
        assert_eq!(evaluator.cache_len(), 1);
        evaluator.evaluate("false", &act);
        assert_eq!(evaluator.cache_len(), 2);
    }
}
