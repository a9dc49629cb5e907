//! Gating-condition handler. Evaluates `node.data.condition` with the
//! sandboxed expression evaluator from `dipeo-control` against a context
//! built from execution variables plus resolved inputs, and passes its
//! single input through when true. The Skip Controller (not this handler)
//! is what actually turns a false evaluation into a `CONDITION_NOT_MET`
//! skip — this handler only runs for nodes the controller let through,
//! e.g. a `condition` gating a loop's continuation rather than a skip.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value as Json;

use dipeo_control::{evaluate_condition, Value as ExprValue};
use dipeo_state::NodeOutput;

use crate::contract::{Handler, Inputs, NodeContext, Services};
use crate::error::HandlerError;

pub struct ConditionHandler;

/// Converts a resolved-inputs-plus-variables view into the evaluator's
/// own value domain. Non-scalar JSON (arrays, objects) has no
/// representation in the sandboxed evaluator and is dropped rather than
/// stringified, since `dipeo-control::expr` only compares scalars.
pub fn build_context(variables: &HashMap<String, Json>, inputs: &Inputs) -> HashMap<String, ExprValue> {
    let mut context = HashMap::with_capacity(variables.len() + inputs.len());
    for (key, value) in variables.iter().chain(inputs.iter()) {
        if let Some(converted) = json_to_expr_value(value) {
            context.insert(key.clone(), converted);
        }
    }
    context
}

fn json_to_expr_value(value: &Json) -> Option<ExprValue> {
    match value {
        Json::Null => Some(ExprValue::Null),
        Json::Bool(b) => Some(ExprValue::Bool(*b)),
        Json::Number(n) => n.as_f64().map(ExprValue::Number),
        Json::String(s) => Some(ExprValue::String(s.clone())),
        Json::Array(_) | Json::Object(_) => None,
    }
}

#[async_trait]
impl Handler for ConditionHandler {
    async fn execute(
        &self,
        props: &Json,
        context: &NodeContext,
        inputs: &Inputs,
        _services: &Services,
    ) -> Result<NodeOutput, HandlerError> {
        let expression = props.get("condition").and_then(Json::as_str).unwrap_or("true");
        let eval_context = build_context(&context.variables, inputs);
        let result = evaluate_condition(expression, &eval_context);

        let passthrough = inputs.get("in").or_else(|| inputs.values().next()).cloned().unwrap_or(Json::Null);
        Ok(NodeOutput {
            value: passthrough,
            metadata: HashMap::from([("conditionResult".to_string(), Json::Bool(result))]),
        })
    }
}
