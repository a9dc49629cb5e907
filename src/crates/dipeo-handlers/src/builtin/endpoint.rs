//! Identity sink: stores its single input as the execution's terminal
//! output. Looks for a handle named `in` first, falling back to whichever
//! single input arrived if `in` wasn't used.

use async_trait::async_trait;
use serde_json::Value;

use dipeo_state::NodeOutput;

use crate::contract::{Handler, Inputs, NodeContext, Services};
use crate::error::HandlerError;

pub struct EndpointHandler;

#[async_trait]
impl Handler for EndpointHandler {
    async fn execute(
        &self,
        _props: &Value,
        _context: &NodeContext,
        inputs: &Inputs,
        _services: &Services,
    ) -> Result<NodeOutput, HandlerError> {
        let value = inputs
            .get("in")
            .or_else(|| inputs.values().next())
            .cloned()
            .unwrap_or(Value::Null);
        Ok(NodeOutput { value, metadata: Default::default() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> NodeContext {
        NodeContext::new("e1", "endpoint", Arc::new(HashMap::new()), CancellationToken::new(), Arc::new(|_| {}))
    }

    #[tokio::test]
    async fn stores_the_named_input() {
        let handler = EndpointHandler;
        let mut inputs = Inputs::new();
        inputs.insert("in".to_string(), serde_json::json!(42));
        let out = handler.execute(&Value::Null, &ctx(), &inputs, &Services::new()).await.unwrap();
        assert_eq!(out.value, serde_json::json!(42));
    }

    #[tokio::test]
    async fn falls_back_to_the_only_input_present() {
        let handler = EndpointHandler;
        let mut inputs = Inputs::new();
        inputs.insert("result".to_string(), serde_json::json!("ok"));
        let out = handler.execute(&Value::Null, &ctx(), &inputs, &Services::new()).await.unwrap();
        assert_eq!(out.value, serde_json::json!("ok"));
    }

    #[tokio::test]
    async fn null_with_no_inputs() {
        let handler = EndpointHandler;
        let out = handler.execute(&Value::Null, &ctx(), &Inputs::new(), &Services::new()).await.unwrap();
        assert_eq!(out.value, Value::Null);
    }
}
