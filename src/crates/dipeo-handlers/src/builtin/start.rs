//! The mandatory entry-point handler. Identity: emits whatever seed value
//! `node.data.value` carries (or `null`), unconditionally ready.

use async_trait::async_trait;
use serde_json::Value;

use dipeo_state::NodeOutput;

use crate::contract::{Handler, Inputs, NodeContext, Services};
use crate::error::HandlerError;

pub struct StartHandler;

#[async_trait]
impl Handler for StartHandler {
    async fn execute(
        &self,
        props: &Value,
        _context: &NodeContext,
        _inputs: &Inputs,
        _services: &Services,
    ) -> Result<NodeOutput, HandlerError> {
        let value = props.get("value").cloned().unwrap_or(Value::Null);
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
        NodeContext::new("e1", "start", Arc::new(HashMap::new()), CancellationToken::new(), Arc::new(|_| {}))
    }

    #[tokio::test]
    async fn emits_the_configured_seed_value() {
        let handler = StartHandler;
        let props = serde_json::json!({"value": {"hello": "world"}});
        let out = handler.execute(&props, &ctx(), &Inputs::new(), &Services::new()).await.unwrap();
        assert_eq!(out.value, serde_json::json!({"hello": "world"}));
    }

    #[tokio::test]
    async fn defaults_to_null_with_no_configured_value() {
        let handler = StartHandler;
        let out = handler
            .execute(&serde_json::json!({}), &ctx(), &Inputs::new(), &Services::new())
            .await
            .unwrap();
        assert_eq!(out.value, Value::Null);
    }
}
