use flowforge::expression::ClosureFunction;
use flowforge::prelude::*;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== FlowForge Expression Demo ===\n");

    let context = ExecutionContext::default()
        .with_variables(HashMap::from([("limit".to_string(), json!(10))]))
        .with_outputs(HashMap::from([(
            "scan".to_string(),
            json!({ "hits": [3, 9, 4], "host": "db-1" }),
        )]));
    let mut parser = ExpressionParser::new(context);
    parser.register_function(Arc::new(ClosureFunction::new("Upper", |args: &[Value]| {
        Ok(json!(args
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_uppercase()))
    })))?;

    let inputs = [
        "$[Max(Outputs('scan').hits)]",
        "$[Outputs('scan').hits.Count]",
        "$[Sum(Outputs('scan').hits) > Variables('limit') ? 'alert' : 'ok']",
        "host=$[Upper(Outputs('scan').host)] first=$[Outputs('scan').hits[0]]",
        "plain text stays as is",
    ];
    for input in inputs {
        println!("{input}\n  => {}", parser.parse(input).await?);
    }

    println!("\n=== Demo Completed ===");
    Ok(())
}
