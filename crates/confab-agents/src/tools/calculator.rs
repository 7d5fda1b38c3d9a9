use async_trait::async_trait;
use confab_common::Result;
use serde_json::json;

use crate::tools::{Tool, ToolContext, ToolOutput};

/// Local arithmetic over two numbers. No external calls.
pub struct Calculator;

#[async_trait]
impl Tool for Calculator {
    fn name(&self) -> &'static str {
        "calculator"
    }

    fn description(&self) -> &'static str {
        "Performs basic arithmetic on two numbers: add, sub, mul, div."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "first_num": {
                    "type": "number",
                    "description": "The first operand."
                },
                "second_num": {
                    "type": "number",
                    "description": "The second operand."
                },
                "operation": {
                    "type": "string",
                    "enum": ["add", "sub", "mul", "div"],
                    "description": "The operation to perform."
                }
            },
            "required": ["first_num", "second_num", "operation"]
        })
    }

    async fn execute(&self, _context: &ToolContext, args: serde_json::Value) -> Result<ToolOutput> {
        let Some(first) = args["first_num"].as_f64() else {
            return Ok(ToolOutput::error("missing or invalid 'first_num'"));
        };
        let Some(second) = args["second_num"].as_f64() else {
            return Ok(ToolOutput::error("missing or invalid 'second_num'"));
        };
        let Some(operation) = args["operation"].as_str() else {
            return Ok(ToolOutput::error("missing or invalid 'operation'"));
        };

        let result = match operation {
            "add" => first + second,
            "sub" => first - second,
            "mul" => first * second,
            "div" => {
                if second == 0.0 {
                    return Ok(ToolOutput::error("Division by zero not allowed."));
                }
                first / second
            }
            _ => return Ok(ToolOutput::error("Unsupported operation.")),
        };

        Ok(ToolOutput::ok(json!({
            "first_num": first,
            "second_num": second,
            "operation": operation,
            "result": result,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ToolContext {
        ToolContext {
            thread_id: "t1".to_string(),
        }
    }

    async fn compute(first: f64, second: f64, operation: &str) -> ToolOutput {
        Calculator
            .execute(
                &context(),
                json!({"first_num": first, "second_num": second, "operation": operation}),
            )
            .await
            .expect("calculator never fails the turn")
    }

    #[tokio::test]
    async fn addition() {
        let output = compute(5.0, 3.0, "add").await;
        assert_eq!(output.content["result"], 8.0);
    }

    #[tokio::test]
    async fn multiplication() {
        let output = compute(5.0, 3.0, "mul").await;
        assert_eq!(output.content["result"], 15.0);
    }

    #[tokio::test]
    async fn division() {
        let output = compute(12.0, 4.0, "div").await;
        assert_eq!(output.content["result"], 3.0);
        assert_eq!(output.content["operation"], "div");
    }

    #[tokio::test]
    async fn division_by_zero_is_an_error_result() {
        let output = compute(5.0, 0.0, "div").await;
        assert!(output.is_error());
        assert_eq!(output.content["error"], "Division by zero not allowed.");
    }

    #[tokio::test]
    async fn unsupported_operation_is_an_error_result() {
        let output = compute(1.0, 1.0, "bogus").await;
        assert!(output.is_error());
        assert_eq!(output.content["error"], "Unsupported operation.");
    }

    #[tokio::test]
    async fn missing_argument_is_an_error_result() {
        let output = Calculator
            .execute(&context(), json!({"first_num": 1.0}))
            .await
            .unwrap();
        assert!(output.is_error());
    }
}
