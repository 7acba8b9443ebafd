//! Reference calculator tool server: `add`, `multiply`, `divide`.

use super::{ToolFault, ToolHandler};
use crate::mcp_client::fallback_tools::fallback_tools;
use crate::mcp_client::types::{AdvertisedTool, ServerInfo};

/// Arithmetic on two numbers `a` and `b`.
///
/// Output reads `"{a} + {b} = {result}"`, with operands echoed as given and
/// the result always printed as a float (`2 + 3 = 5.0`).
#[derive(Debug, Clone, Copy, Default)]
pub struct CalculatorServer;

impl ToolHandler for CalculatorServer {
    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: Some("calculator".to_string()),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }

    fn tools(&self) -> Vec<AdvertisedTool> {
        fallback_tools("calculator")
            .into_iter()
            .map(|t| AdvertisedTool {
                name: t.name,
                description: t.description,
                input_schema: t.input_schema,
            })
            .collect()
    }

    fn call(&self, name: &str, arguments: &serde_json::Value) -> Result<String, ToolFault> {
        let symbol = match name {
            "add" => "+",
            "multiply" => "×",
            "divide" => "÷",
            other => return Err(ToolFault::UnknownTool(other.to_string())),
        };

        let (a_raw, a) = operand(arguments, "a")?;
        let (b_raw, b) = operand(arguments, "b")?;

        if name == "divide" && b == 0.0 {
            return Err(ToolFault::Reported(format!(
                "Cannot divide {a_raw} by zero"
            )));
        }

        let result = match name {
            "add" => a + b,
            "multiply" => a * b,
            _ => a / b,
        };
        if !result.is_finite() {
            return Err(ToolFault::Reported(format!(
                "{a_raw} {symbol} {b_raw} is out of range"
            )));
        }
        Ok(format!("{a_raw} {symbol} {b_raw} = {result:?}"))
    }
}

/// The operand as written by the caller, and its value.
fn operand(arguments: &serde_json::Value, key: &str) -> Result<(String, f64), ToolFault> {
    let value = arguments.get(key).ok_or_else(|| {
        ToolFault::Reported(format!("missing required argument '{key}'"))
    })?;

    match value {
        serde_json::Value::Number(n) => n
            .as_f64()
            .map(|f| (n.to_string(), f))
            .ok_or_else(|| ToolFault::Reported(format!("'{key}' is not a finite number"))),
        // Models sometimes quote numbers.
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(|f| (s.trim().to_string(), f))
            .map_err(|_| ToolFault::Reported(format!("'{key}' must be a number, got \"{s}\""))),
        other => Err(ToolFault::Reported(format!(
            "'{key}' must be a number, got {other}"
        ))),
    }
}
