//! Built-in tool catalogs for well-known server names.
//!
//! Used when a connected server's `tools/list` exchange fails: the server
//! stays usable with the tool surface it is expected to expose. Unknown
//! server names get an empty list.

use serde_json::json;

use super::types::ToolDescriptor;

fn tool(server: &str, name: &str, description: &str, schema: serde_json::Value) -> ToolDescriptor {
    ToolDescriptor {
        server: server.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        input_schema: schema,
    }
}

fn object(properties: serde_json::Value, required: &[&str]) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// The fallback tool list for `server`, in advertised order.
pub fn fallback_tools(server: &str) -> Vec<ToolDescriptor> {
    match server {
        "filesystem" => vec![
            tool(
                server,
                "read_file",
                "Read contents of a file",
                object(json!({"path": {"type": "string"}}), &["path"]),
            ),
            tool(
                server,
                "write_file",
                "Write content to a file",
                object(
                    json!({"path": {"type": "string"}, "content": {"type": "string"}}),
                    &["path", "content"],
                ),
            ),
            tool(
                server,
                "list_directory",
                "List files in a directory",
                object(json!({"path": {"type": "string"}}), &["path"]),
            ),
            tool(
                server,
                "create_directory",
                "Create a new directory",
                object(json!({"path": {"type": "string"}}), &["path"]),
            ),
        ],
        "brave-search" => vec![
            tool(
                server,
                "search",
                "Search the web using Brave Search API",
                object(json!({"query": {"type": "string"}}), &["query"]),
            ),
            tool(
                server,
                "search_news",
                "Search for news articles",
                object(json!({"query": {"type": "string"}}), &["query"]),
            ),
        ],
        "postgres" => vec![
            tool(
                server,
                "query",
                "Execute SQL query",
                object(json!({"sql": {"type": "string"}}), &["sql"]),
            ),
            tool(
                server,
                "list_tables",
                "List all tables in the database",
                object(json!({}), &[]),
            ),
            tool(
                server,
                "describe_table",
                "Get table schema",
                object(json!({"table_name": {"type": "string"}}), &["table_name"]),
            ),
        ],
        "calculator" => {
            let operands = |first: &str, second: &str| {
                object(
                    json!({
                        "a": {"type": "number", "description": first},
                        "b": {"type": "number", "description": second},
                    }),
                    &["a", "b"],
                )
            };
            vec![
                tool(
                    server,
                    "add",
                    "Add two numbers together",
                    operands("First number to add", "Second number to add"),
                ),
                tool(
                    server,
                    "multiply",
                    "Multiply two numbers together",
                    operands("First number to multiply", "Second number to multiply"),
                ),
                tool(
                    server,
                    "divide",
                    "Divide first number by second number",
                    operands("Dividend (number to be divided)", "Divisor (number to divide by)"),
                ),
            ]
        }
        "rag" => vec![
            tool(
                server,
                "rag_search",
                "Search uploaded documents for relevant passages",
                object(
                    json!({"query": {"type": "string"}, "n_results": {"type": "integer"}}),
                    &["query"],
                ),
            ),
            tool(
                server,
                "rag_chat",
                "Answer a question from the uploaded documents",
                object(
                    json!({"question": {"type": "string"}, "n_results": {"type": "integer"}}),
                    &["question"],
                ),
            ),
            tool(
                server,
                "rag_get_info",
                "Describe the document collection",
                object(json!({}), &[]),
            ),
        ],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_servers_have_tools_bound_to_them() {
        let fs = fallback_tools("filesystem");
        let names: Vec<&str> = fs.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["read_file", "write_file", "list_directory", "create_directory"]
        );
        assert!(fs.iter().all(|t| t.server == "filesystem"));

        assert_eq!(fallback_tools("brave-search").len(), 2);
        assert_eq!(fallback_tools("postgres").len(), 3);
        assert_eq!(fallback_tools("calculator")[0].input_schema["required"][1], "b");
    }

    #[test]
    fn unknown_server_has_no_fallback() {
        assert!(fallback_tools("ghost").is_empty());
    }
}
