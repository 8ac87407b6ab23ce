use serde_json::Value;
use std::sync::Arc;
use taskcell_tools::{Tool, ToolContext, ToolRegistry};

use super::build_controller;

fn schema_function(schema: &Value) -> &Value {
    schema.get("function").unwrap_or(schema)
}

/// List all registered tools.
pub async fn list() -> anyhow::Result<()> {
    let registry = ToolRegistry::with_defaults();
    let schemas = registry.get_tool_schemas();

    println!();
    println!("🔧 Registered tools ({} total)", schemas.len());
    println!();

    for schema in &schemas {
        let func = schema_function(schema);
        let name = func["name"].as_str().unwrap_or("");
        let desc = func["description"].as_str().unwrap_or("");
        let short_desc: String = desc.chars().take(60).collect();
        let ellipsis = if desc.chars().count() > 60 { "..." } else { "" };
        println!("     {:<22} {}{}", name, short_desc, ellipsis);
    }
    println!();

    Ok(())
}

/// Show detailed info for a specific tool.
pub async fn info(tool_name: &str) -> anyhow::Result<()> {
    let registry = ToolRegistry::with_defaults();
    let tool = registry
        .get(tool_name)
        .ok_or_else(|| anyhow::anyhow!("Unknown tool: {}", tool_name))?;
    let schema = tool.schema();

    println!();
    println!("🔧 {}", schema.name);
    println!();
    println!("  Description: {}", schema.description);
    println!();

    let required: Vec<&str> = schema.parameters["required"]
        .as_array()
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    if let Some(props) = schema.parameters["properties"].as_object() {
        println!("  Parameters:");
        for (name, prop) in props {
            let ty = prop["type"].as_str().unwrap_or("any");
            let marker = if required.contains(&name.as_str()) { "*" } else { " " };
            let desc = prop["description"].as_str().unwrap_or("");
            println!("    {}{:<18} {:<8} {}", marker, name, ty, desc);
            if let Some(values) = prop["enum"].as_array() {
                let values: Vec<&str> = values.iter().filter_map(|v| v.as_str()).collect();
                println!("      {:<26} one of: {}", "", values.join(", "));
            }
        }
        println!();
    }

    Ok(())
}

/// Execute a tool once against a fresh controller. Sessions it opens are
/// closed before returning.
pub async fn test(tool_name: &str, params: &str) -> anyhow::Result<()> {
    let params: Value =
        serde_json::from_str(params).map_err(|e| anyhow::anyhow!("Invalid JSON params: {}", e))?;
    let (config, paths, controller) = build_controller()?;

    let ctx = ToolContext {
        workspace: paths.workspace(),
        config,
        controller: Some(Arc::new(controller.clone())),
    };

    let registry = ToolRegistry::with_defaults();
    let result = registry.execute(tool_name, ctx, params).await;
    controller.shutdown_all().await;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}
