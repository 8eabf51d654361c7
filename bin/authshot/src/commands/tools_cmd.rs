use authshot_tools::ToolRegistry;

/// Print the registered tools and their parameter schemas.
pub fn run() -> anyhow::Result<()> {
    let registry = ToolRegistry::with_defaults();
    for descriptor in registry.tool_descriptors() {
        println!(
            "{}\n  {}",
            descriptor["name"].as_str().unwrap_or("?"),
            descriptor["description"].as_str().unwrap_or(""),
        );
        if let Some(props) = descriptor["inputSchema"]["properties"].as_object() {
            for (name, prop) in props {
                println!(
                    "    {}: {}",
                    name,
                    prop["description"].as_str().unwrap_or(""),
                );
            }
        }
        println!();
    }
    Ok(())
}
