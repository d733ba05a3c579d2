//! `agentloop tools`: show what a profile exposes to the model.

use agentloop_config::AppConfig;

pub async fn run(profile_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let profile = config.profile(profile_name)?;
    let registry = agentloop_tools::registry_from_profile(profile);

    println!("Profile '{}' ({} tools)\n", profile.name, registry.describe().len());
    for definition in registry.describe() {
        let marker = if registry.is_completion(&definition.name) {
            " [completion]"
        } else if profile
            .tools
            .iter()
            .any(|t| t.name == definition.name && t.shared)
        {
            " [shared]"
        } else {
            ""
        };
        println!("  {}{marker}", definition.name);
        println!("    {}", definition.description);
        println!("    {}", serde_json::to_string(&definition.input_schema)?);
    }

    Ok(())
}
