//! `agentloop run`: one loop execution for a profile.

use agentloop_agent::{AgentLoop, ExitHandler};
use agentloop_config::AppConfig;
use agentloop_core::event::EventBus;
use std::sync::Arc;

pub async fn run(
    profile_name: &str,
    input: Option<String>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let profile = config.profile(profile_name)?;
    let provider = agentloop_providers::from_config(&config)?;

    let today = chrono::Local::now().date_naive();
    let handler = ExitHandler::new(profile.destination, profile.fallbacks.clone(), today)
        .with_title(title_case(&profile.name));
    let date = handler.display_date();

    let tools = Arc::new(agentloop_tools::registry_from_profile(profile));
    let agent = AgentLoop::for_profile(
        provider,
        &config,
        profile,
        tools,
        &date,
        Arc::new(EventBus::default()),
    );

    let task = profile.render_task(input.as_deref().unwrap_or_default(), &date);
    let delivery = match agent.run(task).await {
        Ok(outcome) => handler.deliver(&outcome.record),
        Err(e) => handler.from_error(&e),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&delivery)?);
    } else {
        println!("{}", delivery.text);
    }

    Ok(())
}

fn title_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
