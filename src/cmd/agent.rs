//! One-shot agent call: `orderdesk ask`.

use std::time::Duration;

use anyhow::Result;
use orderdesk::agent::AgentOutcome;
use orderdesk::config::Settings;

pub async fn cmd_ask(
    settings: &Settings,
    message: &str,
    role: Option<&str>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let state = super::open_state(settings)?;
    let timeout = timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| settings.dashboard.agent.search_timeout());

    match state.agent.ask(message, role, timeout).await? {
        AgentOutcome::Completed(record) => {
            println!("{}", record.ai_response);
            let usage = record.token_usage;
            if usage.total_tokens > 0 {
                eprintln!(
                    "tokens: {} prompt, {} completion",
                    usage.prompt_tokens, usage.completion_tokens
                );
            }
        }
        timed_out @ AgentOutcome::TimedOut => anyhow::bail!("{}", timed_out.message()),
    }
    Ok(())
}
