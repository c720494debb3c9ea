//! `sage-council consult`

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;

use super::build_orchestrator;
use crate::cli::output::{colorize_status, format_confidence, list_table, output, truncate, CommandOutput};
use crate::cli::types::ConsultArgs;
use crate::domain::models::{
    CollaborationPattern, CollaborativeResponse, Config, ConsultationQuery, Priority, QueryKind,
};
use crate::services::orchestrator::PATTERN_KEY;

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ConsultOutput {
    pub response: CollaborativeResponse,
}

fn summary_of(content: &Value) -> String {
    content
        .get("summary")
        .and_then(Value::as_str)
        .map_or_else(|| content.to_string(), str::to_string)
}

fn bullet_section(title: &str, items: &[String]) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    let mut lines = vec![format!("{}:", title.bold())];
    lines.extend(items.iter().map(|item| format!("  - {item}")));
    Some(lines.join("\n"))
}

impl CommandOutput for ConsultOutput {
    fn to_human(&self) -> String {
        let response = &self.response;
        let quality = if response.is_degraded() { "degraded" } else { "complete" };
        let mut sections = vec![format!(
            "Consultation {} ({} pattern): {}, confidence {}, {} ms",
            response.query_id,
            response.pattern,
            colorize_status(quality),
            format_confidence(response.confidence).bold(),
            response.duration_ms
        )];

        let mut table = list_table(&["sage", "outcome", "confidence", "summary"]);
        for entry in &response.audit.entries {
            let answer = response
                .responses
                .iter()
                .find(|r| r.agent_name == entry.agent);
            table.add_row(vec![
                entry.agent.clone(),
                colorize_status(&entry.disposition.label()).to_string(),
                answer.map_or_else(|| "-".to_string(), |r| format_confidence(r.confidence)),
                answer.map_or_else(String::new, |r| truncate(&summary_of(&r.content), 72)),
            ]);
        }
        sections.push(table.to_string());

        sections.extend(bullet_section("Suggestions", &response.suggestions));
        sections.extend(bullet_section("Next actions", &response.next_actions));
        sections.extend(bullet_section("Sources", &response.sources));
        sections.join("\n\n")
    }
}

/// Split `key=value`; values that are not valid JSON become strings.
pub fn parse_context_entry(entry: &str) -> Result<(String, Value)> {
    let (key, raw) = entry
        .split_once('=')
        .with_context(|| format!("Context entry '{entry}' must look like key=value"))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Context entry '{entry}' has an empty key");
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

pub fn build_query(args: &ConsultArgs) -> Result<ConsultationQuery> {
    let kind = QueryKind::parse_str(&args.kind)
        .with_context(|| format!("Unknown query kind '{}'", args.kind))?;
    let priority = Priority::parse_str(&args.priority)
        .with_context(|| format!("Unknown priority '{}'", args.priority))?;

    let mut query = ConsultationQuery::new(kind, args.content.clone(), args.requester.clone())
        .with_priority(priority);
    for entry in &args.context {
        let (key, value) = parse_context_entry(entry)?;
        query = query.with_context_value(key, value);
    }
    if let Some(pattern) = &args.pattern {
        let pattern = CollaborationPattern::parse_str(pattern)
            .with_context(|| format!("Unknown collaboration pattern '{pattern}'"))?;
        query = query.with_context_value(PATTERN_KEY, Value::String(pattern.as_str().to_string()));
    }
    if let Some(timeout_ms) = args.timeout_ms {
        query = query.with_timeout_ms(timeout_ms);
    }
    Ok(query)
}

pub async fn execute(args: ConsultArgs, config: &Config, json_mode: bool) -> Result<()> {
    let query = build_query(&args)?;
    let orchestrator = build_orchestrator(config)?;
    let response = orchestrator
        .consult(query)
        .await
        .context("Consultation rejected")?;

    output(&ConsultOutput { response }, json_mode);
    Ok(())
}
