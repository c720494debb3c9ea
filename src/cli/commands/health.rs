//! `sage-council health`

use anyhow::Result;
use serde::Serialize;

use super::build_orchestrator;
use crate::cli::output::{colorize_status, list_table, output, CommandOutput};
use crate::domain::models::Config;
use crate::services::SystemHealth;

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct HealthOutput {
    pub health: SystemHealth,
}

impl CommandOutput for HealthOutput {
    fn to_human(&self) -> String {
        let mut sages = list_table(&["sage", "status", "in flight", "consultations", "success", "avg latency"]);
        for record in &self.health.agents {
            sages.add_row(vec![
                record.agent_name.clone(),
                colorize_status(record.status.as_str()).to_string(),
                record.active_consultations.to_string(),
                record.metrics.total_consultations.to_string(),
                format!("{:.0}%", record.metrics.success_rate() * 100.0),
                format!("{:.1} ms", record.metrics.avg_latency_ms),
            ]);
        }

        let mut sections = vec![
            format!(
                "{} sage(s), {} active consultation(s)",
                self.health.agents.len(),
                self.health.active_consultations
            ),
            sages.to_string(),
        ];

        if !self.health.circuits.is_empty() {
            let mut circuits = list_table(&["sage", "circuit", "recent failures", "times opened"]);
            for stats in &self.health.circuits {
                circuits.add_row(vec![
                    stats.agent.clone(),
                    colorize_status(stats.state.as_str()).to_string(),
                    stats.failure_count.to_string(),
                    stats.open_count.to_string(),
                ]);
            }
            sections.push(circuits.to_string());
        }
        sections.join("\n\n")
    }
}

pub async fn execute(config: &Config, json_mode: bool) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    orchestrator.refresh_health().await;
    let health = orchestrator.system_health().await;
    output(&HealthOutput { health }, json_mode);
    Ok(())
}
