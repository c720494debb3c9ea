//! End-to-end consultations over mock sages.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{council, fast_config, setup_test_logging};
use sage_council::adapters::sages::{MockReply, MockSage};
use sage_council::domain::models::{
    AuditDisposition, ConsultationPhase, RecoveryStrategy, SkipReason, PREVIOUS_RESULTS_KEY,
};
use sage_council::services::{FallbackStrategy, JournalFilter};
use sage_council::{
    AgentError, CollaborationPattern, ConsultationQuery, FailureKind, Priority, QueryKind,
    ResponseQuality,
};

#[tokio::test]
async fn critical_incident_skips_sage_with_open_circuit() {
    setup_test_logging();
    let alpha = Arc::new(
        MockSage::new("alpha", [QueryKind::IncidentAnalysis])
            .with_default_reply(MockReply::success(0.9)),
    );
    let bravo = Arc::new(MockSage::new("bravo", [QueryKind::IncidentAnalysis]));
    let charlie = Arc::new(
        MockSage::new("charlie", [QueryKind::IncidentAnalysis])
            .with_default_reply(MockReply::success(0.7)),
    );
    let council = council(
        &fast_config(),
        &[Arc::clone(&alpha), Arc::clone(&bravo), Arc::clone(&charlie)],
    );

    council.circuits().record_failure("bravo", "connection reset").await;
    council.circuits().record_failure("bravo", "connection reset").await;
    assert!(council.circuits().is_blocking("bravo").await);

    let query = ConsultationQuery::new(QueryKind::IncidentAnalysis, "checkout is down", "oncall")
        .with_priority(Priority::Critical);
    let response = council.consult(query).await.unwrap();

    assert_eq!(response.pattern, CollaborationPattern::Parallel);
    assert_eq!(alpha.call_count(), 1);
    assert_eq!(bravo.call_count(), 0);
    assert_eq!(charlie.call_count(), 1);
    assert_eq!(response.agent_names(), vec!["alpha", "charlie"]);

    let bravo_entry = response.audit.entry("bravo").unwrap();
    assert_eq!(bravo_entry.disposition.label(), "skipped: circuit_open");
    assert!((response.confidence - 0.8).abs() < 1e-9);
    assert_eq!(response.quality, ResponseQuality::Degraded);
    assert_eq!(response.phase, ConsultationPhase::Degraded);
}

#[tokio::test]
async fn sequential_chain_continues_after_unrecovered_network_failure() {
    setup_test_logging();
    let knowledge = Arc::new(
        MockSage::new("knowledge", [QueryKind::KnowledgeLookup])
            .with_default_reply(MockReply::failure(AgentError::network("connection refused"))),
    );
    let task = Arc::new(MockSage::new("task", [QueryKind::TaskPlanning]));
    let council = council(&fast_config(), &[Arc::clone(&knowledge), Arc::clone(&task)]);

    let query = ConsultationQuery::new(QueryKind::GeneralCollaboration, "hello council", "dev")
        .with_context_value("required_agents", json!(["knowledge", "task"]))
        .with_context_value("collaboration_pattern", json!("sequential"));
    let query_id = query.id;
    let response = council.consult(query).await.unwrap();

    assert_eq!(response.pattern, CollaborationPattern::Sequential);
    // first call plus the bounded network retries
    assert_eq!(knowledge.call_count(), 4);
    assert_eq!(task.call_count(), 1);

    let seen = task.received_queries().await;
    assert!(!seen[0].context.contains_key("knowledge_result"));
    assert!(!seen[0].context.contains_key(PREVIOUS_RESULTS_KEY));

    assert!(response.is_degraded());
    assert_eq!(response.agent_names(), vec!["task"]);
    let failures = response.audit.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].agent, "knowledge");
    assert!(matches!(
        failures[0].disposition,
        AuditDisposition::Failed { kind: FailureKind::NetworkFailure, .. }
    ));

    let records = council
        .recovery()
        .journal()
        .query(&JournalFilter::new().with_query(query_id))
        .await;
    assert_eq!(records.len(), 1);
    assert!(!records[0].recovered);
}

async fn run_parallel_with_delays(delays: [(&str, u64); 4]) -> (Vec<String>, f64, Vec<String>) {
    let sages: Vec<Arc<MockSage>> = delays
        .iter()
        .map(|(name, delay)| {
            Arc::new(
                MockSage::new(*name, [QueryKind::InformationSearch])
                    .with_default_reply(MockReply::success(0.6).with_delay_ms(*delay)),
            )
        })
        .collect();
    let council = council(&fast_config(), &sages);

    let query = ConsultationQuery::new(QueryKind::InformationSearch, "find the runbook", "dev")
        .with_context_value("collaboration_pattern", json!("parallel"))
        .with_timeout_ms(300);
    let response = council.consult(query).await.unwrap();

    let names = response.agent_names().into_iter().map(str::to_string).collect();
    let timed_out = response
        .audit
        .failures()
        .into_iter()
        .map(|e| e.agent.clone())
        .collect();
    (names, response.confidence, timed_out)
}

#[tokio::test]
async fn parallel_merge_does_not_depend_on_completion_order() {
    let first = run_parallel_with_delays([("a", 5), ("b", 40), ("c", 80), ("d", 2_000)]).await;
    let second = run_parallel_with_delays([("a", 80), ("b", 40), ("c", 5), ("d", 2_000)]).await;

    assert_eq!(first.0, vec!["a", "b", "c"]);
    assert_eq!(first.0, second.0);
    assert!((first.1 - second.1).abs() < f64::EPSILON);
    assert_eq!(first.2, vec!["d"]);
    assert_eq!(second.2, vec!["d"]);
}

#[tokio::test]
async fn cross_agent_fallback_answers_for_failed_sage() {
    let primary = Arc::new(
        MockSage::new("primary", [QueryKind::KnowledgeLookup])
            .with_default_reply(MockReply::failure(AgentError::model("weights missing"))),
    );
    let backup = Arc::new(
        MockSage::new("backup", [QueryKind::KnowledgeLookup])
            .with_default_reply(MockReply::success(0.6)),
    );
    let council = council(&fast_config(), &[Arc::clone(&primary), Arc::clone(&backup)]);

    let query = ConsultationQuery::new(QueryKind::KnowledgeLookup, "what is a circuit breaker", "dev")
        .with_context_value("excluded_agents", json!(["backup"]));
    let response = council.consult(query).await.unwrap();

    assert_eq!(primary.call_count(), 1);
    assert_eq!(backup.call_count(), 1);
    assert!(backup.received_queries().await[0].is_fallback());

    assert_eq!(response.quality, ResponseQuality::Complete);
    assert!(matches!(
        response.audit.entry("primary").unwrap().disposition,
        AuditDisposition::Recovered { strategy: RecoveryStrategy::CrossAgentFallback, .. }
    ));

    let summary = council.recovery().journal().summary().await;
    assert_eq!(summary.total, 1);
    assert_eq!(summary.recovered, 1);

    let backup_health = council.health_store().get_state("backup").await;
    assert_eq!(backup_health.metrics.total_consultations, 1);
    assert_eq!(backup_health.active_consultations, 0);
}

#[tokio::test]
async fn last_known_good_fallback_serves_cached_answer() {
    let knowledge = Arc::new(
        MockSage::new("knowledge", [QueryKind::KnowledgeLookup]).with_script([
            MockReply::success(0.8).with_content(json!({ "summary": "cached" })),
            MockReply::failure(AgentError::data_corruption("checksum mismatch")),
        ]),
    );
    let council = council(&fast_config(), &[Arc::clone(&knowledge)]);
    council
        .recovery()
        .register_fallback("knowledge", FallbackStrategy::LastKnownGood)
        .await;

    let first = council
        .consult(ConsultationQuery::new(QueryKind::KnowledgeLookup, "what changed", "dev"))
        .await
        .unwrap();
    assert_eq!(first.quality, ResponseQuality::Complete);

    let query = ConsultationQuery::new(QueryKind::KnowledgeLookup, "what changed", "dev");
    let query_id = query.id;
    let second = council.consult(query).await.unwrap();

    assert_eq!(knowledge.call_count(), 2);
    assert_eq!(second.responses.len(), 1);
    assert_eq!(second.responses[0].query_id, query_id);
    assert_eq!(second.responses[0].content, json!({ "summary": "cached" }));
    assert!((second.confidence - 0.4).abs() < 1e-9);
    assert!(matches!(
        second.audit.entry("knowledge").unwrap().disposition,
        AuditDisposition::Recovered { strategy: RecoveryStrategy::AgentFallback, .. }
    ));
}

#[tokio::test]
async fn repeated_failures_open_the_circuit_across_consultations() {
    let flaky = Arc::new(
        MockSage::new("flaky", [QueryKind::TaskPlanning])
            .with_default_reply(MockReply::failure(AgentError::model("bad output"))),
    );
    let council = council(&fast_config(), &[Arc::clone(&flaky)]);
    let ask = || ConsultationQuery::new(QueryKind::TaskPlanning, "plan the migration", "dev");

    for _ in 0..2 {
        let response = council.consult(ask()).await.unwrap();
        assert!(response.is_degraded());
    }
    assert_eq!(flaky.call_count(), 2);

    let response = council.consult(ask()).await.unwrap();
    assert_eq!(flaky.call_count(), 2);
    assert_eq!(response.audit.skipped(), vec![("flaky", SkipReason::CircuitOpen)]);
    assert!(response.confidence.abs() < f64::EPSILON);

    let health = council.system_health().await;
    assert_eq!(health.circuits.len(), 1);
    assert_eq!(health.circuits[0].open_count, 1);
}

#[tokio::test]
async fn hierarchical_supervisor_designates_downstream_sages() {
    let lead = Arc::new(
        MockSage::new("lead", [QueryKind::IncidentAnalysis])
            .with_default_reply(MockReply::success(0.9).delegating_to(["incident"])),
    );
    let incident = Arc::new(MockSage::new("incident", [QueryKind::IncidentAnalysis]));
    let search = Arc::new(MockSage::new("search", [QueryKind::IncidentAnalysis]));
    let council = council(
        &fast_config(),
        &[Arc::clone(&lead), Arc::clone(&incident), Arc::clone(&search)],
    );

    let query = ConsultationQuery::new(QueryKind::IncidentAnalysis, "payments erroring", "oncall")
        .with_context_value("supervisor", json!("lead"));
    let response = council.consult(query).await.unwrap();

    assert_eq!(response.pattern, CollaborationPattern::Hierarchical);
    assert_eq!(response.agent_names(), vec!["incident", "lead"]);
    assert_eq!(search.call_count(), 0);
    assert_eq!(response.audit.skipped(), vec![("search", SkipReason::NotDesignated)]);

    let seen = incident.received_queries().await;
    assert!(seen[0].context.contains_key("lead_result"));
}

#[tokio::test]
async fn cancellation_returns_partial_response() {
    let slow = Arc::new(
        MockSage::new("slow", [QueryKind::KnowledgeLookup])
            .with_default_reply(MockReply::success(0.9).with_delay_ms(5_000)),
    );
    let mut config = fast_config();
    config.orchestrator.agent_timeout_ms = 10_000;
    config.orchestrator.default_deadline_ms = 10_000;
    let council = council(&config, &[Arc::clone(&slow)]);

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let response = council
        .consult_with_cancellation(
            ConsultationQuery::new(QueryKind::KnowledgeLookup, "why", "dev"),
            token,
        )
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(response.audit.skipped(), vec![("slow", SkipReason::Cancelled)]);
    assert!(response.is_degraded());

    let health = council.system_health().await;
    assert_eq!(health.in_flight_invocations, 0);
    assert_eq!(health.active_consultations, 0);
}

fn slow_backoff_config() -> sage_council::Config {
    let mut config = fast_config();
    config.recovery.max_network_retries = 6;
    config.recovery.initial_backoff_ms = 300;
    config.recovery.max_backoff_ms = 400;
    config.orchestrator.default_deadline_ms = 10_000;
    config
}

fn cancel_after(token: &CancellationToken, delay_ms: u64) {
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        trigger.cancel();
    });
}

#[tokio::test]
async fn cancellation_interrupts_network_backoff() {
    setup_test_logging();
    let flaky = Arc::new(
        MockSage::new("flaky", [QueryKind::KnowledgeLookup])
            .with_default_reply(MockReply::failure(AgentError::network("connection reset"))),
    );
    let council = council(&slow_backoff_config(), &[Arc::clone(&flaky)]);

    let token = CancellationToken::new();
    cancel_after(&token, 50);

    let started = std::time::Instant::now();
    let response = council
        .consult_with_cancellation(
            ConsultationQuery::new(QueryKind::KnowledgeLookup, "why is it slow", "dev"),
            token,
        )
        .await
        .unwrap();

    assert_eq!(response.pattern, CollaborationPattern::Sequential);
    assert!(started.elapsed() < Duration::from_millis(1_000));
    assert_eq!(flaky.call_count(), 1);
    assert_eq!(response.audit.skipped(), vec![("flaky", SkipReason::Cancelled)]);
    assert!(response.is_degraded());
    assert_eq!(council.recovery().journal().len().await, 0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(flaky.call_count(), 1);
}

#[tokio::test]
async fn cancelled_parallel_consultation_leaves_no_retries_behind() {
    let sages: Vec<Arc<MockSage>> = ["east", "west"]
        .into_iter()
        .map(|name| {
            Arc::new(
                MockSage::new(name, [QueryKind::InformationSearch])
                    .with_default_reply(MockReply::failure(AgentError::network("connection reset"))),
            )
        })
        .collect();
    let council = council(&slow_backoff_config(), &sages);

    let token = CancellationToken::new();
    cancel_after(&token, 50);

    let query = ConsultationQuery::new(QueryKind::InformationSearch, "find the runbook", "dev")
        .with_context_value("collaboration_pattern", json!("parallel"));
    let response = council.consult_with_cancellation(query, token).await.unwrap();

    assert_eq!(
        response.audit.skipped(),
        vec![("east", SkipReason::Cancelled), ("west", SkipReason::Cancelled)]
    );

    // Spawned invocations must not keep retrying after the consultation returned
    tokio::time::sleep(Duration::from_millis(800)).await;
    for sage in &sages {
        assert_eq!(sage.call_count(), 1);
    }
    assert_eq!(council.recovery().journal().len().await, 0);
    assert!(council.circuits().stats().await.iter().all(|c| c.failure_count == 0));
    assert_eq!(council.system_health().await.in_flight_invocations, 0);
}

#[tokio::test]
async fn half_open_circuit_admits_one_trial_across_concurrent_consultations() {
    let recovering = Arc::new(
        MockSage::new("recovering", [QueryKind::TaskPlanning])
            .with_default_reply(MockReply::success(0.8).with_delay_ms(200)),
    );
    let mut config = fast_config();
    config.circuit_breaker.cooldown_secs = 1;
    let council = council(&config, &[Arc::clone(&recovering)]);

    council.circuits().record_failure("recovering", "timeout").await;
    council.circuits().record_failure("recovering", "timeout").await;
    assert!(council.circuits().is_blocking("recovering").await);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(!council.circuits().is_blocking("recovering").await);

    let ask = || ConsultationQuery::new(QueryKind::TaskPlanning, "plan the rollout", "dev");
    let (first, second) = tokio::join!(council.consult(ask()), council.consult(ask()));
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(recovering.call_count(), 1);
    let mut labels: Vec<String> = [&first, &second]
        .iter()
        .map(|r| r.audit.entry("recovering").unwrap().disposition.label())
        .collect();
    labels.sort();
    assert_eq!(labels, vec!["contributed", "skipped: circuit_open"]);
    assert_eq!(
        council.circuits().state("recovering").await,
        sage_council::services::CircuitState::Closed
    );
}

#[tokio::test]
async fn validation_errors_are_the_only_failures() {
    let sage = Arc::new(MockSage::new("knowledge", [QueryKind::KnowledgeLookup]));
    let mut config = fast_config();
    config.orchestrator.max_content_length = 8;
    let council = council(&config, &[Arc::clone(&sage)]);

    let oversized = ConsultationQuery::new(QueryKind::KnowledgeLookup, "far too long a question", "dev");
    assert!(council.consult(oversized).await.is_err());

    let zero_timeout = ConsultationQuery::new(QueryKind::KnowledgeLookup, "why", "dev").with_timeout_ms(0);
    assert!(council.consult(zero_timeout).await.is_err());

    assert_eq!(sage.call_count(), 0);
}
