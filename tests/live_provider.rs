//! Probes a real provider. Skipped unless `OPENAI_API_KEY` is set.

use modelprobe::probe::ProbeKind;
use modelprobe::{EngineConfig, VerificationEngine};
use test_tag::tag;

fn resolve_model() -> String {
    std::env::var("MODELPROBE_LIVE_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string())
}

#[tokio::test]
#[tag(live)]
async fn test_openai_model_is_verified() {
    if std::env::var("OPENAI_API_KEY").is_err() {
        eprintln!("OPENAI_API_KEY not set, skipping live verification");
        return;
    }

    let engine = VerificationEngine::new(EngineConfig::default())
        .await
        .expect("default configuration builds");
    let result = engine
        .verify("openai", &resolve_model(), true)
        .await
        .expect("openai is configured");

    let existence = result.probe(ProbeKind::Existence).expect("existence probe ran");
    assert!(existence.passed, "existence failed: {:?}", existence.error);
    assert!(result.score >= 40, "score {}", result.score);

    engine.shutdown().await;
}
