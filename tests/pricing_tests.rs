use std::io::Write;

use insight_chat::{pricing::PricingTable, usage::UsageMetrics};

#[test]
fn test_gpt_4o_mini_cost() {
    let table = PricingTable::builtin();
    let cost = table.estimate("openai", "gpt-4o-mini", &UsageMetrics::new(1000, 1000));
    assert_eq!(cost, 0.00075);
}

#[test]
fn test_cost_rounded_to_six_places() {
    let table = PricingTable::builtin();
    // 7 * 0.00015 / 1000 = 0.00000105 -> 0.000001
    let cost = table.estimate("openai", "gpt-4o-mini", &UsageMetrics::new(7, 0));
    assert_eq!(cost, 0.000001);
}

#[test]
fn test_missing_entry_costs_zero() {
    let table = PricingTable::builtin();
    assert_eq!(table.estimate("openai", "gpt-99", &UsageMetrics::new(5000, 5000)), 0.0);
    assert_eq!(table.estimate("nobody", "gpt-4o-mini", &UsageMetrics::new(5000, 5000)), 0.0);
}

#[test]
fn test_estimate_is_stable() {
    let table = PricingTable::builtin();
    let usage = UsageMetrics::new(1234, 5678);
    let first = table.estimate("claude", "claude-3-7-sonnet-20250219", &usage);
    for _ in 0..10 {
        assert_eq!(table.estimate("claude", "claude-3-7-sonnet-20250219", &usage), first);
    }
}

#[test]
fn test_builtin_covers_default_models() {
    use insight_chat::providers::Provider;

    let table = PricingTable::builtin();
    for provider in Provider::ALL {
        assert!(
            table.get(provider.id(), provider.default_model()).is_some(),
            "missing price for {}",
            provider
        );
    }
}

#[test]
fn test_load_merges_file_over_builtin() {
    let path = std::env::temp_dir().join(format!("pricing-{}.json", uuid::Uuid::new_v4()));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(
        br#"{"models": {"openai:gpt-4o-mini": {"input": 1.0, "output": 2.0}, "openai:o3": {"input": 0.01, "output": 0.04}}}"#,
    )
    .unwrap();

    let table = PricingTable::load(Some(&path)).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(table.len(), PricingTable::builtin().len() + 1);
    assert_eq!(table.estimate("openai", "gpt-4o-mini", &UsageMetrics::new(1000, 1000)), 3.0);
    assert!(table.get("openai", "o3").is_some());
}

#[test]
fn test_load_rejects_bad_file() {
    let path = std::env::temp_dir().join(format!("pricing-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, "not json").unwrap();
    let result = PricingTable::load(Some(&path));
    std::fs::remove_file(&path).ok();
    assert!(result.is_err());
}
