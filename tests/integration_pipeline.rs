/*!
 * End-to-end pipeline tests over synthetic CSV sources
 *
 * Exercises the full flow: raw billing CSV -> normalization -> market
 * aggregation -> concentration analysis -> risk labels -> insights
 * artifact -> model training -> batch scoring, all against temp files.
 */

use std::io::Write;
use std::path::Path;

use referralguard::prelude::*;
use referralguard::config::ModelConfig;
use referralguard::data_types::ConcentrationCategory;
use referralguard::export;

const BILLING_HEADER: &str =
    "Rndrng_NPI,Rndrng_Prvdr_Last_Org_Name,Rndrng_Prvdr_First_Name,Rndrng_Prvdr_Zip5,Rndrng_Prvdr_Type,Tot_Srvcs,Avg_Sbmtd_Chrg\n";

fn write_file(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
}

/// Billing CSV with the canonical 90210/Cardiology {80,15,5} market plus
/// enough varied markets for both risk-label classes to appear
fn synthetic_billing_csv() -> String {
    let mut csv = BILLING_HEADER.to_string();

    // The reference market: revenues 80/15/5 of a 100 total
    csv.push_str("1000000001,ADAMS,MARY,90210,Cardiology,80,1\n");
    csv.push_str("1000000002,BAKER,JOHN,90210,Cardiology,15,1\n");
    csv.push_str("1000000003,CLARK,SUSAN,90210,Cardiology,5,1\n");

    // Five equal 20% providers in one market
    for p in 0..5 {
        csv.push_str(&format!("20000000{:02},DAVIS,P{p},60601,Oncology,20,1\n", p));
    }

    // A spread of three-provider markets with varying dominance
    for market in 0..12 {
        let zip = format!("3{:04}", 1000 + market);
        let (a, b, c) = match market % 3 {
            0 => (700, 200, 100),
            1 => (400, 350, 250),
            _ => (900, 80, 20),
        };
        csv.push_str(&format!("40{:02}000001,EVANS,A,{zip},Orthopedics,{a},1\n", market));
        csv.push_str(&format!("40{:02}000002,FOX,B,{zip},Orthopedics,{b},1\n", market));
        csv.push_str(&format!("40{:02}000003,GRAY,C,{zip},Orthopedics,{c},1\n", market));
    }

    csv
}

fn synthetic_nppes_csv() -> String {
    "NPI,Provider Last Name (Legal Name),Provider First Name,Provider Organization Name (Legal Business Name)\n\
     1000000001,ADAMS,MARY,\n\
     1000000002,BAKER,JOHN,\n\
     1000000003,,,CLARK CARDIOLOGY GROUP\n"
        .to_string()
}

fn synthetic_endpoint_csv() -> String {
    "NPI,Endpoint Type,Endpoint,Affiliation Legal Business Name\n\
     1000000001,FHIR,https://fhir.acme.example,ACME HEALTH SYSTEM\n\
     1000000002,FHIR,https://fhir.acme.example,ACME HEALTH SYSTEM\n\
     1000000002,FHIR,https://fhir.bayside.example,BAYSIDE MEDICAL GROUP\n"
        .to_string()
}

fn build_dataset(dir: &Path) -> MarketDataset {
    let billing = write_file(dir, "billing.csv", &synthetic_billing_csv());
    let nppes = write_file(dir, "npidata.csv", &synthetic_nppes_csv());
    let endpoints = write_file(dir, "endpoint.csv", &synthetic_endpoint_csv());

    MarketDatasetBuilder::new()
        .billing_data(billing)
        .provider_names(nppes)
        .endpoints(endpoints)
        .show_progress(false)
        .build()
        .unwrap()
}

fn quick_model_config() -> ModelConfig {
    ModelConfig {
        n_rounds: 25,
        max_depth: 3,
        learning_rate: 0.3,
        min_samples_leaf: 2,
        baseline_iterations: 200,
        ..ModelConfig::default()
    }
}

#[test]
fn reference_market_concentration() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = build_dataset(dir.path());

    let summary = dataset.analysis.summary_for("90210", "Cardiology").unwrap();
    assert_eq!(summary.provider_count, 3);
    assert!((summary.hhi - 6650.0).abs() < 1e-6);
    assert_eq!(summary.concentration_category, ConcentrationCategory::Concentrated);
    assert_eq!(summary.top_provider_npi, "1000000001");
    // Name resolved through the NPPES map
    assert_eq!(summary.top_provider_name, "ADAMS, MARY");

    let records: Vec<_> = dataset.analysis.records.iter()
        .filter(|r| r.zip_code.as_str() == "90210")
        .collect();
    let shares: Vec<f64> = records.iter().map(|r| r.market_share_percentage).collect();
    assert!((shares[0] - 80.0).abs() < 1e-9);
    assert!((shares[1] - 15.0).abs() < 1e-9);
    assert!((shares[2] - 5.0).abs() < 1e-9);
    assert_eq!(records[2].market_position, 3);
}

#[test]
fn shares_sum_to_100_in_every_market() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = build_dataset(dir.path());

    for summary in &dataset.analysis.summaries {
        if summary.total_market_revenue <= 0.0 {
            continue;
        }
        let share_sum: f64 = dataset.analysis.records.iter()
            .filter(|r| {
                r.zip_code == summary.zip_code && r.specialty == summary.specialty
            })
            .map(|r| r.market_share_percentage)
            .sum();
        assert!(
            (share_sum - 100.0).abs() < 1e-6,
            "market {}/{} shares sum to {}",
            summary.zip_code,
            summary.specialty,
            share_sum
        );
    }
}

#[test]
fn positional_rule_flags_the_five_percent_provider() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = build_dataset(dir.path());

    let labels = RiskTargetBuilder::new(&dataset.config.risk).build(&dataset.analysis);
    let (idx, record) = dataset.analysis.records.iter().enumerate()
        .find(|(_, r)| r.provider_npi == "1000000003")
        .unwrap();
    assert_eq!(record.market_position, 3);
    assert!(labels[idx].positional);
    assert!(labels[idx].is_high_risk);
}

#[test]
fn equal_share_market_is_not_competitively_flagged() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = build_dataset(dir.path());

    // Five equal providers hold exactly 20% each; fragmentation is 0.8 but
    // no share is below the 15% competitive threshold
    let summary = dataset.analysis.summary_for("60601", "Oncology").unwrap();
    assert!((summary.hhi - 2000.0).abs() < 1e-6);
    assert!(summary.market_fragmentation > 0.3);

    let labels = RiskTargetBuilder::new(&dataset.config.risk).build(&dataset.analysis);
    for (idx, record) in dataset.analysis.records.iter().enumerate() {
        if record.zip_code.as_str() == "60601" {
            assert!((record.market_share_percentage - 20.0).abs() < 1e-9);
            assert!(!labels[idx].competitive);
        }
    }
}

#[test]
fn insights_artifact_roundtrip_and_shape() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = build_dataset(dir.path());
    let insights = dataset.insights();

    assert_eq!(insights.summary.total_markets_analyzed, 14);
    assert_eq!(insights.summary.provider_networks_count, 2);
    assert_eq!(insights.summary.multi_affiliation_providers, 1);
    assert!(!insights.leakage_opportunities.is_empty());

    let path = dir.path().join("outputs").join("real_insights.json");
    export::write_insights(&insights, &path).unwrap();
    let restored = export::read_insights(&path).unwrap();
    assert_eq!(insights, restored);
}

#[test]
fn train_persist_and_score_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = build_dataset(dir.path());

    let model_config = quick_model_config();
    let trainer = RiskModelTrainer::new(
        &model_config,
        &dataset.config.risk,
        &dataset.config.fallback,
    );
    let model = trainer.train(&dataset.analysis).unwrap();
    assert!(model.metrics.auc_score >= 0.0 && model.metrics.auc_score <= 1.0);

    // The performance report carries the same metrics as the model
    let report = PerformanceReport::from_model(&model);
    assert_eq!(report.metrics.auc_score, model.metrics.auc_score);
    let report_path = dir.path().join("outputs").join("model_performance.json");
    export::write_performance_report(&report, &report_path).unwrap();
    assert!(report_path.exists());

    // Round-trip the artifact and verify identical predictions through the
    // full scoring path
    let model_path = dir.path().join("models").join("market_risk_gbdt.json");
    model.save(&model_path).unwrap();
    let restored = TrainedModel::load(&model_path).unwrap();

    let request = ScoringRequest {
        provider_npi: "1000000003".to_string(),
        provider_name: None,
        zip_code: None,
        specialty: None,
        revenue: None,
        market_share: None,
        market_position: None,
        provider_count: None,
        total_market_revenue: None,
    };

    let scorer = RiskScorer::new(
        Some(model),
        dataset.lookup(),
        dataset.config.fallback.clone(),
        dataset.config.risk.clone(),
    ).unwrap();
    let restored_scorer = RiskScorer::new(
        Some(restored),
        dataset.lookup(),
        dataset.config.fallback.clone(),
        dataset.config.risk.clone(),
    ).unwrap();

    let first = scorer.score_request(&request);
    let second = restored_scorer.score_request(&request);
    assert_eq!(first.risk_probability, second.risk_probability);
    assert_eq!(first.risk_score, second.risk_score);
}

#[test]
fn batch_scoring_isolates_malformed_items() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = build_dataset(dir.path());

    let scorer = RiskScorer::new(
        None,
        dataset.lookup(),
        dataset.config.fallback.clone(),
        dataset.config.risk.clone(),
    ).unwrap();

    let good = ScoringRequest {
        provider_npi: "1000000002".to_string(),
        provider_name: None,
        zip_code: None,
        specialty: None,
        revenue: None,
        market_share: None,
        market_position: None,
        provider_count: None,
        total_market_revenue: None,
    };
    let malformed = ScoringRequest {
        provider_npi: "1000000001".to_string(),
        provider_name: None,
        zip_code: None,
        specialty: None,
        revenue: Some(-500.0),
        market_share: None,
        market_position: None,
        provider_count: None,
        total_market_revenue: None,
    };

    let response = scorer.score_batch(&[good.clone(), malformed, good]);
    assert_eq!(response.results.len(), 3);
    assert!(response.results[0].error.is_none());
    assert!(response.results[1].error.is_some());
    assert!(response.results[2].error.is_none());
    assert_eq!(response.summary.total_scored, 3);
    assert_eq!(
        response.summary.high_risk_count,
        response.results.iter().filter(|r| r.risk_score > 70.0).count()
    );
}

#[test]
fn scoring_never_fails_without_a_model_or_snapshot() {
    let config = PipelineConfig::default();
    let scorer = RiskScorer::new(
        None,
        MarketLookup::empty(),
        config.fallback.clone(),
        config.risk.clone(),
    ).unwrap();

    let request = ScoringRequest {
        provider_npi: "9999999999".to_string(),
        provider_name: None,
        zip_code: Some("00501".to_string()),
        specialty: Some("Nephrology".to_string()),
        revenue: None,
        market_share: None,
        market_position: None,
        provider_count: None,
        total_market_revenue: None,
    };

    let first = scorer.score_request(&request);
    let second = scorer.score_request(&request);
    assert!(first.error.is_none());
    assert_eq!(first, second);
    assert!(first.risk_score >= 0.0 && first.risk_score <= 100.0);
}
