//! End-to-end scans against an in-memory DuckDB seeded with minute bars.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};

use quantscan_core::{CacheConfig, EngineConfig, PipelineConfig};
use quantscan_rules::engine::ExecutionOverrides;
use quantscan_rules::schema::{
    BreakoutConditions, ConsolidationConditions, MarketFilters, RuleConditions,
    TechnicalConditions, TimeWindow, TrendDirection, VolumeConditions,
};
use quantscan_rules::{ExecutionPipeline, Rule, RuleEngine, RuleType, ScanRequest};
use quantscan_storage::{DuckDbConnector, MarketBar, SchemaConfig, StorageEngine};

const SCAN_DATE: &str = "2025-09-08";

fn at(date: (i32, u32, u32), hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(date.0, date.1, date.2)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

/// One bar per minute from `start`, flat candles at each close.
fn series(symbol: &str, start: NaiveDateTime, closes: &[f64], volumes: &[i64]) -> Vec<MarketBar> {
    closes
        .iter()
        .zip(volumes)
        .enumerate()
        .map(|(i, (&close, &volume))| MarketBar {
            symbol: symbol.to_string(),
            timestamp: start + Duration::minutes(i as i64),
            open: close,
            high: close,
            low: close,
            close,
            volume,
        })
        .collect()
}

fn seed() -> Vec<MarketBar> {
    let open = at((2025, 9, 8), 9, 15);
    let mut bars = Vec::new();

    // BRK: flat at 100 then a 1% jump on triple volume at 09:40.
    let mut closes = vec![100.0; 25];
    closes.extend(vec![101.0; 11]);
    let mut volumes = vec![1_000; 36];
    volumes[25] = 3_000;
    bars.extend(series("BRK", open, &closes, &volumes));
    bars.extend(series("BRK", at((2025, 9, 8), 15, 30), &[103.0], &[1_000]));

    // FLAT: never moves.
    bars.extend(series("FLAT", open, &[50.0; 36], &[1_000; 36]));

    // DROP: falls one point per minute.
    let falling: Vec<f64> = (0..36).map(|i| 100.0 - i as f64).collect();
    bars.extend(series("DROP", open, &falling, &[1_000; 36]));

    // SURGE: volume quintuples for the last five bars.
    let mut surge = vec![1_000; 36];
    for v in surge.iter_mut().skip(31) {
        *v = 5_000;
    }
    bars.extend(series("SURGE", open, &[20.0; 36], &surge));

    // History for the consolidation template.
    for day in [3, 4, 5] {
        let start = at((2025, 9, day), 9, 15);
        for symbol in ["BRK", "FLAT"] {
            let base = if symbol == "BRK" { 100.0 } else { 50.0 };
            bars.extend(series(
                symbol,
                start,
                &[base, base * 1.01, base * 0.99],
                &[2_000, 2_000, 2_000],
            ));
        }
    }
    bars
}

/// Three quiet sessions, then a scan day. TIGHT holds its 99-101 range
/// and closes at the top on heavy volume; WIDE has a 40 point range and
/// fades on light volume.
fn consolidation_seed() -> Vec<MarketBar> {
    let mut bars = Vec::new();
    for day in [3, 4, 5] {
        let start = at((2025, 9, day), 9, 15);
        bars.extend(series("TIGHT", start, &[100.0, 101.0, 99.0], &[1_000; 3]));
        bars.extend(series("WIDE", start, &[80.0, 120.0, 100.0], &[1_000; 3]));
    }
    let open = at((2025, 9, 8), 9, 15);
    bars.extend(series("TIGHT", open, &[99.5, 100.0, 100.5, 101.0], &[2_000; 4]));
    bars.extend(series("WIDE", open, &[100.0, 99.0, 98.0, 97.0], &[500; 4]));
    bars
}

fn storage_with(bars: &[MarketBar]) -> StorageEngine {
    let connector = DuckDbConnector::in_memory().unwrap();
    let storage = StorageEngine::with_factory(Arc::new(connector), 4, SchemaConfig::default());
    storage.schema.ensure_initialized().unwrap();
    storage.schema.insert_bars(bars).unwrap();
    storage
}

fn storage() -> StorageEngine {
    storage_with(&seed())
}

fn engine(storage: &StorageEngine) -> RuleEngine {
    RuleEngine::new(
        storage.executor.clone(),
        storage.schema.source_relation(),
        &EngineConfig {
            max_workers: 4,
            query_cache_capacity: 64,
        },
    )
    .unwrap()
}

fn breakout_rule() -> Rule {
    let mut rule = Rule::new("opening-breakout", RuleType::Breakout);
    rule.conditions = RuleConditions {
        time_window: Some(TimeWindow {
            start: "09:15".into(),
            end: "09:50".into(),
        }),
        breakout: Some(BreakoutConditions {
            lookback_bars: 10,
            min_price_move_pct: 0.5,
            min_volume_multiplier: 1.5,
            ..BreakoutConditions::default()
        }),
        ..RuleConditions::default()
    };
    rule.actions.stop_loss_pct = Some(2.0);
    rule
}

fn oversold_rule() -> Rule {
    let mut rule = Rule::new("rsi-oversold", RuleType::Technical);
    rule.conditions.technical = Some(TechnicalConditions {
        rsi_max: Some(30.0),
        trend_direction: Some(TrendDirection::Down),
        ..TechnicalConditions::default()
    });
    rule
}

fn volume_rule() -> Rule {
    let mut rule = Rule::new("volume-surge", RuleType::Volume);
    rule.conditions.volume = Some(VolumeConditions::default());
    rule
}

fn consolidation_rule() -> Rule {
    let mut rule = Rule::new("tight-range", RuleType::ConsolidationPattern);
    rule.conditions.consolidation = Some(ConsolidationConditions {
        lookback_days: 5,
        ..ConsolidationConditions::default()
    });
    rule
}

fn metric(signal: &quantscan_rules::Signal, key: &str) -> f64 {
    signal.metadata[key]
        .as_f64()
        .unwrap_or_else(|| panic!("{key} is not numeric: {:?}", signal.metadata.get(key)))
}

fn symbols(signals: &[quantscan_rules::Signal]) -> Vec<&str> {
    let mut out: Vec<&str> = signals.iter().map(|s| s.symbol.as_str()).collect();
    out.sort();
    out
}

#[test]
fn breakout_finds_the_jump() {
    let storage = storage();
    let engine = engine(&storage);
    engine.load_rules(vec![breakout_rule()]);

    let out = engine
        .execute_rule("opening-breakout", SCAN_DATE, None, &ExecutionOverrides::default())
        .unwrap();

    assert_eq!(symbols(&out.signals), ["BRK"]);
    let signal = &out.signals[0];
    assert_eq!(signal.price, 101.0);
    assert_eq!(signal.volume, 3_000);
    assert_eq!(signal.confidence, 1.0);
    assert_eq!(signal.metadata["timestamp"], "2025-09-08 09:40:00");
    assert_eq!(signal.metadata["eod_price"], 103.0);
    let stop = signal.risk.as_ref().unwrap().stop_loss.unwrap();
    assert!((stop - 98.98).abs() < 1e-9);
}

#[test]
fn cutoff_before_the_jump_finds_nothing() {
    let storage = storage();
    let engine = engine(&storage);
    engine.load_rules(vec![breakout_rule()]);

    let overrides = ExecutionOverrides {
        end_time: Some("09:35".into()),
        ..ExecutionOverrides::default()
    };
    let out = engine
        .execute_rule("opening-breakout", SCAN_DATE, None, &overrides)
        .unwrap();
    assert!(out.signals.is_empty());
    assert_eq!(out.result.rows_returned, 0);
}

#[test]
fn consolidation_scores_the_tight_range() {
    let storage = storage_with(&consolidation_seed());
    let engine = engine(&storage);
    engine.load_rules(vec![consolidation_rule()]);

    let out = engine
        .execute_rule("tight-range", SCAN_DATE, None, &ExecutionOverrides::default())
        .unwrap();
    assert_eq!(symbols(&out.signals), ["TIGHT"]);

    let signal = &out.signals[0];
    assert_eq!(signal.price, 101.0);
    assert_eq!(signal.volume, 8_000);
    assert_eq!(signal.metadata["timestamp"], "2025-09-08 09:18:00");
    assert_eq!(metric(signal, "range_high"), 101.0);
    assert_eq!(metric(signal, "range_low"), 99.0);
    assert_eq!(metric(signal, "closeness_score"), 1.0);
    assert_eq!(metric(signal, "volume_score"), 1.0);
    assert!((metric(signal, "relative_volume") - 8.0 / 3.0).abs() < 1e-9);
    assert!((metric(signal, "range_pct") - 200.0 / 99.0).abs() < 1e-9);

    // 0.3 * 1 + 0.3 * (1 - 2.02 / 10) + 0.2 * 1 + 0.2 * (1.508 / 2)
    let total = metric(signal, "total_score");
    assert!((total - 0.890148).abs() < 1e-4, "total_score = {total}");
    let probability = 1.0 / (1.0 + (-10.0 * (total - 0.5)).exp());
    assert!((metric(signal, "probability_score") - probability).abs() < 1e-9);
    assert!((signal.confidence - probability).abs() < 1e-9);
    assert_eq!(signal.metadata["rule_type"], "consolidation-pattern");
}

#[test]
fn consolidation_probability_floor_filters_everything() {
    let storage = storage_with(&consolidation_seed());
    let engine = engine(&storage);
    let mut rule = consolidation_rule();
    if let Some(c) = rule.conditions.consolidation.as_mut() {
        c.min_probability = 0.99;
    }
    engine.load_rules(vec![rule]);

    let out = engine
        .execute_rule("tight-range", SCAN_DATE, None, &ExecutionOverrides::default())
        .unwrap();
    assert!(out.result.success);
    assert!(out.signals.is_empty());
}

#[test]
fn single_bar_runs_every_filtered_template() {
    let bars = series("ONE", at((2025, 9, 8), 9, 15), &[10.0], &[100]);
    let storage = storage_with(&bars);
    let engine = engine(&storage);
    let mut consolidation = Rule::new("one-consolidation", RuleType::ConsolidationPattern);
    consolidation.conditions.consolidation = Some(ConsolidationConditions::default());
    engine.load_rules(vec![consolidation, breakout_rule()]);

    for id in ["one-consolidation", "opening-breakout"] {
        let out = engine
            .execute_rule(id, SCAN_DATE, None, &ExecutionOverrides::default())
            .unwrap_or_else(|e| panic!("{id}: {e}"));
        assert!(out.result.success, "{id}");
        assert!(out.signals.is_empty(), "{id}");
    }
}

#[test]
fn technical_and_volume_templates() {
    let storage = storage();
    let engine = engine(&storage);
    engine.load_rules(vec![oversold_rule(), volume_rule()]);

    let oversold = engine
        .execute_rule("rsi-oversold", SCAN_DATE, None, &ExecutionOverrides::default())
        .unwrap();
    assert_eq!(symbols(&oversold.signals), ["DROP"]);
    assert_eq!(oversold.signals[0].metadata["trend"], "down");
    assert_eq!(oversold.signals[0].confidence, 1.0);

    let surge = engine
        .execute_rule("volume-surge", SCAN_DATE, None, &ExecutionOverrides::default())
        .unwrap();
    assert_eq!(symbols(&surge.signals), ["SURGE"]);
    let confidence = surge.signals[0].confidence;
    assert!(confidence > 0.0 && confidence < 1.0);
}

#[test]
fn custom_rule_honours_market_filters_and_symbols() {
    let storage = storage();
    let engine = engine(&storage);
    let mut rule = Rule::new("liquid-names", RuleType::Custom);
    rule.conditions.market_filters = Some(MarketFilters {
        min_price: Some(30.0),
        exclude_symbols: vec!["BRK".into()],
        ..MarketFilters::default()
    });
    engine.load_rules(vec![rule]);

    let all = engine
        .execute_rule("liquid-names", SCAN_DATE, None, &ExecutionOverrides::default())
        .unwrap();
    // DROP ends at 65, SURGE trades at 20.
    assert_eq!(symbols(&all.signals), ["DROP", "FLAT"]);

    let only_flat = ExecutionOverrides {
        symbols: Some(vec!["FLAT".into(), "SURGE".into()]),
        ..ExecutionOverrides::default()
    };
    let out = engine
        .execute_rule("liquid-names", SCAN_DATE, None, &only_flat)
        .unwrap();
    assert_eq!(symbols(&out.signals), ["FLAT"]);
}

#[test]
fn every_rule_type_runs_in_one_parallel_batch() {
    let storage = storage();
    let engine = engine(&storage);
    let rules: Vec<Rule> = RuleType::ALL
        .iter()
        .map(|t| Rule::new(format!("all-{}", t.as_str()), *t))
        .collect();
    let ids: Vec<String> = rules.iter().map(|r| r.rule_id.clone()).collect();
    let report = engine.load_rules(rules);
    assert_eq!(report.loaded, RuleType::ALL.len());

    let batch = engine
        .execute_rules_batch(&ids, SCAN_DATE, true, None, &ExecutionOverrides::default())
        .unwrap();
    assert_eq!(batch.failed_executions, 0, "{:?}", batch.errors);
    assert_eq!(batch.total_rules, ids.len());
    assert!(batch.rule_results.values().all(|r| r.query_executed));
    assert!(storage.pool.stats().active <= 4);
}

#[test]
fn pipeline_scan_is_cached_until_rules_change() {
    let storage = storage();
    let engine = Arc::new(engine(&storage));
    engine.load_rules(vec![breakout_rule(), volume_rule()]);
    let pipeline = ExecutionPipeline::new(
        engine.clone(),
        &CacheConfig::default(),
        PipelineConfig::default(),
    )
    .with_schema(storage.schema.clone());
    pipeline.initialize_schema().unwrap();

    let request = ScanRequest::new(SCAN_DATE);
    let first = pipeline.scan(&request).unwrap();
    assert!(!first.cached);
    assert_eq!(first.result.batch.total_signals, 2);
    assert_eq!(first.result.attempts, 1);

    let second = pipeline.scan(&request).unwrap();
    assert!(second.cached);
    assert_eq!(second.result, first.result);

    engine.load_rules(vec![oversold_rule()]);
    let third = pipeline.scan(&request).unwrap();
    assert!(!third.cached);
    assert_eq!(third.result.batch.total_signals, 3);

    pipeline.close();
    assert!(storage.pool.is_closed());
}
