//! Tests for the rule compiler.

use super::*;
use crate::schema::*;

fn breakout_conditions() -> RuleConditions {
    RuleConditions {
        breakout: Some(BreakoutConditions {
            min_price_move_pct: 0.5,
            min_volume_multiplier: 1.5,
            ..BreakoutConditions::default()
        }),
        ..RuleConditions::default()
    }
}

fn placeholder_count(sql: &str) -> usize {
    sql.matches('?').count()
}

#[test]
fn breakout_scenario_binds_thresholds_and_date() {
    let builder = QueryBuilder::new("market_data", 16);
    let conditions = breakout_conditions();
    let request = QueryRequest::new(RuleType::Breakout, &conditions, "2025-09-08")
        .window(Some("09:15"), Some("09:50"));

    let query = builder.compile(&request).unwrap();

    assert!(query.params.contains(&SqlParam::Float(1.5)));
    assert!(query.params.contains(&SqlParam::Float(0.5)));
    assert!(query.params.contains(&SqlParam::Text("2025-09-08".to_string())));
    assert!(query.params.contains(&SqlParam::Int(9 * 3600 + 15 * 60)));
    assert!(query.params.contains(&SqlParam::Int(9 * 3600 + 50 * 60)));
    assert_eq!(placeholder_count(&query.sql), query.params.len());
    assert_eq!(query.shape, RowShape::Breakout);
    assert!(query.sql.contains("FROM market_data"));
    assert!(query.sql.contains("ROWS BETWEEN 10 PRECEDING AND 1 PRECEDING"));
}

#[test]
fn warm_and_cold_compiles_are_identical() {
    let conditions = breakout_conditions();
    let symbols = vec!["BBB".to_string(), "AAA".to_string()];
    let request = QueryRequest::new(RuleType::Breakout, &conditions, "2025-09-08")
        .window(Some("09:15"), Some("09:50"))
        .symbols(Some(&symbols));

    let cached = QueryBuilder::new("market_data", 16);
    let cold = cached.compile(&request).unwrap();
    let (warm, hit) = cached.compile_tracked(&request).unwrap();
    assert!(hit);
    assert_eq!(cold, warm);

    let uncached = QueryBuilder::new("market_data", 0);
    assert_eq!(uncached.compile(&request).unwrap(), cold);
    assert_eq!(uncached.cache_stats().entries, 0);
}

#[test]
fn symbol_order_does_not_change_output() {
    let builder = QueryBuilder::new("market_data", 16);
    let conditions = RuleConditions::default();
    let a = vec!["MSFT".to_string(), "AAPL".to_string(), "AAPL".to_string()];
    let b = vec!["AAPL".to_string(), "MSFT".to_string()];

    let qa = builder
        .compile(&QueryRequest::new(RuleType::Custom, &conditions, "2025-09-08").symbols(Some(&a)))
        .unwrap();
    let qb = builder
        .compile(&QueryRequest::new(RuleType::Custom, &conditions, "2025-09-08").symbols(Some(&b)))
        .unwrap();

    assert_eq!(qa, qb);
    assert!(qa.fingerprint.ends_with("|AAPL,MSFT"));
    assert!(qa.sql.contains("symbol IN (?, ?)"));
    assert_eq!(builder.cache_stats().hits, 1);
}

#[test]
fn fingerprint_uses_all_when_no_symbols() {
    let conditions = RuleConditions::default();
    let fp = QueryBuilder::fingerprint(&QueryRequest::new(
        RuleType::Volume,
        &conditions,
        "2025-09-08",
    ))
    .unwrap();
    assert!(fp.starts_with("volume|"));
    assert!(fp.ends_with("|2025-09-08|00:00:00|23:59:59|all"));
}

#[test]
fn fifo_eviction_drops_oldest_entry() {
    let builder = QueryBuilder::new("market_data", 2);
    let conditions = RuleConditions::default();
    for date in ["2025-09-01", "2025-09-02", "2025-09-03"] {
        builder
            .compile(&QueryRequest::new(RuleType::Custom, &conditions, date))
            .unwrap();
    }
    assert_eq!(builder.cache_stats().entries, 2);

    // Oldest date was evicted: compiling it again is a miss.
    let (_, hit) = builder
        .compile_tracked(&QueryRequest::new(RuleType::Custom, &conditions, "2025-09-01"))
        .unwrap();
    assert!(!hit);
    let (_, hit) = builder
        .compile_tracked(&QueryRequest::new(RuleType::Custom, &conditions, "2025-09-03"))
        .unwrap();
    assert!(hit);
}

#[test]
fn rule_window_used_when_no_explicit_bounds() {
    let builder = QueryBuilder::new("market_data", 0);
    let conditions = RuleConditions {
        time_window: Some(TimeWindow {
            start: "10:00".to_string(),
            end: "11:00".to_string(),
        }),
        ..RuleConditions::default()
    };
    let query = builder
        .compile(&QueryRequest::new(RuleType::Custom, &conditions, "2025-09-08"))
        .unwrap();
    assert!(query.params.contains(&SqlParam::Int(36_000)));
    assert!(query.params.contains(&SqlParam::Int(39_600)));
    assert!(query.fingerprint.contains("|10:00|11:00|"));
}

#[test]
fn market_filters_are_bound_not_inlined() {
    let builder = QueryBuilder::new("market_data", 0);
    let conditions = RuleConditions {
        market_filters: Some(MarketFilters {
            min_price: Some(12.5),
            max_price: Some(900.0),
            min_volume: Some(50_000),
            exclude_symbols: vec!["ZZZ".to_string(), " ".to_string()],
        }),
        ..RuleConditions::default()
    };
    let query = builder
        .compile(&QueryRequest::new(RuleType::Custom, &conditions, "2025-09-08"))
        .unwrap();

    assert!(!query.sql.contains("12.5"));
    assert!(!query.sql.contains("ZZZ"));
    assert!(query.sql.contains("symbol NOT IN (?)"));
    assert!(query.params.contains(&SqlParam::Float(12.5)));
    assert!(query.params.contains(&SqlParam::Float(900.0)));
    assert!(query.params.contains(&SqlParam::Int(50_000)));
    assert!(query.params.contains(&SqlParam::Text("ZZZ".to_string())));
    assert_eq!(placeholder_count(&query.sql), query.params.len());
}

#[test]
fn every_rule_type_compiles_with_defaults() {
    let builder = QueryBuilder::new("market_data", 0);
    let conditions = RuleConditions::default();
    for rule_type in RuleType::ALL {
        let query = builder
            .compile(&QueryRequest::new(rule_type, &conditions, "2025-09-08"))
            .unwrap();
        assert_eq!(placeholder_count(&query.sql), query.params.len(), "{rule_type}");
        assert_eq!(query.shape, RowShape::for_rule_type(rule_type));
        for column in query.shape.columns() {
            assert!(query.sql.contains(column), "{rule_type} missing {column}");
        }
    }
}

#[test]
fn every_template_reads_bars_once() {
    let builder = QueryBuilder::new("market_data", 0);
    let conditions = RuleConditions::default();
    for rule_type in RuleType::ALL {
        let sql = builder
            .compile(&QueryRequest::new(rule_type, &conditions, "2025-09-08"))
            .unwrap()
            .sql;
        assert_eq!(sql.matches("FROM market_data").count(), 1, "{rule_type}");
        assert_eq!(sql.matches("FROM bars").count(), 1, "{rule_type}\n{sql}");
        // DuckDB reserves TRAILING.
        assert!(!sql.contains("trailing"), "{rule_type}");
    }
}

#[test]
fn every_template_ranks_outside_the_filtered_select() {
    let builder = QueryBuilder::new("market_data", 0);
    let conditions = breakout_conditions();
    for rule_type in RuleType::ALL {
        let sql = builder
            .compile(&QueryRequest::new(rule_type, &conditions, "2025-09-08"))
            .unwrap()
            .sql;
        assert!(!sql.contains("QUALIFY"), "{rule_type}\n{sql}");
        assert!(sql.contains("SELECT * EXCLUDE (pick_rank)"), "{rule_type}");
        assert!(sql.contains(") matched\n) picked\nWHERE pick_rank = 1\nORDER BY "));

        // Threshold filters sit inside `matched`, before the rank is taken.
        let filtered = sql.find("FROM candidates").unwrap();
        let closed = sql.find(") matched").unwrap();
        assert!(sql.find("pick_rank").unwrap() < filtered, "{rule_type}");
        assert!(sql[filtered..closed].contains("WHERE tod BETWEEN ?"), "{rule_type}");
        assert_eq!(sql.matches("pick_rank").count(), 3, "{rule_type}");
    }
}

#[test]
fn consolidation_flags_scan_day_and_cutoff() {
    let builder = QueryBuilder::new("market_data", 0);
    let conditions = RuleConditions::default();
    let request = QueryRequest::new(RuleType::ConsolidationPattern, &conditions, "2025-09-08")
        .window(Some("10:00"), Some("11:00"));
    let query = builder.compile(&request).unwrap();

    assert!(query.sql.contains("AS is_scan_day"));
    assert!(query.sql.contains("AS in_window"));
    assert!(query.sql.contains("AS in_range"));
    // Scan date: twice for the history range, once for the day flag.
    let dates = query
        .params
        .iter()
        .filter(|p| **p == SqlParam::Text("2025-09-08".to_string()))
        .count();
    assert_eq!(dates, 3);
    // Window end: window flag, range cutoff and the final tod filter.
    let ends = query
        .params
        .iter()
        .filter(|p| **p == SqlParam::Int(39_600))
        .count();
    assert_eq!(ends, 3);
}

#[test]
fn caller_input_errors() {
    let builder = QueryBuilder::new("market_data", 4);
    let conditions = RuleConditions::default();

    let err = builder
        .compile(&QueryRequest::new(RuleType::Custom, &conditions, "09/08/2025"))
        .unwrap_err();
    assert_eq!(err, CompileError::InvalidDate("09/08/2025".to_string()));

    let err = builder
        .compile(
            &QueryRequest::new(RuleType::Custom, &conditions, "2025-09-08")
                .window(Some("9.15"), None),
        )
        .unwrap_err();
    assert_eq!(err, CompileError::InvalidTime("9.15".to_string()));

    // Failures are never cached.
    assert_eq!(builder.cache_stats().entries, 0);
}

#[test]
fn invalid_window_sizes_fail_compilation() {
    let builder = QueryBuilder::new("market_data", 4);
    let conditions = RuleConditions {
        volume: Some(VolumeConditions {
            short_window: 20,
            long_window: 5,
            ..VolumeConditions::default()
        }),
        ..RuleConditions::default()
    };
    let err = builder
        .compile(&QueryRequest::new(RuleType::Volume, &conditions, "2025-09-08"))
        .unwrap_err();
    assert!(matches!(err, CompileError::InvalidCondition { .. }));
}

#[test]
fn clear_cache_resets_entries() {
    let builder = QueryBuilder::new("market_data", 4);
    let conditions = RuleConditions::default();
    builder
        .compile(&QueryRequest::new(RuleType::Custom, &conditions, "2025-09-08"))
        .unwrap();
    builder.clear_cache();
    assert_eq!(builder.cache_stats().entries, 0);
}
