use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log_compactor::CompactError;
use log_compactor::execution::{CompactionEngine, ExecutionOptions};
use log_compactor::ingestion::{LineParser, MatchSets, ParseOptions};
use log_compactor::job::{Job, JobOptions, JobReport, load_schema};
use log_compactor::output::{OutputFormat, render_to_string};
use log_compactor::processing::{ContentRetention, FieldValue};
use log_compactor::types::Schema;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn temp_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("log_compactor_it_{tag}_{nanos}"));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn execution(threads: usize, chunks: usize) -> ExecutionOptions {
    ExecutionOptions {
        num_threads: Some(threads),
        chunks: Some(chunks),
        max_in_flight_chunks: threads,
        skip_header: false,
    }
}

fn run_job(schema: &str, options: JobOptions) -> Result<JobReport, CompactError> {
    let schema = load_schema(fixture(schema))?;
    Job::new(schema, ParseOptions::default(), execution(2, 3), options)?.run()
}

/// Run `schema` over `log` and return the NDJSON output.
fn compact_to_json(schema: &str, log: &str) -> String {
    let dir = temp_dir("json");
    let out = dir.join("out.json");
    run_job(
        schema,
        JobOptions {
            inputs: vec![fixture(log)],
            output: Some(out.clone()),
            ..JobOptions::default()
        },
    )
    .unwrap();
    let text = fs::read_to_string(&out).unwrap();
    fs::remove_dir_all(&dir).ok();
    text
}

fn line_for<'a>(ndjson: &'a str, id: &str) -> &'a str {
    let needle = format!("{{\"id\":\"{id}\",");
    ndjson
        .lines()
        .find(|l| l.starts_with(&needle))
        .unwrap_or_else(|| panic!("no record '{id}' in:\n{ndjson}"))
}

#[test]
fn variance_mean_and_sum_over_six_values() {
    let out = compact_to_json("variance.json", "variance.log");
    let web = line_for(&out, "web");
    assert!(web.contains("\"v\":1.8666666666666671"), "{web}");
    assert!(web.contains("\"v_hold\":6"), "{web}");
    assert!(web.contains("\"m\":2.6666666666666665"), "{web}");
    assert!(web.contains("\"s\":16"), "{web}");
    assert!(web.ends_with("\"logs\":6}"), "{web}");
}

#[test]
fn contain_filters_partition_lines() {
    let out = compact_to_json("proxy.json", "proxy.log");
    assert_eq!(out.lines().count(), 1);
    let bob = line_for(&out, "bob");
    assert!(bob.contains("\"denied_count\":2"), "{bob}");
    assert!(bob.contains("\"ok_count\":3"), "{bob}");
    assert!(
        bob.contains("\"action\":[\"allowed_ok\",\"blocked_denied\"]"),
        "{bob}"
    );
    assert!(bob.contains("\"logs\":5"), "{bob}");
}

#[test]
fn or_substring_match_keeps_marked_lines() {
    let out = compact_to_json("match_or.json", "match.log");
    for id in ["1", "2"] {
        assert!(line_for(&out, id).contains("\"val\":\"OOKK\""));
    }
    assert!(line_for(&out, "5").contains("\"val\":\"OK\""));
    assert_eq!(out.lines().count(), 3);
}

#[test]
fn exact_match_keeps_only_whole_tokens() {
    let out = compact_to_json("match_exact.json", "match.log");
    assert_eq!(out.lines().count(), 1);
    assert!(line_for(&out, "5").contains("\"val\":\"OK\""));
}

#[test]
fn negative_exact_match_drops_whole_tokens() {
    let out = compact_to_json("match_exact_negative.json", "match.log");
    assert_eq!(out.lines().count(), 4);
    assert!(!out.contains("\"val\":\"OK\""));
    assert!(line_for(&out, "1").contains("\"val\":\"OOKK\""));
}

#[test]
fn negative_substring_match_drops_marked_lines() {
    let out = compact_to_json("match_negative.json", "blacklist.log");
    assert_eq!(out.lines().count(), 2);
    assert!(line_for(&out, "2").contains("\"val\":\"fine\""));
    assert!(line_for(&out, "4").contains("\"val\":\"KO\""));
    // Tokens holding a listed literal are dropped, and so are tokens a literal holds.
    assert!(!out.contains("OK"));
    assert!(!out.contains("DENIED"));
}

#[test]
fn composite_keys_render_as_id() {
    let schema = Schema::from_json_str(
        r#"{"fields": [
            {"name": "seq", "type": "string", "position": 0, "key": true},
            {"name": "host", "type": "string", "position": 1, "key": true}
        ]}"#,
    )
    .unwrap();
    let parser = LineParser::new(
        Arc::new(schema),
        Arc::new(MatchSets::default()),
        ParseOptions::default(),
    );
    let engine = CompactionEngine::new(execution(2, 2)).unwrap();
    let table = engine.compact_bytes(&parser, b"7 a.com\n7 b.com\n").unwrap();
    assert_eq!(table.len(), 2);

    let out = render_to_string(&table, OutputFormat::Json, false).unwrap();
    assert!(line_for(&out, "7_a.com").contains("\"seq\":\"7\",\"host\":\"a.com\""));
    assert!(line_for(&out, "7_b.com").contains("\"host\":\"b.com\""));
}

#[test]
fn schema_field_named_id_is_rejected() {
    let err = Schema::from_json_str(
        r#"{"fields": [{"name": "id", "type": "string", "position": 0, "key": true}]}"#,
    )
    .unwrap_err();
    assert!(matches!(err, CompactError::Schema { .. }));
}

#[test]
fn ratio_renders_single_precision_quotient() {
    let out = compact_to_json("ratio.json", "ratio.log");
    let alice = line_for(&out, "alice");
    assert!(alice.contains("\"hit_rate\":0.5714285969734192"), "{alice}");
    assert!(alice.contains("\"per_log\":3.5"), "{alice}");
    let bob = line_for(&out, "bob");
    assert!(bob.contains("\"hit_rate\":0.0"), "{bob}");
}

#[test]
fn match_file_restricts_keys() {
    let report = run_job(
        "allow_list.json",
        JobOptions {
            inputs: vec![fixture("users.log")],
            format: OutputFormat::Mem,
            ..JobOptions::default()
        },
    )
    .unwrap();

    let table = &report.tables[0];
    assert_eq!(table.len(), 2);
    assert_eq!(
        table.get("alice").unwrap().value("bytes"),
        Some(&FieldValue::Ints(vec![16]))
    );
    assert!(table.get("bob").is_none());
    assert!(table.get("mallory").is_none());
    assert_eq!(table.stats().lines_rejected, 2);
}

#[test]
fn missing_match_file_stops_the_job() {
    let err = run_job(
        "missing_list.json",
        JobOptions {
            inputs: vec![fixture("users.log")],
            format: OutputFormat::Mem,
            ..JobOptions::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, CompactError::MatchFile { ref field, .. } if field == "user"));
}

#[test]
fn merged_results_fold_all_inputs_and_save_snapshots() {
    let dir = temp_dir("merge");
    fs::write(dir.join("a.log"), "alice 10\nbob 1\n").unwrap();
    fs::write(dir.join("b.log"), "alice 6\ncarol 2\n").unwrap();
    let out = dir.join("merged.json");

    let schema = Schema::from_json_str(
        r#"{"fields": [
            {"name": "user", "type": "string", "position": 0, "key": true},
            {"name": "bytes", "type": "int", "aggregation": "sum"}
        ]}"#,
    )
    .unwrap();
    let report = Job::new(
        schema,
        ParseOptions::default(),
        execution(2, 2),
        JobOptions {
            inputs: vec![dir.join("*.log")],
            output: Some(out.clone()),
            merge_results: true,
            snapshot: true,
            ..JobOptions::default()
        },
    )
    .unwrap()
    .run()
    .unwrap();

    assert_eq!(report.inputs.len(), 2);
    assert_eq!(report.stats.lines_parsed, 4);
    let top = report.merged_top.unwrap();
    assert_eq!(top.total_keys, 3);
    assert_eq!(top.total_logs, 4);
    assert_eq!(top.entries[0].key, "alice");

    let text = fs::read_to_string(&out).unwrap();
    assert_eq!(text.lines().count(), 3);
    assert!(line_for(&text, "alice").contains("\"bytes\":16"));

    let snapshots: Vec<_> = fs::read_dir(&dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("merged_") && n.ends_with(".csv"))
        .collect();
    assert!(!snapshots.is_empty());

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn csv_output_writes_one_header_across_inputs() {
    let dir = temp_dir("csv");
    let out = dir.join("out.csv");
    run_job(
        "proxy.json",
        JobOptions {
            inputs: vec![fixture("proxy.log"), fixture("proxy.log")],
            format: OutputFormat::Csv,
            output: Some(out.clone()),
            ..JobOptions::default()
        },
    )
    .unwrap();

    let text = fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "id,user,action,denied_count,ok_count,logs");
    assert_eq!(lines[1], "bob,bob,allowed_ok;blocked_denied,2,3,5");
    assert_eq!(lines[1], lines[2]);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn csv_rows_of_separate_inputs_align_with_one_header() {
    let dir = temp_dir("csv_kv");
    let out = dir.join("out.csv");
    run_job(
        "key_value.json",
        JobOptions {
            inputs: vec![fixture("kv_a.log"), fixture("kv_b.log")],
            format: OutputFormat::Csv,
            output: Some(out.clone()),
            ..JobOptions::default()
        },
    )
    .unwrap();

    let text = fs::read_to_string(&out).unwrap();
    assert_eq!(
        text,
        "id,user,ext,ext_k1,logs,ext_k2\n\
         alice,alice,k1=v1,v1,1,\n\
         bob,bob,k2=v2,,1,v2\n"
    );

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn missing_inputs_are_skipped() {
    let report = run_job(
        "proxy.json",
        JobOptions {
            inputs: vec![fixture("does_not_exist.log"), fixture("proxy.log")],
            format: OutputFormat::Mem,
            ..JobOptions::default()
        },
    )
    .unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.inputs.len(), 1);
    assert_eq!(report.tables.len(), 1);
}

#[test]
fn compressed_content_travels_with_the_record() {
    let dir = temp_dir("content");
    let out = dir.join("out.json");
    let schema = load_schema(fixture("proxy.json")).unwrap();
    Job::new(
        schema,
        ParseOptions {
            app_name: Some("squid".into()),
            content: ContentRetention::Compressed,
        },
        execution(2, 4),
        JobOptions {
            inputs: vec![fixture("proxy.log")],
            output: Some(out.clone()),
            ..JobOptions::default()
        },
    )
    .unwrap()
    .run()
    .unwrap();

    let text = fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("{\"id\":\"bob_squid\","));
    assert!(lines[1].starts_with("{\"id\":\"bob_squid_content\","));
    assert!(lines[1].contains("bob allowed_ok\\nbob blocked_denied"));

    fs::remove_dir_all(&dir).ok();
}
