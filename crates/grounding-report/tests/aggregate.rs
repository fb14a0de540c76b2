use grounding_dataset::{Case, Correctness, ResultRecord};
use grounding_report::{aggregate, ResultSink};

use std::fs;
use std::thread;

fn record(source: &str, idx: usize, correctness: Correctness) -> ResultRecord {
    ResultRecord {
        case: Case {
            img_filename: format!("img_{idx}.png"),
            instruction: "tap the thing".into(),
            bbox: [1.0, 1.0, 2.0, 2.0],
            img_size: None,
            dataset_source: Some(source.into()),
            extra: serde_json::Map::new(),
        },
        raw_response: "<answer>{\"coordinate\":[1,1]}</answer>".into(),
        pred: Some([1.0, 1.0]),
        pred_norm: Some([0.001, 0.001]),
        correctness,
    }
}

#[test]
fn concurrent_appends_never_interleave() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.jsonl");
    let sink = ResultSink::create(&path).unwrap();

    let mut handles = Vec::new();
    for worker in 0..16 {
        let sink = sink.clone();
        handles.push(thread::spawn(move || {
            for i in 0..8 {
                let correctness = if i % 2 == 0 {
                    Correctness::Correct
                } else {
                    Correctness::Incorrect
                };
                sink.append(&record("stress.json", worker * 8 + i, correctness))
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // every line must be intact JSON regardless of write order
    let text = fs::read_to_string(&path).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 128);
    for line in &lines {
        serde_json::from_str::<serde_json::Value>(line).unwrap();
    }

    let summary = aggregate(&path).unwrap();
    assert_eq!(summary.overall.total, 128);
    assert_eq!(summary.overall.correct, 64);
}

#[test]
fn sink_creation_truncates_previous_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.jsonl");
    fs::write(&path, "stale line\n").unwrap();

    let sink = ResultSink::create(&path).unwrap();
    sink.append(&record("a.json", 0, Correctness::Correct)).unwrap();

    let summary = aggregate(&path).unwrap();
    assert_eq!(summary.overall.total, 1);
    assert_eq!(summary.overall.correct, 1);
}

#[test]
fn malformed_lines_are_skipped_silently() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.jsonl");
    let sink = ResultSink::create(&path).unwrap();
    sink.append(&record("a.json", 0, Correctness::Correct)).unwrap();

    let mut text = fs::read_to_string(&path).unwrap();
    text.push_str("this is not json\n");
    text.push_str("{\"dataset_source\": \"a.json\", \"correctness\": \"incorrect\"}\n");
    fs::write(&path, text).unwrap();

    let summary = aggregate(&path).unwrap();
    assert_eq!(summary.overall.total, 2);
    assert_eq!(summary.overall.correct, 1);
}

#[test]
fn rows_without_a_source_bucket_under_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.jsonl");
    fs::write(&path, "{\"correctness\": \"correct\"}\n").unwrap();

    let summary = aggregate(&path).unwrap();
    assert_eq!(summary.per_source["unknown"].correct, 1);
}

#[test]
fn aggregation_is_idempotent_and_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.jsonl");
    let sink = ResultSink::create(&path).unwrap();
    sink.append(&record("zebra.json", 0, Correctness::Correct)).unwrap();
    sink.append(&record("alpha.json", 1, Correctness::Incorrect)).unwrap();
    sink.append(&record("alpha.json", 2, Correctness::WrongFormat)).unwrap();

    let first = aggregate(&path).unwrap();
    let second = aggregate(&path).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.render(), second.render());

    let sources: Vec<_> = first.per_source.keys().cloned().collect();
    assert_eq!(sources, vec!["alpha.json", "zebra.json"]);
    // wrong_format counts toward the denominator, not the numerator
    assert_eq!(first.per_source["alpha.json"].total, 2);
    assert_eq!(first.per_source["alpha.json"].correct, 0);
}

#[test]
fn report_formats_accuracy_to_four_places() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.jsonl");
    let sink = ResultSink::create(&path).unwrap();
    sink.append(&record("web.json", 0, Correctness::Correct)).unwrap();
    sink.append(&record("web.json", 1, Correctness::Incorrect)).unwrap();
    sink.append(&record("web.json", 2, Correctness::Incorrect)).unwrap();

    let rendered = aggregate(&path).unwrap().render();
    assert!(rendered.contains("Accuracy: 0.3333 (1/3)"));
    assert!(rendered.contains("Total Samples: 3"));
    assert!(rendered.contains("Total Correct: 1"));
    assert!(rendered.contains("Overall Accuracy: 0.3333"));
}

#[test]
fn empty_sink_reports_no_valid_results() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.jsonl");
    ResultSink::create(&path).unwrap();

    let rendered = aggregate(&path).unwrap().render();
    assert!(rendered.contains("No valid results found in output file."));
}
