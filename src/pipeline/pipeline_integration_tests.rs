//! End-to-end pipeline tests against shell stand-ins for the external tools.

#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::config::{CollectorCommands, CommandSpec, Config, RunMode};
use crate::error::{PipelineError, Stage};
use crate::{run_pipeline, RunRequest};

const COUNTER: &str = r#"#!/bin/sh
while read name; do
  test -f "../input_data/$name" || { echo "no input $name" >&2; exit 3; }
  for k in 2 3 4; do
    echo "counted $name" > "../output_data/${k}mer/${name%.fasta}.txt"
  done
done < list.txt
echo "counted $(wc -l < list.txt) files"
"#;

const COLLECTOR: &str = r#"set -e
echo "file,k2,k3,k4" > feature_file.csv
while read name; do
  base=${name%.fasta}
  for k in 2 3 4; do
    test -f "kanalyze-2.0.0/output_data/${k}mer/$base.txt" || { echo "missing $base ${k}mer" >&2; exit 1; }
  done
  echo "$base,1,1,1" >> feature_file.csv
done < list.txt
"#;

struct Fixture {
    _temp_dir: TempDir,
    root: PathBuf,
    config: Config,
}

impl Fixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();

        let code = root.join("features/kanalyze-2.0.0/code");
        fs::create_dir_all(&code).unwrap();
        fs::create_dir_all(root.join("data")).unwrap();
        fs::write(code.join("runKanalyzer_parallel"), COUNTER).unwrap();
        fs::write(code.join("runKanalyzer"), COUNTER).unwrap();
        fs::write(root.join("features/collect.sh"), COLLECTOR).unwrap();

        let collector = CollectorCommands {
            build: vec![],
            run: CommandSpec::new("sh", ["collect.sh"]),
        };
        // Scripts run through sh: freshly written files are never exec'd
        let mut config = Config::default();
        config.workspace.root = root.clone();
        config.counter.parallel = CommandSpec::new("sh", ["runKanalyzer_parallel"]);
        config.counter.sequential = CommandSpec::new("sh", ["runKanalyzer"]);
        config.collector.parallel = collector.clone();
        config.collector.sequential = collector;

        Self {
            _temp_dir: temp_dir,
            root,
            config,
        }
    }

    fn write_source(&self, name: &str, records: usize) {
        let mut content = String::from("generated by test\n");
        for i in 1..=records {
            content.push_str(&format!(">record_{i}\nACGTTGCA\n"));
        }
        fs::write(self.root.join("data").join(name), content).unwrap();
    }

    fn request(&self, filename: &str, output: &str) -> RunRequest {
        RunRequest {
            filename: Some(filename.to_string()),
            output: output.to_string(),
            jobs: 4,
            ..RunRequest::default()
        }
    }

    fn analyzer(&self, featuredir: &str) -> PathBuf {
        self.root.join(featuredir).join("kanalyze-2.0.0")
    }
}

fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_parallel_run_end_to_end() {
    let fixture = Fixture::new();
    fixture.write_source("five.fasta", 5);

    let summary = run_pipeline(&fixture.config, &fixture.request("five.fasta", "five.csv")).unwrap();

    assert_eq!(summary.records, 5);
    assert_eq!(summary.workers, 4);
    assert_eq!(summary.artifact, fixture.root.join("data/five.csv"));

    let csv = fs::read_to_string(&summary.artifact).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[0], "file,k2,k3,k4");
    assert_eq!(lines[1], "seq1,1,1,1");
    assert_eq!(lines[5], "seq5,1,1,1");

    let analyzer = fixture.analyzer("features");
    assert_eq!(
        listing(&analyzer.join("input_data")),
        vec!["list.txt", "seq1.fasta", "seq2.fasta", "seq3.fasta", "seq4.fasta", "seq5.fasta"]
    );
    assert_eq!(
        fs::read_to_string(analyzer.join("input_data/seq3.fasta")).unwrap(),
        ">record_3\nACGTTGCA\n"
    );

    // Every consumer reads the same manifest
    let manifest = fs::read(analyzer.join("input_data/list.txt")).unwrap();
    assert_eq!(manifest, fs::read(analyzer.join("code/list.txt")).unwrap());
    assert_eq!(manifest, fs::read(fixture.root.join("features/list.txt")).unwrap());

    // The fixed-name artifact was moved out of the feature dir
    assert!(!fixture.root.join("features/feature_file.csv").exists());
    assert!(!fixture.root.join("features/five.csv").exists());

    assert_eq!(summary.metrics.records_written, 5);
    assert_eq!(summary.metrics.write_failures, 0);
}

#[test]
fn test_sequential_run_with_custom_featuredir() {
    let fixture = Fixture::new();
    fixture.write_source("demo.fasta", 3);

    let request = RunRequest {
        featuredir: "demo_features_original".to_string(),
        mode: RunMode::Sequential,
        ..fixture.request("demo.fasta", "demo_original.csv")
    };
    let summary = run_pipeline(&fixture.config, &request).unwrap();

    assert_eq!(summary.workers, 1);
    assert_eq!(summary.mode, RunMode::Sequential);
    let csv = fs::read_to_string(fixture.root.join("data/demo_original.csv")).unwrap();
    assert_eq!(csv.lines().count(), 4);

    // The run happened in the copy; the template was never staged
    let copy = fixture.analyzer("demo_features_original");
    assert_eq!(listing(&copy.join("input_data")).len(), 4);
    assert!(copy.join("code/runKanalyzer").exists());
    assert!(!fixture.analyzer("features").join("input_data").exists());
}

#[test]
fn test_rerun_replaces_previous_split() {
    let fixture = Fixture::new();
    fixture.write_source("big.fasta", 5);
    fixture.write_source("small.fasta", 2);

    run_pipeline(&fixture.config, &fixture.request("big.fasta", "big.csv")).unwrap();
    let summary = run_pipeline(&fixture.config, &fixture.request("small.fasta", "small.csv")).unwrap();

    assert_eq!(summary.records, 2);
    let analyzer = fixture.analyzer("features");
    assert_eq!(listing(&analyzer.join("input_data")), vec!["list.txt", "seq1.fasta", "seq2.fasta"]);
    assert_eq!(listing(&analyzer.join("output_data/4mer")), vec!["seq1.txt", "seq2.txt"]);
    assert_eq!(fs::read_to_string(&summary.artifact).unwrap().lines().count(), 3);
    // Earlier artifacts are left alone
    assert!(fixture.root.join("data/big.csv").exists());
}

#[test]
fn test_counter_failure_stops_pipeline() {
    let fixture = Fixture::new();
    fixture.write_source("five.fasta", 5);
    fs::write(
        fixture.root.join("features/kanalyze-2.0.0/code/runKanalyzer_parallel"),
        "#!/bin/sh\necho 'out of memory' >&2\nexit 1\n",
    )
    .unwrap();

    let err = run_pipeline(&fixture.config, &fixture.request("five.fasta", "five.csv")).unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Count));
    assert!(err.is_stage_failure());
    assert!(format!("{err}").contains("out of memory"));
    assert!(!fixture.root.join("features/feature_file.csv").exists());
    assert!(!fixture.root.join("data/five.csv").exists());
}

#[test]
fn test_collector_failure_reports_collection_stage() {
    let mut fixture = Fixture::new();
    fixture.write_source("five.fasta", 5);
    fixture.config.collector.parallel.run = CommandSpec::new("sh", ["-c", "echo 'no classpath' >&2; exit 2"]);

    let err = run_pipeline(&fixture.config, &fixture.request("five.fasta", "five.csv")).unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Collect));
    assert!(format!("{err}").contains("no classpath"));
    // Counting completed before collection was attempted
    assert!(fixture.analyzer("features").join("output_data/2mer/seq5.txt").exists());
}

#[test]
fn test_missing_counter_is_environment_error() {
    let mut fixture = Fixture::new();
    fixture.config.counter.parallel = CommandSpec::new("./runKanalyzer_parallel", Vec::<String>::new());
    fixture.write_source("five.fasta", 5);
    fs::remove_file(fixture.root.join("features/kanalyze-2.0.0/code/runKanalyzer_parallel")).unwrap();

    let err = run_pipeline(&fixture.config, &fixture.request("five.fasta", "five.csv")).unwrap_err();

    assert!(matches!(err, PipelineError::Environment { .. }));
}

#[test]
fn test_empty_source_runs_with_empty_manifest() {
    let fixture = Fixture::new();
    fixture.write_source("empty.fasta", 0);

    let summary = run_pipeline(&fixture.config, &fixture.request("empty.fasta", "empty.csv")).unwrap();

    assert_eq!(summary.records, 0);
    assert_eq!(fs::read_to_string(&summary.artifact).unwrap(), "file,k2,k3,k4\n");
}

#[test]
fn test_collector_without_output_fails_despite_stale_artifact() {
    let mut fixture = Fixture::new();
    fixture.write_source("five.fasta", 5);
    fs::write(fixture.root.join("features/feature_file.csv"), "stale,header\n").unwrap();
    fixture.config.collector.parallel.run = CommandSpec::new("true", Vec::<String>::new());

    let err = run_pipeline(&fixture.config, &fixture.request("five.fasta", "five.csv")).unwrap_err();

    assert!(matches!(err, PipelineError::StageInvariant { stage: Stage::Collect, .. }));
    assert!(!fixture.root.join("data/five.csv").exists());
}

#[test]
fn test_data_dir_as_featuredir_is_rejected() {
    let fixture = Fixture::new();
    fixture.write_source("five.fasta", 5);
    fs::write(fixture.root.join("data/precious.csv"), "keep").unwrap();

    let request = RunRequest {
        featuredir: "data".to_string(),
        ..fixture.request("five.fasta", "five.csv")
    };
    let err = run_pipeline(&fixture.config, &request).unwrap_err();

    assert!(matches!(err, PipelineError::Configuration(_)));
    assert!(fixture.root.join("data/precious.csv").exists());
    assert!(fixture.root.join("data/five.fasta").exists());
}
