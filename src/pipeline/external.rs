//! Strict-barrier orchestration of the external counting and collection tools.
//!
//! ```text
//! ┌──────────────┐  exit 0   ┌──────────────┐  fixed artifact  ┌─────────────┐
//! │   Counting   │──────────▶│  Collection  │─────────────────▶│  Relocation │
//! │ (code dir)   │           │ (feature dir)│                  │ (data dir)  │
//! └──────────────┘           └──────────────┘                  └─────────────┘
//! ```
//!
//! Each tool runs as a child process with an explicit absolute working
//! directory. The collector is not started until the counter has exited
//! successfully, so it only ever sees a completed output tree.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::CommandSpec;
use crate::error::{PipelineError, Result, Stage};
use crate::pipeline::Metrics;

/// Captured output of a successful external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Captured standard output
    pub stdout: String,

    /// Captured standard error
    pub stderr: String,

    /// Wall time of the command
    pub elapsed: Duration,
}

/// Whether `command` names a program by path rather than a bare name.
pub fn is_path_program(command: &CommandSpec) -> bool {
    let program = Path::new(&command.program);
    program.components().count() > 1 || program.is_absolute()
}

/// Resolve the program of `command` to an absolute path.
///
/// Programs containing a path separator are resolved against `cwd`; bare
/// names are searched on `PATH`.
pub fn resolve_program(command: &CommandSpec, cwd: &Path) -> Result<PathBuf> {
    let program = Path::new(&command.program);

    if is_path_program(command) {
        let path = cwd.join(program);
        if path.is_file() {
            return Ok(path);
        }
        return Err(PipelineError::Environment {
            path,
            reason: "external executable not found".to_string(),
        });
    }

    let search: OsString = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| PipelineError::Environment {
            path: program.to_path_buf(),
            reason: "external program not found on PATH".to_string(),
        })
}

/// Make `path` executable (mode 0o775).
#[cfg(unix)]
pub fn ensure_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o775)).map_err(|e| PipelineError::Environment {
        path: path.to_path_buf(),
        reason: format!("cannot make executable: {e}"),
    })?;
    tracing::debug!("Set mode 775 on {}", path.display());
    Ok(())
}

/// Make `path` executable (no-op off unix).
#[cfg(not(unix))]
pub fn ensure_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Run `command` in `cwd` and wait for it to exit.
///
/// The program must already be resolved (see [`resolve_program`]). Spawn
/// failures and non-zero exits both become a stage failure carrying the
/// command line and everything the child printed.
pub fn run_command(stage: Stage, command: &CommandSpec, program: &Path, cwd: &Path) -> Result<CommandOutput> {
    tracing::info!("Running {} command `{}` in {}", stage, command.display(), cwd.display());
    let start = Instant::now();

    let output = Command::new(program)
        .args(&command.args)
        .current_dir(cwd)
        .output()
        .map_err(|e| PipelineError::StageCommand {
            stage,
            command: command.display(),
            cwd: cwd.to_path_buf(),
            status: format!("could not be started: {e}"),
            stdout: String::new(),
            stderr: String::new(),
        })?;

    let elapsed = start.elapsed();
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        tracing::error!("{} command `{}` failed with {}", stage, command.display(), output.status);
        return Err(PipelineError::StageCommand {
            stage,
            command: command.display(),
            cwd: cwd.to_path_buf(),
            status: format!("exited with {}", output.status),
            stdout,
            stderr,
        });
    }

    if !stdout.trim().is_empty() {
        tracing::info!("{} output:\n{}", stage, stdout.trim_end());
    }
    tracing::debug!("{} command finished in {:.2}s", stage, elapsed.as_secs_f64());

    Ok(CommandOutput { stdout, stderr, elapsed })
}

/// The external k-mer counter.
#[derive(Debug, Clone)]
pub struct CountingStage {
    /// Counter command (run without arguments by default)
    pub command: CommandSpec,

    /// Absolute working directory (the counter's code dir)
    pub workdir: PathBuf,
}

impl CountingStage {
    /// Resolve the counter and make sure it can be executed.
    ///
    /// Only a counter shipped in the working directory is chmod'ed; programs
    /// found on `PATH` are left alone.
    pub fn check(&self) -> Result<PathBuf> {
        let program = resolve_program(&self.command, &self.workdir)?;
        if is_path_program(&self.command) {
            ensure_executable(&program)?;
        }
        Ok(program)
    }

    /// Run the counter to completion.
    pub fn run(&self) -> Result<CommandOutput> {
        let program = self.check()?;
        run_command(Stage::Count, &self.command, &program, &self.workdir)
    }
}

/// The external feature collector and the artifact hand-off.
#[derive(Debug, Clone)]
pub struct CollectionStage {
    /// Commands run before the collector, in order
    pub build: Vec<CommandSpec>,

    /// The collector command
    pub command: CommandSpec,

    /// Absolute working directory (the feature dir)
    pub workdir: PathBuf,

    /// Name of the artifact the collector writes into `workdir`
    pub artifact_name: String,
}

impl CollectionStage {
    /// Resolve every program this stage needs.
    pub fn check(&self) -> Result<Vec<PathBuf>> {
        self.build
            .iter()
            .chain(std::iter::once(&self.command))
            .map(|command| resolve_program(command, &self.workdir))
            .collect()
    }

    /// Build and run the collector, then publish its artifact as
    /// `dest_dir/output_name`. Returns the published path.
    ///
    /// An artifact left behind by an earlier run is removed first, so only
    /// a file written by this collector invocation can be published.
    pub fn run(&self, output_name: &str, dest_dir: &Path) -> Result<PathBuf> {
        let programs = self.check()?;

        let stale = self.workdir.join(&self.artifact_name);
        match fs::remove_file(&stale) {
            Ok(()) => tracing::debug!("Removed stale artifact {}", stale.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(PipelineError::io(
                    Stage::Collect,
                    format!("removing stale {}", stale.display()),
                    e,
                ))
            }
        }
        let commands = self.build.iter().chain(std::iter::once(&self.command));

        for (command, program) in commands.zip(&programs) {
            run_command(Stage::Collect, command, program, &self.workdir)?;
        }

        relocate_artifact(&self.workdir, &self.artifact_name, output_name, dest_dir)
    }
}

/// Rename the collector's fixed-name artifact to `output_name` and publish it
/// into `dest_dir`, removing the intermediate copy.
///
/// The final file appears under its name only once fully written: it is
/// copied to a hidden temporary name in `dest_dir` first and then renamed.
pub fn relocate_artifact(workdir: &Path, fixed_name: &str, output_name: &str, dest_dir: &Path) -> Result<PathBuf> {
    let produced = workdir.join(fixed_name);
    if !produced.is_file() {
        return Err(PipelineError::StageInvariant {
            stage: Stage::Collect,
            reason: format!("collector did not produce {}", produced.display()),
        });
    }

    let renamed = workdir.join(output_name);
    if renamed != produced {
        fs::rename(&produced, &renamed).map_err(|e| {
            PipelineError::io(
                Stage::Collect,
                format!("renaming {} to {}", produced.display(), renamed.display()),
                e,
            )
        })?;
    }

    fs::create_dir_all(dest_dir)
        .map_err(|e| PipelineError::io(Stage::Collect, format!("creating {}", dest_dir.display()), e))?;

    let dest = dest_dir.join(output_name);
    if same_dir(workdir, dest_dir) {
        return Ok(dest);
    }

    let partial = dest_dir.join(format!(".{output_name}.partial"));
    fs::copy(&renamed, &partial)
        .and_then(|_| fs::rename(&partial, &dest))
        .map_err(|e| {
            let _ = fs::remove_file(&partial);
            PipelineError::io(Stage::Collect, format!("publishing {}", dest.display()), e)
        })?;

    fs::remove_file(&renamed)
        .map_err(|e| PipelineError::io(Stage::Collect, format!("removing {}", renamed.display()), e))?;

    tracing::info!("Feature artifact written to {}", dest.display());
    Ok(dest)
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Two-phase runner: counting, then collection.
pub struct Orchestrator {
    counting: CountingStage,
    collection: CollectionStage,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    /// Create a new orchestrator.
    pub fn new(counting: CountingStage, collection: CollectionStage, metrics: Arc<Metrics>) -> Self {
        Self {
            counting,
            collection,
            metrics,
        }
    }

    /// Run counting to completion, then collection, then publish the
    /// artifact as `dest_dir/output_name`.
    ///
    /// A counting failure returns immediately; the collector is never
    /// resolved or started.
    pub fn run(&self, output_name: &str, dest_dir: &Path) -> Result<PathBuf> {
        tracing::info!("Starting k-mer counting");
        let start = Instant::now();
        self.counting.run()?;
        self.metrics.add_stage_time(Stage::Count, start.elapsed());
        tracing::info!("K-mer counting completed in {:.2} seconds", start.elapsed().as_secs_f64());

        tracing::info!("Starting feature collection");
        let start = Instant::now();
        let artifact = self.collection.run(output_name, dest_dir)?;
        self.metrics.add_stage_time(Stage::Collect, start.elapsed());
        tracing::info!("Feature collection completed in {:.2} seconds", start.elapsed().as_secs_f64());

        Ok(artifact)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh", ["-c", script])
    }

    fn write_script(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), format!("#!/bin/sh\n{body}\n")).unwrap();
    }

    #[test]
    fn test_resolve_program_on_path() {
        let temp_dir = TempDir::new().unwrap();
        let program = resolve_program(&sh("true"), temp_dir.path()).unwrap();
        assert!(program.is_absolute());
        assert!(program.ends_with("sh"));
    }

    #[test]
    fn test_resolve_program_relative_to_workdir() {
        let temp_dir = TempDir::new().unwrap();
        write_script(temp_dir.path(), "count", "exit 0");

        let command = CommandSpec::new("./count", Vec::<String>::new());
        let program = resolve_program(&command, temp_dir.path()).unwrap();
        assert_eq!(program, temp_dir.path().join("./count"));
    }

    #[test]
    fn test_resolve_program_missing() {
        let temp_dir = TempDir::new().unwrap();
        let missing = CommandSpec::new("./runKanalyzer", Vec::<String>::new());
        assert!(matches!(
            resolve_program(&missing, temp_dir.path()),
            Err(PipelineError::Environment { .. })
        ));

        let not_on_path = CommandSpec::new("definitely-not-a-real-tool-xyz", Vec::<String>::new());
        assert!(matches!(
            resolve_program(&not_on_path, temp_dir.path()),
            Err(PipelineError::Environment { .. })
        ));
    }

    #[test]
    fn test_counting_check_sets_mode_775() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("runKanalyzer");
        write_script(temp_dir.path(), "runKanalyzer", "exit 0");
        // Already executable, but not 775
        fs::set_permissions(&script, fs::Permissions::from_mode(0o700)).unwrap();
        let stage = CountingStage {
            command: CommandSpec::new("./runKanalyzer", Vec::<String>::new()),
            workdir: temp_dir.path().to_path_buf(),
        };

        let program = stage.check().unwrap();

        assert_eq!(program, temp_dir.path().join("./runKanalyzer"));
        let mode = fs::metadata(&script).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o775);
    }

    #[test]
    fn test_counting_check_leaves_path_programs_alone() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let stage = CountingStage {
            command: sh("true"),
            workdir: temp_dir.path().to_path_buf(),
        };
        let program = resolve_program(&stage.command, temp_dir.path()).unwrap();
        let before = fs::metadata(&program).unwrap().permissions().mode();

        stage.check().unwrap();

        assert_eq!(fs::metadata(&program).unwrap().permissions().mode(), before);
    }

    #[test]
    fn test_counting_stage_runs_in_workdir() {
        let temp_dir = TempDir::new().unwrap();
        write_script(temp_dir.path(), "runKanalyzer", "echo counted > marker.txt");
        let stage = CountingStage {
            command: CommandSpec::new("sh", ["runKanalyzer"]),
            workdir: temp_dir.path().to_path_buf(),
        };

        let output = stage.run().unwrap();

        assert!(temp_dir.path().join("marker.txt").exists());
        assert!(output.stdout.is_empty());
    }

    #[test]
    fn test_run_command_failure_captures_output() {
        let temp_dir = TempDir::new().unwrap();
        let command = sh("echo progress; echo broken >&2; exit 4");
        let program = resolve_program(&command, temp_dir.path()).unwrap();

        let err = run_command(Stage::Count, &command, &program, temp_dir.path()).unwrap_err();

        match err {
            PipelineError::StageCommand { stage, stdout, stderr, status, .. } => {
                assert_eq!(stage, Stage::Count);
                assert_eq!(stdout.trim(), "progress");
                assert_eq!(stderr.trim(), "broken");
                assert!(status.contains('4'));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_relocate_artifact_renames_and_moves() {
        let temp_dir = TempDir::new().unwrap();
        let workdir = temp_dir.path().join("features");
        let data = temp_dir.path().join("data");
        fs::create_dir_all(&workdir).unwrap();
        fs::write(workdir.join("feature_file.csv"), "a,b\n1,2\n").unwrap();

        let dest = relocate_artifact(&workdir, "feature_file.csv", "demo.csv", &data).unwrap();

        assert_eq!(dest, data.join("demo.csv"));
        assert_eq!(fs::read_to_string(&dest).unwrap(), "a,b\n1,2\n");
        assert!(!workdir.join("feature_file.csv").exists());
        assert!(!workdir.join("demo.csv").exists());
        assert!(!data.join(".demo.csv.partial").exists());
    }

    #[test]
    fn test_relocate_artifact_missing_output() {
        let temp_dir = TempDir::new().unwrap();
        let err = relocate_artifact(temp_dir.path(), "feature_file.csv", "out.csv", temp_dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::StageInvariant { stage: Stage::Collect, .. }));
    }

    #[test]
    fn test_collection_runs_build_steps_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let workdir = temp_dir.path().join("features");
        fs::create_dir_all(&workdir).unwrap();

        let stage = CollectionStage {
            build: vec![sh("echo one > build.log"), sh("echo two >> build.log")],
            command: sh("cat build.log > feature_file.csv"),
            workdir: workdir.clone(),
            artifact_name: "feature_file.csv".to_string(),
        };

        let dest = stage.run("out.csv", &temp_dir.path().join("data")).unwrap();
        assert_eq!(fs::read_to_string(dest).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn test_stale_artifact_is_not_republished() {
        let temp_dir = TempDir::new().unwrap();
        let workdir = temp_dir.path().join("features");
        fs::create_dir_all(&workdir).unwrap();
        fs::write(workdir.join("feature_file.csv"), "stale,header\n").unwrap();

        let stage = CollectionStage {
            build: vec![],
            command: sh("true"),
            workdir: workdir.clone(),
            artifact_name: "feature_file.csv".to_string(),
        };

        let err = stage.run("out.csv", &temp_dir.path().join("data")).unwrap_err();

        assert!(matches!(err, PipelineError::StageInvariant { stage: Stage::Collect, .. }));
        assert!(!workdir.join("feature_file.csv").exists());
        assert!(!temp_dir.path().join("data/out.csv").exists());
    }

    #[test]
    fn test_counting_failure_blocks_collection() {
        let temp_dir = TempDir::new().unwrap();
        let code = temp_dir.path().join("code");
        let features = temp_dir.path().join("features");
        fs::create_dir_all(&code).unwrap();
        fs::create_dir_all(&features).unwrap();
        write_script(&code, "count", "echo 'counter crashed' >&2\nexit 1");

        let orchestrator = Orchestrator::new(
            CountingStage {
                command: CommandSpec::new("sh", ["count"]),
                workdir: code,
            },
            CollectionStage {
                build: vec![sh("touch built")],
                command: sh("touch collected; echo h > feature_file.csv"),
                workdir: features.clone(),
                artifact_name: "feature_file.csv".to_string(),
            },
            Metrics::new(),
        );

        let err = orchestrator.run("out.csv", &temp_dir.path().join("data")).unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Count));
        assert!(format!("{err}").contains("counter crashed"));
        assert!(!features.join("built").exists());
        assert!(!features.join("collected").exists());
        assert!(!temp_dir.path().join("data").exists());
    }

    #[test]
    fn test_collector_waits_for_slow_counter() {
        let temp_dir = TempDir::new().unwrap();
        let code = temp_dir.path().join("code");
        let out = temp_dir.path().join("output");
        fs::create_dir_all(&code).unwrap();
        fs::create_dir_all(&out).unwrap();
        write_script(&code, "count", "sleep 1\necho done > ../output/counts.txt");

        let metrics = Metrics::new();
        let orchestrator = Orchestrator::new(
            CountingStage {
                command: CommandSpec::new("sh", ["count"]),
                workdir: code,
            },
            CollectionStage {
                build: vec![],
                command: sh("test -f output/counts.txt && cp output/counts.txt feature_file.csv"),
                workdir: temp_dir.path().to_path_buf(),
                artifact_name: "feature_file.csv".to_string(),
            },
            metrics.clone(),
        );

        let dest = orchestrator.run("features.csv", &temp_dir.path().join("data")).unwrap();

        assert_eq!(fs::read_to_string(dest).unwrap(), "done\n");
        assert!(metrics.snapshot().count_secs >= 1.0);
    }
}
