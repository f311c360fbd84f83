//! `sbatch` invocation and wrapper-script generation.

use gridr_core::{sh_quote, sh_quote_cmdline, JobId, JobRequest};
use gridr_units::Duration;

use crate::adapter::SlurmConfig;

/// Resolved stdout/stderr filenames for a request, relative to the
/// sandbox directory.
///
/// Stdout defaults to `<name>.out`. Stderr is separate only when the
/// request names a file; otherwise the streams are joined into stdout,
/// which is what `sbatch` does when no `-e` option is given.
pub fn output_filenames(request: &JobRequest) -> (String, Option<String>) {
    let stdout = request
        .stdout
        .clone()
        .unwrap_or_else(|| format!("{}.out", request.name));
    (stdout, request.stderr.clone())
}

/// Name the stdin file is staged under inside the sandbox.
pub fn stdin_basename(request: &JobRequest) -> Option<String> {
    request.stdin.as_ref().map(|path| {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned())
    })
}

/// Wrapper-script filename inside the sandbox, keyed by the job's id so
/// a resubmission never clobbers an earlier attempt's script.
pub fn script_name(id: &JobId) -> String {
    format!("script.{id}.sh")
}

/// Round a walltime request up to whole minutes, minimum one.
///
/// `--time` takes minutes; rounding down would let the scheduler kill a
/// job that stayed inside its requested limit.
pub fn walltime_minutes(walltime: Duration) -> u64 {
    walltime.nanos().div_ceil(60_000_000_000).max(1)
}

/// Build the full `sbatch` argv for a request.
///
/// The site command prefix from the configuration comes first (it may
/// carry `--partition`, `--account` and the like), then the per-job
/// options, then the script name. `--no-requeue` is always set: a job
/// the scheduler silently requeues after a node failure would run twice
/// without the state machine ever noticing.
pub fn sbatch_argv(config: &SlurmConfig, request: &JobRequest, script: &str) -> Vec<String> {
    let mut argv = config.sbatch.clone();
    argv.push("--no-requeue".to_string());
    argv.push(format!("--job-name={}", request.name));
    if let Some(stdin) = stdin_basename(request) {
        argv.push(format!("--input={stdin}"));
    }
    let (stdout, stderr) = output_filenames(request);
    argv.push(format!("--output={stdout}"));
    if let Some(stderr) = stderr {
        argv.push("-e".to_string());
        argv.push(stderr);
    }
    if let Some(memory) = request.memory_per_core {
        // --mem-per-cpu takes MiB; round up so the request is never
        // smaller than what the job asked for
        argv.push(format!(
            "--mem-per-cpu={}",
            memory.bytes().div_ceil(1024 * 1024)
        ));
    }
    if let Some(walltime) = request.walltime {
        argv.push(format!("--time={}", walltime_minutes(walltime)));
    }
    argv.push("-n".to_string());
    argv.push(request.cores.to_string());
    argv.push("--cpus-per-task=1".to_string());
    argv.push(script.to_string());
    argv
}

/// Generate the wrapper script handed to `sbatch`.
///
/// A plain `/bin/sh` script: the exported environment (sorted, so the
/// same request always produces the same script) followed by an `exec`
/// of the command line. `exec` puts the command itself on the batch
/// step's PID, so signals and accounting land on the right process.
pub fn job_script(request: &JobRequest) -> String {
    let mut script = String::from("#!/bin/sh\n");
    let mut names: Vec<&String> = request.environment.keys().collect();
    names.sort();
    for name in names {
        script.push_str(&format!(
            "export {}={}\n",
            name,
            sh_quote(&request.environment[name])
        ));
    }
    script.push_str(&format!("exec {}\n", sh_quote_cmdline(&request.arguments)));
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridr_units::{Memory, MemoryUnit};

    fn config_with(sbatch: &[&str]) -> SlurmConfig {
        SlurmConfig {
            sbatch: sbatch.iter().map(|s| s.to_string()).collect(),
            ..SlurmConfig::default()
        }
    }

    #[test]
    fn stdout_defaults_to_name_dot_out() {
        let request = JobRequest::new("hello", ["/bin/true"]);
        assert_eq!(output_filenames(&request), ("hello.out".to_string(), None));
    }

    #[test]
    fn explicit_streams_are_kept() {
        let request = JobRequest::new("hello", ["/bin/true"])
            .with_stdout("out.txt")
            .with_stderr("err.txt");
        assert_eq!(
            output_filenames(&request),
            ("out.txt".to_string(), Some("err.txt".to_string()))
        );
    }

    #[test]
    fn walltime_rounds_up_to_whole_minutes() {
        assert_eq!(walltime_minutes(Duration::seconds(0)), 1);
        assert_eq!(walltime_minutes(Duration::seconds(1)), 1);
        assert_eq!(walltime_minutes(Duration::seconds(60)), 1);
        assert_eq!(walltime_minutes(Duration::seconds(61)), 2);
        assert_eq!(walltime_minutes(Duration::seconds(90)), 2);
        assert_eq!(walltime_minutes(Duration::minutes(30)), 30);
        assert_eq!(walltime_minutes(Duration::hours(8)), 480);
    }

    #[test]
    fn argv_minimal_request() {
        let config = config_with(&["sbatch"]);
        let request = JobRequest::new("job", ["/bin/true"]);
        assert_eq!(
            sbatch_argv(&config, &request, "script.x.sh"),
            [
                "sbatch",
                "--no-requeue",
                "--job-name=job",
                "--output=job.out",
                "-n",
                "1",
                "--cpus-per-task=1",
                "script.x.sh",
            ]
        );
    }

    #[test]
    fn argv_full_request() {
        let config = config_with(&["sbatch", "--partition=debug"]);
        let request = JobRequest::new("sim", ["./run", "--steps", "100"])
            .with_stdin("data/seed.txt")
            .with_stdout("sim.log")
            .with_stderr("sim.err")
            .with_cores(16)
            .with_memory_per_core(Memory::gib(2))
            .with_walltime(Duration::seconds(90));
        assert_eq!(
            sbatch_argv(&config, &request, "script.x.sh"),
            [
                "sbatch",
                "--partition=debug",
                "--no-requeue",
                "--job-name=sim",
                "--input=seed.txt",
                "--output=sim.log",
                "-e",
                "sim.err",
                "--mem-per-cpu=2048",
                "--time=2",
                "-n",
                "16",
                "--cpus-per-task=1",
                "script.x.sh",
            ]
        );
    }

    #[test]
    fn mem_per_cpu_rounds_up_to_whole_mib() {
        let config = config_with(&["sbatch"]);
        let request = JobRequest::new("job", ["/bin/true"])
            .with_memory_per_core(Memory::new(1536, MemoryUnit::KiB));
        let argv = sbatch_argv(&config, &request, "s.sh");
        assert!(argv.contains(&"--mem-per-cpu=2".to_string()));
    }

    #[test]
    fn script_exports_sorted_env_and_execs() {
        let request = JobRequest::new("job", ["/bin/echo", "hello world"])
            .with_env("B_VAR", "x y")
            .with_env("A_VAR", "it's");
        assert_eq!(
            job_script(&request),
            "#!/bin/sh\n\
             export A_VAR='it'\\''s'\n\
             export B_VAR='x y'\n\
             exec '/bin/echo' 'hello world'\n"
        );
    }

    #[test]
    fn script_without_env_is_just_the_exec_line() {
        let request = JobRequest::new("job", ["/bin/true"]);
        assert_eq!(job_script(&request), "#!/bin/sh\nexec '/bin/true'\n");
    }

    #[test]
    fn script_filename_carries_the_job_id() {
        let id = JobId::new();
        let name = script_name(&id);
        assert!(name.starts_with("script."));
        assert!(name.ends_with(".sh"));
        assert!(name.contains(&id.to_string()));
    }
}
