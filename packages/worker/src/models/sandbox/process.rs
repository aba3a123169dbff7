use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::error::SandboxError;
use super::{EnvRule, RunOptions};
use crate::config::BuildConfig;

const SETTINGS_PLACEHOLDER: &str = "{settings}";
const POLICY_PLACEHOLDER: &str = "{policy}";

/// Spawns the build tool with a cleared environment: only the allow-listed
/// variables and the feedback marker reach the process.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    program: String,
    args: Vec<String>,
    settings_file: Option<PathBuf>,
    policy_file: Option<PathBuf>,
    env_rules: Vec<EnvRule>,
}

/// Both files a build needs, checked to exist and be readable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFiles {
    pub settings: PathBuf,
    pub policy: PathBuf,
}

fn check_file(setting: &str, path: Option<&Path>) -> Result<PathBuf, SandboxError> {
    let Some(path) = path else {
        return Err(SandboxError::Configuration(format!("{setting} is not set")));
    };
    if !path.is_absolute() {
        return Err(SandboxError::Configuration(format!(
            "{setting} must be an absolute path, got '{}'",
            path.display()
        )));
    }
    match std::fs::File::open(path) {
        Ok(file) => match file.metadata() {
            Ok(meta) if meta.is_file() => Ok(path.to_path_buf()),
            Ok(_) => Err(SandboxError::Configuration(format!(
                "{setting} '{}' is not a regular file",
                path.display()
            ))),
            Err(e) => Err(SandboxError::Configuration(format!(
                "{setting} '{}' is unreadable: {e}",
                path.display()
            ))),
        },
        Err(e) => Err(SandboxError::Configuration(format!(
            "{setting} '{}' is unreadable: {e}",
            path.display()
        ))),
    }
}

impl ProcessSandbox {
    pub fn from_config(config: &BuildConfig) -> Self {
        let mut env_rules: Vec<EnvRule> = config
            .inherited_env
            .iter()
            .cloned()
            .map(EnvRule::Inherit)
            .collect();
        env_rules.push(EnvRule::Set(config.feedback_env_var.clone(), "1".into()));

        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            settings_file: config.settings_file.clone(),
            policy_file: config.policy_file.clone(),
            env_rules,
        }
    }

    /// Check the settings and policy files before anything is spawned.
    pub fn validate(&self) -> Result<BuildFiles, SandboxError> {
        Ok(BuildFiles {
            settings: check_file("build.settings_file", self.settings_file.as_deref())?,
            policy: check_file("build.policy_file", self.policy_file.as_deref())?,
        })
    }

    pub fn argv(&self, files: &BuildFiles) -> Vec<String> {
        let settings = files.settings.to_string_lossy();
        let policy = files.policy.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(SETTINGS_PLACEHOLDER, &settings)
                    .replace(POLICY_PLACEHOLDER, &policy)
            })
            .collect()
    }

    /// The environment the build process sees.
    pub fn environment(&self) -> Vec<(String, String)> {
        self.env_rules
            .iter()
            .filter_map(|rule| match rule {
                EnvRule::Inherit(name) => std::env::var(name).ok().map(|v| (name.clone(), v)),
                EnvRule::Set(name, value) => Some((name.clone(), value.clone())),
            })
            .collect()
    }

    pub fn spawn(&self, options: &RunOptions) -> Result<RunningProcess, SandboxError> {
        let files = self.validate()?;
        let argv = self.argv(&files);

        let stdout = std::fs::File::create(&options.stdout)?;
        let stderr = std::fs::File::create(&options.stderr)?;

        debug!(program = %self.program, args = ?argv, work_dir = %options.work_dir.display(), "Spawning build process");

        let child = Command::new(&self.program)
            .args(&argv)
            .current_dir(&options.work_dir)
            .env_clear()
            .envs(self.environment())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SandboxError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        info!(pid = ?child.id(), program = %self.program, "Build process started");
        Ok(RunningProcess {
            child,
            started: Instant::now(),
        })
    }
}

/// A spawned build process. Dropping it kills the process.
#[derive(Debug)]
pub struct RunningProcess {
    child: Child,
    started: Instant,
}

impl RunningProcess {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Exit code once the process has finished. A process ended by a signal reports -1.
    pub fn try_exit_code(&mut self) -> Result<Option<i32>, SandboxError> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| status.code().unwrap_or(-1)))
    }

    /// Kill the process and reap it.
    pub async fn terminate(&mut self) -> Result<(), SandboxError> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        warn!(pid = ?self.child.id(), "Terminating build process");
        self.child.kill().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        config: BuildConfig,
    }

    fn fixture(script: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let settings = root.join("settings.xml");
        let policy = root.join("security.policy");
        std::fs::write(&settings, "<settings/>").unwrap();
        std::fs::write(&policy, "grant {};").unwrap();

        let config = BuildConfig {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), script.into(), "sh".into(), "{settings}".into(), "{policy}".into()],
            settings_file: Some(settings),
            policy_file: Some(policy),
            inherited_env: vec!["PATH".into()],
            ..BuildConfig::default()
        };
        Fixture {
            _dir: dir,
            root,
            config,
        }
    }

    fn options(root: &Path) -> RunOptions {
        RunOptions {
            work_dir: root.to_path_buf(),
            stdout: root.join("stdout.txt"),
            stderr: root.join("stderr.txt"),
        }
    }

    async fn wait(process: &mut RunningProcess) -> i32 {
        loop {
            if let Some(code) = process.try_exit_code().unwrap() {
                return code;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn missing_settings_file_is_a_configuration_error() {
        let mut f = fixture("true");
        f.config.settings_file = None;
        let err = ProcessSandbox::from_config(&f.config).validate().unwrap_err();
        assert!(matches!(err, SandboxError::Configuration(m) if m.contains("settings_file")));
    }

    #[test]
    fn relative_and_unreadable_paths_are_rejected() {
        let mut f = fixture("true");
        f.config.policy_file = Some(PathBuf::from("relative/security.policy"));
        assert!(matches!(
            ProcessSandbox::from_config(&f.config).validate(),
            Err(SandboxError::Configuration(_))
        ));

        f.config.policy_file = Some(f.root.join("nope.policy"));
        assert!(matches!(
            ProcessSandbox::from_config(&f.config).validate(),
            Err(SandboxError::Configuration(_))
        ));
    }

    #[test]
    fn placeholders_are_substituted() {
        let f = fixture("true");
        let sandbox = ProcessSandbox::from_config(&BuildConfig {
            args: BuildConfig::default().args,
            ..f.config.clone()
        });
        let files = sandbox.validate().unwrap();
        let argv = sandbox.argv(&files);
        assert!(argv.contains(&files.settings.to_string_lossy().to_string()));
        assert!(argv.contains(&format!(
            "-Djava.security.policy=={}",
            files.policy.display()
        )));
    }

    #[tokio::test]
    async fn runs_with_bounded_environment() {
        let f = fixture(r#"echo "marker=$AUTOFEEDBACK home=${HOME:-unset}"; echo oops >&2; exit 3"#);
        let sandbox = ProcessSandbox::from_config(&f.config);
        let opts = options(&f.root);

        let mut process = sandbox.spawn(&opts).unwrap();
        assert_eq!(wait(&mut process).await, 3);

        let stdout = std::fs::read_to_string(&opts.stdout).unwrap();
        assert_eq!(stdout.trim(), "marker=1 home=unset");
        assert_eq!(std::fs::read_to_string(&opts.stderr).unwrap().trim(), "oops");
    }

    #[tokio::test]
    async fn receives_settings_and_policy_paths() {
        let f = fixture(r#"cat "$1"; cat "$2""#);
        let sandbox = ProcessSandbox::from_config(&f.config);
        let opts = options(&f.root);

        let mut process = sandbox.spawn(&opts).unwrap();
        assert_eq!(wait(&mut process).await, 0);
        assert_eq!(
            std::fs::read_to_string(&opts.stdout).unwrap(),
            "<settings/>grant {};"
        );
    }

    #[tokio::test]
    async fn terminate_stops_a_running_build() {
        let f = fixture("exec sleep 30");
        let sandbox = ProcessSandbox::from_config(&f.config);
        let mut process = sandbox.spawn(&options(&f.root)).unwrap();

        assert_eq!(process.try_exit_code().unwrap(), None);
        process.terminate().await.unwrap();
        assert!(process.try_exit_code().unwrap().is_some());
        assert!(process.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn unknown_program_fails_to_spawn() {
        let mut f = fixture("true");
        f.config.program = "/definitely/not/a/build/tool".into();
        let err = ProcessSandbox::from_config(&f.config)
            .spawn(&options(&f.root))
            .unwrap_err();
        assert!(matches!(err, SandboxError::Spawn { .. }));
    }
}
