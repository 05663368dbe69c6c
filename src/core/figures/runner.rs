//! External figure generators.

use std::fs::{self, File};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How a figure source turns into an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Python,
    R,
    Shell,
    Mermaid,
    /// Already an image; copied as-is.
    Static,
}

impl SourceKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        match ext {
            "py" => Some(SourceKind::Python),
            "R" | "r" => Some(SourceKind::R),
            "sh" => Some(SourceKind::Shell),
            "mmd" => Some(SourceKind::Mermaid),
            _ => match ext.to_lowercase().as_str() {
                "png" | "jpg" | "jpeg" | "pdf" | "svg" | "eps" => Some(SourceKind::Static),
                _ => None,
            },
        }
    }
}

/// Generator programs. Override to pin interpreters or use wrappers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FigureToolchain {
    pub python: String,
    pub rscript: String,
    pub shell: String,
    pub mermaid: String,
}

impl Default for FigureToolchain {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            rscript: "Rscript".to_string(),
            shell: "sh".to_string(),
            mermaid: "mmdc".to_string(),
        }
    }
}

impl FigureToolchain {
    /// Command line with `{source}` / `{output}` placeholders. This form
    /// enters the content hash.
    pub fn template(&self, kind: SourceKind) -> Option<String> {
        match kind {
            SourceKind::Python => Some(format!("{} {{source}}", self.python)),
            SourceKind::R => Some(format!("{} {{source}}", self.rscript)),
            SourceKind::Shell => Some(format!("{} {{source}}", self.shell)),
            SourceKind::Mermaid => Some(format!("{} -i {{source}} -o {{output}}", self.mermaid)),
            SourceKind::Static => None,
        }
    }

    pub fn command_line(&self, kind: SourceKind, source: &str, output: &str) -> Option<Vec<String>> {
        let template = self.template(kind)?;
        Some(
            template
                .split_whitespace()
                .map(|part| part.replace("{source}", source).replace("{output}", output))
                .collect(),
        )
    }
}

/// One generator invocation.
pub struct GeneratorRun<'a> {
    pub argv: &'a [String],
    pub working_dir: &'a Path,
    pub env: &'a [(&'a str, String)],
    pub timeout: Duration,
    /// Where the child's stderr goes.
    pub stderr_log: &'a Path,
}

/// Run a generator to completion or until the timeout, then kill it.
pub fn run_generator(run: &GeneratorRun<'_>) -> Result<(), String> {
    let (program, args) = run
        .argv
        .split_first()
        .ok_or_else(|| "empty generator command".to_string())?;
    let stderr = File::create(run.stderr_log).map_err(|e| format!("cannot open log: {}", e))?;

    let mut child = Command::new(program)
        .args(args)
        .current_dir(run.working_dir)
        .envs(run.env.iter().map(|(k, v)| (*k, v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(stderr))
        .spawn()
        .map_err(|e| format!("failed to start '{}': {}", program, e))?;

    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if status.success() {
                    return Ok(());
                }
                let tail = stderr_tail(run.stderr_log);
                return Err(if tail.is_empty() {
                    format!("generator exited with {}", status)
                } else {
                    format!("generator exited with {}: {}", status, tail)
                });
            }
            Ok(None) => {
                if start.elapsed() > run.timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(format!("generator timed out after {:?}", run.timeout));
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(format!("failed to wait for generator: {}", e));
            }
        }
    }
}

/// Last non-empty stderr line, for the diagnostic.
fn stderr_tail(path: &Path) -> String {
    fs::read_to_string(path)
        .ok()
        .and_then(|text| {
            text.lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_from_extension() {
        assert_eq!(SourceKind::from_path(Path::new("a/b.py")), Some(SourceKind::Python));
        assert_eq!(SourceKind::from_path(Path::new("b.R")), Some(SourceKind::R));
        assert_eq!(SourceKind::from_path(Path::new("b.mmd")), Some(SourceKind::Mermaid));
        assert_eq!(SourceKind::from_path(Path::new("b.PNG")), Some(SourceKind::Static));
        assert_eq!(SourceKind::from_path(Path::new("b.doc")), None);
    }

    #[test]
    fn command_lines() {
        let tools = FigureToolchain::default();
        assert_eq!(
            tools.command_line(SourceKind::Mermaid, "d.mmd", "/tmp/d.pdf").unwrap(),
            vec!["mmdc", "-i", "d.mmd", "-o", "/tmp/d.pdf"]
        );
        assert!(tools.command_line(SourceKind::Static, "a.png", "x").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn reports_failure_and_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("stderr.log");
        let argv = vec!["sh".to_string(), "-c".to_string(), "echo boom >&2; exit 3".to_string()];
        let err = run_generator(&GeneratorRun {
            argv: &argv,
            working_dir: dir.path(),
            env: &[],
            timeout: Duration::from_secs(10),
            stderr_log: &log,
        })
        .unwrap_err();
        assert!(err.contains("boom"), "{}", err);

        let argv = vec!["sh".to_string(), "-c".to_string(), "sleep 5".to_string()];
        let err = run_generator(&GeneratorRun {
            argv: &argv,
            working_dir: dir.path(),
            env: &[],
            timeout: Duration::from_millis(100),
            stderr_log: &log,
        })
        .unwrap_err();
        assert!(err.contains("timed out"));
    }
}
