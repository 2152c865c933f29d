use anyhow::{Context, Result, bail};
use std::ffi::OsStr;
use std::process::{Command, Stdio};

fn describe<S: AsRef<OsStr>>(cmd: &str, args: &[S]) -> String {
    let mut line = cmd.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.as_ref().to_string_lossy());
    }
    line
}

/// Run a command with inherited stdio; a non-zero exit is an error
pub fn run<S: AsRef<OsStr>>(cmd: &str, args: &[S]) -> Result<()> {
    let status = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .with_context(|| format!("Failed to execute: {}", describe(cmd, args)))?;

    if !status.success() {
        bail!("Command failed ({status}): {}", describe(cmd, args));
    }
    Ok(())
}

/// Run a command and capture output
pub fn run_capture<S: AsRef<OsStr>>(cmd: &str, args: &[S]) -> Result<String> {
    let output = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("Failed to execute: {}", describe(cmd, args)))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("Command failed: {}: {}", describe(cmd, args), stderr.trim())
    }
}

/// Check if a command exists
pub fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_capture_trims_output() {
        assert_eq!(run_capture("echo", &["  hello  "]).unwrap(), "hello");
    }

    #[test]
    fn test_run_nonzero_is_error() {
        let err = run("false", &[] as &[&str]).unwrap_err();
        assert!(err.to_string().contains("false"));
    }

    #[test]
    fn test_run_capture_reports_stderr() {
        let err = run_capture("sh", &["-c", "echo boom >&2; exit 3"]).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_command_exists() {
        assert!(command_exists("sh"));
        assert!(!command_exists("rigger-no-such-command"));
    }

    #[test]
    fn test_describe_joins_args() {
        assert_eq!(
            describe("docker", &["compose", "up", "-d"]),
            "docker compose up -d"
        );
    }
}
