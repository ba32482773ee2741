use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::config::DisassemblerConfig;
use crate::services::backends::{BackendError, DisassemblyBackend};

/// Shells out to a command-line disassembler (`llvm-mc` by default), feeding
/// the request on stdin and reading the listing from stdout.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: PathBuf,
    args: Vec<String>,
    name: String,
}

impl CommandBackend {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        let program = program.into();
        let name = program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| program.display().to_string());
        Self { program, args, name }
    }

    pub fn from_config(config: &DisassemblerConfig) -> Self {
        Self::new(config.program_path(), config.args.clone())
    }
}

impl DisassemblyBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn disassemble(&self, request: &str) -> Result<String, BackendError> {
        let program = self.program.display().to_string();
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| BackendError::Spawn { program: program.clone(), source })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            BackendError::Other(format!("stdin of {program} was not captured"))
        })?;

        // stdin is written while stdout/stderr are drained.
        let output = std::thread::scope(|scope| {
            let writer = scope.spawn(move || {
                stdin.write_all(request.as_bytes())?;
                stdin.write_all(b"\n")
            });
            let output = child.wait_with_output();
            // An early exit closes the pipe; report the exit status instead.
            let written = match writer.join() {
                Ok(Err(err)) if err.kind() == ErrorKind::BrokenPipe => Ok(()),
                Ok(result) => result,
                Err(_) => Err(std::io::Error::other("stdin writer panicked")),
            };
            output.and_then(|out| written.map(|_| out))
        })
        .map_err(|source| BackendError::Io { program: program.clone(), source })?;

        if !output.status.success() {
            return Err(BackendError::Exit {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_a_spawn_error() {
        let backend = CommandBackend::new("/definitely/not/a/disassembler", vec![]);
        let err = backend.disassemble("0x00").unwrap_err();
        assert!(matches!(err, BackendError::Spawn { .. }), "unexpected error: {err}");
    }

    #[test]
    fn echoes_stdout_of_the_tool() {
        let backend = CommandBackend::new("cat", vec![]);
        let out = backend.disassemble("0x00 0x01").unwrap();
        assert_eq!(out.trim(), "0x00 0x01");
        assert_eq!(backend.name(), "cat");
    }

    #[test]
    fn non_zero_exit_is_reported_with_status() {
        let backend = CommandBackend::new("sh", vec!["-c".into(), "echo boom >&2; exit 3".into()]);
        let err = backend.disassemble("0x00").unwrap_err();
        match err {
            BackendError::Exit { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("expected exit error, got {other}"),
        }
    }
}
