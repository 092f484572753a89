//! Command execution for the appliers.
//!
//! Under test the shell can be switched to mock mode: commands are captured
//! instead of executed and canned output is returned for commands matching a
//! registered fragment.

use keymaster_common::shell::{self, ExecResult};
use keymaster_common::KeymasterResult;

#[derive(Default)]
pub(crate) struct HostShell {
    #[cfg(test)]
    mock: Option<std::sync::Mutex<MockShell>>,
}

#[cfg(test)]
#[derive(Default)]
pub(crate) struct MockShell {
    pub captured: Vec<String>,
    /// Stdin written alongside each captured command, if any.
    pub inputs: Vec<Option<String>>,
    /// (command fragment, exit code, output); first match wins.
    pub responses: Vec<(String, i32, String)>,
}

impl HostShell {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn new_mock() -> Self {
        Self {
            mock: Some(std::sync::Mutex::new(MockShell::default())),
        }
    }

    #[cfg(test)]
    pub(crate) fn respond(&self, fragment: &str, exit_code: i32, output: &str) {
        if let Some(mock) = &self.mock {
            mock.lock().unwrap().responses.push((
                fragment.to_string(),
                exit_code,
                output.to_string(),
            ));
        }
    }

    #[cfg(test)]
    pub(crate) fn captured(&self) -> Vec<String> {
        self.mock
            .as_ref()
            .map(|m| m.lock().unwrap().captured.clone())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn inputs(&self) -> Vec<Option<String>> {
        self.mock
            .as_ref()
            .map(|m| m.lock().unwrap().inputs.clone())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn clear_captured(&self) {
        if let Some(mock) = &self.mock {
            let mut mock = mock.lock().unwrap();
            mock.captured.clear();
            mock.inputs.clear();
        }
    }

    /// Runs a command, returning its result even when it exits non-zero.
    pub(crate) async fn try_run(&self, cmd: &str) -> KeymasterResult<ExecResult> {
        #[cfg(test)]
        if let Some(mock) = &self.mock {
            return Ok(Self::mock_exec(mock, cmd, None));
        }

        shell::exec(cmd).await
    }

    /// Runs a command and fails on non-zero exit.
    pub(crate) async fn run(&self, cmd: &str) -> KeymasterResult<String> {
        self.checked(cmd, None).await
    }

    /// Runs a command with `input` on stdin and fails on non-zero exit.
    pub(crate) async fn run_with_input(&self, cmd: &str, input: &str) -> KeymasterResult<String> {
        self.checked(cmd, Some(input)).await
    }

    async fn checked(&self, cmd: &str, input: Option<&str>) -> KeymasterResult<String> {
        #[cfg(test)]
        if let Some(mock) = &self.mock {
            let result = Self::mock_exec(mock, cmd, input);
            if result.success() {
                return Ok(result.stdout);
            }
            return Err(keymaster_common::KeymasterError::ShellCommandFailed {
                command: cmd.to_string(),
                exit_code: result.exit_code,
                output: result.combined_output(),
            });
        }

        match input {
            Some(input) => shell::exec_with_input_or_throw(cmd, input).await,
            None => shell::exec_or_throw(cmd).await,
        }
    }

    #[cfg(test)]
    fn mock_exec(mock: &std::sync::Mutex<MockShell>, cmd: &str, input: Option<&str>) -> ExecResult {
        let mut mock = mock.lock().unwrap();
        mock.captured.push(cmd.to_string());
        mock.inputs.push(input.map(str::to_string));

        let (exit_code, output) = mock
            .responses
            .iter()
            .find(|(fragment, _, _)| cmd.contains(fragment.as_str()))
            .map(|(_, code, out)| (*code, out.clone()))
            .unwrap_or((0, String::new()));

        if exit_code == 0 {
            ExecResult {
                exit_code,
                stdout: output,
                stderr: String::new(),
            }
        } else {
            ExecResult {
                exit_code,
                stdout: String::new(),
                stderr: output,
            }
        }
    }
}
