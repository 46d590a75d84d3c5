// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io;
use std::process::Output;
use std::time::Duration;

use tokio::process::Command;

/// Execute a command with a timeout.
/// Returns Ok(Output) if the command completes within the timeout,
/// Err if timeout occurs or command fails to start. The child is killed
/// when the timeout fires.
pub async fn run_command_with_timeout(
    command: &str,
    args: &[&str],
    timeout: Duration,
) -> io::Result<Output> {
    let child = Command::new(command)
        .args(args)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, child).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("Command timed out after {timeout:?}"),
        )),
    }
}

/// Run a shell command line through `/bin/bash -c` with a timeout.
pub async fn run_shell_with_timeout(command_line: &str, timeout: Duration) -> io::Result<Output> {
    run_command_with_timeout("/bin/bash", &["-c", command_line], timeout).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shell_command_output() {
        let out = run_shell_with_timeout("echo hello", Duration::from_secs(5))
            .await
            .expect("bash should be available");
        assert!(String::from_utf8_lossy(&out.stdout).contains("hello"));
    }

    #[tokio::test]
    async fn test_command_times_out() {
        let err = run_command_with_timeout("sleep", &["5"], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
