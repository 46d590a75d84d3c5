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

//! Unified error types for the exporter.
//!
//! Every subsystem (config store, GPU agent client, workload sources, health
//! engine, orchestrator client) reports failures through this one enum so
//! that loop boundaries can log and swallow them uniformly.

use thiserror::Error;

/// The main error type for exporter operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The metrics config document could not be applied.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A JSON document (config, job env, profiler output) failed to parse.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred.
    ///
    /// This wraps standard I/O errors that may occur during file
    /// system operations or process execution.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Failed to establish a gRPC channel.
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// A gRPC call returned a non-OK status.
    #[error("gRPC call failed: {0}")]
    Rpc(#[from] tonic::Status),

    /// The GPU agent client is not connected.
    #[error("GPU agent is not connected")]
    AgentUnavailable,

    /// The GPU agent answered with a non-OK API status.
    #[error("GPU agent returned api status {0}")]
    AgentStatus(i32),

    /// A device selector string could not be parsed.
    #[error("Invalid GPU selector: {0}")]
    Selector(String),

    /// The orchestrator API rejected a request or is not reachable.
    #[error("Orchestrator API error: {0}")]
    Orchestrator(String),

    /// HTTP client error talking to the orchestrator API.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// The on-box profiler helper failed or timed out.
    #[error("Profiler error: {0}")]
    Profiler(String),

    /// A debug-only operation was invoked while debug mode is off.
    #[error("Debug API is disabled")]
    DebugDisabled,

    /// A caller supplied a malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No health state has been computed yet.
    #[error("Health status not available")]
    HealthUnavailable,

    /// Filesystem watcher failure.
    #[error(transparent)]
    Watch(#[from] notify::Error),
}

/// A specialized Result type for exporter operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        match err {
            Error::DebugDisabled => tonic::Status::permission_denied(err.to_string()),
            Error::InvalidRequest(_) => tonic::Status::invalid_argument(err.to_string()),
            Error::HealthUnavailable => tonic::Status::unavailable(err.to_string()),
            Error::Rpc(status) => status,
            other => tonic::Status::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("unknown key".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: unknown key");

        let err = Error::AgentUnavailable;
        assert_eq!(err.to_string(), "GPU agent is not connected");

        let err = Error::AgentStatus(3);
        assert_eq!(err.to_string(), "GPU agent returned api status 3");

        let err = Error::Selector("3-1".to_string());
        assert_eq!(err.to_string(), "Invalid GPU selector: 3-1");

        let err = Error::DebugDisabled;
        assert_eq!(err.to_string(), "Debug API is disabled");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_into_status_codes() {
        let status: tonic::Status = Error::DebugDisabled.into();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);

        let status: tonic::Status = Error::InvalidRequest("len".to_string()).into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status: tonic::Status = Error::HealthUnavailable.into();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
