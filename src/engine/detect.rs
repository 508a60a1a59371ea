//! Container engine availability detection with platform guidance.
//!
//! Checks whether the Docker binary is installed (on PATH) and the daemon is
//! responding, and supplies platform-appropriate install or startup hints for
//! the failure messages a test run surfaces when its needs cannot be
//! provisioned. Detection relies on [`connect_docker`]'s socket fallbacks;
//! on Windows only the default named pipe is probed.

use crate::engine::connect_docker;

/// Engine daemon availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// Binary found on PATH and daemon responding to ping.
    Available,
    /// `docker` binary not found on PATH.
    NotInstalled,
    /// Binary found but daemon not responding.
    NotRunning,
}

impl EngineStatus {
    /// Returns true if the engine is ready for provisioning.
    pub fn is_ok(&self) -> bool {
        matches!(self, EngineStatus::Available)
    }

    /// Human-readable status string.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineStatus::Available => "available",
            EngineStatus::NotInstalled => "not installed",
            EngineStatus::NotRunning => "not running",
        }
    }
}

/// Host platform, for install guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOS,
    Linux,
    Windows,
}

impl Platform {
    /// Detect the current platform.
    pub fn current() -> Self {
        match std::env::consts::OS {
            "macos" => Platform::MacOS,
            "windows" => Platform::Windows,
            _ => Platform::Linux,
        }
    }

    /// Installation instructions for Docker on this platform.
    pub fn install_hint(&self) -> &'static str {
        match self {
            Platform::MacOS => {
                "Install Docker Desktop: https://docs.docker.com/desktop/install/mac-install/"
            }
            Platform::Linux => "Install Docker Engine: https://docs.docker.com/engine/install/",
            Platform::Windows => {
                "Install Docker Desktop: https://docs.docker.com/desktop/install/windows-install/"
            }
        }
    }

    /// Instructions to start the daemon on this platform.
    pub fn start_hint(&self) -> &'static str {
        match self {
            Platform::MacOS => "Start Docker Desktop from Applications, or run: open -a Docker",
            Platform::Linux => "Start the Docker daemon: sudo systemctl start docker",
            Platform::Windows => "Start Docker Desktop from the Start menu",
        }
    }
}

/// Result of an engine detection check.
pub struct EngineDetection {
    pub status: EngineStatus,
    pub platform: Platform,
}

/// Check whether the container engine is installed and running.
pub async fn check_engine() -> EngineDetection {
    let platform = Platform::current();

    if !engine_binary_exists() {
        return EngineDetection {
            status: EngineStatus::NotInstalled,
            platform,
        };
    }

    let status = if connect_docker().await.is_ok() {
        EngineStatus::Available
    } else {
        EngineStatus::NotRunning
    };

    EngineDetection { status, platform }
}

/// Check if the `docker` binary exists on PATH.
fn engine_binary_exists() -> bool {
    #[cfg(unix)]
    {
        std::process::Command::new("which")
            .arg("docker")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }
    #[cfg(windows)]
    {
        std::process::Command::new("where")
            .arg("docker")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }
}
