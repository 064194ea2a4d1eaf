//! Individual health checks.

use crate::lifecycle::Signal;

pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    /// `Err` carries the reason, shown only in verbose output and logs.
    fn check(&self) -> Result<(), String>;
}

/// Always healthy; proves the server is answering at all.
pub struct PingCheck;

impl HealthCheck for PingCheck {
    fn name(&self) -> &str {
        "ping"
    }

    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Unhealthy once shutdown has been requested.
pub struct ShutdownCheck {
    initiated: Signal,
}

impl ShutdownCheck {
    pub fn new(initiated: Signal) -> Self {
        Self { initiated }
    }
}

impl HealthCheck for ShutdownCheck {
    fn name(&self) -> &str {
        "shutdown"
    }

    fn check(&self) -> Result<(), String> {
        if self.initiated.is_signaled() {
            Err("process is shutting down".to_string())
        } else {
            Ok(())
        }
    }
}
