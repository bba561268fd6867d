use std::time::Duration;

pub const DEFAULT_CLOUDFLARED_IMAGE: &str = "cloudflare/cloudflared:latest";

/// Operator wide settings, read from flags or the environment.
#[derive(clap::Args, Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Image used for the cloudflared deployment unless a tunnel overrides it
    #[arg(long, env = "CLOUDFLARED_IMAGE", default_value = DEFAULT_CLOUDFLARED_IMAGE)]
    pub cloudflared_image: String,

    /// Seconds between passes over a tunnel that reconciled successfully
    #[arg(long, env = "REQUEUE_INTERVAL", default_value_t = 300, value_name = "SECONDS")]
    pub requeue_interval: u64,

    /// Seconds before a failed pass is retried
    #[arg(long, env = "ERROR_REQUEUE_INTERVAL", default_value_t = 30, value_name = "SECONDS")]
    pub error_requeue_interval: u64,

    /// Deadline for a single pass; in-flight calls are dropped when it elapses
    #[arg(long, env = "RECONCILE_TIMEOUT", default_value_t = 60, value_name = "SECONDS")]
    pub reconcile_timeout: u64,
}

impl Settings {
    pub fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_interval)
    }

    pub fn error_requeue_interval(&self) -> Duration {
        Duration::from_secs(self.error_requeue_interval)
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cloudflared_image: DEFAULT_CLOUDFLARED_IMAGE.to_owned(),
            requeue_interval: 300,
            error_requeue_interval: 30,
            reconcile_timeout: 60,
        }
    }
}
