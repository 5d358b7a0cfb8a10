use std::{env, time::Duration};

use log::*;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_DISPENSE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_CONNECT_ATTEMPTS: u32 = 1;

/// Configuration for the dispense gateway transport and dispatcher timing.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// The websocket endpoint of the machine-control gateway. Dispatch calls fail with `NotConfigured` when unset.
    pub gateway_url: Option<String>,
    /// How long a connection may take to establish before the attempt fails.
    pub connect_timeout: Duration,
    /// The quiet period after a successful send before the attempt is considered successful (fire-and-forget).
    pub settle_timeout: Duration,
    /// The pause between consecutive unit dispatches in a batch, to let the machine mechanically settle.
    pub dispense_delay: Duration,
    /// Bounded automatic retry on connect timeout. The default of 1 means no automatic retry.
    pub connect_attempts: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_url: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
            dispense_delay: DEFAULT_DISPENSE_DELAY,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
        }
    }
}

impl GatewayConfig {
    pub fn new(gateway_url: &str) -> Self {
        Self { gateway_url: Some(gateway_url.to_string()), ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let gateway_url = env::var("VND_GATEWAY_URL").ok();
        if gateway_url.is_none() {
            warn!("🔧️ VND_GATEWAY_URL is not set. Dispense commands cannot be dispatched until it is configured.");
        }
        let connect_timeout = duration_from_env("VND_GATEWAY_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT);
        let settle_timeout = duration_from_env("VND_GATEWAY_SETTLE_TIMEOUT_MS", DEFAULT_SETTLE_TIMEOUT);
        let dispense_delay = duration_from_env("VND_DISPENSE_DELAY_MS", DEFAULT_DISPENSE_DELAY);
        let connect_attempts = env::var("VND_GATEWAY_CONNECT_ATTEMPTS")
            .ok()
            .and_then(|s| {
                s.parse::<u32>()
                    .map_err(|e| warn!("🔧️ Invalid value for VND_GATEWAY_CONNECT_ATTEMPTS ({s}). {e}"))
                    .ok()
            })
            .map(|n| n.max(1))
            .unwrap_or(DEFAULT_CONNECT_ATTEMPTS);
        Self { gateway_url, connect_timeout, settle_timeout, dispense_delay, connect_attempts }
    }
}

fn duration_from_env(var: &str, default: Duration) -> Duration {
    match env::var(var) {
        Ok(s) => s.parse::<u64>().map(Duration::from_millis).unwrap_or_else(|e| {
            warn!("🔧️ {s} is not a valid millisecond value for {var}. {e} Using the default, {default:?}, instead.");
            default
        }),
        Err(_) => default,
    }
}
