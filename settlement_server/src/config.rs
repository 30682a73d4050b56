use std::{env, net::IpAddr, str::FromStr, time::Duration as StdDuration};

use chrono::Duration;
use log::*;
use settlement_common::{parse_boolean_flag, Cents, Rate, Secret, DEFAULT_CURRENCY_CODE};
use settlement_engine::{
    escrow::{EscrowPolicy, GatewayRetryPolicy, RemainderPolicy},
    totals::TotalsPolicy,
};

const DEFAULT_SETTLE_HOST: &str = "127.0.0.1";
const DEFAULT_SETTLE_PORT: u16 = 8370;
const DEFAULT_HOLD_PERIOD_DAYS: i64 = 7;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
const DEFAULT_SWEEP_BATCH_SIZE: i64 = 50;
const DEFAULT_MISMATCH_TOLERANCE_CENTS: i64 = 1;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_GATEWAY_MAX_ATTEMPTS: u32 = 3;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// The single currency that orders are priced and settled in
    pub currency: String,
    /// How long funds are held after shipment or delivery before the sweep releases them
    pub hold_period: Duration,
    pub sweep_interval: StdDuration,
    /// The most allocations released per sweep tick
    pub sweep_batch_size: i64,
    pub tax_shipping: bool,
    pub remainder_policy: RemainderPolicy,
    pub mismatch_tolerance: Cents,
    /// If set, a global commission rule with this rate is created at start-up unless one already exists.
    pub default_commission_rate: Option<Rate>,
    /// If true, the X-Forwarded-For header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_x_forwarded_for: bool,
    /// If true, the Forwarded header will be used to determine the client's IP address.
    pub use_forwarded: bool,
    pub webhooks: WebhookConfig,
    pub gateway: GatewayConfig,
}

#[derive(Clone, Debug, Default)]
pub struct WebhookConfig {
    pub hmac_secret: Secret<String>,
    /// If false, webhook signatures are not checked. **DANGER**
    pub hmac_checks: bool,
    /// If supplied, webhook calls are only accepted from these addresses.
    pub whitelist: Option<Vec<IpAddr>>,
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Base URL of the payment gateway's REST API
    pub url: String,
    pub api_key: Secret<String>,
    pub timeout: StdDuration,
    pub max_attempts: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: String::default(),
            api_key: Secret::default(),
            timeout: StdDuration::from_secs(DEFAULT_GATEWAY_TIMEOUT_SECS),
            max_attempts: DEFAULT_GATEWAY_MAX_ATTEMPTS,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SETTLE_HOST.to_string(),
            port: DEFAULT_SETTLE_PORT,
            database_url: String::default(),
            currency: DEFAULT_CURRENCY_CODE.to_string(),
            hold_period: Duration::days(DEFAULT_HOLD_PERIOD_DAYS),
            sweep_interval: StdDuration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            sweep_batch_size: DEFAULT_SWEEP_BATCH_SIZE,
            tax_shipping: false,
            remainder_policy: RemainderPolicy::default(),
            mismatch_tolerance: Cents::from(DEFAULT_MISMATCH_TOLERANCE_CENTS),
            default_commission_rate: None,
            use_x_forwarded_for: false,
            use_forwarded: false,
            webhooks: WebhookConfig { hmac_checks: true, ..Default::default() },
            gateway: GatewayConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("SETTLE_HOST").ok().unwrap_or_else(|| DEFAULT_SETTLE_HOST.into());
        let port = parse_env("SETTLE_PORT", DEFAULT_SETTLE_PORT);
        let database_url = env::var("SETTLE_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ SETTLE_DATABASE_URL is not set. Please set it to the URL for the settlement database.");
            String::default()
        });
        let currency = env::var("SETTLE_CURRENCY")
            .ok()
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_CURRENCY_CODE.into());
        let hold_days = parse_env("SETTLE_HOLD_PERIOD_DAYS", DEFAULT_HOLD_PERIOD_DAYS).max(0);
        let sweep_secs = parse_env("SETTLE_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS).max(1);
        let sweep_batch_size = parse_env("SETTLE_SWEEP_BATCH_SIZE", DEFAULT_SWEEP_BATCH_SIZE).max(1);
        let tax_shipping = parse_boolean_flag(env::var("SETTLE_TAX_SHIPPING").ok(), false);
        let remainder_policy = parse_env("SETTLE_REMAINDER_POLICY", RemainderPolicy::default());
        let tolerance = parse_env("SETTLE_MISMATCH_TOLERANCE_CENTS", DEFAULT_MISMATCH_TOLERANCE_CENTS).max(0);
        let default_commission_rate = env::var("SETTLE_DEFAULT_COMMISSION_RATE").ok().and_then(|s| {
            Rate::from_str(&s)
                .map_err(|e| {
                    warn!("🪛️ Ignoring SETTLE_DEFAULT_COMMISSION_RATE. {e}. No default commission rule will be seeded.")
                })
                .ok()
        });
        let use_x_forwarded_for = parse_boolean_flag(env::var("SETTLE_USE_X_FORWARDED_FOR").ok(), false);
        let use_forwarded = parse_boolean_flag(env::var("SETTLE_USE_FORWARDED").ok(), false);
        let webhooks = WebhookConfig::from_env_or_defaults();
        let gateway = GatewayConfig::from_env_or_defaults();
        Self {
            host,
            port,
            database_url,
            currency,
            hold_period: Duration::days(hold_days),
            sweep_interval: StdDuration::from_secs(sweep_secs),
            sweep_batch_size,
            tax_shipping,
            remainder_policy,
            mismatch_tolerance: Cents::from(tolerance),
            default_commission_rate,
            use_x_forwarded_for,
            use_forwarded,
            webhooks,
            gateway,
        }
    }

    pub fn escrow_policy(&self) -> EscrowPolicy {
        let gateway = GatewayRetryPolicy {
            max_attempts: self.gateway.max_attempts,
            timeout: self.gateway.timeout,
            ..Default::default()
        };
        EscrowPolicy::default()
            .with_currency(&self.currency)
            .with_hold_period(self.hold_period)
            .with_remainder_policy(self.remainder_policy)
            .with_mismatch_tolerance(self.mismatch_tolerance)
            .with_sweep_batch_size(self.sweep_batch_size)
            .with_gateway_retries(gateway)
    }

    pub fn totals_policy(&self) -> TotalsPolicy {
        TotalsPolicy { currency: self.currency.clone(), tax_shipping: self.tax_shipping }
    }
}

impl WebhookConfig {
    pub fn from_env_or_defaults() -> Self {
        let hmac_secret = env::var("SETTLE_WEBHOOK_HMAC_SECRET").ok().unwrap_or_else(|| {
            error!(
                "🪛️ SETTLE_WEBHOOK_HMAC_SECRET is not set. Please set it to the key your payment gateway and carriers \
                 sign webhooks with."
            );
            String::default()
        });
        let hmac_checks = parse_boolean_flag(env::var("SETTLE_WEBHOOK_HMAC_CHECKS").ok(), true);
        if !hmac_checks {
            warn!("🚨️ Webhook HMAC checks are DISABLED. Anyone can post captures and shipments to this server.");
        }
        let whitelist = env::var("SETTLE_WEBHOOK_IP_WHITELIST").ok().and_then(|s| parse_whitelist(&s));
        Self { hmac_secret: Secret::new(hmac_secret), hmac_checks, whitelist }
    }
}

impl GatewayConfig {
    pub fn from_env_or_defaults() -> Self {
        let url = env::var("SETTLE_GATEWAY_URL").ok().unwrap_or_else(|| {
            error!("🪛️ SETTLE_GATEWAY_URL is not set. Refunds cannot be issued until it is configured.");
            String::default()
        });
        let api_key = Secret::new(env::var("SETTLE_GATEWAY_API_KEY").ok().unwrap_or_default());
        let timeout = StdDuration::from_secs(parse_env("SETTLE_GATEWAY_TIMEOUT_SECS", DEFAULT_GATEWAY_TIMEOUT_SECS));
        let max_attempts = parse_env("SETTLE_GATEWAY_MAX_ATTEMPTS", DEFAULT_GATEWAY_MAX_ATTEMPTS).max(1);
        Self { url, api_key, timeout, max_attempts }
    }
}

/// Reads `name` from the environment, falling back to `default` (with a log entry) if it is missing or malformed.
fn parse_env<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(s) => s.trim().parse::<T>().unwrap_or_else(|e| {
            error!("🪛️ {s} is not a valid value for {name}. {e} Using the default, {default}, instead.");
            default
        }),
        Err(_) => {
            debug!("🪛️ {name} is not set. Using the default, {default}.");
            default
        },
    }
}

/// A comma-separated list of IP addresses. "none", "false" or "0" explicitly disable the whitelist.
fn parse_whitelist(s: &str) -> Option<Vec<IpAddr>> {
    if ["none", "false", "0", ""].contains(&s.trim().to_lowercase().as_str()) {
        info!("🪛️ Webhook IP whitelist is disabled.");
        return None;
    }
    let ip_addrs = s
        .split(',')
        .filter_map(|s| {
            s.trim()
                .parse::<IpAddr>()
                .map_err(|e| warn!("🪛️ Ignoring invalid IP address ({s}) in SETTLE_WEBHOOK_IP_WHITELIST: {e}"))
                .ok()
        })
        .collect::<Vec<IpAddr>>();
    if ip_addrs.is_empty() {
        warn!("🚨️ The webhook IP whitelist was configured, but is empty. No webhook calls will be accepted.");
    } else {
        info!("🪛️ Webhook IP whitelist: {ip_addrs:?}");
    }
    Some(ip_addrs)
}
