use crate::cli::{actions::Action, globals::GlobalArgs};
use crate::gateway::{
    proxy::{Upstream, UpstreamSet},
    ratelimit::RateSettings,
    GatewaySettings,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::time::Duration;
use tracing::warn;
use url::Url;

const DEV_TOKEN_SECRET: &str = "platelink-dev-token-secret";
const DEV_JWT_SECRET: &str = "platelink-dev-jwt-secret";

/// The seven backend prefixes and the CLI argument each base URL comes from.
const UPSTREAMS: &[(&str, &str, &str)] = &[
    ("auth", "/api/auth", "upstream-auth"),
    ("scan", "/api/scan", "upstream-scan"),
    ("vehicles", "/api/vehicles", "upstream-vehicles"),
    ("contact", "/api/contact", "upstream-contact"),
    ("calls", "/api/calls", "upstream-calls"),
    ("incidents", "/api/incidents", "upstream-incidents"),
    ("subscriptions", "/api/subscriptions", "upstream-subscriptions"),
];

pub fn handler(matches: &clap::ArgMatches) -> Result<(Action, GlobalArgs)> {
    let globals = resolve_globals(matches);

    let mut upstreams = Vec::with_capacity(UPSTREAMS.len());
    for (name, prefix, arg) in UPSTREAMS {
        let raw = matches
            .get_one::<String>(arg)
            .with_context(|| format!("missing upstream argument: --{arg}"))?;
        let url = Url::parse(raw).with_context(|| format!("invalid URL for --{arg}: {raw}"))?;
        upstreams.push(Upstream::new(*name, *prefix, &url));
    }

    let seconds = |arg: &str, default: u64| -> Duration {
        Duration::from_secs(matches.get_one::<u64>(arg).copied().unwrap_or(default))
    };

    let limits = RateSettings {
        global_limit: matches.get_one::<u64>("global-limit").copied().unwrap_or(100),
        global_window: seconds("global-window-seconds", 60),
        fingerprint_limit: matches
            .get_one::<u64>("fingerprint-limit")
            .copied()
            .unwrap_or(5),
        fingerprint_window: seconds("fingerprint-window-seconds", 600),
        otp_send_limit: matches
            .get_one::<u64>("otp-send-limit")
            .copied()
            .unwrap_or(5),
        otp_verify_limit: matches
            .get_one::<u64>("otp-verify-limit")
            .copied()
            .unwrap_or(10),
        otp_window: seconds("otp-window-seconds", 60),
    };

    let settings = GatewaySettings {
        counter_dsn: matches.get_one::<String>("counter-dsn").cloned(),
        jwt_issuer: matches
            .get_one::<String>("jwt-issuer")
            .cloned()
            .unwrap_or_else(|| "platelink".to_string()),
        upstreams: UpstreamSet::new(upstreams),
        limits,
        ip_header: matches
            .get_one::<String>("ip-header")
            .cloned()
            .unwrap_or_else(|| "x-forwarded-for".to_string()),
        upstream_timeout: seconds("upstream-timeout-seconds", 30),
        health_timeout: seconds("health-timeout-seconds", 3),
    };

    let action = Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        settings,
    };

    Ok((action, globals))
}

/// Missing secrets are a startup error unless `--insecure-dev-secrets` was
/// passed, in which case fixed development values are used and logged.
fn resolve_globals(matches: &clap::ArgMatches) -> GlobalArgs {
    let dev = matches.get_flag("insecure-dev-secrets");

    let secret = |arg: &str, dev_value: &str| -> SecretString {
        match matches.get_one::<String>(arg) {
            Some(value) => SecretString::from(value.clone()),
            None => {
                warn!("--{arg} not set, using the INSECURE development fallback");
                SecretString::from(dev_value.to_string())
            }
        }
    };

    GlobalArgs::new(
        secret("token-secret", DEV_TOKEN_SECRET),
        secret("jwt-secret", DEV_JWT_SECRET),
        dev,
    )
}
