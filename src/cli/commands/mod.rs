use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ArgAction, ColorChoice, Command,
};

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

fn upstream_arg(name: &'static str, env: &'static str, default_url: &'static str) -> Arg {
    let service = name.trim_start_matches("upstream-");
    Arg::new(name)
        .long(name)
        .help(format!("Base URL of the {service} service"))
        .env(env)
        .default_value(default_url)
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("platelink")
        .about("Anonymous vehicle-contact gateway")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("PLATELINK_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("counter-dsn")
                .long("counter-dsn")
                .help("Shared rate-limit counter store connection string; omit for a per-instance in-memory store")
                .env("PLATELINK_COUNTER_DSN"),
        )
        .arg(
            Arg::new("token-secret")
                .long("token-secret")
                .help("Secret the scan-session token key is derived from")
                .env("PLATELINK_TOKEN_SECRET")
                .required_unless_present("insecure-dev-secrets"),
        )
        .arg(
            Arg::new("jwt-secret")
                .long("jwt-secret")
                .help("HS256 secret for owner JWT verification")
                .env("PLATELINK_JWT_SECRET")
                .required_unless_present("insecure-dev-secrets"),
        )
        .arg(
            Arg::new("jwt-issuer")
                .long("jwt-issuer")
                .help("Expected issuer of owner JWTs")
                .default_value("platelink")
                .env("PLATELINK_JWT_ISSUER"),
        )
        .arg(
            Arg::new("insecure-dev-secrets")
                .long("insecure-dev-secrets")
                .help("Run with deterministic development secrets instead of failing on missing ones")
                .env("PLATELINK_INSECURE_DEV_SECRETS")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("ip-header")
                .long("ip-header")
                .help("Header carrying the client IP, set by the edge in front of the gateway")
                .default_value("x-forwarded-for")
                .env("PLATELINK_IP_HEADER"),
        )
        .arg(upstream_arg("upstream-auth", "PLATELINK_UPSTREAM_AUTH", "http://127.0.0.1:7101"))
        .arg(upstream_arg("upstream-scan", "PLATELINK_UPSTREAM_SCAN", "http://127.0.0.1:7102"))
        .arg(upstream_arg(
            "upstream-vehicles",
            "PLATELINK_UPSTREAM_VEHICLES",
            "http://127.0.0.1:7103",
        ))
        .arg(upstream_arg(
            "upstream-contact",
            "PLATELINK_UPSTREAM_CONTACT",
            "http://127.0.0.1:7104",
        ))
        .arg(upstream_arg(
            "upstream-calls",
            "PLATELINK_UPSTREAM_CALLS",
            "http://127.0.0.1:7105",
        ))
        .arg(upstream_arg(
            "upstream-incidents",
            "PLATELINK_UPSTREAM_INCIDENTS",
            "http://127.0.0.1:7106",
        ))
        .arg(upstream_arg(
            "upstream-subscriptions",
            "PLATELINK_UPSTREAM_SUBSCRIPTIONS",
            "http://127.0.0.1:7107",
        ))
        .arg(
            Arg::new("global-limit")
                .long("global-limit")
                .help("Requests allowed per identity per global window")
                .default_value("100")
                .env("PLATELINK_GLOBAL_LIMIT")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("global-window-seconds")
                .long("global-window-seconds")
                .help("Global window length in seconds")
                .default_value("60")
                .env("PLATELINK_GLOBAL_WINDOW_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("fingerprint-limit")
                .long("fingerprint-limit")
                .help("Scan initiations allowed per device fingerprint per window")
                .default_value("5")
                .env("PLATELINK_FINGERPRINT_LIMIT")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("fingerprint-window-seconds")
                .long("fingerprint-window-seconds")
                .help("Fingerprint window length in seconds")
                .default_value("600")
                .env("PLATELINK_FINGERPRINT_WINDOW_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("otp-send-limit")
                .long("otp-send-limit")
                .help("OTP sends allowed per phone per window")
                .default_value("5")
                .env("PLATELINK_OTP_SEND_LIMIT")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("otp-verify-limit")
                .long("otp-verify-limit")
                .help("OTP verifications allowed per phone per window")
                .default_value("10")
                .env("PLATELINK_OTP_VERIFY_LIMIT")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("otp-window-seconds")
                .long("otp-window-seconds")
                .help("OTP window length in seconds")
                .default_value("60")
                .env("PLATELINK_OTP_WINDOW_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("upstream-timeout-seconds")
                .long("upstream-timeout-seconds")
                .help("Per-request upstream timeout in seconds")
                .default_value("30")
                .env("PLATELINK_UPSTREAM_TIMEOUT_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("health-timeout-seconds")
                .long("health-timeout-seconds")
                .help("Per-probe health check timeout in seconds")
                .default_value("3")
                .env("PLATELINK_HEALTH_TIMEOUT_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("PLATELINK_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "platelink");
        assert_eq!(
            command.get_about().unwrap().to_string(),
            "Anonymous vehicle-contact gateway"
        );
        assert_eq!(
            command.get_version().unwrap().to_string(),
            env!("CARGO_PKG_VERSION")
        );
    }

    #[test]
    fn test_check_port_and_secrets() {
        let command = new();
        let matches = command.get_matches_from(vec![
            "platelink",
            "--port",
            "8443",
            "--token-secret",
            "token-secret",
            "--jwt-secret",
            "jwt-secret",
        ]);

        assert_eq!(matches.get_one::<u16>("port").copied(), Some(8443));
        assert_eq!(
            matches.get_one::<String>("token-secret").cloned(),
            Some("token-secret".to_string())
        );
        assert_eq!(
            matches.get_one::<String>("jwt-secret").cloned(),
            Some("jwt-secret".to_string())
        );
        assert_eq!(
            matches.get_one::<String>("jwt-issuer").cloned(),
            Some("platelink".to_string())
        );
        assert_eq!(matches.get_one::<u64>("global-limit").copied(), Some(100));
        assert_eq!(
            matches.get_one::<u64>("fingerprint-window-seconds").copied(),
            Some(600)
        );
    }

    #[test]
    fn test_dev_secrets_lift_requirements() {
        let command = new();
        let matches = command.get_matches_from(vec!["platelink", "--insecure-dev-secrets"]);
        assert!(matches.get_flag("insecure-dev-secrets"));
        assert_eq!(matches.get_one::<String>("token-secret"), None);
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("PLATELINK_PORT", Some("443")),
                ("PLATELINK_TOKEN_SECRET", Some("env-token-secret")),
                ("PLATELINK_JWT_SECRET", Some("env-jwt-secret")),
                ("PLATELINK_UPSTREAM_AUTH", Some("http://auth.internal:8080")),
                ("PLATELINK_GLOBAL_LIMIT", Some("250")),
                ("PLATELINK_LOG_LEVEL", Some("info")),
            ],
            || {
                let command = new();
                let matches = command.get_matches_from(vec!["platelink"]);
                assert_eq!(matches.get_one::<u16>("port").copied(), Some(443));
                assert_eq!(
                    matches.get_one::<String>("token-secret").cloned(),
                    Some("env-token-secret".to_string())
                );
                assert_eq!(
                    matches.get_one::<String>("upstream-auth").cloned(),
                    Some("http://auth.internal:8080".to_string())
                );
                assert_eq!(matches.get_one::<u64>("global-limit").copied(), Some(250));
                assert_eq!(matches.get_one::<u8>("verbosity").copied(), Some(2));
            },
        );
    }

    #[test]
    fn test_check_log_level_env() {
        // loop cover all possible value_parse
        let levels = vec!["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars(
                [
                    ("PLATELINK_LOG_LEVEL", Some(level)),
                    ("PLATELINK_TOKEN_SECRET", Some("secret")),
                    ("PLATELINK_JWT_SECRET", Some("secret")),
                ],
                || {
                    let command = new();
                    let matches = command.get_matches_from(vec!["platelink"]);
                    assert_eq!(
                        matches.get_one::<u8>("verbosity").copied(),
                        Some(index as u8)
                    );
                },
            );
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        let levels = vec!["error", "warn", "info", "debug", "trace"];
        for (index, _) in levels.iter().enumerate() {
            temp_env::with_vars([("PLATELINK_LOG_LEVEL", None::<String>)], || {
                let mut args = vec![
                    "platelink".to_string(),
                    "--token-secret".to_string(),
                    "secret".to_string(),
                    "--jwt-secret".to_string(),
                    "secret".to_string(),
                ];

                if index > 0 {
                    let v = format!("-{}", "v".repeat(index));
                    args.push(v);
                }

                let command = new();
                let matches = command.get_matches_from(args);

                assert_eq!(
                    matches.get_one::<u8>("verbosity").copied(),
                    Some(index as u8)
                );
            });
        }
    }
}
