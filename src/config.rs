const ADMIN_KEY_PLACEHOLDER: &str = "CHANGE_ME_ADMIN_KEY";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub admin_key: String,
    /// Base URL that invitation links point at. Set via INCUBATOR_PUBLIC_URL.
    pub public_base_url: String,
    /// Outbound email API. `None` disables delivery (dev mode).
    pub mail: Option<MailConfig>,
    /// Seconds between invitation redelivery sweeps. 0 = disabled.
    /// Set via INCUBATOR_REDELIVERY_SECS. Default: 300.
    pub redelivery_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_url: String,
    pub api_key: String,
    pub sender_email: String,
    pub sender_name: Option<String>,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let admin_key = std::env::var("INCUBATOR_ADMIN_KEY")
        .unwrap_or_else(|_| ADMIN_KEY_PLACEHOLDER.into());

    if admin_key == ADMIN_KEY_PLACEHOLDER {
        let env_mode = std::env::var("INCUBATOR_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "INCUBATOR_ADMIN_KEY is still the insecure placeholder. \
                 Set a proper key before running in production."
            );
        }
        eprintln!("⚠️  INCUBATOR_ADMIN_KEY is not set, using insecure placeholder.");
    }

    Ok(Config {
        port: std::env::var("INCUBATOR_PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .unwrap_or(3000),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/incubator".into()),
        admin_key,
        public_base_url: std::env::var("INCUBATOR_PUBLIC_URL")
            .unwrap_or_else(|_| "http://localhost:3000".into()),
        mail: load_mail(),
        redelivery_interval_secs: std::env::var("INCUBATOR_REDELIVERY_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300),
    })
}

fn load_mail() -> Option<MailConfig> {
    let non_empty = |key: &str| {
        std::env::var(key)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let api_key = non_empty("MAIL_API_KEY")?;
    let sender_email = non_empty("MAIL_SENDER_EMAIL")?;
    Some(MailConfig {
        api_url: non_empty("MAIL_API_URL")
            .unwrap_or_else(|| "https://api.brevo.com/v3/smtp/email".into()),
        api_key,
        sender_email,
        sender_name: non_empty("MAIL_SENDER_NAME"),
    })
}
