use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub jwt_expiry_days: u64,
    pub blob_dir: String,
    pub host: String,
    pub port: u16,
    /// Allowed cross-origin sources. Empty means local development origins only.
    pub cors_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            db_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".into())
                .parse()?,
            jwt_secret: required("JWT_SECRET")?,
            jwt_expiry_days: env::var("JWT_EXPIRY_DAYS")
                .unwrap_or_else(|_| "7".into())
                .parse()?,
            blob_dir: env::var("BLOB_DIR").unwrap_or_else(|_| "./data/blobs".into()),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            cors_origins: parse_origins(&env::var("CORS_ORIGINS").unwrap_or_default()),
            max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                .unwrap_or_else(|_| (50 * 1024 * 1024).to_string())
                .parse()?,
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("Missing required env var: {}", key))
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|o| o.trim().trim_end_matches('/').to_string())
        .filter(|o| !o.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_are_trimmed_and_empty_entries_dropped() {
        let origins = parse_origins(" https://app.example.org/ ,, http://localhost:5173");
        assert_eq!(
            origins,
            vec!["https://app.example.org".to_string(), "http://localhost:5173".to_string()]
        );
        assert!(parse_origins("").is_empty());
    }

    #[test]
    fn blank_required_value_is_rejected() {
        env::set_var("TASKBOARD_TEST_BLANK_KEY", "   ");
        let err = required("TASKBOARD_TEST_BLANK_KEY").unwrap_err();
        assert!(err.to_string().contains("TASKBOARD_TEST_BLANK_KEY"));
        assert!(required("TASKBOARD_TEST_SURELY_UNSET_KEY").is_err());
    }
}
