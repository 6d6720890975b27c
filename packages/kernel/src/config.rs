use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;

/// How bearer tokens are resolved to actors.
#[derive(Debug, Clone)]
pub enum AuthMode {
    /// Tokens are `kind:id[:org]` strings. Local development only.
    Dev,
    /// Tokens are HS256 JWTs issued by an external identity provider.
    External { jwt_secret: String },
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub auth_mode: AuthMode,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let auth_mode = match env::var("AUTH_MODE")
            .unwrap_or_else(|_| "dev".to_string())
            .to_lowercase()
            .as_str()
        {
            "dev" => AuthMode::Dev,
            "external" => AuthMode::External {
                jwt_secret: env::var("KERNEL_JWT_SECRET")
                    .context("KERNEL_JWT_SECRET must be set when AUTH_MODE=external")?,
            },
            other => bail!("AUTH_MODE must be 'dev' or 'external', got '{other}'"),
        };

        Ok(Self {
            host: env::var("KERNEL_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("KERNEL_PORT")
                .unwrap_or_else(|_| "7400".to_string())
                .parse()
                .context("KERNEL_PORT must be a valid number")?,
            db_path: env::var("KERNEL_DB_PATH").unwrap_or_else(|_| "kernel.db".to_string()),
            auth_mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_is_empty() {
        // Serialized by cargo's per-process test env; only asserts defaults.
        env::remove_var("KERNEL_PORT");
        env::remove_var("KERNEL_HOST");
        env::remove_var("AUTH_MODE");
        let config = Config::from_env().unwrap();
        assert_eq!(config.port, 7400);
        assert!(matches!(config.auth_mode, AuthMode::Dev));
    }
}
