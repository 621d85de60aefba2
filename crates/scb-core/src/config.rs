use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed runtime configuration, read from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub button_label_max_length: usize,

    // Document store (empty URL means the in-memory store)
    pub firebase_database_url: Option<String>,
    pub firebase_auth_token: Option<String>,
    pub store_timeout: Duration,

    // Roles
    pub bootstrap_admins: Vec<i64>,
    pub registration_observer_chat_id: Option<i64>,

    // Sessions
    pub session_idle_timeout: Option<Duration>,
    pub session_sweep_interval: Duration,

    // Fan-out
    pub fanout_recipient_timeout: Duration,
    pub fanout_concurrency: usize,

    // Listings
    pub announcement_page_size: usize,

    // Scheduler
    pub schedule_file: PathBuf,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,

    // Rate limiting
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process environment in `load`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);
        let parse_u64 = |key: &str| get(key).and_then(|s| s.trim().parse::<u64>().ok());
        let parse_bool = |key: &str| {
            get(key).map(|s| {
                matches!(
                    s.trim().to_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                )
            })
        };

        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })?;

        let firebase_database_url = get("FIREBASE_DATABASE_URL")
            .map(|s| s.trim().trim_end_matches('/').to_string());
        if let Some(url) = &firebase_database_url {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(Error::Config(format!(
                    "FIREBASE_DATABASE_URL must be an http(s) URL, got {url:?}"
                )));
            }
        }

        let registration_observer_chat_id = match get("REGISTRATION_OBSERVER_CHAT_ID") {
            Some(s) => Some(s.trim().parse::<i64>().map_err(|_| {
                Error::Config(format!("REGISTRATION_OBSERVER_CHAT_ID is not a chat id: {s:?}"))
            })?),
            None => None,
        };

        // 0 disables the idle timeout.
        let session_idle_timeout = match parse_u64("SESSION_IDLE_TIMEOUT_SECS").unwrap_or(900) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            telegram_bot_token,
            button_label_max_length: parse_u64("BUTTON_LABEL_MAX_LENGTH").unwrap_or(30) as usize,

            firebase_database_url,
            firebase_auth_token: get("FIREBASE_AUTH_TOKEN"),
            store_timeout: Duration::from_millis(parse_u64("STORE_TIMEOUT_MS").unwrap_or(10_000)),

            bootstrap_admins: parse_csv_i64(get("BOOTSTRAP_ADMINS")),
            registration_observer_chat_id,

            session_idle_timeout,
            session_sweep_interval: Duration::from_secs(
                parse_u64("SESSION_SWEEP_INTERVAL_SECS").unwrap_or(60).max(1),
            ),

            fanout_recipient_timeout: Duration::from_millis(
                parse_u64("FANOUT_RECIPIENT_TIMEOUT_MS").unwrap_or(5_000),
            ),
            fanout_concurrency: parse_u64("FANOUT_CONCURRENCY").unwrap_or(8).max(1) as usize,

            announcement_page_size: parse_u64("ANNOUNCEMENT_PAGE_SIZE")
                .unwrap_or(10)
                .clamp(1, 10) as usize,

            schedule_file: PathBuf::from(
                get("SCHEDULE_FILE").unwrap_or_else(|| "schedule.yaml".to_string()),
            ),

            audit_log_path: PathBuf::from(
                get("AUDIT_LOG_PATH").unwrap_or_else(|| "/tmp/student-council-audit.log".to_string()),
            ),
            audit_log_json: parse_bool("AUDIT_LOG_JSON").unwrap_or(false),

            rate_limit_enabled: parse_bool("RATE_LIMIT_ENABLED").unwrap_or(true),
            rate_limit_requests: parse_u64("RATE_LIMIT_REQUESTS").unwrap_or(20) as u32,
            rate_limit_window: Duration::from_secs(parse_u64("RATE_LIMIT_WINDOW").unwrap_or(60)),
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }
        out.push((key.to_string(), val));
    }
    out
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn token_is_required() {
        let err = from_pairs(&[]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(from_pairs(&[("TELEGRAM_BOT_TOKEN", "   ")]).is_err());
    }

    #[test]
    fn defaults_apply() {
        let cfg = from_pairs(&[("TELEGRAM_BOT_TOKEN", "t")]).unwrap();
        assert_eq!(cfg.session_idle_timeout, Some(Duration::from_secs(900)));
        assert_eq!(cfg.announcement_page_size, 10);
        assert_eq!(cfg.fanout_concurrency, 8);
        assert_eq!(cfg.fanout_recipient_timeout, Duration::from_millis(5000));
        assert!(cfg.firebase_database_url.is_none());
        assert!(cfg.bootstrap_admins.is_empty());
        assert!(cfg.rate_limit_enabled);
        assert_eq!(cfg.schedule_file, PathBuf::from("schedule.yaml"));
    }

    #[test]
    fn parses_overrides() {
        let cfg = from_pairs(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("FIREBASE_DATABASE_URL", "https://council.firebaseio.com/"),
            ("BOOTSTRAP_ADMINS", "1, 2,x,3"),
            ("REGISTRATION_OBSERVER_CHAT_ID", "-100123"),
            ("SESSION_IDLE_TIMEOUT_SECS", "0"),
            ("RATE_LIMIT_ENABLED", "off"),
        ])
        .unwrap();
        assert_eq!(
            cfg.firebase_database_url.as_deref(),
            Some("https://council.firebaseio.com")
        );
        assert_eq!(cfg.bootstrap_admins, vec![1, 2, 3]);
        assert_eq!(cfg.registration_observer_chat_id, Some(-100123));
        assert_eq!(cfg.session_idle_timeout, None);
        assert!(!cfg.rate_limit_enabled);
    }

    #[test]
    fn rejects_bad_database_url_and_observer() {
        assert!(from_pairs(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("FIREBASE_DATABASE_URL", "council.firebaseio.com"),
        ])
        .is_err());
        assert!(from_pairs(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("REGISTRATION_OBSERVER_CHAT_ID", "@council"),
        ])
        .is_err());
    }

    #[test]
    fn dotenv_strips_quotes_and_comments() {
        let parsed = parse_dotenv("# comment\nA=1\nB = \"two words\"\n=skip\nC='x'\nnoequals\n");
        assert_eq!(
            parsed,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "two words".to_string()),
                ("C".to_string(), "x".to_string()),
            ]
        );
    }
}
