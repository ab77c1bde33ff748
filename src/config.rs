use std::path::PathBuf;
use time::Date;
use time_tz::Tz;

#[derive(Clone)]
pub struct AppConfig {
    pub root: PathBuf,
    pub app_name: String,
    pub trip: TripWindow,
    pub reference_zone: &'static Tz,
    pub cutoff_hour: u8,
    pub admin_emails: Vec<String>,
    pub auth: Option<AuthConfig>,
}

/// Inclusive date range outside which no content is ever unlockable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripWindow {
    pub start: Date,
    pub end: Date,
}

#[derive(Clone)]
pub struct AuthConfig {
    pub key: String,
    pub token_ttl: time::Duration,
    pub cookie_name: String,
    pub cookie_secure: bool,
}

#[cfg(test)]
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root: "/".into(),
            app_name: "Daydrop".to_string(),
            trip: TripWindow {
                start: time::macros::date!(2025 - 05 - 13),
                end: time::macros::date!(2025 - 06 - 27),
            },
            reference_zone: time_tz::timezones::get_by_name("Asia/Tokyo")
                .expect("reference timezone"),
            cutoff_hour: 7,
            admin_emails: Vec::new(),
            auth: None,
        }
    }
}
