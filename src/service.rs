use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::engine::{BookingPolicy, Engine};
use crate::notify::NotifyHub;
use crate::reaper;

/// Runtime configuration, read from `TUTORBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    /// WAL appends between automatic compactions.
    pub compact_threshold: u64,
    /// Persist `confirmed → completed` for elapsed sessions in the
    /// background. The projection layer treats them as completed either way.
    pub auto_complete: bool,
    /// Reject booking requests outside the tutor's declared weekly hours.
    pub enforce_availability: bool,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("TUTORBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            compact_threshold: std::env::var("TUTORBOOK_COMPACT_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            auto_complete: env_flag("TUTORBOOK_AUTO_COMPLETE"),
            enforce_availability: env_flag("TUTORBOOK_ENFORCE_AVAILABILITY"),
            metrics_port: std::env::var("TUTORBOOK_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            auto_complete: false,
            enforce_availability: false,
            metrics_port: None,
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|s| s == "1" || s.eq_ignore_ascii_case("true"))
}

/// Composition root: opens the engine over its WAL and spawns the
/// maintenance tasks. One service per deployment.
pub struct BookingService {
    engine: Arc<Engine>,
    notify: Arc<NotifyHub>,
}

impl BookingService {
    pub fn open(config: &Config) -> io::Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(config: &Config, clock: Arc<dyn Clock>) -> io::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let wal_path = config.data_dir.join("bookings.wal");
        let notify = Arc::new(NotifyHub::new());
        let policy = BookingPolicy {
            enforce_availability: config.enforce_availability,
        };
        let engine = Arc::new(Engine::with_options(
            wal_path,
            notify.clone(),
            clock,
            policy,
        )?);

        if config.auto_complete {
            let completer_engine = engine.clone();
            tokio::spawn(async move {
                reaper::run_completer(completer_engine).await;
            });
        }
        let compactor_engine = engine.clone();
        let threshold = config.compact_threshold;
        tokio::spawn(async move {
            reaper::run_compactor(compactor_engine, threshold).await;
        });

        info!(
            "booking service ready, data_dir: {}",
            config.data_dir.display()
        );
        Ok(Self { engine, notify })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn notify(&self) -> &Arc<NotifyHub> {
        &self.notify
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tutorbook_test_service").join(name);
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn test_config(name: &str) -> Config {
        Config {
            data_dir: test_data_dir(name),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn open_creates_data_dir_and_wal_lazily() {
        let config = test_config("lazy");
        assert!(!config.data_dir.exists());

        let _service = BookingService::open(&config).unwrap();
        assert!(config.data_dir.join("bookings.wal").exists());
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let config = test_config("reopen");
        let clock = Arc::new(crate::clock::ManualClock::new(5_000));
        let tutor = Ulid::new();
        let student = Ulid::new();
        let booking_id;

        {
            let service = BookingService::open_with_clock(&config, clock.clone()).unwrap();
            let engine = service.engine();
            engine.register_tutor(tutor, Some("Ada".into())).await.unwrap();
            let booking = engine
                .create_booking(student, tutor, 10_000, 20_000, "Maths".into(), 4000, None)
                .await
                .unwrap();
            booking_id = booking.id;
            engine.confirm_booking(booking_id, tutor).await.unwrap();
        }

        let service = BookingService::open_with_clock(&config, clock).unwrap();
        let engine = service.engine();
        let replayed = engine.get_booking(booking_id).await.unwrap();
        assert_eq!(replayed.status, crate::model::BookingStatus::Confirmed);

        // The student index is rebuilt from the WAL too.
        let buckets = engine.list_bookings(student, Role::Student).await;
        assert_eq!(
            buckets.upcoming.len(),
            1,
            "replayed booking is visible to the student"
        );
    }

    #[test]
    fn config_defaults() {
        let config = Config::default();
        assert_eq!(config.compact_threshold, 1000);
        assert!(!config.auto_complete);
        assert!(!config.enforce_availability);
        assert!(config.metrics_port.is_none());
    }
}
