//! The intake screen's state and behaviour, independent of how it is drawn.

use std::sync::Arc;

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::intake::{IntakeError, IntakeManager};

pub const INVALID_AMOUNT: &str = "Invalid amount";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FormError {
    #[error("Invalid amount")]
    InvalidInput,
}

/// Everything the screen shows. Every change is broadcast to subscribers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormState {
    /// Liters recorded since the start of today
    pub daily_total: f64,
    pub pending_input: String,
    pub authorized: bool,
    pub last_error: Option<String>,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Parses a non-negative, finite decimal amount of liters.
pub fn parse_amount(text: &str) -> Result<f64, FormError> {
    match text.parse::<f64>() {
        // `-0` parses fine but would show up as a negative total
        Ok(amount) if amount.is_finite() && amount.is_sign_positive() => Ok(amount),
        _ => Err(FormError::InvalidInput),
    }
}

/// The first instant of the calendar day containing `now`.
///
/// Days that skip midnight (DST gaps) start at their first existing hour.
pub fn start_of_day<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let date = now.date_naive();
    let timezone = now.timezone();

    (0..24)
        .filter_map(|hour| NaiveTime::from_hms_opt(hour, 0, 0))
        .find_map(|time| timezone.from_local_datetime(&date.and_time(time)).earliest())
        .unwrap_or_else(|| now.clone())
}

pub struct IntakeForm {
    manager: IntakeManager,
    clock: Arc<dyn Clock>,
    state: watch::Sender<FormState>,
}

impl IntakeForm {
    pub fn new(manager: IntakeManager) -> Self {
        Self::with_clock(manager, Arc::new(SystemClock))
    }

    pub fn with_clock(manager: IntakeManager, clock: Arc<dyn Clock>) -> Self {
        let (state, _) = watch::channel(FormState::default());
        Self {
            manager,
            clock,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<FormState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> FormState {
        self.state.borrow().clone()
    }

    /// Authorizes, then loads today's total.
    ///
    /// A failed authorization leaves the form unauthorized for good and shows
    /// nothing; it is only logged.
    #[instrument(skip(self))]
    pub async fn on_appear(&self) {
        if let Err(e) = self.manager.request_authorization().await {
            warn!("Health store authorization failed: {e}");
            return;
        }

        info!("Health store authorized");
        self.state.send_modify(|s| s.authorized = true);

        if let Err(e) = self.fetch_today().await {
            self.show_error(&e);
        }
    }

    pub fn set_input(&self, text: impl Into<String>) {
        let text = text.into();
        self.state.send_modify(|s| s.pending_input = text);
    }

    /// Records the pending input as an intake right now.
    #[instrument(skip(self))]
    pub async fn submit(&self) {
        if !self.state.borrow().authorized {
            warn!("Ignoring submit before authorization");
            return;
        }

        let text = self.state.borrow().pending_input.clone();
        let litres = match parse_amount(&text) {
            Ok(litres) => litres,
            Err(e) => {
                self.state.send_modify(|s| s.last_error = Some(e.to_string()));
                return;
            }
        };

        let now = self.clock.now().with_timezone(&Utc);
        let result = match self.manager.write_intake(litres, now).await {
            Ok(()) => self.fetch_today().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => self.state.send_modify(|s| {
                s.pending_input.clear();
                s.last_error = None;
            }),
            Err(e) => self.show_error(&e),
        }
    }

    pub async fn submit_text(&self, text: impl Into<String>) {
        self.set_input(text);
        self.submit().await;
    }

    async fn fetch_today(&self) -> Result<(), IntakeError> {
        let now = self.clock.now();
        let start = start_of_day(&now);

        let total = self
            .manager
            .read_cumulative_intake(start.with_timezone(&Utc), now.with_timezone(&Utc))
            .await?;

        self.state.send_modify(|s| s.daily_total = total);
        Ok(())
    }

    fn show_error(&self, error: &IntakeError) {
        warn!("Health store operation failed: {error}");
        let message = error.to_string();
        self.state.send_modify(|s| s.last_error = Some(message));
    }
}

/// Draws the screen for `state` as plain text.
pub fn render(state: &FormState) -> String {
    if !state.authorized {
        return "Requesting health data authorization...\n".to_string();
    }

    let mut screen = format!(
        "Today's Water Intake: {:.2} liters\nEnter amount in liters: {}\n",
        state.daily_total, state.pending_input
    );

    if let Some(error) = &state.last_error {
        screen.push_str(&format!("Error: {error}\n"));
    }

    screen
}
