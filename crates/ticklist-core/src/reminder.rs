use std::collections::HashSet;
use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::debug;

use crate::config::Config;
use crate::datetime::minutes_until;
use crate::task::Task;

/// Periodic deadline sweep. Holds only its settings plus, when dedupe is
/// on, the `(id, deadline)` pairs already announced.
#[derive(Debug, Clone)]
pub struct ReminderScanner {
    interval: Duration,
    window_minutes: u64,
    dedupe: bool,
    sent: HashSet<(String, NaiveDateTime)>,
}

impl ReminderScanner {
    pub fn new(interval: Duration, window_minutes: u64, dedupe: bool) -> Self {
        Self {
            interval,
            window_minutes,
            dedupe,
            sent: HashSet::new(),
        }
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(
            cfg.reminder_interval()?,
            cfg.reminder_window()?,
            cfg.get_bool("reminder.dedupe").unwrap_or(false),
        ))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Reminder lines for every open task due within the window.
    #[tracing::instrument(skip(self, tasks), fields(tasks = tasks.len()))]
    pub fn scan(&mut self, tasks: &[Task], now: NaiveDateTime) -> Vec<String> {
        let window = self.window_minutes as f64;
        let mut messages = Vec::new();

        if self.dedupe {
            // Keys only matter while their task still carries that deadline.
            self.sent.retain(|(id, deadline)| {
                *deadline > now
                    && tasks
                        .iter()
                        .any(|t| &t.id == id && t.deadline == Some(*deadline))
            });
        }

        for task in tasks.iter().filter(|t| !t.completed) {
            let Some(deadline) = task.deadline else {
                continue;
            };
            let minutes = minutes_until(deadline, now);
            if minutes <= 0.0 || minutes > window {
                continue;
            }
            if self.dedupe && !self.sent.insert((task.id.clone(), deadline)) {
                continue;
            }
            messages.push(reminder_message(&task.text, minutes));
        }

        if !messages.is_empty() {
            debug!(count = messages.len(), "reminders due");
        }
        messages
    }
}

pub fn reminder_message(text: &str, minutes: f64) -> String {
    format!("Reminder: \"{text}\" is due in {} min!", minutes.ceil() as u64)
}
