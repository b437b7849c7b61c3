use std::collections::VecDeque;

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::reminder::ReminderScanner;
use crate::render::Surface;
use crate::reorder::{DragReorderer, RowBox};
use crate::storage::KeyValueStore;
use crate::store::{Answer, Notice, Outcome, Pending, Request, Step, TaskStore};
use crate::task::Priority;
use crate::view::{Filter, ViewModel, project};

/// Everything a front end can feed into a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Add {
        text: String,
        priority: Priority,
        deadline: Option<NaiveDateTime>,
    },
    Toggle { id: String },
    Delete { id: String },
    Edit { id: String },
    ClearCompleted,
    /// Answers the oldest outstanding request.
    Answer(Answer),
    SetFilter(Filter),
    SetSearch(String),
    DragStart { id: String },
    DragOver { pointer_y: f64, boxes: Vec<RowBox> },
    /// Drops the dragged row at a 0-based position among the visible rows.
    DragTo { index: usize },
    DragEnd,
    Tick { now: NaiveDateTime },
}

/// Messages for the user produced while handling an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    Notice(Notice),
    Ask(Request),
    Reminder(String),
}

/// One task store, its view state and the surface it renders into. All
/// events are handled on the caller's thread, one at a time.
pub struct Session<S: KeyValueStore, U: Surface> {
    store: TaskStore<S>,
    surface: U,
    scanner: ReminderScanner,
    filter: Filter,
    query: String,
    drag: DragReorderer,
    pending: VecDeque<Pending>,
}

impl<S: KeyValueStore, U: Surface> Session<S, U> {
    pub fn new(store: TaskStore<S>, surface: U, scanner: ReminderScanner) -> Self {
        Self {
            store,
            surface,
            scanner,
            filter: Filter::All,
            query: String::new(),
            drag: DragReorderer::default(),
            pending: VecDeque::new(),
        }
    }

    pub fn with_view_state(mut self, filter: Filter, query: &str) -> Self {
        self.filter = filter;
        self.query = query.trim().to_string();
        self
    }

    /// Initial render.
    pub fn start(&mut self) -> anyhow::Result<()> {
        self.render()
    }

    /// Re-renders the current view without any state change.
    pub fn refresh(&mut self) -> anyhow::Result<()> {
        self.render()
    }

    pub fn store(&self) -> &TaskStore<S> {
        &self.store
    }

    pub fn surface(&self) -> &U {
        &self.surface
    }

    pub fn scanner(&self) -> &ReminderScanner {
        &self.scanner
    }

    pub fn filter(&self) -> Filter {
        self.filter
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn view(&self) -> ViewModel {
        project(self.store.tasks(), self.filter, &self.query)
    }

    pub fn pending_request(&self) -> Option<&Request> {
        self.pending.front().map(Pending::request)
    }

    pub fn arrangement(&self) -> &[String] {
        self.drag.arrangement()
    }

    /// Expands an id prefix against the current list.
    pub fn resolve_id(&self, prefix: &str) -> anyhow::Result<String> {
        self.store.resolve_id(prefix)
    }

    /// Applies one event. Storage failures are reported as error notices;
    /// only surface failures are returned as errors.
    #[tracing::instrument(skip(self))]
    pub fn handle(&mut self, event: Event) -> anyhow::Result<Vec<Feedback>> {
        let mut feedback = Vec::new();

        match event {
            Event::Add {
                text,
                priority,
                deadline,
            } => match self.store.add(&text, priority, deadline) {
                Ok(Some(_)) => self.render()?,
                Ok(None) => {}
                Err(err) => self.storage_failed(err, &mut feedback)?,
            },
            Event::Toggle { id } => {
                let result = self.store.toggle_complete(&id);
                self.apply(result, &mut feedback)?;
            }
            Event::Delete { id } => {
                let step = self.store.begin_delete(&id);
                self.begin(step, &mut feedback)?;
            }
            Event::Edit { id } => {
                let step = self.store.begin_edit(&id);
                self.begin(step, &mut feedback)?;
            }
            Event::ClearCompleted => {
                let step = self.store.begin_clear_completed();
                self.begin(step, &mut feedback)?;
            }
            Event::Answer(answer) => match self.pending.pop_front() {
                Some(pending) => {
                    let result = self.store.resolve(pending, answer);
                    self.apply(result, &mut feedback)?;
                    if let Some(next) = self.pending.front() {
                        feedback.push(Feedback::Ask(next.request().clone()));
                    }
                }
                None => debug!("answer with no outstanding request ignored"),
            },
            Event::SetFilter(filter) => {
                self.filter = filter;
                self.render()?;
            }
            Event::SetSearch(query) => {
                self.query = query.trim().to_string();
                self.render()?;
            }
            Event::DragStart { id } => {
                self.drag.drag_start(&id);
            }
            Event::DragOver { pointer_y, boxes } => self.drag.drag_over(pointer_y, &boxes),
            Event::DragTo { index } => {
                if let Some(pointer_y) = self.drag.pointer_for_index(index, 1.0) {
                    self.drag.drag_over_uniform(pointer_y, 1.0);
                }
            }
            Event::DragEnd => {
                if let Some(order) = self.drag.drag_end()
                    && let Err(err) = self.store.reorder(&order)
                {
                    feedback.push(storage_notice(&err));
                }
            }
            Event::Tick { now } => {
                let reminders = self.scanner.scan(self.store.tasks(), now);
                feedback.extend(reminders.into_iter().map(Feedback::Reminder));
            }
        }

        Ok(feedback)
    }

    fn begin(&mut self, step: Step, feedback: &mut Vec<Feedback>) -> anyhow::Result<()> {
        match step {
            Step::Finished(outcome) => self.apply(Ok(outcome), feedback),
            Step::Ask(pending) => {
                if self.pending.is_empty() {
                    feedback.push(Feedback::Ask(pending.request().clone()));
                }
                self.pending.push_back(pending);
                Ok(())
            }
        }
    }

    fn apply(
        &mut self,
        result: anyhow::Result<Outcome>,
        feedback: &mut Vec<Feedback>,
    ) -> anyhow::Result<()> {
        match result {
            Ok(outcome) => {
                if let Some(notice) = outcome.notice {
                    feedback.push(Feedback::Notice(notice));
                }
                if outcome.changed {
                    self.render()?;
                }
                Ok(())
            }
            Err(err) => self.storage_failed(err, feedback),
        }
    }

    fn storage_failed(
        &mut self,
        err: anyhow::Error,
        feedback: &mut Vec<Feedback>,
    ) -> anyhow::Result<()> {
        feedback.push(storage_notice(&err));
        // The in-memory change stands even though the write failed.
        self.render()
    }

    fn render(&mut self) -> anyhow::Result<()> {
        let view = self.view();
        self.drag.set_arrangement(view.row_ids());
        self.surface.render(&view)
    }
}

fn storage_notice(err: &anyhow::Error) -> Feedback {
    warn!(error = %format!("{err:#}"), "storage write failed");
    Feedback::Notice(Notice::Error(format!("could not save tasks: {err:#}")))
}
