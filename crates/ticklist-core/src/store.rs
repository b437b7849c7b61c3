use std::collections::HashSet;

use anyhow::anyhow;
use chrono::NaiveDateTime;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, error, info};

use crate::datetime::whole_seconds;
use crate::storage::{KeyValueStore, load_tasks, save_tasks};
use crate::task::{Priority, Task};

/// Shown (one at random) when a task is marked done.
pub const CONGRATULATIONS: [&str; 5] = [
    "Great job! Keep going! 🚀",
    "You're smashing it! 💪",
    "Another step forward! 🌟",
    "Small wins lead to big victories! 🏆",
    "Proud of you! Keep it up! 🙌",
];

pub const DELETE_PROMPT: &str = "Delete this task?";
pub const EDIT_PROMPT: &str = "Edit task:";
pub const CLEAR_PROMPT: &str = "Clear all completed tasks?";
pub const EMPTY_TEXT_ERROR: &str = "Task cannot be empty.";
pub const NOTHING_TO_CLEAR: &str = "No completed tasks.";

/// User-facing message produced by a store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Congrats(String),
    Info(String),
    Error(String),
}

impl Notice {
    pub fn message(&self) -> &str {
        match self {
            Notice::Congrats(m) | Notice::Info(m) | Notice::Error(m) => m,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// The list was mutated (and persisted).
    pub changed: bool,
    pub notice: Option<Notice>,
}

impl Outcome {
    pub fn unchanged() -> Self {
        Self::default()
    }

    fn changed() -> Self {
        Self {
            changed: true,
            notice: None,
        }
    }

    fn notice(notice: Notice) -> Self {
        Self {
            changed: false,
            notice: Some(notice),
        }
    }
}

/// Question an operation needs answered before it can finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Confirm { message: String },
    Input { message: String, initial: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Confirmed,
    Declined,
    Text(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingOp {
    Delete { id: String },
    Edit { id: String },
    ClearCompleted,
}

/// A suspended delete/edit/clear operation waiting on its [`Request`].
/// Other operations may run before it is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending {
    op: PendingOp,
    request: Request,
}

impl Pending {
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn task_id(&self) -> Option<&str> {
        match &self.op {
            PendingOp::Delete { id } | PendingOp::Edit { id } => Some(id),
            PendingOp::ClearCompleted => None,
        }
    }
}

/// First phase of a guarded operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Ask(Pending),
    Finished(Outcome),
}

/// Answers requests synchronously, for front ends that can block.
pub trait Prompter {
    fn confirm(&mut self, message: &str) -> bool;

    fn input(&mut self, message: &str, initial: &str) -> Option<String>;
}

pub fn ask<P: Prompter + ?Sized>(prompter: &mut P, request: &Request) -> Answer {
    match request {
        Request::Confirm { message } => {
            if prompter.confirm(message) {
                Answer::Confirmed
            } else {
                Answer::Declined
            }
        }
        Request::Input { message, initial } => match prompter.input(message, initial) {
            Some(text) => Answer::Text(text),
            None => Answer::Cancelled,
        },
    }
}

/// The ordered task list plus the key-value store it is mirrored into.
/// Every change is followed by a full write of the list.
pub struct TaskStore<S: KeyValueStore> {
    storage: S,
    key: String,
    tasks: Vec<Task>,
    rng: StdRng,
}

impl<S: KeyValueStore> TaskStore<S> {
    #[tracing::instrument(skip(storage))]
    pub fn open(storage: S, key: &str) -> Self {
        let tasks = load_tasks(&storage, key);
        info!(count = tasks.len(), "task store ready");
        Self {
            storage,
            key: key.to_string(),
            tasks,
            rng: StdRng::from_entropy(),
        }
    }

    /// Fixes the congratulation picker, for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Expands an id prefix to the single task id it names.
    pub fn resolve_id(&self, prefix: &str) -> anyhow::Result<String> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Err(anyhow!("empty task id"));
        }
        if let Some(task) = self.get(prefix) {
            return Ok(task.id.clone());
        }

        let mut matches = self.tasks.iter().filter(|t| t.id.starts_with(prefix));
        let first = matches
            .next()
            .ok_or_else(|| anyhow!("no task matches id {prefix}"))?;
        if matches.next().is_some() {
            return Err(anyhow!("id prefix {prefix} is ambiguous"));
        }
        Ok(first.id.clone())
    }

    /// Inserts a new task at the front. Blank text is ignored and yields
    /// `Ok(None)`.
    #[tracing::instrument(skip(self, text), fields(text_len = text.len()))]
    pub fn add(
        &mut self,
        text: &str,
        priority: Priority,
        deadline: Option<NaiveDateTime>,
    ) -> anyhow::Result<Option<String>> {
        let text = text.trim();
        if text.is_empty() {
            debug!("ignoring blank task text");
            return Ok(None);
        }

        // The storage form keeps whole seconds only.
        let task = Task::new(text.to_string(), priority, deadline.map(whole_seconds));
        let id = task.id.clone();
        self.tasks.insert(0, task);
        info!(id = %id, "added task");
        self.persist()?;
        Ok(Some(id))
    }

    #[tracing::instrument(skip(self))]
    pub fn toggle_complete(&mut self, id: &str) -> anyhow::Result<Outcome> {
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) else {
            debug!("toggle on unknown id ignored");
            return Ok(Outcome::unchanged());
        };

        task.completed = !task.completed;
        let now_done = task.completed;
        info!(completed = now_done, "toggled task");

        let notice = if now_done {
            CONGRATULATIONS
                .choose(&mut self.rng)
                .map(|m| Notice::Congrats(m.to_string()))
        } else {
            None
        };

        self.persist()?;
        Ok(Outcome {
            changed: true,
            notice,
        })
    }

    pub fn begin_delete(&self, id: &str) -> Step {
        if self.get(id).is_none() {
            return Step::Finished(Outcome::unchanged());
        }
        Step::Ask(Pending {
            op: PendingOp::Delete { id: id.to_string() },
            request: Request::Confirm {
                message: DELETE_PROMPT.to_string(),
            },
        })
    }

    pub fn begin_edit(&self, id: &str) -> Step {
        let Some(task) = self.get(id) else {
            return Step::Finished(Outcome::unchanged());
        };
        Step::Ask(Pending {
            op: PendingOp::Edit { id: id.to_string() },
            request: Request::Input {
                message: EDIT_PROMPT.to_string(),
                initial: task.text.clone(),
            },
        })
    }

    pub fn begin_clear_completed(&self) -> Step {
        if !self.tasks.iter().any(|t| t.completed) {
            return Step::Finished(Outcome::notice(Notice::Info(NOTHING_TO_CLEAR.to_string())));
        }
        Step::Ask(Pending {
            op: PendingOp::ClearCompleted,
            request: Request::Confirm {
                message: CLEAR_PROMPT.to_string(),
            },
        })
    }

    /// Finishes a suspended operation. The task list is re-read at this
    /// point, so a task removed while the request was open is a no-op.
    #[tracing::instrument(skip(self))]
    pub fn resolve(&mut self, pending: Pending, answer: Answer) -> anyhow::Result<Outcome> {
        match (pending.op, pending.request) {
            (PendingOp::Delete { id }, _) => {
                if answer != Answer::Confirmed {
                    debug!("delete declined");
                    return Ok(Outcome::unchanged());
                }
                self.remove_where(|t| t.id == id)
            }
            (PendingOp::ClearCompleted, _) => {
                if answer != Answer::Confirmed {
                    debug!("clear completed declined");
                    return Ok(Outcome::unchanged());
                }
                self.remove_where(|t| t.completed)
            }
            (PendingOp::Edit { id }, request) => {
                let text = match answer {
                    Answer::Text(text) => text,
                    Answer::Confirmed => match request {
                        Request::Input { initial, .. } => initial,
                        Request::Confirm { .. } => return Ok(Outcome::unchanged()),
                    },
                    Answer::Declined | Answer::Cancelled => {
                        debug!("edit cancelled");
                        return Ok(Outcome::unchanged());
                    }
                };
                self.replace_text(&id, &text)
            }
        }
    }

    /// Sets the text of a task. Blank text is rejected with a visible error.
    #[tracing::instrument(skip(self, text))]
    pub fn replace_text(&mut self, id: &str, text: &str) -> anyhow::Result<Outcome> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Outcome::notice(Notice::Error(EMPTY_TEXT_ERROR.to_string())));
        }
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) else {
            return Ok(Outcome::unchanged());
        };

        task.text = trimmed.to_string();
        info!("edited task text");
        self.persist()?;
        Ok(Outcome::changed())
    }

    pub fn delete<P: Prompter + ?Sized>(
        &mut self,
        id: &str,
        prompter: &mut P,
    ) -> anyhow::Result<Outcome> {
        let step = self.begin_delete(id);
        self.drive(step, prompter)
    }

    pub fn edit<P: Prompter + ?Sized>(
        &mut self,
        id: &str,
        prompter: &mut P,
    ) -> anyhow::Result<Outcome> {
        let step = self.begin_edit(id);
        self.drive(step, prompter)
    }

    pub fn clear_completed<P: Prompter + ?Sized>(
        &mut self,
        prompter: &mut P,
    ) -> anyhow::Result<Outcome> {
        let step = self.begin_clear_completed();
        self.drive(step, prompter)
    }

    /// Re-sorts the list to follow `ids`. Ids that name no task are
    /// ignored; tasks missing from `ids` keep their positions and the named
    /// tasks fill the remaining positions in the given order. Always
    /// persists; returns whether the order changed.
    #[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
    pub fn reorder(&mut self, ids: &[String]) -> anyhow::Result<bool> {
        let mut seen = HashSet::new();
        let order: Vec<usize> = ids
            .iter()
            .filter_map(|id| self.tasks.iter().position(|t| &t.id == id))
            .filter(|idx| seen.insert(*idx))
            .collect();
        let changed = order.windows(2).any(|w| w[0] > w[1]);

        if changed {
            let slots: HashSet<usize> = order.iter().copied().collect();
            let mut source = order.iter().copied();
            let mut old: Vec<Option<Task>> =
                std::mem::take(&mut self.tasks).into_iter().map(Some).collect();
            let mut reordered = Vec::with_capacity(old.len());
            for pos in 0..old.len() {
                let from = if slots.contains(&pos) {
                    source.next().unwrap_or(pos)
                } else {
                    pos
                };
                if let Some(task) = old.get_mut(from).and_then(Option::take) {
                    reordered.push(task);
                }
            }
            self.tasks = reordered;
        }

        debug!(changed, "reordered tasks");
        self.persist()?;
        Ok(changed)
    }

    fn drive<P: Prompter + ?Sized>(&mut self, step: Step, prompter: &mut P) -> anyhow::Result<Outcome> {
        match step {
            Step::Finished(outcome) => Ok(outcome),
            Step::Ask(pending) => {
                let answer = ask(prompter, pending.request());
                self.resolve(pending, answer)
            }
        }
    }

    fn remove_where<F>(&mut self, predicate: F) -> anyhow::Result<Outcome>
    where
        F: Fn(&Task) -> bool,
    {
        let before = self.tasks.len();
        self.tasks.retain(|t| !predicate(t));
        let removed = before - self.tasks.len();
        if removed == 0 {
            return Ok(Outcome::unchanged());
        }

        info!(removed, "removed tasks");
        self.persist()?;
        Ok(Outcome::changed())
    }

    fn persist(&mut self) -> anyhow::Result<()> {
        save_tasks(&mut self.storage, &self.key, &self.tasks).inspect_err(|err| {
            error!(error = %format!("{err:#}"), "failed to persist task list");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use chrono::{NaiveDate, Timelike};

    use super::{
        Answer, CLEAR_PROMPT, CONGRATULATIONS, DELETE_PROMPT, EMPTY_TEXT_ERROR, NOTHING_TO_CLEAR,
        Notice, Outcome, Prompter, Request, Step, TaskStore,
    };
    use crate::datetime::{local_now, parse_date_expr};
    use crate::storage::{MemoryKvStore, load_tasks};
    use crate::task::Priority;

    const KEY: &str = "todo.tasks.v2";

    #[derive(Default)]
    struct Scripted {
        confirms: VecDeque<bool>,
        inputs: VecDeque<Option<String>>,
        asked: Vec<String>,
        initials: Vec<String>,
    }

    impl Prompter for Scripted {
        fn confirm(&mut self, message: &str) -> bool {
            self.asked.push(message.to_string());
            self.confirms.pop_front().unwrap_or(false)
        }

        fn input(&mut self, message: &str, initial: &str) -> Option<String> {
            self.asked.push(message.to_string());
            self.initials.push(initial.to_string());
            self.inputs.pop_front().flatten()
        }
    }

    fn store() -> TaskStore<MemoryKvStore> {
        TaskStore::open(MemoryKvStore::new(), KEY).with_seed(7)
    }

    fn texts(store: &TaskStore<MemoryKvStore>) -> Vec<&str> {
        store.tasks().iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn add_inserts_at_front_and_persists() {
        let mut store = store();
        store.add("first", Priority::Low, None).expect("add");
        let id = store
            .add("  second  ", Priority::High, None)
            .expect("add")
            .expect("id assigned");

        assert_eq!(texts(&store), vec!["second", "first"]);
        assert_eq!(store.tasks()[0].id, id);
        assert_eq!(store.tasks()[0].priority, Priority::High);
        assert!(!store.tasks()[0].completed);
        assert_eq!(store.storage().writes(), 2);
    }

    #[test]
    fn blank_add_is_ignored() {
        let mut store = store();
        assert_eq!(store.add("   \t", Priority::Low, None).expect("add"), None);
        assert!(store.tasks().is_empty());
        assert_eq!(store.storage().writes(), 0);
    }

    #[test]
    fn toggle_unknown_id_is_noop() {
        let mut store = store();
        store.add("a", Priority::Low, None).expect("add");
        let before = store.tasks().to_vec();

        let outcome = store.toggle_complete("missing").expect("toggle");
        assert_eq!(outcome, Outcome::unchanged());
        assert_eq!(store.tasks(), before.as_slice());
        assert_eq!(store.storage().writes(), 1);
    }

    #[test]
    fn completing_congratulates_and_reopening_does_not() {
        let mut store = store();
        let id = store
            .add("a", Priority::Low, None)
            .expect("add")
            .expect("id");

        let done = store.toggle_complete(&id).expect("toggle");
        assert!(done.changed);
        match done.notice {
            Some(Notice::Congrats(msg)) => assert!(CONGRATULATIONS.contains(&msg.as_str())),
            other => panic!("expected congratulation, got {other:?}"),
        }

        let reopened = store.toggle_complete(&id).expect("toggle back");
        assert!(reopened.changed);
        assert_eq!(reopened.notice, None);
        assert!(!store.tasks()[0].completed);
    }

    #[test]
    fn delete_requires_confirmation() {
        let mut store = store();
        let id = store
            .add("a", Priority::Low, None)
            .expect("add")
            .expect("id");

        let mut no = Scripted {
            confirms: VecDeque::from([false]),
            ..Default::default()
        };
        assert_eq!(store.delete(&id, &mut no).expect("decline"), Outcome::unchanged());
        assert_eq!(no.asked, vec![DELETE_PROMPT]);
        assert_eq!(store.tasks().len(), 1);

        let mut yes = Scripted {
            confirms: VecDeque::from([true]),
            ..Default::default()
        };
        assert!(store.delete(&id, &mut yes).expect("confirm").changed);
        assert!(store.tasks().is_empty());
    }

    #[test]
    fn edit_prefills_and_trims() {
        let mut store = store();
        let id = store
            .add("Buy milk", Priority::Low, None)
            .expect("add")
            .expect("id");

        let mut prompter = Scripted {
            inputs: VecDeque::from([Some("  Buy oat milk ".to_string())]),
            ..Default::default()
        };
        assert!(store.edit(&id, &mut prompter).expect("edit").changed);
        assert_eq!(prompter.initials, vec!["Buy milk"]);
        assert_eq!(texts(&store), vec!["Buy oat milk"]);
    }

    #[test]
    fn edit_cancel_and_blank_answers() {
        let mut store = store();
        let id = store
            .add("keep", Priority::Low, None)
            .expect("add")
            .expect("id");
        let writes = store.storage().writes();

        let mut cancel = Scripted {
            inputs: VecDeque::from([None]),
            ..Default::default()
        };
        assert_eq!(store.edit(&id, &mut cancel).expect("cancel"), Outcome::unchanged());

        let mut blank = Scripted {
            inputs: VecDeque::from([Some("   ".to_string())]),
            ..Default::default()
        };
        let outcome = store.edit(&id, &mut blank).expect("blank");
        assert!(!outcome.changed);
        assert_eq!(
            outcome.notice,
            Some(Notice::Error(EMPTY_TEXT_ERROR.to_string()))
        );
        assert_eq!(texts(&store), vec!["keep"]);
        assert_eq!(store.storage().writes(), writes);
    }

    #[test]
    fn clear_completed_without_completed_tasks_does_not_write() {
        let mut store = store();
        store.add("a", Priority::Low, None).expect("add");
        let writes = store.storage().writes();

        let mut prompter = Scripted::default();
        let outcome = store.clear_completed(&mut prompter).expect("clear");
        assert_eq!(
            outcome.notice,
            Some(Notice::Info(NOTHING_TO_CLEAR.to_string()))
        );
        assert!(prompter.asked.is_empty());
        assert_eq!(store.tasks().len(), 1);
        assert_eq!(store.storage().writes(), writes);
    }

    #[test]
    fn clear_completed_removes_only_completed() {
        let mut store = store();
        let a = store.add("a", Priority::Low, None).expect("add").expect("id");
        store.add("b", Priority::Low, None).expect("add");
        store.toggle_complete(&a).expect("toggle");

        let mut prompter = Scripted {
            confirms: VecDeque::from([true]),
            ..Default::default()
        };
        assert!(store.clear_completed(&mut prompter).expect("clear").changed);
        assert_eq!(prompter.asked, vec![CLEAR_PROMPT]);
        assert_eq!(texts(&store), vec!["b"]);
    }

    #[test]
    fn pending_delete_survives_interleaved_mutation() {
        let mut store = store();
        let id = store.add("a", Priority::Low, None).expect("add").expect("id");

        let Step::Ask(pending) = store.begin_delete(&id) else {
            panic!("expected a confirmation request");
        };
        assert_eq!(
            pending.request(),
            &Request::Confirm {
                message: DELETE_PROMPT.to_string()
            }
        );

        // Another event lands before the answer.
        store.add("b", Priority::Medium, None).expect("add");

        assert!(store.resolve(pending, Answer::Confirmed).expect("resolve").changed);
        assert_eq!(texts(&store), vec!["b"]);
    }

    #[test]
    fn pending_edit_of_deleted_task_is_noop() {
        let mut store = store();
        let id = store.add("a", Priority::Low, None).expect("add").expect("id");
        let Step::Ask(pending) = store.begin_edit(&id) else {
            panic!("expected an input request");
        };

        let Step::Ask(delete) = store.begin_delete(&id) else {
            panic!("expected a confirmation request");
        };
        store.resolve(delete, Answer::Confirmed).expect("delete");

        let outcome = store
            .resolve(pending, Answer::Text("renamed".to_string()))
            .expect("resolve");
        assert_eq!(outcome, Outcome::unchanged());
        assert!(store.tasks().is_empty());
    }

    #[test]
    fn reorder_follows_full_sequence() {
        let mut store = store();
        let c = store.add("C", Priority::Low, None).expect("add").expect("id");
        let b = store.add("B", Priority::Low, None).expect("add").expect("id");
        let a = store.add("A", Priority::Low, None).expect("add").expect("id");
        assert_eq!(texts(&store), vec!["A", "B", "C"]);

        let changed = store.reorder(&[c, a, b]).expect("reorder");
        assert!(changed);
        assert_eq!(texts(&store), vec!["C", "A", "B"]);
    }

    #[test]
    fn reorder_of_partial_sequence_keeps_unlisted_slots() {
        let mut store = store();
        let d = store.add("D", Priority::Low, None).expect("add").expect("id");
        store.add("C", Priority::Low, None).expect("add");
        let b = store.add("B", Priority::Low, None).expect("add").expect("id");
        store.add("A", Priority::Low, None).expect("add");

        store
            .reorder(&[d.clone(), "ghost".to_string(), b, d])
            .expect("reorder");
        assert_eq!(texts(&store), vec!["A", "D", "C", "B"]);
    }

    #[test]
    fn reorder_always_persists() {
        let mut store = store();
        let a = store.add("A", Priority::Low, None).expect("add").expect("id");
        let writes = store.storage().writes();
        assert!(!store.reorder(&[a]).expect("reorder"));
        assert_eq!(store.storage().writes(), writes + 1);
    }

    #[test]
    fn reload_yields_identical_sequence() {
        let mut store = store();
        let deadline = NaiveDate::from_ymd_opt(2099, 1, 1).and_then(|d| d.and_hms_opt(10, 0, 0));
        store.add("Write report", Priority::High, None).expect("add");
        let id = store
            .add("Call Mom", Priority::Low, deadline)
            .expect("add")
            .expect("id");
        store.toggle_complete(&id).expect("toggle");

        let reloaded = load_tasks(store.storage(), KEY);
        assert_eq!(reloaded, store.tasks());
    }

    #[test]
    fn expression_deadlines_reload_unchanged() {
        let mut store = store();
        let soon = parse_date_expr("+30m", local_now()).expect("relative deadline");
        store.add("soon", Priority::Medium, Some(soon)).expect("add");
        let precise = NaiveDate::from_ymd_opt(2099, 1, 1)
            .and_then(|d| d.and_hms_nano_opt(10, 0, 5, 987_654_321));
        store.add("precise", Priority::Low, precise).expect("add");

        assert_eq!(store.tasks()[0].deadline.map(|d| d.nanosecond()), Some(0));
        let reloaded = load_tasks(store.storage(), KEY);
        assert_eq!(reloaded, store.tasks());
    }

    #[test]
    fn resolve_id_accepts_unique_prefix() {
        let mut store = store();
        let id = store.add("a", Priority::Low, None).expect("add").expect("id");
        assert_eq!(store.resolve_id(&id[..8]).expect("prefix"), id);
        assert!(store.resolve_id("zzzz-not-there").is_err());
        assert!(store.resolve_id("").is_err());
    }
}
