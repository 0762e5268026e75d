use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use colored::{ColoredString, Colorize};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::plan::TaskKey;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Status {
    Waiting,
    Running,
    Done,
    Off,
    Skipped,
    Failed,
}

impl Status {
    fn label(self) -> ColoredString {
        match self {
            Status::Waiting => "Pending".blue().bold(),
            Status::Running => "In Progress".bright_white().bold(),
            Status::Done => "Done".green().bold(),
            Status::Off => "Disabled".truecolor(120, 120, 120).bold(),
            Status::Skipped => "Skipped".yellow().bold(),
            Status::Failed => "Failed".bright_white().on_red().bold(),
        }
    }

    fn spins(self) -> bool {
        matches!(self, Status::Waiting | Status::Running)
    }
}

struct Row {
    key: TaskKey,
    enabled: bool,
    bar: ProgressBar,
}

impl Row {
    fn show(&self, status: Status) {
        let template = if status.spins() {
            format!("{{spinner:.green}} {:16} {{msg}}", status.label())
        } else {
            format!("  {:16} {{msg}}", status.label())
        };
        if let Ok(style) = ProgressStyle::with_template(&template) {
            self.bar.set_style(style);
        }
        match status {
            Status::Running => self.bar.enable_steady_tick(Duration::from_millis(200)),
            Status::Waiting => {}
            _ => self.bar.finish(),
        }
    }
}

/// One spinner line per pipeline task, advanced as tasks finish.
pub struct TaskProgress {
    rows: Vec<Row>,
    cursor: usize,
}

impl TaskProgress {
    pub fn new(tasks: &HashSet<TaskKey>) -> Self {
        println!("Tasks:");
        let mp = MultiProgress::new();
        let total = TaskKey::ALL.iter().filter(|k| tasks.contains(k)).count();
        let width = total.to_string().len();

        let mut n = 0;
        let rows = TaskKey::ALL
            .iter()
            .map(|&key| {
                let row = Row {
                    key,
                    enabled: tasks.contains(&key),
                    bar: mp.add(ProgressBar::new_spinner()),
                };
                if row.enabled {
                    n += 1;
                    row.bar
                        .set_message(format!("[{n:width$}/{total:width$}] {}", key.description()));
                    row.show(Status::Waiting);
                } else {
                    row.bar.set_message(format!("[-/-] {}", key.description()));
                    row.show(Status::Off);
                }
                row
            })
            .collect();

        let mut progress = Self { rows, cursor: 0 };
        progress.settle();
        progress
    }

    /// Moves the cursor past disabled tasks and marks the task under it running.
    fn settle(&mut self) {
        while self.rows.get(self.cursor).map(|r| !r.enabled).unwrap_or(false) {
            self.cursor += 1;
        }
        if let Some(row) = self.rows.get(self.cursor) {
            row.show(Status::Running);
        }
    }

    /// The task currently running, if any.
    pub fn current(&self) -> Option<TaskKey> {
        self.rows.get(self.cursor).map(|r| r.key)
    }

    /// Marks the running task failed and every later task skipped if `res`
    /// is an error.
    pub fn check<T>(&mut self, res: Result<T>) -> Result<T> {
        if res.is_err() && self.cursor < self.rows.len() {
            self.rows[self.cursor].show(Status::Failed);
            for row in self.rows[self.cursor + 1..].iter().filter(|r| r.enabled) {
                row.show(Status::Skipped);
            }
            self.cursor = self.rows.len();
            println!("\n");
        }
        res
    }

    /// Marks `key` done if it is the running task.
    pub fn finish(&mut self, key: TaskKey) {
        if self.current() != Some(key) {
            return;
        }
        self.rows[self.cursor].show(Status::Done);
        self.cursor += 1;
        self.settle();
        if self.current().is_none() {
            println!("\n\nCompleted all tasks");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_tasks_are_passed_over() {
        let tasks = HashSet::from([TaskKey::LoadInputs, TaskKey::Place, TaskKey::WriteOutputs]);
        let mut progress = TaskProgress::new(&tasks);
        assert_eq!(progress.current(), Some(TaskKey::LoadInputs));

        progress.finish(TaskKey::Route);
        assert_eq!(progress.current(), Some(TaskKey::LoadInputs));

        progress.finish(TaskKey::LoadInputs);
        progress.finish(TaskKey::Place);
        assert_eq!(progress.current(), Some(TaskKey::WriteOutputs));
        progress.finish(TaskKey::WriteOutputs);
        assert_eq!(progress.current(), None);
    }

    #[test]
    fn test_failure_stops_the_run() {
        let tasks = HashSet::from(TaskKey::ALL);
        let mut progress = TaskProgress::new(&tasks);
        progress.finish(TaskKey::LoadInputs);
        let res = progress.check::<()>(Err(anyhow::anyhow!("solver gave up")));
        assert!(res.is_err());
        assert_eq!(progress.current(), None);
        assert_eq!(progress.check(Ok(3)).unwrap(), 3);
    }
}
