use std::collections::HashMap;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

const SPINNER_TICK: Duration = Duration::from_millis(120);

fn run_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} tasks {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

fn task_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("  {spinner:.green} {msg} [{elapsed}]")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Terminal progress for one run: a bar over all task instances and a
/// spinner per running task.
///
/// A disabled monitor draws to a hidden target and ignores every call.
pub struct ProgressMonitor {
    multi: MultiProgress,
    run_bar: ProgressBar,
    running: HashMap<String, ProgressBar>,
    enabled: bool,
}

impl ProgressMonitor {
    pub fn new(total_tasks: usize, enabled: bool) -> Self {
        if !enabled {
            return Self::hidden();
        }

        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());
        let run_bar = multi.add(ProgressBar::new(total_tasks as u64));
        run_bar.set_style(run_style());
        run_bar.set_message("waiting for ready tasks");

        Self {
            multi,
            run_bar,
            running: HashMap::new(),
            enabled: true,
        }
    }

    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            run_bar: ProgressBar::hidden(),
            running: HashMap::new(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn task_started(&mut self, task_id: &str) {
        if !self.enabled {
            return;
        }
        let spinner = self.multi.add(ProgressBar::new_spinner());
        spinner.set_style(task_style());
        spinner.set_message(task_id.to_string());
        spinner.enable_steady_tick(SPINNER_TICK);
        self.running.insert(task_id.to_string(), spinner);
    }

    /// Tasks rejected at start never had a spinner; they still advance the bar.
    pub fn task_finished(&mut self, task_id: &str, success: bool, duration_ms: u64) {
        if !self.enabled {
            return;
        }
        let line = format!(
            "{} {} ({}ms)",
            if success { "done  " } else { "failed" },
            task_id,
            duration_ms
        );
        match self.running.remove(task_id) {
            Some(spinner) => spinner.finish_with_message(line),
            None => {
                let _ = self.multi.println(format!("  {}", line));
            }
        }
        self.run_bar.inc(1);
    }

    pub fn set_in_flight(&self, running: usize, pending: usize) {
        if self.enabled {
            self.run_bar
                .set_message(format!("{} running, {} pending", running, pending));
        }
    }

    pub fn finish(&self, success: bool) {
        if !self.enabled {
            return;
        }
        let msg = if success {
            "all tasks completed"
        } else {
            "finished with failures"
        };
        self.run_bar.finish_with_message(msg);
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        for (_, spinner) in self.running.drain() {
            spinner.finish_and_clear();
        }
    }
}
