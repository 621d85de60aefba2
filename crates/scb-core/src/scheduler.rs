//! Cron scheduler for broadcast and cleanup jobs.
//!
//! - Loads `schedule.yaml` (path from config)
//! - Standard 5-field cron syntax (min hour dom mon dow), local time
//! - Reloads when the file's mtime changes (polled)
//!
//! The YAML reader understands only the subset the schedule file needs.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use chrono::{DateTime, Datelike, Local, Timelike};
use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::{
    jobs::{MessageSet, ScheduledJobs},
    Error, Result,
};

const MAX_MESSAGE_LENGTH: usize = 4096;
const DEFAULT_RETENTION_DAYS: u64 = 30;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobKind {
    Broadcast(MessageSet),
    Cleanup { older_than: Duration },
}

impl JobKind {
    fn name(&self) -> &'static str {
        match self {
            JobKind::Broadcast(_) => "broadcast",
            JobKind::Cleanup { .. } => "cleanup",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schedule {
    pub name: String,
    pub cron: String,
    pub kind: JobKind,
    pub enabled: bool,
}

#[derive(Clone)]
pub struct CronScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    path: PathBuf,
    jobs: ScheduledJobs,
    state: tokio::sync::Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    jobs: HashMap<String, JobEntry>,
    watcher: Option<JoinHandle<()>>,
    watcher_cancel: Option<CancellationToken>,
    last_modified: Option<SystemTime>,
}

struct JobEntry {
    expr: CronExpr,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl CronScheduler {
    pub fn new(path: PathBuf, jobs: ScheduledJobs) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                path,
                jobs,
                state: tokio::sync::Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// (Re)load the schedule file and start one task per enabled schedule.
    /// Returns the number of jobs started.
    pub async fn start(&self) -> Result<usize> {
        self.stop_jobs_only().await;

        let schedules = match load_schedules(&self.inner.path) {
            Ok(Some(v)) => v,
            Ok(None) => {
                tracing::info!(path = %self.inner.path.display(), "no schedule file");
                return Ok(0);
            }
            Err(e) => {
                tracing::error!(path = %self.inner.path.display(), error = %e, "failed to load schedules");
                return Ok(0);
            }
        };

        let mut loaded = 0usize;
        for schedule in schedules {
            if !schedule.enabled {
                tracing::info!(schedule = %schedule.name, "skipping disabled schedule");
                continue;
            }

            let expr = match CronExpr::parse(&schedule.cron) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(schedule = %schedule.name, error = %e, "invalid cron expression");
                    continue;
                }
            };

            let cancel = CancellationToken::new();
            let scheduler = self.clone();
            let name = schedule.name.clone();
            let task_cancel = cancel.clone();
            let task_expr = expr.clone();
            let handle = tokio::spawn(async move {
                scheduler.job_loop(schedule, task_expr, task_cancel).await;
            });

            let mut st = self.inner.state.lock().await;
            if let Some(old) = st.jobs.insert(
                name.clone(),
                JobEntry {
                    expr,
                    cancel,
                    handle,
                },
            ) {
                tracing::warn!(schedule = %name, "duplicate schedule name; keeping the last one");
                old.cancel.cancel();
                old.handle.abort();
            } else {
                loaded += 1;
            }
        }

        tracing::info!(jobs = loaded, "scheduler started");
        Ok(loaded)
    }

    /// Start the schedule file watcher (polling mtime), if not already running.
    pub async fn ensure_watcher(&self) {
        let path = self.inner.path.clone();

        let mut st = self.inner.state.lock().await;
        if st.watcher.is_some() {
            return;
        }

        let tok = CancellationToken::new();
        st.watcher_cancel = Some(tok.clone());
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(2));
            loop {
                tokio::select! {
                  _ = tok.cancelled() => break,
                  _ = tick.tick() => {
                    let Ok(modified) = fs::metadata(&path).and_then(|md| md.modified()) else {
                      continue;
                    };
                    let should_reload = {
                      let mut st = scheduler.inner.state.lock().await;
                      match st.last_modified {
                        None => {
                          st.last_modified = Some(modified);
                          false
                        }
                        Some(prev) if modified > prev => {
                          st.last_modified = Some(modified);
                          true
                        }
                        _ => false,
                      }
                    };

                    if should_reload {
                      tracing::info!(path = %path.display(), "schedule file changed, reloading");
                      sleep(Duration::from_millis(100)).await;
                      if let Err(e) = scheduler.start().await {
                        tracing::error!(error = %e, "schedule reload failed");
                      }
                    }
                  }
                }
            }
        });

        st.watcher = Some(handle);
    }

    pub async fn stop(&self) {
        let mut st = self.inner.state.lock().await;

        if let Some(tok) = st.watcher_cancel.take() {
            tok.cancel();
        }
        st.watcher.take();

        for (_, job) in st.jobs.drain() {
            job.cancel.cancel();
            job.handle.abort();
        }
    }

    async fn stop_jobs_only(&self) {
        let mut st = self.inner.state.lock().await;
        for (_, job) in st.jobs.drain() {
            job.cancel.cancel();
            job.handle.abort();
        }
    }

    /// `name -> next run` for every loaded job, sorted by name.
    pub async fn next_runs(&self) -> Vec<(String, Option<DateTime<Local>>)> {
        let st = self.inner.state.lock().await;
        let now = Local::now();
        let mut out: Vec<_> = st
            .jobs
            .iter()
            .map(|(name, job)| (name.clone(), job.expr.next_after(now)))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    async fn job_loop(&self, schedule: Schedule, expr: CronExpr, cancel: CancellationToken) {
        loop {
            let now = Local::now();
            let Some(next) = expr.next_after(now) else {
                tracing::warn!(schedule = %schedule.name, "no next run; stopping job");
                break;
            };
            let dur = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
              _ = cancel.cancelled() => break,
              _ = sleep(dur) => self.execute(&schedule).await,
            }
        }
    }

    async fn execute(&self, schedule: &Schedule) {
        tracing::info!(schedule = %schedule.name, kind = schedule.kind.name(), "running scheduled job");
        let result = match &schedule.kind {
            JobKind::Broadcast(set) => self
                .inner
                .jobs
                .run_scheduled_broadcast(set)
                .await
                .map(|r| r.summary()),
            JobKind::Cleanup { older_than } => self
                .inner
                .jobs
                .run_scheduled_cleanup(*older_than)
                .await
                .map(|r| format!("{r:?}")),
        };
        match result {
            Ok(detail) => tracing::info!(schedule = %schedule.name, %detail, "scheduled job done"),
            Err(e) => tracing::error!(schedule = %schedule.name, error = %e, "scheduled job failed"),
        }
    }
}

// === schedule.yaml loading ===

fn load_schedules(path: &Path) -> Result<Option<Vec<Schedule>>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(Some(parse_schedule_yaml(&content)?))
}

#[derive(Default)]
struct RawSchedule {
    name: String,
    cron: String,
    kind: String,
    enabled: bool,
    messages: Vec<String>,
    older_than_days: Option<u64>,
}

/// Parse the schedule file:
///
/// ```yaml
/// schedules:
///   - name: morning
///     cron: "0 8 * * 1-5"
///     kind: broadcast
///     message: Good morning!
///     message: |
///       Exams start next week.
///       Check /timetable.
///   - name: tidy
///     cron: "0 3 * * *"
///     kind: cleanup
///     older_than_days: 60
/// ```
fn parse_schedule_yaml(input: &str) -> Result<Vec<Schedule>> {
    let lines: Vec<&str> = input.lines().map(|l| l.trim_end_matches('\r')).collect();

    let mut i = 0usize;
    let mut in_schedules = false;
    let mut schedules = Vec::new();

    while i < lines.len() {
        let line = lines[i].trim_end();
        let trimmed = line.trim();
        i += 1;

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if !in_schedules {
            if trimmed == "schedules:" {
                in_schedules = true;
            }
            continue;
        }

        if count_indent(line) != 2 || !trimmed.starts_with('-') {
            continue;
        }

        let mut current = RawSchedule {
            enabled: true,
            ..Default::default()
        };

        let after_dash = trimmed.trim_start_matches('-').trim_start();
        if !after_dash.is_empty() {
            parse_schedule_kv(after_dash, &mut current, &mut i, &lines, 2);
        }

        while i < lines.len() {
            let line2 = lines[i].trim_end();
            let trimmed2 = line2.trim();
            if trimmed2.is_empty() || trimmed2.starts_with('#') {
                i += 1;
                continue;
            }

            let indent2 = count_indent(line2);
            if indent2 <= 2 {
                break;
            }
            i += 1;
            if indent2 != 4 {
                continue;
            }
            parse_schedule_kv(trimmed2, &mut current, &mut i, &lines, indent2);
        }

        schedules.push(finish_schedule(current)?);
    }

    Ok(schedules)
}

fn finish_schedule(raw: RawSchedule) -> Result<Schedule> {
    if raw.name.trim().is_empty() {
        return Err(Error::Config("schedule missing name".to_string()));
    }
    if raw.cron.trim().is_empty() {
        return Err(Error::Config(format!("schedule {} missing cron", raw.name)));
    }

    let kind = match raw.kind.as_str() {
        "broadcast" => {
            if raw.messages.is_empty() {
                return Err(Error::Config(format!(
                    "broadcast schedule {} has no message",
                    raw.name
                )));
            }
            if let Some(long) = raw.messages.iter().find(|m| m.chars().count() > MAX_MESSAGE_LENGTH) {
                return Err(Error::Config(format!(
                    "schedule {} message too long: {} chars",
                    raw.name,
                    long.chars().count()
                )));
            }
            JobKind::Broadcast(MessageSet {
                name: raw.name.clone(),
                messages: raw.messages,
            })
        }
        "cleanup" => {
            let days = raw.older_than_days.unwrap_or(DEFAULT_RETENTION_DAYS);
            if days == 0 {
                return Err(Error::Config(format!(
                    "schedule {} older_than_days must be at least 1",
                    raw.name
                )));
            }
            JobKind::Cleanup {
                older_than: Duration::from_secs(days * 86_400),
            }
        }
        other => {
            return Err(Error::Config(format!(
                "schedule {} has unknown kind {other:?} (expected broadcast or cleanup)",
                raw.name
            )))
        }
    };

    Ok(Schedule {
        name: raw.name,
        cron: raw.cron,
        kind,
        enabled: raw.enabled,
    })
}

fn parse_schedule_kv(
    kv: &str,
    current: &mut RawSchedule,
    i: &mut usize,
    lines: &[&str],
    indent: usize,
) {
    let Some((k, vraw)) = kv.split_once(':') else {
        return;
    };
    let value = vraw.trim();

    match k.trim() {
        "name" => current.name = strip_quotes(value).to_string(),
        "cron" => current.cron = strip_quotes(value).to_string(),
        "kind" => current.kind = strip_quotes(value).to_lowercase(),
        "enabled" => current.enabled = parse_bool(value).unwrap_or(true),
        "older_than_days" => current.older_than_days = strip_quotes(value).parse().ok(),
        "message" => {
            let text = if value == "|" {
                read_block(i, lines, indent)
            } else {
                strip_quotes(value).to_string()
            };
            if !text.trim().is_empty() {
                current.messages.push(text);
            }
        }
        _ => {}
    }
}

/// `|` block scalar: lines indented deeper than `indent`, block indent taken
/// from the first non-empty line.
fn read_block(i: &mut usize, lines: &[&str], indent: usize) -> String {
    let mut block = Vec::new();
    let mut block_indent: Option<usize> = None;

    while *i < lines.len() {
        let line = lines[*i].trim_end();
        if !line.trim().is_empty() {
            let ind = count_indent(line);
            if ind <= indent {
                break;
            }
            block_indent.get_or_insert(ind);
        }
        *i += 1;

        let cut = block_indent.unwrap_or(indent + 2);
        block.push(line.get(cut..).unwrap_or("").to_string());
    }

    block.join("\n").trim_end_matches('\n').to_string()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn strip_quotes(s: &str) -> &str {
    let t = s.trim();
    if t.len() >= 2
        && ((t.starts_with('"') && t.ends_with('"')) || (t.starts_with('\'') && t.ends_with('\'')))
    {
        return &t[1..t.len() - 1];
    }
    t
}

fn count_indent(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ').count()
}

// === Cron expression engine ===

#[derive(Clone, Debug)]
struct CronExpr {
    min: Field,
    hour: Field,
    dom: Field,
    mon: Field,
    dow: Field,
}

#[derive(Clone, Debug)]
struct Field {
    min: u32,
    max: u32,
    any: bool,
    allowed: Vec<bool>, // index = value
}

impl CronExpr {
    fn parse(expr: &str) -> Result<Self> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        let [min, hour, dom, mon, dow] = parts.as_slice() else {
            return Err(Error::Config(format!(
                "expected 5 cron fields, got {}",
                parts.len()
            )));
        };

        Ok(Self {
            min: Field::parse(min, 0, 59, false)?,
            hour: Field::parse(hour, 0, 23, false)?,
            dom: Field::parse(dom, 1, 31, false)?,
            mon: Field::parse(mon, 1, 12, false)?,
            dow: Field::parse(dow, 0, 6, true)?,
        })
    }

    fn matches(&self, dt: DateTime<Local>) -> bool {
        if !self.min.contains(dt.minute())
            || !self.hour.contains(dt.hour())
            || !self.mon.contains(dt.month())
        {
            return false;
        }

        // Both day fields restricted: either one matching is enough.
        let dom_match = self.dom.contains(dt.day());
        let dow_match = self.dow.contains(dt.weekday().num_days_from_sunday());
        match (self.dom.any, self.dow.any) {
            (true, true) => true,
            (true, false) => dow_match,
            (false, true) => dom_match,
            (false, false) => dom_match || dow_match,
        }
    }

    fn next_after(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        let mut t = (now + chrono::Duration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;

        // A year of minutes; impossible expressions (e.g. Feb 31) give None.
        for _ in 0..366usize * 24 * 60 {
            if self.matches(t) {
                return Some(t);
            }
            t += chrono::Duration::minutes(1);
        }
        None
    }
}

impl Field {
    fn parse(raw: &str, min: u32, max: u32, allow_7_as_0: bool) -> Result<Self> {
        let raw = raw.trim();
        let mut allowed = vec![false; (max + 1) as usize];

        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (base, step) = match part.split_once('/') {
                Some((a, b)) => {
                    let step: u32 = b
                        .trim()
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid cron step: {b}")))?;
                    if step == 0 {
                        return Err(Error::Config("cron step must be > 0".to_string()));
                    }
                    (a.trim(), Some(step))
                }
                None => (part, None),
            };

            let (start, end) = if base == "*" {
                (min, max)
            } else if let Some((a, b)) = base.split_once('-') {
                (parse_u32(a.trim(), allow_7_as_0)?, parse_u32(b.trim(), allow_7_as_0)?)
            } else {
                let a = parse_u32(base, allow_7_as_0)?;
                if step.is_some() {
                    (a, max)
                } else {
                    (a, a)
                }
            };

            let (start, end) = (start.max(min), end.min(max));
            if start > end {
                return Err(Error::Config(format!("invalid cron range: {base}")));
            }

            let step = step.unwrap_or(1) as usize;
            for v in (start..=end).step_by(step) {
                allowed[v as usize] = true;
            }
        }

        let any = (min..=max).all(|v| allowed[v as usize]);
        Ok(Self {
            min,
            max,
            any,
            allowed,
        })
    }

    fn contains(&self, v: u32) -> bool {
        v >= self.min && v <= self.max && self.allowed.get(v as usize).copied().unwrap_or(false)
    }
}

fn parse_u32(s: &str, allow_7_as_0: bool) -> Result<u32> {
    let v: u32 = s
        .parse()
        .map_err(|_| Error::Config(format!("invalid cron number: {s}")))?;
    Ok(if allow_7_as_0 && v == 7 { 0 } else { v })
}
