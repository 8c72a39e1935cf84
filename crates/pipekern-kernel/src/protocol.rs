//! Line protocol: sentinel vocabularies and task framing.
//!
//! Every task is one input line. Fields are separated by the `field`
//! sentinel and the first field names the task kind:
//!
//! ```text
//! EXEC|x = 5|y = x * 2
//! EVAL|x + y
//! LIST
//! GET|x
//! SET|x|[1, 2, 3]
//! REMOVE|x
//! FORK|/tmp/in|/tmp/out|/tmp/err|{"x": 1}
//! ```
//!
//! That is the development vocabulary. In production every sentinel is a
//! single private-use code point so it cannot collide with program output.

use std::path::PathBuf;

use crate::error::{KernelError, KernelResult};

/// Environment variable selecting the development vocabulary.
pub const DEV_ENV: &str = "DEV";

/// The protocol's fixed strings, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinels {
    pub ready: String,
    pub field: String,
    pub exec: String,
    pub eval: String,
    pub fork: String,
    pub list: String,
    pub get: String,
    pub set: String,
    pub remove: String,
    pub end: String,
}

impl Sentinels {
    /// Human-readable vocabulary.
    pub fn dev() -> Self {
        Self {
            ready: "READY".into(),
            field: "|".into(),
            exec: "EXEC".into(),
            eval: "EVAL".into(),
            fork: "FORK".into(),
            list: "LIST".into(),
            get: "GET".into(),
            set: "SET".into(),
            remove: "REMOVE".into(),
            end: "END".into(),
        }
    }

    /// Private-use-area vocabulary.
    pub fn production() -> Self {
        Self {
            ready: "\u{10ACDC}".into(),
            field: "\u{10ABBA}".into(),
            exec: "\u{10B522}".into(),
            eval: "\u{1010CC}".into(),
            fork: "\u{10DE70}".into(),
            list: "\u{10C155}".into(),
            get: "\u{10A51A}".into(),
            set: "\u{107070}".into(),
            remove: "\u{10C41C}".into(),
            end: "\u{10CB40}".into(),
        }
    }

    /// `dev()` when `DEV=true`, otherwise `production()`.
    pub fn from_env() -> Self {
        Self::for_dev_mode(std::env::var(DEV_ENV).is_ok_and(|v| v == "true"))
    }

    pub fn for_dev_mode(dev: bool) -> Self {
        if dev {
            Self::dev()
        } else {
            Self::production()
        }
    }

    /// Frame a task line from a kind sentinel and its fields.
    pub fn line<'a>(&self, kind: &str, fields: impl IntoIterator<Item = &'a str>) -> String {
        let mut line = kind.to_string();
        for field in fields {
            line.push_str(&self.field);
            line.push_str(field);
        }
        line
    }
}

impl Default for Sentinels {
    fn default() -> Self {
        Self::production()
    }
}

/// Endpoints and seed context for a forked session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeSet {
    pub stdin: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    /// JSON object seeding the child's context. `None` inherits the parent's.
    pub context: Option<String>,
}

/// One parsed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Run each fragment in order.
    Execute(Vec<String>),
    Evaluate(String),
    List,
    Get(String),
    /// Name and JSON-encoded value.
    Set(String, String),
    Remove(String),
    Fork(PipeSet),
}

impl Task {
    /// Development-vocabulary name of the task kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Task::Execute(_) => "EXEC",
            Task::Evaluate(_) => "EVAL",
            Task::List => "LIST",
            Task::Get(_) => "GET",
            Task::Set(..) => "SET",
            Task::Remove(_) => "REMOVE",
            Task::Fork(_) => "FORK",
        }
    }

    /// Parse one input line. Blank lines yield `Ok(None)`.
    ///
    /// The last field a task takes absorbs any further separators, so a
    /// JSON value or expression may itself contain the separator.
    pub fn parse(line: &str, sentinels: &Sentinels) -> KernelResult<Option<Task>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let sep = sentinels.field.as_str();
        let (kind, rest) = match line.split_once(sep) {
            Some((kind, rest)) => (kind, Some(rest)),
            None => (line, None),
        };

        let task = if kind == sentinels.exec {
            let rest = rest.ok_or(KernelError::MissingField {
                task: "EXEC",
                position: 1,
            })?;
            Task::Execute(rest.split(sep).map(str::to_string).collect())
        } else if kind == sentinels.eval {
            let [expr] = take::<1>("EVAL", rest, sep)?;
            Task::Evaluate(expr)
        } else if kind == sentinels.list {
            Task::List
        } else if kind == sentinels.get {
            Task::Get(first_field("GET", rest, sep)?)
        } else if kind == sentinels.set {
            let [name, value] = take::<2>("SET", rest, sep)?;
            Task::Set(name, value)
        } else if kind == sentinels.remove {
            Task::Remove(first_field("REMOVE", rest, sep)?)
        } else if kind == sentinels.fork {
            Task::Fork(pipe_set(rest, sep)?)
        } else {
            return Err(KernelError::UnrecognizedTask(kind.to_string()));
        };
        Ok(Some(task))
    }
}

/// Split `rest` into at most `n` fields, requiring at least `n`.
fn fields(task: &'static str, rest: Option<&str>, sep: &str, n: usize) -> KernelResult<Vec<String>> {
    let out: Vec<String> = match rest {
        Some(rest) => rest.splitn(n, sep).map(str::to_string).collect(),
        None => Vec::new(),
    };
    if out.len() < n {
        return Err(KernelError::MissingField {
            task,
            position: out.len() + 1,
        });
    }
    Ok(out)
}

fn take<const N: usize>(task: &'static str, rest: Option<&str>, sep: &str) -> KernelResult<[String; N]> {
    let out = fields(task, rest, sep, N)?;
    // `fields` guarantees exactly N entries.
    out.try_into().map_err(|_: Vec<String>| KernelError::MissingField { task, position: N })
}

/// The first field only; anything after it is ignored.
fn first_field(task: &'static str, rest: Option<&str>, sep: &str) -> KernelResult<String> {
    let rest = rest.ok_or(KernelError::MissingField { task, position: 1 })?;
    Ok(rest.split(sep).next().unwrap_or_default().to_string())
}

fn pipe_set(rest: Option<&str>, sep: &str) -> KernelResult<PipeSet> {
    let parts = match rest {
        Some(rest) => rest.splitn(4, sep).collect::<Vec<_>>(),
        None => Vec::new(),
    };
    if parts.len() < 3 {
        return Err(KernelError::MissingField {
            task: "FORK",
            position: parts.len() + 1,
        });
    }
    let context = parts
        .get(3)
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    let [stdin, stdout, stderr] = [parts[0], parts[1], parts[2]].map(PathBuf::from);
    Ok(PipeSet {
        stdin,
        stdout,
        stderr,
        context,
    })
}
