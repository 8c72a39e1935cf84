//! The kernel: owns the context and drives the task loop.
//!
//! ```text
//! read line → Task::parse → dispatch → response lines → error record → READY, READY
//! ```
//!
//! All output of a task is buffered while it runs and written afterwards,
//! followed by the readiness pair. Nothing is left in the writers between
//! tasks, which keeps a fork from duplicating buffered parent output.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::os::fd::AsFd;

use anyhow::Context as _;
use pipekern_types::VariableDescriptor;

use crate::ast::Value;
use crate::context::Context;
use crate::error::{KernelError, KernelResult};
use crate::evaluator::Evaluator;
use crate::fork::{ForkOutcome, Forker, ProcessForker};
use crate::interpreter::Interpreter;
use crate::protocol::{PipeSet, Sentinels, Task};
use crate::signal::Interrupt;

/// Configuration for a kernel instance. Fixed once the kernel is built.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Name used in log output.
    pub name: String,

    /// Language tag for variable descriptors. `None` uses the evaluator's.
    pub language: Option<String>,

    /// Active protocol vocabulary.
    pub sentinels: Sentinels,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "pipekern".to_string(),
            language: None,
            sentinels: Sentinels::production(),
        }
    }
}

impl KernelConfig {
    /// Vocabulary chosen by the `DEV` environment variable.
    pub fn from_env() -> Self {
        Self::default().with_sentinels(Sentinels::from_env())
    }

    /// Development vocabulary.
    pub fn dev() -> Self {
        Self::default().with_sentinels(Sentinels::dev())
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_sentinels(mut self, sentinels: Sentinels) -> Self {
        self.sentinels = sentinels;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// The three streams a kernel talks over.
#[derive(Debug)]
pub struct Channels<R, O, W> {
    pub input: R,
    pub output: O,
    pub error: W,
}

/// Channels over the process's standard streams.
pub type StdChannels = Channels<BufReader<File>, BufWriter<File>, BufWriter<File>>;

impl<R, O, W> Channels<R, O, W> {
    pub fn new(input: R, output: O, error: W) -> Self {
        Self {
            input,
            output,
            error,
        }
    }
}

impl StdChannels {
    /// Fresh handles on whatever fds 0, 1 and 2 currently refer to.
    ///
    /// Duplicated descriptors rather than `io::stdin()` and friends, so the
    /// buffers are owned here and are dropped after a fork re-wires the fds.
    pub fn stdio() -> io::Result<Self> {
        let input = File::from(io::stdin().as_fd().try_clone_to_owned()?);
        let output = File::from(io::stdout().as_fd().try_clone_to_owned()?);
        let error = File::from(io::stderr().as_fd().try_clone_to_owned()?);
        Ok(Self::new(
            BufReader::new(input),
            BufWriter::new(output),
            BufWriter::new(error),
        ))
    }
}

/// Outcome of one dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Done,
    /// This process is now a forked child; its channels are stale.
    Forked,
}

/// Why [`Kernel::serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
    /// Input was exhausted.
    Eof,
    /// This process became a forked child and must rebuild its channels.
    Forked,
}

/// A kernel instance.
pub struct Kernel<E = Interpreter, F = ProcessForker> {
    config: KernelConfig,
    context: Context,
    evaluator: E,
    forker: F,
    interrupt: Interrupt,
}

impl Kernel {
    /// Kernel with the bundled interpreter, real forking and the process
    /// SIGINT flag.
    pub fn new(config: KernelConfig) -> Self {
        let interrupt = Interrupt::process();
        Self::with_parts(
            config,
            Interpreter::new(interrupt.clone()),
            ProcessForker,
            interrupt,
        )
    }
}

impl<E: Evaluator, F: Forker> Kernel<E, F> {
    /// Assemble a kernel from its collaborators.
    ///
    /// `interrupt` is cleared at the start of every task and should be the
    /// flag the evaluator polls.
    pub fn with_parts(config: KernelConfig, evaluator: E, forker: F, interrupt: Interrupt) -> Self {
        Self {
            config,
            context: Context::new(),
            evaluator,
            forker,
            interrupt,
        }
    }

    /// Replace the initial context.
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    fn language(&self) -> &str {
        self.config
            .language
            .as_deref()
            .unwrap_or_else(|| self.evaluator.language())
    }

    /// Run one task, appending its response lines to `out`.
    ///
    /// On error, lines pushed before the failure stay in `out`.
    pub fn dispatch(&mut self, task: Task, out: &mut Vec<String>) -> KernelResult<Dispatched> {
        tracing::debug!(kernel = %self.config.name, task = task.kind_name(), "dispatch");
        match task {
            Task::Execute(fragments) => self.execute(&fragments, out)?,
            Task::Evaluate(expr) => self.evaluate(&expr, out)?,
            Task::List => self.list(out)?,
            Task::Get(name) => self.get(&name, out),
            Task::Set(name, json) => self.set(name, &json)?,
            Task::Remove(name) => self.remove(&name),
            Task::Fork(pipes) => return self.fork(&pipes, out),
        }
        Ok(Dispatched::Done)
    }

    fn execute(&mut self, fragments: &[String], out: &mut Vec<String>) -> KernelResult<()> {
        for (i, code) in fragments.iter().enumerate() {
            tracing::trace!(fragment = i, "execute");
            if let Some(value) = self.evaluator.execute(code, &mut self.context)? {
                out.push(value.to_json_string());
            }
        }
        Ok(())
    }

    fn evaluate(&mut self, expr: &str, out: &mut Vec<String>) -> KernelResult<()> {
        let value = self.evaluator.evaluate(expr, &mut self.context)?;
        out.push(value.to_json_string());
        Ok(())
    }

    fn list(&self, out: &mut Vec<String>) -> KernelResult<()> {
        let language = self.language();
        for (name, value) in self.context.iter() {
            let descriptor = VariableDescriptor::describe(name, language, value);
            out.push(format!(
                "{}{}",
                serde_json::to_string(&descriptor)?,
                self.config.sentinels.end
            ));
        }
        Ok(())
    }

    fn get(&self, name: &str, out: &mut Vec<String>) {
        if let Some(value) = self.context.get(name) {
            out.push(value.to_json_string());
        }
    }

    fn set(&mut self, name: String, json: &str) -> KernelResult<()> {
        let value: Value = serde_json::from_str(json)?;
        self.context.set(name, value);
        Ok(())
    }

    fn remove(&mut self, name: &str) {
        self.context.remove(name);
    }

    fn fork(&mut self, pipes: &PipeSet, out: &mut Vec<String>) -> KernelResult<Dispatched> {
        // Decode before forking so a bad context fails in the parent.
        let seed = match &pipes.context {
            Some(json) => Context::from_json(json)?,
            None => Context::from_json(&self.context.snapshot()?)?,
        };

        match self.forker.fork_session(pipes)? {
            ForkOutcome::Parent(pid) => {
                out.push(pid.to_string());
                Ok(Dispatched::Done)
            }
            ForkOutcome::Child => {
                tracing::info!(vars = seed.len(), "starting forked session");
                self.context = seed;
                Ok(Dispatched::Forked)
            }
        }
    }

    /// Write the readiness pair: output first, then error, each flushed.
    pub fn announce_ready<R, O: Write, W: Write>(
        &self,
        channels: &mut Channels<R, O, W>,
    ) -> io::Result<()> {
        let ready = &self.config.sentinels.ready;
        writeln!(channels.output, "{ready}")?;
        channels.output.flush()?;
        writeln!(channels.error, "{ready}")?;
        channels.error.flush()
    }

    /// Serve tasks until input ends or this process becomes a forked child.
    ///
    /// Task failures are reported on the error channel and never end the
    /// loop. Failing to read or write a channel does.
    pub fn serve<R: BufRead, O: Write, W: Write>(
        &mut self,
        channels: &mut Channels<R, O, W>,
    ) -> anyhow::Result<Served> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = channels
                .input
                .read_line(&mut line)
                .context("failed to read task line")?;
            if read == 0 {
                tracing::debug!(kernel = %self.config.name, "end of input");
                return Ok(Served::Eof);
            }

            self.interrupt.clear();
            let task = match Task::parse(&line, &self.config.sentinels) {
                Ok(None) => continue,
                Ok(Some(task)) => Ok(task),
                Err(err) => Err(err),
            };

            let mut out = Vec::new();
            let result = task.and_then(|task| self.dispatch(task, &mut out));

            if let Ok(Dispatched::Forked) = result {
                return Ok(Served::Forked);
            }

            for response in &out {
                writeln!(channels.output, "{response}").context("failed to write output")?;
            }
            if let Err(err) = result {
                self.report(&err, channels)?;
            }
            self.announce_ready(channels)
                .context("failed to write readiness signal")?;
        }
    }

    fn report<R, O, W: Write>(
        &self,
        err: &KernelError,
        channels: &mut Channels<R, O, W>,
    ) -> anyhow::Result<()> {
        if err.is_interrupt() {
            tracing::debug!("task interrupted");
            return Ok(());
        }
        tracing::debug!(error_type = err.error_type(), error = %err, "task failed");
        writeln!(channels.error, "{}", err.to_record().to_json())
            .context("failed to write error record")
    }
}

/// Serve a kernel on the standard streams until input ends.
///
/// `channels` should already be positioned at the first task line. After a
/// fork the child rebuilds its channels from the re-wired fds and carries on
/// here as an independent kernel.
pub fn serve_stdio<E: Evaluator, F: Forker>(
    kernel: &mut Kernel<E, F>,
    mut channels: StdChannels,
) -> anyhow::Result<()> {
    loop {
        kernel
            .announce_ready(&mut channels)
            .context("failed to write readiness signal")?;
        match kernel.serve(&mut channels)? {
            Served::Eof => return Ok(()),
            Served::Forked => {
                channels = StdChannels::stdio().context("failed to attach to forked session streams")?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::EvalError;
    use std::thread;
    use std::time::Duration;

    /// Forker that never forks; reports a fixed outcome and records requests.
    #[derive(Default)]
    struct FakeForker {
        outcome: Option<ForkOutcome>,
        requests: Vec<PipeSet>,
    }

    impl Forker for FakeForker {
        fn fork_session(&mut self, pipes: &PipeSet) -> KernelResult<ForkOutcome> {
            self.requests.push(pipes.clone());
            self.outcome
                .ok_or_else(|| KernelError::Fork("no outcome configured".into()))
        }
    }

    fn kernel_with(forker: FakeForker) -> Kernel<Interpreter, FakeForker> {
        let interrupt = Interrupt::new();
        Kernel::with_parts(
            KernelConfig::dev(),
            Interpreter::new(interrupt.clone()),
            forker,
            interrupt,
        )
    }

    fn kernel() -> Kernel<Interpreter, FakeForker> {
        kernel_with(FakeForker::default())
    }

    /// Serve `input`, returning what went to the output and error channels.
    fn run<F: Forker>(kernel: &mut Kernel<Interpreter, F>, input: &str) -> (String, String, Served) {
        let mut channels = Channels::new(input.as_bytes(), Vec::new(), Vec::new());
        let served = kernel.serve(&mut channels).expect("serve");
        (
            String::from_utf8(channels.output).expect("utf8"),
            String::from_utf8(channels.error).expect("utf8"),
            served,
        )
    }

    #[test]
    fn set_eval_list_remove_get() {
        let mut k = kernel();
        let (out, err, served) = run(
            &mut k,
            "SET|x|5\nEVAL|x+1\nSET|y|[1,2,3]\nREMOVE|x\nLIST\nGET|x\n",
        );
        assert_eq!(served, Served::Eof);
        insta::assert_snapshot!(out, @r#"
        READY
        6
        READY
        READY
        READY
        {"type":"Variable","name":"y","programmingLanguage":"Kern","nativeType":"array","nodeType":"Array","valueHint":3}END
        READY
        READY
        "#);
        assert_eq!(err, "READY\n".repeat(6));
    }

    #[test]
    fn list_emits_one_line_per_variable() {
        let mut k = kernel();
        let (out, _, _) = run(&mut k, "SET|b|\"hi\"\nSET|a|null\nEXEC|f = len\nLIST\n");
        let lines: Vec<&str> = out.lines().filter(|l| l.ends_with("END")).collect();
        insta::assert_snapshot!(lines.join("\n"), @r#"
        {"type":"Variable","name":"a","programmingLanguage":"Kern","nativeType":"null","nodeType":"Null","valueHint":null}END
        {"type":"Variable","name":"b","programmingLanguage":"Kern","nativeType":"string","nodeType":"String","valueHint":2}END
        {"type":"Variable","name":"f","programmingLanguage":"Kern","nativeType":"builtin","nodeType":"Object","valueHint":null}END
        "#);
    }

    #[test]
    fn blank_lines_produce_nothing() {
        let mut k = kernel();
        let (out, err, _) = run(&mut k, "\n   \nGET|missing\n\n");
        assert_eq!(out, "READY\n");
        assert_eq!(err, "READY\n");
    }

    #[test]
    fn unrecognized_task_does_not_stop_the_loop() {
        let mut k = kernel();
        let (out, err, _) = run(&mut k, "BOGUS|1\nEVAL|1 + 1\n");
        assert_eq!(out, "READY\n2\nREADY\n");
        insta::assert_snapshot!(err, @r#"
        {"type":"ExecutionError","errorType":"UnrecognizedTask","errorMessage":"unrecognized task: \"BOGUS\""}
        READY
        READY
        "#);
    }

    #[test]
    fn failed_fragment_keeps_earlier_output_and_bindings() {
        let mut k = kernel();
        let (out, err, _) = run(&mut k, "EXEC|a = 1; a|missing|b = 2\n");
        assert_eq!(out, "1\nREADY\n");
        assert!(err.contains("\"errorType\":\"NameError\""), "{err}");
        assert_eq!(k.context().get("a"), Some(&Value::Int(1)));
        assert!(!k.context().contains("b"));
    }

    #[test]
    fn set_with_bad_json_is_a_decode_error() {
        let mut k = kernel();
        let (_, err, _) = run(&mut k, "SET|x|{nope\n");
        assert!(err.starts_with("{\"type\":\"ExecutionError\",\"errorType\":\"DecodeError\""), "{err}");
        assert!(k.context().is_empty());
    }

    #[test]
    fn missing_field_is_reported_not_fatal() {
        let mut k = kernel();
        let (out, err, _) = run(&mut k, "SET|x\nGET\nEVAL|3\n");
        assert_eq!(out, "READY\nREADY\n3\nREADY\n");
        assert_eq!(err.matches("\"errorType\":\"MissingField\"").count(), 2);
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut k = kernel();
        let (out, _, _) = run(&mut k, "SET|v|{\"n\": [1, 2.5, null], \"s\": \"a|b\"}\nGET|v\n");
        assert_eq!(out, "READY\n{\"n\":[1,2.5,null],\"s\":\"a|b\"}\nREADY\n");
    }

    #[test]
    fn production_vocabulary_round_trip() {
        let interrupt = Interrupt::new();
        let sentinels = Sentinels::production();
        let mut k = Kernel::with_parts(
            KernelConfig::default(),
            Interpreter::new(interrupt.clone()),
            FakeForker::default(),
            interrupt,
        );
        let input = format!(
            "{}\n{}\n",
            sentinels.line(&sentinels.set, ["x", "41"]),
            sentinels.line(&sentinels.eval, ["x + 1"]),
        );
        let (out, _, _) = run(&mut k, &input);
        let ready = &sentinels.ready;
        assert_eq!(out, format!("{ready}\n42\n{ready}\n"));
    }

    #[test]
    fn fork_parent_prints_pid_and_keeps_context() {
        let mut k = kernel_with(FakeForker {
            outcome: Some(ForkOutcome::Parent(4242)),
            ..FakeForker::default()
        });
        let (out, _, served) = run(&mut k, "SET|x|1\nFORK|in|out|err|{\"y\": 2}\nGET|x\n");
        assert_eq!(served, Served::Eof);
        assert_eq!(out, "READY\n4242\nREADY\n1\nREADY\n");
        assert!(!k.context().contains("y"));
        assert_eq!(k.forker.requests.len(), 1);
        assert_eq!(k.forker.requests[0].stdout, std::path::PathBuf::from("out"));
    }

    #[test]
    fn fork_child_replaces_context_and_stops_serving() {
        let mut k = kernel_with(FakeForker {
            outcome: Some(ForkOutcome::Child),
            ..FakeForker::default()
        });
        let (out, err, served) = run(&mut k, "SET|x|1\nFORK|in|out|err|{\"y\": 2}\nGET|x\n");
        assert_eq!(served, Served::Forked);
        // Nothing for the fork task itself goes to the stale channels.
        assert_eq!(out, "READY\n");
        assert_eq!(err, "READY\n");
        assert!(!k.context().contains("x"));
        assert_eq!(k.context().get("y"), Some(&Value::Int(2)));
    }

    #[test]
    fn fork_child_without_context_inherits_a_snapshot() {
        let mut k = kernel_with(FakeForker {
            outcome: Some(ForkOutcome::Child),
            ..FakeForker::default()
        });
        let (_, _, served) = run(&mut k, "SET|x|[1]\nFORK|in|out|err\n");
        assert_eq!(served, Served::Forked);
        assert_eq!(k.context().get("x"), Some(&Value::Array(vec![Value::Int(1)])));
    }

    #[test]
    fn fork_with_bad_context_fails_before_forking() {
        let mut k = kernel_with(FakeForker {
            outcome: Some(ForkOutcome::Child),
            ..FakeForker::default()
        });
        let (_, err, served) = run(&mut k, "FORK|in|out|err|[1, 2]\n");
        assert_eq!(served, Served::Eof);
        assert!(err.contains("DecodeError"), "{err}");
        assert!(k.forker.requests.is_empty());
    }

    #[test]
    fn fork_failure_is_a_task_error() {
        let mut k = kernel();
        let (out, err, _) = run(&mut k, "FORK|in|out|err|{}\n");
        assert_eq!(out, "READY\n");
        assert!(err.contains("\"errorType\":\"ForkError\""), "{err}");
    }

    #[test]
    fn interrupt_is_swallowed() {
        let mut k = kernel();
        let interrupt = k.interrupt.clone();
        let raiser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            interrupt.request();
        });
        let (out, err, _) = run(&mut k, "EVAL|sleep(30)\nEVAL|1\n");
        raiser.join().expect("join");
        assert_eq!(out, "READY\n1\nREADY\n");
        assert_eq!(err, "READY\nREADY\n");
    }

    #[test]
    fn stale_interrupt_is_cleared_at_task_start() {
        let mut k = kernel();
        k.interrupt.request();
        let (out, _, _) = run(&mut k, "EVAL|2\n");
        assert_eq!(out, "2\nREADY\n");
    }

    #[test]
    fn announce_ready_writes_both_channels() {
        let k = kernel();
        let mut channels = Channels::new((), Vec::new(), Vec::new());
        k.announce_ready(&mut channels).expect("write");
        assert_eq!(channels.output, b"READY\n");
        assert_eq!(channels.error, b"READY\n");
    }

    #[test]
    fn dispatch_collects_one_line_per_fragment_result() {
        let mut k = kernel();
        let mut out = Vec::new();
        let task = Task::Execute(vec!["1".into(), "x = 2".into(), "x * 2".into()]);
        assert_eq!(k.dispatch(task, &mut out).expect("runs"), Dispatched::Done);
        assert_eq!(out, vec!["1", "4"]);
    }

    #[test]
    fn language_override() {
        let interrupt = Interrupt::new();
        let mut k = Kernel::with_parts(
            KernelConfig::dev().with_language("Python"),
            Interpreter::new(interrupt.clone()),
            FakeForker::default(),
            interrupt,
        )
        .with_context([("n".to_string(), Value::Int(1))].into_iter().collect());
        let mut out = Vec::new();
        k.dispatch(Task::List, &mut out).expect("list");
        assert!(out[0].contains("\"programmingLanguage\":\"Python\""));
    }

    #[test]
    fn eval_errors_keep_their_kind() {
        let mut k = kernel();
        let mut out = Vec::new();
        let err = k
            .dispatch(Task::Evaluate("1 / 0".into()), &mut out)
            .expect_err("fails");
        assert!(matches!(err, KernelError::Execution(EvalError::Arithmetic(_))));
    }
}
