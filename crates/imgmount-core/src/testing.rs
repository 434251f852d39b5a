//! Scripted stand-ins for host tools.
//!
//! [`ScriptedRunner`] lets code built on [`BlockDevice`](crate::device::BlockDevice)
//! be tested on machines without root access, loop devices, or `qemu-nbd`.

use std::collections::HashSet;
use std::sync::Mutex;

use imgmount_common::error::Result;

use crate::command::{CommandOutput, CommandRunner};

/// One recorded program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program that was started (the privilege tool when escalating).
    pub program: String,
    /// Arguments passed to it.
    pub args: Vec<String>,
}

impl Invocation {
    /// Program and arguments joined with spaces.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The device tool being run, looking past a privilege prefix.
    #[must_use]
    pub fn tool(&self) -> &str {
        match self.program.as_str() {
            "sudo" | "doas" => self.args.first().map_or("", String::as_str),
            program => program,
        }
    }

    /// Arguments of the device tool, looking past a privilege prefix.
    #[must_use]
    pub fn tool_args(&self) -> &[String] {
        match self.program.as_str() {
            "sudo" | "doas" => self.args.get(1..).unwrap_or_default(),
            _ => &self.args,
        }
    }
}

type Handler = Box<dyn Fn(&Invocation) -> CommandOutput + Send + Sync>;

/// [`CommandRunner`] that answers every invocation through a closure and
/// records what was run.
pub struct ScriptedRunner {
    handler: Handler,
    missing: HashSet<String>,
    calls: Mutex<Vec<Invocation>>,
}

impl std::fmt::Debug for ScriptedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedRunner")
            .field("missing", &self.missing)
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

impl ScriptedRunner {
    /// Creates a runner answering with `handler`. Every program is
    /// reported as present.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Invocation) -> CommandOutput + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            missing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Reports `programs` as absent from the execution path.
    #[must_use]
    pub fn with_missing(mut self, programs: &[&str]) -> Self {
        self.missing
            .extend(programs.iter().map(|p| (*p).to_owned()));
        self
    }

    /// Every invocation so far, in order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Every invocation so far as a space-joined command line.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(Invocation::command_line).collect()
    }

    /// Number of invocations of `tool`, looking past privilege prefixes.
    pub fn count(&self, tool: &str) -> usize {
        self.calls().iter().filter(|c| c.tool() == tool).count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let invocation = Invocation {
            program: program.to_owned(),
            args: args.to_vec(),
        };
        let output = (self.handler)(&invocation);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation);
        }
        Ok(output)
    }

    fn locate(&self, program: &str) -> bool {
        !self.missing.contains(program)
    }
}
