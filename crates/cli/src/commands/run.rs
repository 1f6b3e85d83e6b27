//! `switchboard run` / `switchboard resume`: drive a scripted run.
//!
//! A run that pauses for approval is decided with `--approve` / `--reject`
//! and resumed in-process as long as every pending request has a decision.
//! Otherwise the pending requests are listed and the state is written to
//! `--save-state` for a later `resume`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use switchboard_core::{Agent, FinalOutput};
use switchboard_runner::{
    ExecutionState, RunError, RunInput, RunOptions, RunResult, RunStreamEvent, Runner,
};
use switchboard_telemetry::{InMemoryExporter, Tracer};
use tracing::{debug, info};

use super::load_config;
use crate::script::Script;

#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Run script (agents plus scripted model responses)
    #[arg(short, long, value_name = "PATH")]
    pub script: PathBuf,

    /// Print events as they happen
    #[arg(long)]
    pub stream: bool,

    /// Approve a pending request by id, or `all`
    #[arg(long, value_name = "ID")]
    pub approve: Vec<String>,

    /// Reject a pending request by id, or `all`
    #[arg(long, value_name = "ID")]
    pub reject: Vec<String>,

    /// Write the run state here when the run pauses or stops
    #[arg(long, value_name = "PATH")]
    pub save_state: Option<PathBuf>,

    /// Print the run's spans when it finishes
    #[arg(long)]
    pub trace: bool,

    /// Override the configured turn limit
    #[arg(long)]
    pub max_turns: Option<u32>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// User input (defaults to the script's `input`)
    pub input: Option<String>,
}

#[derive(Args, Debug)]
pub struct ResumeArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// State file written by `--save-state`
    #[arg(long, value_name = "PATH")]
    pub state: PathBuf,
}

pub async fn run(args: RunArgs, config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let script = Script::load(&args.session.script)?;
    let agent = script.build_agents()?;

    let input = args
        .input
        .or_else(|| script.input.clone())
        .ok_or("No input given and the script has none")?;

    let mut options = RunOptions::default();
    if let Some(memory) = script.memory.clone() {
        options = options.with_memory(memory);
    }

    let session = Session::new(&args.session, &script, config_path, 0)?;
    session.drive(&agent, RunInput::from(input), options).await
}

pub async fn resume(args: ResumeArgs, config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let script = Script::load(&args.session.script)?;
    let agent = script.build_agents()?;

    let json = std::fs::read_to_string(&args.state)
        .map_err(|e| format!("Failed to read state {}: {e}", args.state.display()))?;
    let state = ExecutionState::from_json(&agent, &json)?;
    info!(
        agent = %state.current_agent(),
        turns = state.turn_count(),
        "Resuming saved run"
    );

    let consumed = state.model_responses().len();
    let session = Session::new(&args.session, &script, config_path, consumed)?;
    session.drive(&agent, RunInput::State(state), RunOptions::default()).await
}

/// Approval choices from the command line.
#[derive(Debug, Default)]
struct Decisions {
    approve: Vec<String>,
    reject: Vec<String>,
}

impl Decisions {
    /// Apply every choice that names a pending request. `all` applies
    /// first so explicit ids override it.
    fn apply(&self, state: &mut ExecutionState) -> Result<(), RunError> {
        if self.approve.iter().any(|id| id == "all") {
            state.approve_all()?;
        }
        if self.reject.iter().any(|id| id == "all") {
            state.reject_all()?;
        }

        let pending: Vec<String> = state
            .pending_interruptions()
            .iter()
            .map(|r| r.id.clone())
            .collect();
        for id in self.approve.iter().filter(|id| pending.contains(id)) {
            state.approve(id)?;
        }
        for id in self.reject.iter().filter(|id| pending.contains(id)) {
            state.reject(id)?;
        }
        Ok(())
    }
}

struct Session {
    runner: Runner,
    decisions: Decisions,
    stream: bool,
    save_state: Option<PathBuf>,
    max_turns: Option<u32>,
    exporter: Option<Arc<InMemoryExporter>>,
}

impl Session {
    fn new(
        args: &SessionArgs,
        script: &Script,
        config_path: Option<&Path>,
        consumed: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let config = load_config(config_path)?;
        let mut runner = Runner::from_config(&config)?.with_model(Arc::new(script.model(consumed)));

        let exporter = if args.trace {
            let exporter = Arc::new(InMemoryExporter::new());
            runner = runner.with_tracer(Tracer::new().with_exporter(exporter.clone()));
            Some(exporter)
        } else {
            None
        };

        Ok(Self {
            runner,
            decisions: Decisions {
                approve: args.approve.clone(),
                reject: args.reject.clone(),
            },
            stream: args.stream,
            save_state: args.save_state.clone(),
            max_turns: args.max_turns,
            exporter,
        })
    }

    async fn drive(
        &self,
        agent: &Arc<Agent>,
        mut input: RunInput,
        mut options: RunOptions,
    ) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(max_turns) = self.max_turns {
            options = options.with_max_turns(max_turns);
        }

        let outcome = loop {
            // Pending approvals on a saved state are decided before resuming
            if let RunInput::State(state) = &mut input
                && !state.pending_interruptions().is_empty()
            {
                self.decisions.apply(state)?;
                if !state.unresolved().is_empty() {
                    self.report_pending(state)?;
                    break Ok(());
                }
            }

            let result = match self.execute(agent, input, options.clone()).await {
                Ok(result) => result,
                Err(e) => break Err(e),
            };

            if !result.is_interrupted() {
                break self.report_final(&result);
            }

            let mut state = result.state;
            self.decisions.apply(&mut state)?;
            if !state.unresolved().is_empty() {
                self.report_pending(&state)?;
                break Ok(());
            }
            debug!("Every pending request decided, resuming");
            input = RunInput::State(state);
            options.memory = None;
        };

        self.print_trace();

        match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some(state) = e.state() {
                    self.save(state)?;
                }
                Err(e.into())
            }
        }
    }

    async fn execute(
        &self,
        agent: &Arc<Agent>,
        input: RunInput,
        options: RunOptions,
    ) -> Result<RunResult, RunError> {
        if !self.stream {
            return self.runner.run(agent, input, options).await;
        }

        let mut streamed = self.runner.run_streamed(agent, input, options);

        let token = streamed.cancellation_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });

        while let Some(event) = streamed.next_event().await {
            print_event(&event);
        }
        let result = streamed.completed().await;
        interrupt.abort();
        result
    }

    fn report_final(&self, result: &RunResult) -> Result<(), RunError> {
        match &result.final_output {
            Some(FinalOutput::Text(text)) => println!("{text}"),
            Some(FinalOutput::Json(value)) => {
                println!("{}", serde_json::to_string_pretty(value)?)
            }
            None => println!("(no output)"),
        }
        info!(
            agent = %result.last_agent,
            requests = result.usage.requests,
            total_tokens = result.usage.total_tokens,
            "Run completed"
        );
        self.save(&result.state)
    }

    fn report_pending(&self, state: &ExecutionState) -> Result<(), RunError> {
        let unresolved = state.unresolved();
        println!("⏸  Run paused: {} approval(s) pending", unresolved.len());
        for request in state
            .pending_interruptions()
            .iter()
            .filter(|r| unresolved.contains(&r.id))
        {
            println!(
                "   {}  {}({})",
                request.id, request.tool_call.name, request.tool_call.arguments
            );
        }

        match &self.save_state {
            Some(_) => self.save(state),
            None => {
                println!("   Pass --save-state to keep this run for `switchboard resume`");
                Ok(())
            }
        }
    }

    fn save(&self, state: &ExecutionState) -> Result<(), RunError> {
        let Some(path) = &self.save_state else {
            return Ok(());
        };
        std::fs::write(path, state.to_json()?)
            .map_err(|e| RunError::Internal(format!("Failed to write {}: {e}", path.display())))?;
        info!(path = %path.display(), "Saved run state");
        Ok(())
    }

    fn print_trace(&self) {
        let Some(exporter) = &self.exporter else {
            return;
        };
        for trace in exporter.traces() {
            println!(
                "── Trace {} ({}) ──",
                trace.id,
                trace.workflow_name.as_deref().unwrap_or("unnamed")
            );
            for span in &trace.spans {
                let status = match span.success {
                    Some(true) => "ok",
                    Some(false) => "failed",
                    None => "open",
                };
                println!(
                    "   {:<16} {:<24} {:>6}ms  {status}",
                    span.kind.to_string(),
                    span.label,
                    span.duration_ms.unwrap_or(0)
                );
            }
        }
    }
}

fn print_event(event: &RunStreamEvent) {
    match event {
        RunStreamEvent::ResponseStarted | RunStreamEvent::RawModelEvent { .. } => {}
        RunStreamEvent::OutputTextDelta { delta } => println!("… {delta}"),
        RunStreamEvent::AgentUpdated { agent } => println!("→ agent: {agent}"),
        RunStreamEvent::RunItem { name, item } => {
            println!("• {} [{}]", name.as_str(), item.item_type())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::{ApprovalDecision, ModelResponse};
    use switchboard_runner::test_support::{EchoTool, ScriptedModel, function_call};

    async fn paused_state() -> ExecutionState {
        let agent = Arc::new(
            Agent::new("ops")
                .with_tool(Arc::new(EchoTool::new("deploy").needing_approval()))
                .with_tool(Arc::new(EchoTool::new("rollback").needing_approval())),
        );
        let model = ScriptedModel::new(vec![ModelResponse {
            output: vec![
                function_call("c1", "deploy", serde_json::json!({})),
                function_call("c2", "rollback", serde_json::json!({})),
            ],
            ..Default::default()
        }]);
        let result = Runner::new()
            .with_model(Arc::new(model))
            .run(&agent, "ship it", RunOptions::default())
            .await
            .unwrap();
        assert!(result.is_interrupted());
        result.state
    }

    #[tokio::test]
    async fn all_applies_before_explicit_ids() {
        let mut state = paused_state().await;
        let decisions = Decisions {
            approve: vec!["all".into()],
            reject: vec!["c2".into()],
        };
        decisions.apply(&mut state).unwrap();
        assert!(state.unresolved().is_empty());
        assert_eq!(
            state.approval_decisions().get("c1"),
            Some(&ApprovalDecision::Approved)
        );
        assert_eq!(
            state.approval_decisions().get("c2"),
            Some(&ApprovalDecision::Rejected)
        );
    }

    #[tokio::test]
    async fn ids_that_are_not_pending_are_ignored() {
        let mut state = paused_state().await;
        let decisions = Decisions {
            approve: vec!["c1".into(), "c9".into()],
            reject: Vec::new(),
        };
        decisions.apply(&mut state).unwrap();
        assert_eq!(state.unresolved(), vec!["c2".to_string()]);
    }
}
