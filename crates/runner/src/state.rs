//! Execution state: the resumable record of a run.
//!
//! The state is plain data. Agents are referenced by name and resolved
//! against the caller-supplied agent graph, which is pinned by a fingerprint
//! so a snapshot can't be resumed against a different graph.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use switchboard_core::item::ITEM_TYPES;
use switchboard_core::{
    Agent, AgentInputItem, ApprovalDecision, ApprovalRequest, ConversationMemory, FinalOutput,
    HandoffCall, ModelResponse, Usage,
};

use crate::error::{Result, RunError};
use crate::history::SendProgress;

/// Version written into every snapshot.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Paused until every pending approval is decided.
    Interrupted,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    schema_version: u32,
    starting_agent: String,
    current_agent: String,
    agent_fingerprint: String,
    turn_count: u32,
    original_input: Vec<AgentInputItem>,
    generated_items: Vec<AgentInputItem>,
    model_responses: Vec<ModelResponse>,
    last_response_id: Option<String>,
    memory: ConversationMemory,
    send_progress: SendProgress,
    pending_interruptions: Vec<ApprovalRequest>,
    approval_decisions: BTreeMap<String, ApprovalDecision>,
    pending_handoff: Option<HandoffCall>,
    status: RunStatus,
    final_output: Option<FinalOutput>,
    input_guardrails_done: bool,
    context: serde_json::Map<String, serde_json::Value>,
    usage: Usage,
    failure: Option<String>,
}

impl ExecutionState {
    /// A fresh state for a run starting at `starting_agent`.
    pub fn new(
        starting_agent: &Arc<Agent>,
        original_input: Vec<AgentInputItem>,
        memory: ConversationMemory,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            starting_agent: starting_agent.name.clone(),
            current_agent: starting_agent.name.clone(),
            agent_fingerprint: agent_fingerprint(starting_agent),
            turn_count: 0,
            original_input,
            generated_items: Vec::new(),
            model_responses: Vec::new(),
            last_response_id: None,
            memory,
            send_progress: SendProgress::default(),
            pending_interruptions: Vec::new(),
            approval_decisions: BTreeMap::new(),
            pending_handoff: None,
            status: RunStatus::Running,
            final_output: None,
            input_guardrails_done: false,
            context: serde_json::Map::new(),
            usage: Usage::default(),
            failure: None,
        }
    }

    // ── Snapshot ──────────────────────────────────────────────────────

    /// Serialize to the versioned snapshot format.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Restore a snapshot produced by [`to_json`](Self::to_json).
    ///
    /// `starting_agent` must be the agent the run started with, carrying the
    /// same hand-off graph.
    pub fn from_json(starting_agent: &Arc<Agent>, json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;

        // Missing reads as 0; values past u32 can never match.
        let found = value
            .get("schema_version")
            .and_then(|v| v.as_u64())
            .map_or(0, |raw| u32::try_from(raw).unwrap_or(u32::MAX));
        if found != SCHEMA_VERSION {
            return Err(RunError::UnsupportedSnapshotVersion {
                found,
                expected: SCHEMA_VERSION,
            });
        }

        check_item_tags(&value)?;

        let state: ExecutionState = serde_json::from_value(value)?;
        state.verify_agent(starting_agent)?;
        Ok(state)
    }

    /// Check that this state belongs to the graph rooted at `starting_agent`.
    pub fn verify_agent(&self, starting_agent: &Arc<Agent>) -> Result<()> {
        if self.starting_agent != starting_agent.name {
            return Err(RunError::ResumeStateMismatch(format!(
                "state was produced by agent '{}', not '{}'",
                self.starting_agent, starting_agent.name
            )));
        }
        if self.agent_fingerprint != agent_fingerprint(starting_agent) {
            return Err(RunError::ResumeStateMismatch(format!(
                "agent graph of '{}' differs from the one that produced the state",
                starting_agent.name
            )));
        }
        if starting_agent.find(&self.current_agent).is_none() {
            return Err(RunError::ResumeStateMismatch(format!(
                "current agent '{}' is not reachable from '{}'",
                self.current_agent, starting_agent.name
            )));
        }
        Ok(())
    }

    // ── Approvals ─────────────────────────────────────────────────────

    /// Approve a pending request by id.
    pub fn approve(&mut self, request_id: &str) -> Result<()> {
        self.decide(request_id, ApprovalDecision::Approved)
    }

    /// Reject a pending request by id.
    pub fn reject(&mut self, request_id: &str) -> Result<()> {
        self.decide(request_id, ApprovalDecision::Rejected)
    }

    pub fn approve_all(&mut self) -> Result<()> {
        for id in self.pending_ids() {
            self.approve(&id)?;
        }
        Ok(())
    }

    pub fn reject_all(&mut self) -> Result<()> {
        for id in self.pending_ids() {
            self.reject(&id)?;
        }
        Ok(())
    }

    fn decide(&mut self, request_id: &str, decision: ApprovalDecision) -> Result<()> {
        if self.status.is_terminal() {
            return Err(RunError::StateFinalized);
        }
        if !self.pending_interruptions.iter().any(|r| r.id == request_id) {
            return Err(RunError::UnknownApproval(request_id.to_string()));
        }
        self.approval_decisions
            .insert(request_id.to_string(), decision);
        Ok(())
    }

    /// Ids of pending requests that have no decision yet.
    pub fn unresolved(&self) -> Vec<String> {
        self.pending_interruptions
            .iter()
            .filter(|r| !self.approval_decisions.contains_key(&r.id))
            .map(|r| r.id.clone())
            .collect()
    }

    fn pending_ids(&self) -> Vec<String> {
        self.pending_interruptions.iter().map(|r| r.id.clone()).collect()
    }

    /// Append an item to the history while the run is paused or running.
    pub fn append_item(&mut self, item: AgentInputItem) -> Result<()> {
        if self.status.is_terminal() {
            return Err(RunError::StateFinalized);
        }
        self.generated_items.push(item);
        Ok(())
    }

    // ── Accessors ─────────────────────────────────────────────────────

    pub fn starting_agent(&self) -> &str {
        &self.starting_agent
    }

    pub fn current_agent(&self) -> &str {
        &self.current_agent
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn original_input(&self) -> &[AgentInputItem] {
        &self.original_input
    }

    pub fn generated_items(&self) -> &[AgentInputItem] {
        &self.generated_items
    }

    pub fn model_responses(&self) -> &[ModelResponse] {
        &self.model_responses
    }

    pub fn last_model_response(&self) -> Option<&ModelResponse> {
        self.model_responses.last()
    }

    pub fn last_response_id(&self) -> Option<&str> {
        self.last_response_id.as_deref()
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn send_progress(&self) -> &SendProgress {
        &self.send_progress
    }

    pub fn pending_interruptions(&self) -> &[ApprovalRequest] {
        &self.pending_interruptions
    }

    pub fn approval_decisions(&self) -> &BTreeMap<String, ApprovalDecision> {
        &self.approval_decisions
    }

    pub fn pending_handoff(&self) -> Option<&HandoffCall> {
        self.pending_handoff.as_ref()
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn final_output(&self) -> Option<&FinalOutput> {
        self.final_output.as_ref()
    }

    pub fn input_guardrails_done(&self) -> bool {
        self.input_guardrails_done
    }

    pub fn context(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.context
    }

    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    // ── Scheduler transitions ─────────────────────────────────────────

    pub(crate) fn push_item(&mut self, item: AgentInputItem) {
        self.generated_items.push(item);
    }

    /// Record one model call. This is the only place `turn_count` moves.
    pub(crate) fn record_response(&mut self, response: &ModelResponse) {
        self.turn_count += 1;
        self.usage.add(&response.usage);
        if let Some(id) = &response.response_id {
            self.last_response_id = Some(id.clone());
        }
        self.model_responses.push(response.clone());
    }

    pub(crate) fn mark_sent(&mut self) {
        self.send_progress.mark_sent(self.generated_items.len());
    }

    pub(crate) fn set_current_agent(&mut self, name: &str) {
        self.current_agent = name.to_string();
    }

    pub(crate) fn set_context(&mut self, context: serde_json::Map<String, serde_json::Value>) {
        self.context = context;
    }

    pub(crate) fn set_input_guardrails_done(&mut self) {
        self.input_guardrails_done = true;
    }

    pub(crate) fn interrupt(
        &mut self,
        pending: Vec<ApprovalRequest>,
        handoff: Option<HandoffCall>,
    ) {
        self.pending_interruptions = pending;
        self.pending_handoff = handoff;
        self.status = RunStatus::Interrupted;
    }

    /// Leave the interrupted state, handing back what was pending.
    pub(crate) fn take_interruptions(&mut self) -> (Vec<ApprovalRequest>, Option<HandoffCall>) {
        self.status = RunStatus::Running;
        (
            std::mem::take(&mut self.pending_interruptions),
            self.pending_handoff.take(),
        )
    }

    pub(crate) fn complete(&mut self, output: FinalOutput) {
        self.final_output = Some(output);
        self.status = RunStatus::Completed;
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        self.failure = Some(reason.into());
        self.status = RunStatus::Failed;
    }
}

/// SHA-256 over the names that shape a run: agents, their tools and their
/// hand-off tools, in graph order.
pub fn agent_fingerprint(starting_agent: &Arc<Agent>) -> String {
    let mut hasher = Sha256::new();
    for agent in starting_agent.graph() {
        hasher.update(b"agent:");
        hasher.update(agent.name.as_bytes());
        hasher.update(b"\n");
        for tool in &agent.tools {
            hasher.update(b"tool:");
            hasher.update(tool.name().as_bytes());
            hasher.update(b"\n");
        }
        for handoff in &agent.handoffs {
            hasher.update(b"handoff:");
            hasher.update(handoff.tool_name.as_bytes());
            hasher.update(b"->");
            hasher.update(handoff.agent.name.as_bytes());
            hasher.update(b"\n");
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Reject snapshots carrying item tags this build does not know.
fn check_item_tags(value: &serde_json::Value) -> Result<()> {
    let mut lists: Vec<&serde_json::Value> = Vec::new();
    for key in ["original_input", "generated_items"] {
        if let Some(list) = value.get(key) {
            lists.push(list);
        }
    }
    if let Some(responses) = value.get("model_responses").and_then(|r| r.as_array()) {
        lists.extend(responses.iter().filter_map(|r| r.get("output")));
    }

    for item in lists.iter().filter_map(|l| l.as_array()).flatten() {
        let tag = item.get("type").and_then(|t| t.as_str()).unwrap_or("<missing>");
        if !ITEM_TYPES.contains(&tag) {
            return Err(RunError::UnknownItemType(tag.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::{Handoff, ToolCall};

    fn agent() -> Arc<Agent> {
        let billing = Arc::new(Agent::new("billing"));
        Arc::new(Agent::new("triage").with_handoff(Handoff::to(billing)))
    }

    fn interrupted_state(agent: &Arc<Agent>) -> ExecutionState {
        let mut state = ExecutionState::new(
            agent,
            vec![AgentInputItem::user("refund me")],
            ConversationMemory::FullHistory,
        );
        let call = ToolCall::new("call_1", "refund", "{}");
        state.push_item(AgentInputItem::ToolCall(call.clone()));
        state.interrupt(vec![ApprovalRequest::for_function(call)], None);
        state
    }

    #[test]
    fn new_state_is_running_at_the_start() {
        let agent = agent();
        let state = ExecutionState::new(&agent, vec![], ConversationMemory::FullHistory);
        assert_eq!(state.status(), RunStatus::Running);
        assert_eq!(state.current_agent(), "triage");
        assert_eq!(state.turn_count(), 0);
    }

    #[test]
    fn turn_count_moves_once_per_response() {
        let agent = agent();
        let mut state = ExecutionState::new(&agent, vec![], ConversationMemory::FullHistory);
        state.record_response(&ModelResponse::new(vec![]).with_response_id("r1"));
        state.record_response(&ModelResponse::new(vec![]));
        assert_eq!(state.turn_count(), 2);
        assert_eq!(state.last_response_id(), Some("r1"));
        assert_eq!(state.model_responses().len(), 2);
    }

    #[test]
    fn approvals_require_a_pending_request() {
        let agent = agent();
        let mut state = interrupted_state(&agent);
        assert_eq!(state.unresolved(), vec!["call_1".to_string()]);
        assert!(matches!(
            state.approve("nope"),
            Err(RunError::UnknownApproval(id)) if id == "nope"
        ));
        state.approve("call_1").unwrap();
        assert!(state.unresolved().is_empty());
        assert_eq!(
            state.approval_decisions().get("call_1"),
            Some(&ApprovalDecision::Approved)
        );
    }

    #[test]
    fn finalized_states_are_immutable() {
        let agent = agent();
        let mut state = interrupted_state(&agent);
        state.complete(FinalOutput::Text("done".into()));
        assert!(matches!(state.reject("call_1"), Err(RunError::StateFinalized)));
        assert!(matches!(
            state.append_item(AgentInputItem::user("more")),
            Err(RunError::StateFinalized)
        ));
    }

    #[test]
    fn snapshot_round_trip() {
        let agent = agent();
        let mut state = interrupted_state(&agent);
        state.approve("call_1").unwrap();
        let json = state.to_json().unwrap();
        let restored = ExecutionState::from_json(&agent, &json).unwrap();
        assert_eq!(restored.status(), RunStatus::Interrupted);
        assert_eq!(restored.generated_items(), state.generated_items());
        assert_eq!(restored.pending_interruptions().len(), 1);
        assert!(restored.unresolved().is_empty());
    }

    #[test]
    fn snapshot_version_is_checked() {
        let agent = agent();
        let state = interrupted_state(&agent);
        let mut value: serde_json::Value = serde_json::from_str(&state.to_json().unwrap()).unwrap();
        value["schema_version"] = serde_json::json!(2);
        let err = ExecutionState::from_json(&agent, &value.to_string()).unwrap_err();
        assert!(matches!(
            err,
            RunError::UnsupportedSnapshotVersion { found: 2, expected: 1 }
        ));
    }

    #[test]
    fn oversized_snapshot_version_is_a_mismatch() {
        let agent = agent();
        let state = interrupted_state(&agent);
        let mut value: serde_json::Value = serde_json::from_str(&state.to_json().unwrap()).unwrap();
        // Wraps to 1 if narrowed with `as`.
        value["schema_version"] = serde_json::json!(u64::from(u32::MAX) + 2);
        let err = ExecutionState::from_json(&agent, &value.to_string()).unwrap_err();
        assert!(matches!(
            err,
            RunError::UnsupportedSnapshotVersion {
                found: u32::MAX,
                expected: 1
            }
        ));
    }

    #[test]
    fn unknown_items_in_snapshot_are_rejected() {
        let agent = agent();
        let state = interrupted_state(&agent);
        let mut value: serde_json::Value = serde_json::from_str(&state.to_json().unwrap()).unwrap();
        value["generated_items"]
            .as_array_mut()
            .unwrap()
            .push(serde_json::json!({"type": "computer_call"}));
        let err = ExecutionState::from_json(&agent, &value.to_string()).unwrap_err();
        assert!(matches!(err, RunError::UnknownItemType(tag) if tag == "computer_call"));
    }

    #[test]
    fn different_agent_graph_is_a_mismatch() {
        let agent = agent();
        let json = interrupted_state(&agent).to_json().unwrap();

        let renamed = Arc::new(Agent::new("other"));
        assert!(matches!(
            ExecutionState::from_json(&renamed, &json),
            Err(RunError::ResumeStateMismatch(_))
        ));

        let rewired = Arc::new(Agent::new("triage"));
        assert!(matches!(
            ExecutionState::from_json(&rewired, &json),
            Err(RunError::ResumeStateMismatch(_))
        ));
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(agent_fingerprint(&agent()), agent_fingerprint(&agent()));
        assert_eq!(agent_fingerprint(&agent()).len(), 64);
    }
}
