// Agent execution workflow
//
// The durable state machine that drives an agent task to completion:
// load config -> discover tools -> (LLM -> tool calls)* -> finalize, under a
// cost budget, with pause/resume signals and human-approval gating.
//
// Determinism discipline: all I/O goes through activities; the workflow body
// only sequences them and mutates its own state. Events accumulate in-state
// and flush through the fire-and-forget publish activity after each logical
// step - a publish failure never fails the workflow.
//
// The budget is checked between iterations: a single over-budget LLM call
// completes and its cost is recorded before the loop stops.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use relay_core::budget::{BudgetStatus, BudgetTracker, DEFAULT_BUDGET_USD, DEFAULT_WARN_RATIO};
use relay_core::events::DomainEvent;
use relay_core::llm::{extract_tool_calls, is_completion_call, ChatMessage, ToolCall};
use relay_core::tools::{completion_tool, ToolDefinition};
use relay_core::traits::AgentSummary;
use relay_core::workflow::{
    AgentExecutionRequest, AgentExecutionResult, ExecutionPhase, StateSnapshot, WorkflowSignal,
};
use relay_core::RequestContext;

use crate::activities::Activities;

/// Why the main loop stopped without a completion call
enum StopReason {
    BudgetExceeded,
    MaxIterations,
}

/// State shared with the handle for queries
struct SharedState {
    snapshot: StateSnapshot,
    events: Vec<DomainEvent>,
}

/// Handle given to the runner: signal delivery and side-effect-free queries
#[derive(Clone)]
pub struct WorkflowHandle {
    execution_id: String,
    signal_tx: mpsc::UnboundedSender<WorkflowSignal>,
    shared: Arc<RwLock<SharedState>>,
}

impl WorkflowHandle {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Deliver a signal; false once the workflow is gone
    pub fn signal(&self, signal: WorkflowSignal) -> bool {
        self.signal_tx.send(signal).is_ok()
    }

    /// The `get_current_state` query
    pub async fn current_state(&self) -> StateSnapshot {
        self.shared.read().await.snapshot.clone()
    }

    /// The `get_latest_events` query
    pub async fn latest_events(&self, limit: usize) -> Vec<DomainEvent> {
        let shared = self.shared.read().await;
        let skip = shared.events.len().saturating_sub(limit);
        shared.events[skip..].to_vec()
    }

    /// The `get_workflow_events` query
    pub async fn all_events(&self) -> Vec<DomainEvent> {
        self.shared.read().await.events.clone()
    }
}

pub struct AgentExecutionWorkflow {
    request: AgentExecutionRequest,
    activities: Arc<dyn Activities>,
    signals: mpsc::UnboundedReceiver<WorkflowSignal>,
    shared: Arc<RwLock<SharedState>>,

    // Workflow-owned state (exclusive until terminal)
    execution_id: String,
    messages: Vec<ChatMessage>,
    available_tools: Vec<ToolDefinition>,
    agent: Option<AgentSummary>,
    budget: BudgetTracker,
    iteration: u32,
    success: bool,
    final_response: Option<String>,
    paused: bool,
    pause_reason: Option<String>,
    cancelled: bool,
    pending_events: Vec<DomainEvent>,
}

impl AgentExecutionWorkflow {
    pub fn new(
        request: AgentExecutionRequest,
        activities: Arc<dyn Activities>,
    ) -> (Self, WorkflowHandle) {
        let execution_id = request.execution_id();
        let budget = BudgetTracker::new(
            request.budget_usd.unwrap_or(DEFAULT_BUDGET_USD),
            DEFAULT_WARN_RATIO,
        );
        let shared = Arc::new(RwLock::new(SharedState {
            snapshot: StateSnapshot {
                status: ExecutionPhase::Initializing,
                current_iteration: 0,
                success: false,
                cost: 0.0,
                budget_remaining: budget.remaining(),
                paused: false,
                pause_reason: None,
            },
            events: Vec::new(),
        }));
        let (signal_tx, signals) = mpsc::unbounded_channel();

        let handle = WorkflowHandle {
            execution_id: execution_id.clone(),
            signal_tx,
            shared: shared.clone(),
        };

        let workflow = Self {
            request,
            activities,
            signals,
            shared,
            execution_id,
            messages: Vec::new(),
            available_tools: Vec::new(),
            agent: None,
            budget,
            iteration: 0,
            success: false,
            final_response: None,
            paused: false,
            pause_reason: None,
            cancelled: false,
            pending_events: Vec::new(),
        };

        (workflow, handle)
    }

    pub async fn run(mut self) -> AgentExecutionResult {
        info!(
            execution_id = %self.execution_id,
            task_id = %self.request.task_id,
            agent_id = %self.request.agent_id,
            "agent execution workflow started"
        );

        self.emit(
            relay_core::WorkflowEventKind::WorkflowStarted,
            json!({
                "task_query": self.request.task_query,
                "max_iterations": self.request.max_reasoning_iterations,
                "budget_usd": self.budget.budget(),
            }),
        )
        .await;
        self.flush_events().await;

        let ctx = match RequestContext::new(
            self.request.workspace_id.clone(),
            self.request.user_id.clone(),
        ) {
            Ok(ctx) => ctx,
            Err(e) => return self.finalize_failed(e.to_string(), e.error_type()).await,
        };

        // Load agent configuration
        let agent = match self
            .activities
            .build_agent_config(self.request.agent_id, &ctx)
            .await
        {
            Ok(agent) => agent,
            Err(e) => {
                let error_type = e.error_type();
                return self
                    .finalize_failed(format!("agent config: {e}"), error_type)
                    .await;
            }
        };
        if agent.name.is_empty() || agent.model_id.is_empty() {
            return self
                .finalize_failed(
                    "agent config missing name or model_id".to_string(),
                    "validation_error",
                )
                .await;
        }

        // Discover tools; the completion sentinel is always available
        let mut tools = match self
            .activities
            .discover_available_tools(self.request.agent_id, &ctx)
            .await
        {
            Ok(tools) => tools,
            Err(e) => {
                let error_type = e.error_type();
                return self
                    .finalize_failed(format!("tool discovery: {e}"), error_type)
                    .await;
            }
        };
        tools.push(completion_tool());
        self.available_tools = tools;
        self.agent = Some(agent);
        self.set_phase(ExecutionPhase::Executing).await;

        // Main loop
        let stop_reason = loop {
            self.drain_signals();
            if self.cancelled {
                return self.finalize_cancelled().await;
            }
            if self.paused {
                self.await_resume().await;
                continue;
            }
            if self.success {
                break None;
            }
            if self.iteration >= self.request.max_reasoning_iterations {
                break Some(StopReason::MaxIterations);
            }
            if self.budget.is_exceeded() {
                self.emit(
                    relay_core::WorkflowEventKind::BudgetExceeded,
                    json!({
                        "spent": self.budget.spent(),
                        "budget": self.budget.budget(),
                        "iteration": self.iteration,
                    }),
                )
                .await;
                break Some(StopReason::BudgetExceeded);
            }

            if let Err(result) = self.run_iteration(&ctx).await {
                return result;
            }
        };

        match stop_reason {
            None => self.finalize_completed().await,
            Some(StopReason::BudgetExceeded) => {
                self.finalize_failed(
                    format!(
                        "budget exceeded: spent {:.4} of {:.4} USD",
                        self.budget.spent(),
                        self.budget.budget()
                    ),
                    "budget_exceeded",
                )
                .await
            }
            Some(StopReason::MaxIterations) => {
                self.finalize_failed(
                    format!(
                        "max reasoning iterations ({}) reached without completion",
                        self.request.max_reasoning_iterations
                    ),
                    "max_iterations_reached",
                )
                .await
            }
        }
    }

    /// One reasoning step: LLM call, tool execution, completion detection.
    /// Err carries the already-finalized result on unrecoverable failure.
    async fn run_iteration(
        &mut self,
        ctx: &RequestContext,
    ) -> Result<(), AgentExecutionResult> {
        self.iteration += 1;
        self.update_snapshot(|s| s.current_iteration += 1).await;
        self.emit(
            relay_core::WorkflowEventKind::IterationStarted,
            json!({"iteration": self.iteration}),
        )
        .await;

        if self.iteration == 1 {
            let system = self.build_system_prompt();
            self.messages.push(ChatMessage::system(system));
            self.messages
                .push(ChatMessage::user(self.request.task_query.clone()));
        }

        // LLM call
        self.emit(
            relay_core::WorkflowEventKind::LlmCallStarted,
            json!({"iteration": self.iteration}),
        )
        .await;

        let model_id = self
            .agent
            .as_ref()
            .map(|a| a.model_id.clone())
            .unwrap_or_default();
        let response = match self
            .activities
            .invoke_llm(
                &self.messages,
                &model_id,
                &self.available_tools,
                &self.request.workspace_id,
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.emit(
                    relay_core::WorkflowEventKind::LlmCallFailed,
                    json!({"iteration": self.iteration, "error": e.to_string()}),
                )
                .await;
                let error_type = e.error_type();
                return Err(self
                    .finalize_failed(format!("llm call: {e}"), error_type)
                    .await);
            }
        };

        if let BudgetStatus::Warning { spent, budget } = self.budget.add_cost(response.cost_usd) {
            self.emit(
                relay_core::WorkflowEventKind::BudgetWarning,
                json!({"spent": spent, "budget": budget, "iteration": self.iteration}),
            )
            .await;
        }
        let (spent, remaining) = (self.budget.spent(), self.budget.remaining());
        self.update_snapshot(|s| {
            s.cost = spent;
            s.budget_remaining = remaining;
        })
        .await;

        let tool_calls = extract_tool_calls(&response);
        self.emit(
            relay_core::WorkflowEventKind::LlmCallCompleted,
            json!({
                "iteration": self.iteration,
                "cost": response.cost_usd,
                "total_tokens": response.usage.total_tokens,
                "has_tool_calls": !tool_calls.is_empty(),
            }),
        )
        .await;

        self.messages.push(ChatMessage::assistant(
            response.content.clone(),
            (!tool_calls.is_empty()).then(|| tool_calls.clone()),
        ));

        // Non-completion tools first, then the sentinel
        let completion = tool_calls
            .iter()
            .find(|c| is_completion_call(&c.name))
            .cloned();

        for call in tool_calls.iter().filter(|c| !is_completion_call(&c.name)) {
            if self.needs_approval(call) {
                if !self.await_approval(call).await {
                    return Err(self.finalize_cancelled().await);
                }
            }
            self.execute_tool(call, ctx).await;
            self.drain_signals();
            if self.cancelled {
                return Err(self.finalize_cancelled().await);
            }
        }

        if let Some(completion) = completion {
            self.success = true;
            self.final_response = completion
                .arguments
                .get("result")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| (!response.content.is_empty()).then(|| response.content.clone()));
            self.update_snapshot(|s| s.success = true).await;
        }

        self.emit(
            relay_core::WorkflowEventKind::IterationCompleted,
            json!({"iteration": self.iteration, "success": self.success}),
        )
        .await;
        self.flush_events().await;

        Ok(())
    }

    async fn execute_tool(&mut self, call: &ToolCall, _ctx: &RequestContext) {
        let definition = self
            .available_tools
            .iter()
            .find(|t| t.name == call.name)
            .cloned();

        self.emit(
            relay_core::WorkflowEventKind::ToolCallStarted,
            json!({
                "iteration": self.iteration,
                "tool_name": call.name,
                "tool_call_id": call.id,
                "arguments": call.arguments,
            }),
        )
        .await;

        let tools_config = self
            .agent
            .as_ref()
            .map(|a| a.tools_config.clone())
            .unwrap_or(Value::Null);

        match self
            .activities
            .invoke_tool(
                call,
                definition.as_ref(),
                &self.request.workspace_id,
                &tools_config,
            )
            .await
        {
            Ok(result) => {
                self.emit(
                    relay_core::WorkflowEventKind::ToolCallCompleted,
                    json!({
                        "iteration": self.iteration,
                        "tool_name": call.name,
                        "tool_call_id": call.id,
                    }),
                )
                .await;
                self.messages.push(ChatMessage::tool_result(
                    call.id.clone(),
                    call.name.clone(),
                    result.to_string(),
                ));
            }
            Err(e) => {
                // The error becomes a tool message the LLM can observe and
                // react to on the next iteration
                self.emit(
                    relay_core::WorkflowEventKind::ToolCallFailed,
                    json!({
                        "iteration": self.iteration,
                        "tool_name": call.name,
                        "tool_call_id": call.id,
                        "error": e.to_string(),
                    }),
                )
                .await;
                self.messages.push(ChatMessage::tool_result(
                    call.id.clone(),
                    call.name.clone(),
                    json!({"error": e.to_string()}).to_string(),
                ));
            }
        }
    }

    // ========================================================================
    // Approval gating and signals
    // ========================================================================

    fn needs_approval(&self, call: &ToolCall) -> bool {
        if self.request.requires_human_approval {
            return true;
        }
        self.available_tools
            .iter()
            .find(|t| t.name == call.name)
            .map(|t| t.requires_user_confirmation)
            .unwrap_or(false)
    }

    /// Block until the pending tool call is approved. Returns false when the
    /// workflow was cancelled instead.
    async fn await_approval(&mut self, call: &ToolCall) -> bool {
        self.paused = true;
        self.pause_reason = Some(format!("awaiting approval for {}", call.name));
        self.set_phase(ExecutionPhase::WaitingForApproval).await;
        let reason = self.pause_reason.clone();
        self.update_snapshot(|s| {
            s.paused = true;
            s.pause_reason = reason;
        })
        .await;

        self.emit(
            relay_core::WorkflowEventKind::HumanApprovalRequested,
            json!({
                "iteration": self.iteration,
                "tool_name": call.name,
                "tool_call_id": call.id,
                "arguments": call.arguments,
            }),
        )
        .await;
        self.flush_events().await;

        loop {
            match self.signals.recv().await {
                Some(WorkflowSignal::Resume { .. }) => break,
                Some(WorkflowSignal::Pause { .. }) => continue,
                Some(WorkflowSignal::Cancel) | None => {
                    self.cancelled = true;
                    return false;
                }
            }
        }

        self.paused = false;
        self.pause_reason = None;
        self.set_phase(ExecutionPhase::Executing).await;
        self.update_snapshot(|s| {
            s.paused = false;
            s.pause_reason = None;
        })
        .await;

        self.emit(
            relay_core::WorkflowEventKind::HumanApprovalReceived,
            json!({
                "iteration": self.iteration,
                "tool_name": call.name,
                "tool_call_id": call.id,
            }),
        )
        .await;
        self.flush_events().await;
        true
    }

    /// Apply any queued signals without blocking
    fn drain_signals(&mut self) {
        while let Ok(signal) = self.signals.try_recv() {
            self.apply_signal(signal);
        }
    }

    /// Suspend until resumed or cancelled
    async fn await_resume(&mut self) {
        let reason = self.pause_reason.clone();
        self.update_snapshot(|s| {
            s.paused = true;
            s.pause_reason = reason;
        })
        .await;
        self.flush_events().await;

        while self.paused && !self.cancelled {
            match self.signals.recv().await {
                Some(signal) => self.apply_signal(signal),
                None => self.cancelled = true,
            }
        }

        let reason = self.pause_reason.clone();
        let paused = self.paused;
        self.update_snapshot(|s| {
            s.paused = paused;
            s.pause_reason = reason;
        })
        .await;
    }

    fn apply_signal(&mut self, signal: WorkflowSignal) {
        match signal {
            WorkflowSignal::Pause { reason } => {
                self.paused = true;
                self.pause_reason = reason;
            }
            WorkflowSignal::Resume { .. } => {
                self.paused = false;
                self.pause_reason = None;
            }
            WorkflowSignal::Cancel => {
                self.cancelled = true;
            }
        }
    }

    // ========================================================================
    // Prompt
    // ========================================================================

    /// ReAct-style system prompt: identity, goal, success criteria, tools
    fn build_system_prompt(&self) -> String {
        let agent_name = self
            .agent
            .as_ref()
            .map(|a| a.name.as_str())
            .unwrap_or("agent");
        let instruction = self
            .agent
            .as_ref()
            .map(|a| a.instruction.as_str())
            .unwrap_or("");

        let tool_lines: Vec<String> = self
            .available_tools
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect();

        format!(
            "You are {agent_name}. {instruction}\n\n\
             Goal: {goal}\n\n\
             Work iteratively: reason about the goal, call tools to gather \
             information or act, and observe the results. When the goal is \
             achieved, call the `completion` tool with the final answer in \
             `result`. Success criteria: the goal is fully addressed and the \
             final answer is self-contained.\n\n\
             Available tools:\n{tools}",
            goal = self.request.task_query,
            tools = tool_lines.join("\n"),
        )
    }

    // ========================================================================
    // Events and state
    // ========================================================================

    async fn emit(&mut self, kind: relay_core::WorkflowEventKind, extra: Value) {
        let event = DomainEvent::workflow(
            kind,
            self.request.task_id,
            self.request.agent_id,
            &self.execution_id,
            extra,
        );
        self.pending_events.push(event.clone());
        self.shared.write().await.events.push(event);
    }

    async fn flush_events(&mut self) {
        if self.pending_events.is_empty() {
            return;
        }
        let events = std::mem::take(&mut self.pending_events);
        if let Err(e) = self.activities.publish_workflow_events(events).await {
            warn!(execution_id = %self.execution_id, error = %e, "event publish failed");
        }
    }

    async fn set_phase(&mut self, phase: ExecutionPhase) {
        self.shared.write().await.snapshot.status = phase;
    }

    async fn update_snapshot(&self, f: impl FnOnce(&mut StateSnapshot)) {
        f(&mut self.shared.write().await.snapshot);
    }

    // ========================================================================
    // Finalization
    // ========================================================================

    async fn finalize_completed(&mut self) -> AgentExecutionResult {
        self.set_phase(ExecutionPhase::Completed).await;
        self.emit(
            relay_core::WorkflowEventKind::WorkflowCompleted,
            json!({
                "success": true,
                "iterations_completed": self.iteration,
                "total_cost": self.budget.spent(),
                "final_response": self.final_response,
            }),
        )
        .await;
        self.flush_events().await;

        AgentExecutionResult {
            task_id: self.request.task_id,
            success: true,
            final_response: self.final_response.clone(),
            reasoning_iterations_used: self.iteration,
            total_cost_usd: self.budget.spent(),
            error: None,
            error_type: None,
        }
    }

    async fn finalize_failed(
        &mut self,
        error: String,
        error_type: &'static str,
    ) -> AgentExecutionResult {
        warn!(execution_id = %self.execution_id, error = %error, "workflow failed");
        self.set_phase(ExecutionPhase::Failed).await;
        self.emit(
            relay_core::WorkflowEventKind::WorkflowFailed,
            json!({
                "success": false,
                "iterations_completed": self.iteration,
                "total_cost": self.budget.spent(),
                "error": error,
                "error_type": error_type,
            }),
        )
        .await;
        self.flush_events().await;

        AgentExecutionResult {
            task_id: self.request.task_id,
            success: false,
            final_response: self.final_response.clone(),
            reasoning_iterations_used: self.iteration,
            total_cost_usd: self.budget.spent(),
            error: Some(error),
            error_type: Some(error_type.to_string()),
        }
    }

    async fn finalize_cancelled(&mut self) -> AgentExecutionResult {
        info!(execution_id = %self.execution_id, "workflow cancelled");
        self.set_phase(ExecutionPhase::Cancelled).await;
        self.emit(
            relay_core::WorkflowEventKind::WorkflowCancelled,
            json!({
                "iterations_completed": self.iteration,
                "total_cost": self.budget.spent(),
            }),
        )
        .await;
        self.flush_events().await;

        AgentExecutionResult {
            task_id: self.request.task_id,
            success: false,
            final_response: None,
            reasoning_iterations_used: self.iteration,
            total_cost_usd: self.budget.spent(),
            error: Some("workflow cancelled".to_string()),
            error_type: Some("cancelled".to_string()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_core::error::{PlatformError, Result};
    use relay_core::llm::{LlmResponse, TokenUsage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    /// Scripted activities: a fixed sequence of LLM responses, recording
    /// published events and tool invocations
    struct StubActivities {
        responses: Mutex<Vec<LlmResponse>>,
        call_index: AtomicUsize,
        published: Mutex<Vec<DomainEvent>>,
        tool_calls: Mutex<Vec<String>>,
        tools: Vec<ToolDefinition>,
    }

    impl StubActivities {
        fn new(responses: Vec<LlmResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                call_index: AtomicUsize::new(0),
                published: Mutex::new(Vec::new()),
                tool_calls: Mutex::new(Vec::new()),
                tools: vec![ToolDefinition::new("get_time", "Get the current time")],
            }
        }

        fn published_types(&self) -> Vec<String> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.event_type.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Activities for StubActivities {
        async fn build_agent_config(
            &self,
            agent_id: Uuid,
            _ctx: &RequestContext,
        ) -> Result<AgentSummary> {
            Ok(AgentSummary {
                id: agent_id,
                name: "test-agent".to_string(),
                model_id: "gpt-4o".to_string(),
                instruction: "Be helpful".to_string(),
                description: String::new(),
                tools_config: json!({}),
                planning: false,
            })
        }

        async fn discover_available_tools(
            &self,
            _agent_id: Uuid,
            _ctx: &RequestContext,
        ) -> Result<Vec<ToolDefinition>> {
            Ok(self.tools.clone())
        }

        async fn invoke_llm(
            &self,
            _messages: &[ChatMessage],
            _model_id: &str,
            _tools: &[ToolDefinition],
            _workspace_id: &str,
        ) -> Result<LlmResponse> {
            let index = self.call_index.fetch_add(1, Ordering::SeqCst);
            let responses = self.responses.lock().unwrap();
            Ok(responses
                .get(index)
                .cloned()
                .unwrap_or_else(|| responses.last().cloned().unwrap()))
        }

        async fn invoke_tool(
            &self,
            call: &ToolCall,
            _definition: Option<&ToolDefinition>,
            _workspace_id: &str,
            _tools_config: &Value,
        ) -> Result<Value> {
            self.tool_calls.lock().unwrap().push(call.name.clone());
            Ok(json!({"time": "12:00"}))
        }

        async fn publish_workflow_events(&self, events: Vec<DomainEvent>) -> Result<()> {
            self.published.lock().unwrap().extend(events);
            Ok(())
        }
    }

    fn plain_response(cost: f64) -> LlmResponse {
        LlmResponse {
            content: "thinking...".to_string(),
            tool_calls: vec![],
            usage: TokenUsage::default(),
            cost_usd: cost,
        }
    }

    fn tool_response(name: &str, cost: f64) -> LlmResponse {
        LlmResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                name: name.to_string(),
                arguments: json!({}),
            }],
            usage: TokenUsage::default(),
            cost_usd: cost,
        }
    }

    fn completion_response(result: &str, cost: f64) -> LlmResponse {
        LlmResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "call_done".to_string(),
                name: "completion".to_string(),
                arguments: json!({"result": result}),
            }],
            usage: TokenUsage::default(),
            cost_usd: cost,
        }
    }

    fn request(budget: Option<f64>, max_iterations: u32, approval: bool) -> AgentExecutionRequest {
        AgentExecutionRequest {
            task_id: Uuid::new_v4(),
            agent_id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            workspace_id: "ws-1".to_string(),
            task_query: "what time is it?".to_string(),
            task_parameters: json!({}),
            timeout_seconds: None,
            max_reasoning_iterations: max_iterations,
            enable_agent_communication: false,
            requires_human_approval: approval,
            budget_usd: budget,
            workflow_metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn test_completion_path() {
        let activities = Arc::new(StubActivities::new(vec![
            tool_response("get_time", 0.001),
            completion_response("It is 12:00.", 0.001),
        ]));
        let (workflow, _handle) =
            AgentExecutionWorkflow::new(request(None, 10, false), activities.clone());

        let result = workflow.run().await;

        assert!(result.success);
        assert_eq!(result.final_response.as_deref(), Some("It is 12:00."));
        assert_eq!(result.reasoning_iterations_used, 2);
        assert!((result.total_cost_usd - 0.002).abs() < 1e-9);
        assert_eq!(
            activities.tool_calls.lock().unwrap().as_slice(),
            ["get_time"]
        );

        let types = activities.published_types();
        assert_eq!(types.first().unwrap(), "workflow.workflow_started");
        assert_eq!(types.last().unwrap(), "workflow.workflow_completed");
        assert!(types.contains(&"workflow.tool_call_completed".to_string()));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_stops_after_second_iteration() {
        // budget 0.001, each call costs 0.0005: iteration 2 reaches the
        // budget, the guard stops the loop before iteration 3
        let activities = Arc::new(StubActivities::new(vec![plain_response(0.0005)]));
        let (workflow, _handle) =
            AgentExecutionWorkflow::new(request(Some(0.001), 10, false), activities.clone());

        let result = workflow.run().await;

        assert!(!result.success);
        assert_eq!(result.reasoning_iterations_used, 2);
        assert_eq!(result.error_type.as_deref(), Some("budget_exceeded"));

        let types = activities.published_types();
        let exceeded_pos = types
            .iter()
            .position(|t| t == "workflow.budget_exceeded")
            .unwrap();
        let failed_pos = types
            .iter()
            .position(|t| t == "workflow.workflow_failed")
            .unwrap();
        assert!(exceeded_pos < failed_pos);
    }

    #[tokio::test]
    async fn test_max_iterations() {
        let activities = Arc::new(StubActivities::new(vec![plain_response(0.0)]));
        let (workflow, _handle) =
            AgentExecutionWorkflow::new(request(None, 3, false), activities.clone());

        let result = workflow.run().await;

        assert!(!result.success);
        assert_eq!(result.reasoning_iterations_used, 3);
        assert_eq!(result.error_type.as_deref(), Some("max_iterations_reached"));
    }

    #[tokio::test]
    async fn test_human_approval_gating() {
        let activities = Arc::new(StubActivities::new(vec![
            tool_response("get_time", 0.001),
            completion_response("done", 0.001),
        ]));
        let (workflow, handle) =
            AgentExecutionWorkflow::new(request(None, 10, true), activities.clone());

        let run = tokio::spawn(workflow.run());

        // The workflow parks in waiting_for_approval before the tool runs
        let snapshot = wait_for(&handle, |s| s.status == ExecutionPhase::WaitingForApproval).await;
        assert!(snapshot.paused);
        assert!(activities.tool_calls.lock().unwrap().is_empty());

        handle.signal(WorkflowSignal::Resume { reason: None });
        let result = run.await.unwrap();
        assert!(result.success);

        let types = activities.published_types();
        let requested = types
            .iter()
            .position(|t| t == "workflow.human_approval_requested")
            .unwrap();
        let received = types
            .iter()
            .position(|t| t == "workflow.human_approval_received")
            .unwrap();
        let started = types
            .iter()
            .position(|t| t == "workflow.tool_call_started")
            .unwrap();
        assert!(requested < received);
        assert!(received < started);
    }

    #[tokio::test]
    async fn test_cancel_during_approval_wait() {
        let activities = Arc::new(StubActivities::new(vec![tool_response("get_time", 0.0)]));
        let (workflow, handle) =
            AgentExecutionWorkflow::new(request(None, 10, true), activities.clone());

        let run = tokio::spawn(workflow.run());
        wait_for(&handle, |s| s.status == ExecutionPhase::WaitingForApproval).await;

        handle.signal(WorkflowSignal::Cancel);
        let result = run.await.unwrap();

        assert!(!result.success);
        assert_eq!(result.error_type.as_deref(), Some("cancelled"));
        assert!(activities.tool_calls.lock().unwrap().is_empty());
        assert_eq!(
            activities.published_types().last().unwrap(),
            "workflow.workflow_cancelled"
        );
    }

    #[tokio::test]
    async fn test_pause_resume_between_iterations() {
        let activities = Arc::new(StubActivities::new(vec![
            plain_response(0.0),
            completion_response("done", 0.0),
        ]));
        let (workflow, handle) =
            AgentExecutionWorkflow::new(request(None, 10, false), activities.clone());

        handle.signal(WorkflowSignal::Pause {
            reason: Some("operator hold".to_string()),
        });
        let run = tokio::spawn(workflow.run());

        let snapshot = wait_for(&handle, |s| s.paused).await;
        assert_eq!(snapshot.pause_reason.as_deref(), Some("operator hold"));

        handle.signal(WorkflowSignal::Resume { reason: None });
        let result = run.await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_tool_failure_is_observable_not_fatal() {
        struct FailingTools(StubActivities);

        #[async_trait]
        impl Activities for FailingTools {
            async fn build_agent_config(
                &self,
                agent_id: Uuid,
                ctx: &RequestContext,
            ) -> Result<AgentSummary> {
                self.0.build_agent_config(agent_id, ctx).await
            }
            async fn discover_available_tools(
                &self,
                agent_id: Uuid,
                ctx: &RequestContext,
            ) -> Result<Vec<ToolDefinition>> {
                self.0.discover_available_tools(agent_id, ctx).await
            }
            async fn invoke_llm(
                &self,
                messages: &[ChatMessage],
                model_id: &str,
                tools: &[ToolDefinition],
                workspace_id: &str,
            ) -> Result<LlmResponse> {
                self.0.invoke_llm(messages, model_id, tools, workspace_id).await
            }
            async fn invoke_tool(
                &self,
                _call: &ToolCall,
                _definition: Option<&ToolDefinition>,
                _workspace_id: &str,
                _tools_config: &Value,
            ) -> Result<Value> {
                Err(PlatformError::dependency("tool server down"))
            }
            async fn publish_workflow_events(&self, events: Vec<DomainEvent>) -> Result<()> {
                self.0.publish_workflow_events(events).await
            }
        }

        let inner = StubActivities::new(vec![
            tool_response("get_time", 0.0),
            completion_response("recovered", 0.0),
        ]);
        let activities = Arc::new(FailingTools(inner));
        let (workflow, _handle) =
            AgentExecutionWorkflow::new(request(None, 10, false), activities.clone());

        let result = workflow.run().await;

        // The tool failure surfaced as an event and a tool message; the LLM
        // then completed on the next iteration
        assert!(result.success);
        assert!(activities
            .0
            .published_types()
            .contains(&"workflow.tool_call_failed".to_string()));
    }

    #[tokio::test]
    async fn test_query_state_reports_progress() {
        let activities = Arc::new(StubActivities::new(vec![completion_response("done", 0.25)]));
        let (workflow, handle) =
            AgentExecutionWorkflow::new(request(Some(10.0), 10, false), activities);

        let result = workflow.run().await;
        assert!(result.success);

        let snapshot = handle.current_state().await;
        assert_eq!(snapshot.status, ExecutionPhase::Completed);
        assert_eq!(snapshot.current_iteration, 1);
        assert!((snapshot.cost - 0.25).abs() < 1e-9);
        assert!((snapshot.budget_remaining - 9.75).abs() < 1e-9);

        let events = handle.latest_events(3).await;
        assert_eq!(events.len(), 3);
        assert_eq!(
            events.last().unwrap().event_type,
            "workflow.workflow_completed"
        );
    }

    async fn wait_for(
        handle: &WorkflowHandle,
        predicate: impl Fn(&StateSnapshot) -> bool,
    ) -> StateSnapshot {
        for _ in 0..200 {
            let snapshot = handle.current_state().await;
            if predicate(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("workflow never reached the expected state");
    }
}
