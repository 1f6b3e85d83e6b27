//! Guardrail batches.
//!
//! Every guardrail of a batch runs concurrently; results come back in
//! declaration order and the first tripwire in that order decides the error.

use std::sync::Arc;

use futures::future::join_all;
use switchboard_core::{
    AgentInputItem, FinalOutput, GuardrailResult, InputGuardrail, OutputGuardrail, RunContext,
};
use tracing::warn;

use crate::error::RunError;

pub(crate) async fn run_input_guardrails(
    guardrails: &[Arc<dyn InputGuardrail>],
    input: &[AgentInputItem],
    context: &RunContext,
) -> Result<Vec<GuardrailResult>, RunError> {
    let outputs = join_all(guardrails.iter().map(|g| g.execute(input, context))).await;

    let mut results = Vec::with_capacity(outputs.len());
    for (guardrail, output) in guardrails.iter().zip(outputs) {
        results.push(GuardrailResult {
            guardrail: guardrail.name().to_string(),
            output: output?,
        });
    }

    if let Some(tripped) = results.iter().find(|r| r.output.tripwire_triggered) {
        warn!(guardrail = %tripped.guardrail, "Input guardrail tripwire triggered");
        return Err(RunError::InputGuardrailTripwire {
            guardrail: tripped.guardrail.clone(),
            info: tripped.output.info.clone(),
        });
    }
    Ok(results)
}

pub(crate) async fn run_output_guardrails(
    guardrails: &[Arc<dyn OutputGuardrail>],
    output: &FinalOutput,
    context: &RunContext,
) -> Result<Vec<GuardrailResult>, RunError> {
    let outputs = join_all(guardrails.iter().map(|g| g.execute(output, context))).await;

    let mut results = Vec::with_capacity(outputs.len());
    for (guardrail, verdict) in guardrails.iter().zip(outputs) {
        results.push(GuardrailResult {
            guardrail: guardrail.name().to_string(),
            output: verdict?,
        });
    }

    if let Some(tripped) = results.iter().find(|r| r.output.tripwire_triggered) {
        warn!(guardrail = %tripped.guardrail, "Output guardrail tripwire triggered");
        return Err(RunError::OutputGuardrailTripwire {
            guardrail: tripped.guardrail.clone(),
            info: tripped.output.info.clone(),
        });
    }
    Ok(results)
}
