//! Test: loading XML definitions and running them end to end

use crate::helpers::*;
use dagflow::core::config::{FailurePolicy, PipelineConfig};
use dagflow::core::error::ConfigError;
use dagflow::core::state::FailureKind;
use dagflow::execution::{DependencyGraph, ExecutionEngine, ShellExecutor};
use std::time::Duration;

fn load(xml: &str) -> Result<dagflow::PipelineDefinition, ConfigError> {
    PipelineConfig::from_xml(xml)?.to_definition()
}

fn step(id: &str, deps: &[&str]) -> String {
    let refs: String = deps.iter().map(|d| format!(r#"<Step Id="{}"/>"#, d)).collect();
    format!(
        r#"<Step Id="{}"><Dependencies>{}</Dependencies><Parameters/></Step>"#,
        id, refs
    )
}

fn document(steps: &[String]) -> String {
    format!("<Pipeline><Steps>{}</Steps></Pipeline>", steps.concat())
}

#[test]
fn test_empty_pipeline_loads() {
    let definition = load("<Pipeline><Steps/></Pipeline>").unwrap();
    assert!(definition.is_empty());
}

#[test]
fn test_islands_load() {
    let xml = document(&[
        step("a", &[]),
        step("b", &["a"]),
        step("x", &[]),
        step("y", &["x"]),
        step("lonely", &[]),
    ]);
    let definition = load(&xml).unwrap();
    let order = DependencyGraph::build(&definition).unwrap().topological_order();
    assert_eq!(order, vec!["a", "b", "lonely", "x", "y"]);
}

#[test]
fn test_declaration_order_does_not_matter() {
    let xml = document(&[step("c", &["b"]), step("b", &["a"]), step("a", &[])]);
    let definition = load(&xml).unwrap();
    let order = DependencyGraph::build(&definition).unwrap().topological_order();
    assert_eq!(order, vec!["a", "b", "c"]);
}

#[test]
fn test_self_reference_is_a_cycle() {
    let err = load(&document(&[step("a", &["a"])])).unwrap_err();
    match err {
        ConfigError::Cycle(cycle) => assert_eq!(cycle.path, vec!["a", "a"]),
        other => panic!("Expected cycle error, got {:?}", other),
    }
}

#[test]
fn test_long_cycle_is_reported() {
    let xml = document(&[
        step("a", &["c"]),
        step("b", &["a"]),
        step("c", &["b"]),
        step("d", &[]),
    ]);
    let err = load(&xml).unwrap_err();
    assert!(matches!(err, ConfigError::Cycle(_)));
    assert!(err.to_string().contains("Cycle detected"));
}

#[test]
fn test_duplicate_ids_rejected() {
    let err = load(&document(&[step("a", &[]), step("a", &[])])).unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateStep(id) if id == "a"));
}

#[test]
fn test_large_graph_loads() {
    let steps: Vec<String> = (0..500)
        .map(|i| {
            let id = format!("n{:04}", i);
            if i == 0 {
                step(&id, &[])
            } else {
                let parent = format!("n{:04}", (i - 1) / 2);
                step(&id, &[parent.as_str()])
            }
        })
        .collect();
    let definition = load(&document(&steps)).unwrap();
    assert_eq!(definition.len(), 500);
    let order = DependencyGraph::build(&definition).unwrap().topological_order();
    assert_eq!(order.first().map(String::as_str), Some("n0000"));
    assert_eq!(order.len(), 500);
}

#[tokio::test]
async fn test_shell_pipeline_end_to_end() {
    let xml = r#"
<Pipeline name="build" maxConcurrency="2" failurePolicy="best-effort" cancelGraceMs="200">
  <Steps>
    <Step Id="compile">
      <Dependencies/>
      <Parameters>
        <Param name="command">echo compiling</Param>
      </Parameters>
    </Step>
    <Step Id="test">
      <Dependencies><Step Id="compile"/></Dependencies>
      <Parameters>
        <Param name="command" value="test &quot;$DAGFLOW_PARAM_SUITE&quot; = unit"/>
        <Param name="suite">unit</Param>
      </Parameters>
    </Step>
    <Step Id="lint">
      <Dependencies/>
      <Parameters>
        <Param name="command">echo bad style 1&gt;&amp;2; exit 3</Param>
      </Parameters>
    </Step>
    <Step Id="package">
      <Dependencies><Step Id="lint"/></Dependencies>
      <Parameters>
        <Param name="command">echo never</Param>
      </Parameters>
    </Step>
  </Steps>
</Pipeline>
"#;
    let config = PipelineConfig::from_xml(xml).unwrap();
    let options = config.run_options().unwrap();
    assert_eq!(options.max_concurrency, 2);
    assert_eq!(options.failure_policy, FailurePolicy::BestEffort);
    assert_eq!(options.cancel_grace, Duration::from_millis(200));

    let engine = ExecutionEngine::new(ShellExecutor::new(), options);
    let report = engine.execute(config.to_definition().unwrap()).await.unwrap();

    assert_pipeline_failed(&report);
    assert_step_succeeded(&report, "compile");
    assert_step_succeeded(&report, "test");
    assert_step_skipped(&report, "package", "dependency 'lint' failed");
    match report.step_state("lint") {
        Some(dagflow::StepState::Failed(FailureKind::Error(reason))) => {
            assert!(reason.contains("bad style"), "unexpected reason: {}", reason)
        }
        other => panic!("Expected lint to fail, got {:?}", other),
    }
}
