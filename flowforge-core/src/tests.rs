use crate::{
    EdgeKind, InvalidConfigurationError, WorkflowDefinition, WorkflowError,
    WorkflowTask,
};

#[test]
fn test_definition_builder() {
    let definition = WorkflowDefinition::new("builder")
        .with_variable("region", "eu")
        .with_task(WorkflowTask::new("a"))
        .with_task(
            WorkflowTask::new("b")
                .depends_on("a")
                .branch("$[Outputs('a') == 1]", "c")
                .with_timeout(1000)
                .with_max_retries(3),
        )
        .with_task(WorkflowTask::new("c"));

    assert_eq!(definition.tasks.len(), 3);
    assert!(definition.contains_task("c"));
    assert!(!definition.contains_task("d"));

    let b = definition.task("b").unwrap();
    assert_eq!(b.dependencies, vec!["a"]);
    assert_eq!(b.branch_targets().collect::<Vec<_>>(), vec!["c"]);
    assert_eq!(b.timeout_milliseconds, Some(1000));
    assert_eq!(b.error_handling.retry_policy.max_retries, 3);
}

#[test]
fn test_error_messages_name_offending_tasks() {
    let err = WorkflowError::MissingDependencies {
        workflow: "wf".into(),
        task: "a".into(),
        target: "ghost".into(),
        kind: EdgeKind::Branch,
    };
    let message = err.to_string();
    assert!(message.contains("missing dependencies"));
    assert!(message.contains("ghost"));
    assert!(message.contains("branch"));

    let err = InvalidConfigurationError::new("a", "negative retries");
    assert!(err.to_string().contains("Invalid configuration"));
}
