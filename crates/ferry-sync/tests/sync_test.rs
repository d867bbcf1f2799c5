//! End-to-end replication scenarios against in-memory catalogs.

use std::sync::Arc;

use ferry_catalog::{
    CatalogReader, CatalogState, DeclaredType, MemoryGateway, ParameterBinding, ParameterScope,
    ReferenceType,
};
use ferry_sync::{
    EnvironmentState, OverrideOptions, Operation, Outcome, Skip, Stage, SyncEngine, SyncError,
    SyncOptions, Warning,
};

/// Source folder ETL with E1 { V1: String "hello", V2: sensitive Boolean "True" }.
fn source_state() -> CatalogState {
    let mut state = CatalogState::default();
    let e1 = state.add_environment("ETL", "E1", "");
    state.add_variable(e1, "V1", DeclaredType::String, false, "hello");
    state.add_variable(e1, "V2", DeclaredType::Boolean, true, "True");
    state
}

fn target_state() -> CatalogState {
    let mut state = CatalogState::default();
    state.add_folder("ETL");
    state
}

fn engine(source: &Arc<MemoryGateway>, target: &Arc<MemoryGateway>) -> SyncEngine {
    SyncEngine::new(source.clone(), target.clone())
}

fn dry_run() -> SyncOptions {
    SyncOptions {
        dry_run: true,
        ..SyncOptions::new("ETL")
    }
}

#[tokio::test]
async fn test_environment_with_plain_and_sensitive_variables() {
    let source = Arc::new(MemoryGateway::new("src", source_state()));
    let target = Arc::new(MemoryGateway::new("tgt", target_state()));

    let report = engine(&source, &target).run(&dry_run()).await.unwrap();

    assert_eq!(
        report.script(),
        "EXEC [SSISDB].[catalog].[create_environment] @environment_name = N'E1', \
         @environment_description = N'', @folder_name = N'ETL';\n\
         DECLARE @var sql_variant = N'hello'; EXEC [SSISDB].[catalog].[create_environment_variable] \
         @variable_name = N'V1', @sensitive = 0, @description = N'', @environment_name = N'E1', \
         @folder_name = N'ETL', @value = @var, @data_type = N'String';\n\
         DECLARE @var bit = 1; EXEC [SSISDB].[catalog].[create_environment_variable] \
         @variable_name = N'V2', @sensitive = 1, @description = N'', @environment_name = N'E1', \
         @folder_name = N'ETL', @value = @var, @data_type = N'Boolean';\n"
    );
    assert!(target.writes().is_empty());
    assert!(!report.has_failures());
    assert_eq!(report.totals().created, 3);
}

#[tokio::test]
async fn test_absolute_and_missing_projects_yield_no_references() {
    let mut src = source_state();
    src.add_project("ETL", "P1");
    src.add_project("ETL", "P2");
    src.add_reference("ETL", "P1", ReferenceType::Absolute, "E1");
    src.add_reference("ETL", "P2", ReferenceType::Relative, "E1");
    let mut tgt = target_state();
    tgt.add_project("ETL", "P1");

    let source = Arc::new(MemoryGateway::new("src", src));
    let target = Arc::new(MemoryGateway::new("tgt", tgt));
    let engine = engine(&source, &target);

    let plan = engine.plan(&SyncOptions::new("ETL")).await.unwrap();
    let env = &plan.environments[0];
    assert_eq!(env.stage(Stage::References).count(), 0);
    assert_eq!(env.stage(Stage::Parameters).count(), 0);
    assert_eq!(
        plan.warnings().collect::<Vec<_>>(),
        vec![&Warning::AbsoluteReference {
            project: "P1".into(),
            environment: "E1".into()
        }]
    );
    assert_eq!(env.skips, vec![Skip::ProjectMissing { project: "P2".into() }]);

    // Skips are reported distinctly from execution failures.
    let report = engine.run(&SyncOptions::new("ETL")).await.unwrap();
    let env = &report.environments[0];
    assert_eq!(env.summary.errored, 0);
    assert_eq!(env.summary.skipped, 1);
    assert!(!report.has_failures());
    assert!(target.writes().iter().all(|w| w.label != "create_environment_reference"));
}

#[tokio::test]
async fn test_reference_then_parameter_binding() {
    let mut src = source_state();
    src.add_project("ETL", "P3");
    src.add_reference("ETL", "P3", ReferenceType::Relative, "E1");
    src.add_parameter(
        "ETL",
        "P3",
        ParameterScope::Package("Load.dtsx".into()),
        "Greeting",
        DeclaredType::String,
        ParameterBinding::Reference("V1".into()),
    );
    let mut tgt = target_state();
    tgt.add_project("ETL", "P3");

    let source = Arc::new(MemoryGateway::new("src", src));
    let target = Arc::new(MemoryGateway::new("tgt", tgt));
    let report = engine(&source, &target)
        .run(&SyncOptions::new("ETL"))
        .await
        .unwrap();

    let writes = target.writes();
    let labels: Vec<&str> = writes.iter().map(|w| w.label).collect();
    assert_eq!(
        labels,
        vec![
            "create_environment",
            "create_environment_variable",
            "create_environment_variable",
            "create_environment_reference",
            "set_object_parameter_value",
        ]
    );
    assert_eq!(
        writes[4].text,
        "EXEC [SSISDB].[catalog].[set_object_parameter_value] @object_type = 30, \
         @folder_name = N'ETL', @project_name = N'P3', @parameter_name = N'Greeting', \
         @parameter_value = N'V1', @object_name = N'Load.dtsx', @value_type = N'R';"
    );
    let env = &report.environments[0];
    assert_eq!(env.state, EnvironmentState::Done);
    assert_eq!(env.summary.created, 4);
    assert_eq!(env.summary.linked, 1);
}

#[tokio::test]
async fn test_dry_run_is_deterministic() {
    let mut src = source_state();
    let e2 = src.add_environment("ETL", "E0", "second");
    src.add_variable(e2, "Port", DeclaredType::Int32, false, "1433");
    let source = Arc::new(MemoryGateway::new("src", src));
    let target = Arc::new(MemoryGateway::new("tgt", target_state()));
    let engine = engine(&source, &target);

    let first = engine.run(&dry_run()).await.unwrap();
    let second = engine.run(&dry_run()).await.unwrap();
    assert_eq!(first.script(), second.script());
    assert_ne!(first.run_id, second.run_id);
    // Environments are ordered by name.
    assert_eq!(first.environments[0].environment, "E0");
}

#[tokio::test]
async fn test_partial_variable_failure_and_resume() {
    let source = Arc::new(MemoryGateway::new("src", source_state()));
    let target = Arc::new(MemoryGateway::new("tgt", target_state()));
    target.fail_execute("create_environment_variable", "N'V1'", "arithmetic overflow");

    let report = engine(&source, &target)
        .run(&SyncOptions::new("ETL"))
        .await
        .unwrap();
    assert!(report.has_failures());
    let env = &report.environments[0];
    assert_eq!(env.state, EnvironmentState::Done);
    assert_eq!(env.summary.errored, 1);
    assert_eq!(env.summary.created, 2);
    assert_eq!(target.writes().len(), 2);

    // A plain rerun is refused by the target instead of duplicating anything.
    target.clear_failures();
    let report = engine(&source, &target)
        .run(&SyncOptions::new("ETL"))
        .await
        .unwrap();
    let env = &report.environments[0];
    assert_eq!(env.state, EnvironmentState::Failed(Stage::Environment));
    match &env.items[0].outcome {
        Outcome::Failed(message) => {
            assert!(message.contains("already exists"));
            assert!(message.contains("rerun with resume"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(target.writes().len(), 2);

    // Resume creates only what is missing.
    let options = SyncOptions {
        resume: true,
        ..SyncOptions::new("ETL")
    };
    let report = engine(&source, &target).run(&options).await.unwrap();
    let writes = target.writes();
    assert_eq!(writes.len(), 3);
    assert!(writes[2].text.contains("@variable_name = N'V1'"));
    assert!(!report.has_failures());
    assert_eq!(report.environments[0].summary.skipped, 2);

    // Every variable exists exactly once on the target.
    let reader = CatalogReader::new(&*target);
    let envs = reader.environments("ETL").await.unwrap();
    assert_eq!(envs.len(), 1);
    let mut names: Vec<String> = reader
        .variables(&envs[0])
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["V1".to_string(), "V2".to_string()]);
}

#[tokio::test]
async fn test_environment_failure_does_not_stop_other_environments() {
    let mut src = source_state();
    let e2 = src.add_environment("ETL", "E2", "");
    src.add_variable(e2, "Port", DeclaredType::Int32, false, "1433");
    let source = Arc::new(MemoryGateway::new("src", src));
    let target = Arc::new(MemoryGateway::new("tgt", target_state()));
    target.fail_execute("create_environment", "N'E1'", "permission denied");

    let options = SyncOptions {
        parallelism: 2,
        ..SyncOptions::new("ETL")
    };
    let report = engine(&source, &target).run(&options).await.unwrap();

    assert_eq!(report.environments.len(), 2);
    assert_eq!(report.environments[0].environment, "E1");
    assert_eq!(
        report.environments[0].state,
        EnvironmentState::Failed(Stage::Environment)
    );
    assert_eq!(report.environments[1].state, EnvironmentState::Done);
    assert!(target.writes().iter().all(|w| !w.text.contains("N'E1'")));
    assert!(report.has_failures());
}

#[tokio::test]
async fn test_connectivity_failure_aborts_before_planning() {
    let source = Arc::new(MemoryGateway::new("src", source_state()));
    let target = Arc::new(MemoryGateway::new("tgt", target_state()));
    target.set_unreachable(true);

    let err = engine(&source, &target)
        .run(&SyncOptions::new("ETL"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Connectivity(_)));
    assert_eq!(source.reads(), vec!["folder"]);
}

#[tokio::test]
async fn test_missing_target_folder_is_a_precondition_failure() {
    let source = Arc::new(MemoryGateway::new("src", source_state()));
    let target = Arc::new(MemoryGateway::empty("tgt"));

    let err = engine(&source, &target)
        .run(&SyncOptions::new("ETL"))
        .await
        .unwrap_err();
    assert!(err.is_precondition());
    assert!(target.writes().is_empty());
}

#[tokio::test]
async fn test_environment_filter_and_target_folder() {
    let mut src = source_state();
    src.add_environment("ETL", "E2", "");
    let mut tgt = CatalogState::default();
    tgt.add_folder("ETL_QA");
    let source = Arc::new(MemoryGateway::new("src", src));
    let target = Arc::new(MemoryGateway::new("tgt", tgt));

    let options = SyncOptions {
        target_folder: Some("ETL_QA".into()),
        environments: vec!["E2".into()],
        ..dry_run()
    };
    let report = engine(&source, &target).run(&options).await.unwrap();
    assert_eq!(report.environments.len(), 1);
    assert_eq!(
        report.script(),
        "EXEC [SSISDB].[catalog].[create_environment] @environment_name = N'E2', \
         @environment_description = N'', @folder_name = N'ETL_QA';\n"
    );
}

#[tokio::test]
async fn test_copy_literal_overrides() {
    let mut src = CatalogState::default();
    src.add_project("ETL", "P3");
    src.add_parameter(
        "ETL",
        "P3",
        ParameterScope::Project,
        "BatchSize",
        DeclaredType::Int32,
        ParameterBinding::Value(Some("500".into())),
    );
    src.add_parameter(
        "ETL",
        "P3",
        ParameterScope::Package("Load.dtsx".into()),
        "Password",
        DeclaredType::String,
        ParameterBinding::Value(None),
    );
    src.add_parameter(
        "ETL",
        "P3",
        ParameterScope::Project,
        "Greeting",
        DeclaredType::String,
        ParameterBinding::Reference("V1".into()),
    );
    let mut tgt = target_state();
    tgt.add_project("ETL", "P3");

    let source = Arc::new(MemoryGateway::new("src", src));
    let target = Arc::new(MemoryGateway::new("tgt", tgt));
    let report = engine(&source, &target)
        .copy_overrides(&OverrideOptions {
            folder: "ETL".into(),
            target_folder: None,
            project: "P3".into(),
            dry_run: false,
        })
        .await
        .unwrap();

    let writes = target.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(
        writes[0].text,
        "DECLARE @var int = 500; EXEC [SSISDB].[catalog].[set_object_parameter_value] \
         @object_type = 20, @folder_name = N'ETL', @project_name = N'P3', \
         @parameter_name = N'BatchSize', @parameter_value = @var, @value_type = N'V';"
    );
    assert_eq!(report.items.len(), 1);
    assert_eq!(report.items[0].outcome, Outcome::Applied);
    assert_eq!(
        report.warnings,
        vec![Warning::SensitiveOverride {
            project: "P3".into(),
            parameter: "Password".into()
        }]
    );
}

#[tokio::test]
async fn test_copy_overrides_requires_target_project() {
    let mut src = CatalogState::default();
    src.add_project("ETL", "P3");
    let source = Arc::new(MemoryGateway::new("src", src));
    let target = Arc::new(MemoryGateway::new("tgt", target_state()));

    let err = engine(&source, &target)
        .copy_overrides(&OverrideOptions {
            folder: "ETL".into(),
            target_folder: None,
            project: "P3".into(),
            dry_run: true,
        })
        .await
        .unwrap_err();
    match err {
        SyncError::ProjectMissing { server, .. } => assert_eq!(server, "tgt"),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_check_reports_missing_projects() {
    let mut src = source_state();
    src.add_project("ETL", "P1");
    src.add_project("ETL", "P2");
    let mut tgt = target_state();
    tgt.add_project("ETL", "P1");
    tgt.add_environment("ETL", "E1", "");

    let source = Arc::new(MemoryGateway::new("src", src));
    let target = Arc::new(MemoryGateway::new("tgt", tgt));
    let report = engine(&source, &target).check("ETL", None).await.unwrap();

    assert!(report.is_ready());
    assert_eq!(report.environments, vec!["E1".to_string()]);
    assert_eq!(report.existing_environments, vec!["E1".to_string()]);
    assert_eq!(report.missing_projects, vec!["P2".to_string()]);
}

#[tokio::test]
async fn test_plan_only_reads() {
    let source = Arc::new(MemoryGateway::new("src", source_state()));
    let target = Arc::new(MemoryGateway::new("tgt", target_state()));
    let plan = engine(&source, &target)
        .plan(&SyncOptions::new("ETL"))
        .await
        .unwrap();
    assert_eq!(plan.operation_count(), 3);
    assert!(matches!(
        plan.environments[0].operations[0],
        Operation::CreateEnvironment { .. }
    ));
    assert!(target.writes().is_empty());
    assert!(!source.reads().contains(&"decrypt_variable"));
}

#[tokio::test]
async fn test_unsupported_type_fails_only_that_variable() {
    let mut src = CatalogState::default();
    let e1 = src.add_environment("ETL", "E1", "");
    src.add_variable(e1, "V1", DeclaredType::String, false, "hello");
    src.add_variable(e1, "V2", DeclaredType::Boolean, true, "True");
    let odd = src.add_variable(e1, "Blob", DeclaredType::String, false, "x");
    src.set_variable_type(odd, "Object");
    let source = Arc::new(MemoryGateway::new("src", src));
    let target = Arc::new(MemoryGateway::new("tgt", target_state()));

    let report = engine(&source, &target)
        .run(&SyncOptions::new("ETL"))
        .await
        .unwrap();
    let env = &report.environments[0];
    let failed: Vec<_> = env.items.iter().filter(|i| i.is_failed()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].subject, "variable Blob");
    assert_eq!(env.summary.created, 3);
    assert!(target.writes().iter().all(|w| !w.text.contains("N'Blob'")));
    assert!(report.has_failures());
}

#[tokio::test]
async fn test_absolute_reference_outside_the_run_is_warned() {
    let mut src = source_state();
    src.add_project("ETL", "P1");
    src.add_reference("ETL", "P1", ReferenceType::Absolute, "SharedEnv");
    let source = Arc::new(MemoryGateway::new("src", src));
    let target = Arc::new(MemoryGateway::new("tgt", target_state()));

    let report = engine(&source, &target).run(&dry_run()).await.unwrap();
    assert_eq!(
        report.warnings().collect::<Vec<_>>(),
        vec![&Warning::AbsoluteReference {
            project: "P1".into(),
            environment: "ETL/SharedEnv".into()
        }]
    );
    assert!(!report.script().contains("create_environment_reference"));
}

#[tokio::test]
async fn test_target_project_name_differs_in_case() {
    let mut src = source_state();
    src.add_project("ETL", "P3");
    src.add_reference("ETL", "P3", ReferenceType::Relative, "E1");
    src.add_parameter(
        "ETL",
        "P3",
        ParameterScope::Project,
        "Greeting",
        DeclaredType::String,
        ParameterBinding::Reference("V1".into()),
    );
    let mut tgt = target_state();
    tgt.add_project("ETL", "p3");

    let source = Arc::new(MemoryGateway::new("src", src));
    let target = Arc::new(MemoryGateway::new("tgt", tgt));
    let report = engine(&source, &target)
        .run(&SyncOptions::new("ETL"))
        .await
        .unwrap();

    let env = &report.environments[0];
    assert_eq!(env.summary.skipped, 0);
    assert_eq!(env.summary.linked, 1);
    assert!(!report.has_failures());
}

#[tokio::test]
async fn test_binding_without_defining_environment_is_reported() {
    let mut src = source_state();
    src.add_project("ETL", "P3");
    src.add_reference("ETL", "P3", ReferenceType::Relative, "E1");
    src.add_parameter(
        "ETL",
        "P3",
        ParameterScope::Project,
        "Timeout",
        DeclaredType::Int32,
        ParameterBinding::Reference("V9".into()),
    );
    let mut tgt = target_state();
    tgt.add_project("ETL", "P3");

    let source = Arc::new(MemoryGateway::new("src", src));
    let target = Arc::new(MemoryGateway::new("tgt", tgt));
    let report = engine(&source, &target)
        .run(&SyncOptions::new("ETL"))
        .await
        .unwrap();

    let env = &report.environments[0];
    let skipped: Vec<_> = env.items.iter().filter(|i| i.is_skipped()).collect();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].subject, "parameter P3.Timeout");
    assert_eq!(skipped[0].stage, Stage::Parameters);
    assert!(target.writes().iter().all(|w| w.label != "set_object_parameter_value"));
}

#[tokio::test]
async fn test_source_lost_mid_run_fails_sensitive_variable() {
    let source = Arc::new(MemoryGateway::new("src", source_state()));
    let target = Arc::new(MemoryGateway::new("tgt", target_state()));
    let engine = engine(&source, &target);
    let plan = engine.plan(&SyncOptions::new("ETL")).await.unwrap();

    source.set_unreachable(true);
    let executor = ferry_sync::Executor::new(
        engine.source(),
        engine.target(),
        ferry_sync::ExecuteOptions::default(),
    );
    let outcome = executor.apply(&plan.environments[0]).await;
    let summary = ferry_sync::Summary::from_items(&outcome.items);
    assert_eq!(summary.errored, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.created, 2);
}
