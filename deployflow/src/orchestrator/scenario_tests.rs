//! End-to-end runs of the deployment saga against fake collaborators.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::core::{
        ComponentDescriptor, ComponentKind, DeployOptions, DeploymentDetails, DeploymentPackage,
        DeploymentStatus, ExtractedRequirements, FieldRequirement, FieldType, PackageKind,
        RequirementSource, RunStatus, StatusReport, StepStatus, StepType, TargetSystem,
    };
    use crate::errors::{DeployError, GatewayError};
    use crate::gateway::{DeploymentGateway, MockDeploymentGateway};
    use crate::generation::RequirementExtractor;
    use crate::orchestrator::{AutomationResult, OrchestratorBuilder, RunOptions};
    use crate::resilience::{CircuitBreakerConfig, CircuitState, RetryConfig};
    use crate::runlog::RunLog;
    use crate::testing::{
        assert_all_steps_completed, assert_run_status, assert_step_failed, assert_step_sequence,
        assert_warning_contains, orchestrator_with, sample_requirements, sample_source,
        test_config, FakeGateway, FlakyRunLog, ScriptedGenerator, StaticExtractor, TestHarness,
        PRODUCTION_TARGET,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const TIER: &str = "Account.Customer_Tier__c";
    const RENEWAL: &str = "Account.Renewal_Date__c";
    const RULE: &str = "Account.Tier_Required";

    fn harness() -> TestHarness {
        TestHarness::new(sample_requirements()).unwrap()
    }

    fn names(package: &DeploymentPackage) -> Vec<String> {
        package
            .components()
            .into_iter()
            .map(|c| c.full_name)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_a_full_success() {
        let h = harness();

        let result = h.orchestrator.run(h.options()).await;

        assert_run_status(&result, RunStatus::Success);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
        assert!(result.deployment_id.is_some());

        let record = h.run_record(result.run_id.unwrap()).await.unwrap();
        assert_step_sequence(
            &record,
            &[
                StepType::Parse,
                StepType::Generate,
                StepType::Validate,
                StepType::Deploy,
                StepType::Verify,
            ],
        );
        assert_all_steps_completed(&record);
        assert_eq!(record.run.status, RunStatus::Success);
        assert_eq!(record.run.result_metadata["units"].as_array().unwrap().len(), 3);

        assert_eq!(h.gateway.deploy_calls(), 1);
        assert_eq!(names(&h.gateway.submitted_packages()[0]), vec![TIER, RENEWAL, RULE]);
        assert!(h.gateway.has_component(RULE));
        assert_eq!(h.events.count("run.started"), 1);
        assert_eq!(h.events.count("step.completed"), 5);
        assert_eq!(h.events.count("run.completed"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idempotency_key_carries_run_and_checksum() {
        let h = harness();

        let result = h.orchestrator.run(h.options()).await;

        let package = &h.gateway.submitted_packages()[0];
        let key = h.gateway.submitted_options()[0].idempotency_key.clone().unwrap();
        assert_eq!(
            key,
            format!("{}:{}", result.run_id.unwrap(), package.checksum())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_b_failed_deploy_is_not_verified() {
        let h = harness();
        h.gateway
            .set_deploy_result(StatusReport::failed("Customer_Tier__c: picklist value set is locked"));

        let result = h.orchestrator.run(h.options()).await;

        assert_run_status(&result, RunStatus::Failed);
        assert!(result.has_error("picklist value set is locked"));
        assert!(h.gateway.rollback_packages().is_empty());

        let record = h.run_record(result.run_id.unwrap()).await.unwrap();
        assert!(!record.has_step(StepType::Verify));
        assert_step_failed(&record, StepType::Deploy);
        assert_eq!(record.run.status, RunStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_c_verification_failure_rolls_back() {
        let h = harness();
        h.gateway.hide_component(RENEWAL);

        let result = h.orchestrator.run(h.options()).await;

        assert_run_status(&result, RunStatus::Partial);
        assert_warning_contains(&result, "rolled back due to verification failure");
        assert!(result.has_error(RENEWAL));
        assert!(!result.requires_manual_intervention());
        assert!(result.metadata.as_ref().unwrap().rolled_back);

        let packages = h.gateway.submitted_packages();
        let rollback = h.gateway.rollback_packages();
        assert_eq!(rollback.len(), 1);
        assert_eq!(rollback[0].components(), packages[0].components());
        assert!(!h.gateway.has_component(TIER));

        let record = h.run_record(result.run_id.unwrap()).await.unwrap();
        assert_step_sequence(
            &record,
            &[
                StepType::Parse,
                StepType::Generate,
                StepType::Validate,
                StepType::Deploy,
                StepType::Verify,
                StepType::Deploy,
            ],
        );
        assert_step_failed(&record, StepType::Verify);
        let rollback_step = record.steps_of(StepType::Deploy).nth(1).unwrap();
        assert_eq!(rollback_step.input["operation"], "rollback");
        assert_eq!(rollback_step.status, StepStatus::Completed);
        assert_eq!(h.events.count("rollback.completed"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_d_failed_rollback_needs_manual_intervention() {
        let h = harness();
        h.gateway.hide_component(RENEWAL);
        h.gateway
            .set_rollback_result(StatusReport::failed("field is referenced by a layout"));

        let result = h.orchestrator.run(h.options()).await;

        assert_run_status(&result, RunStatus::Partial);
        assert!(result.has_error("Rollback of deployment"));
        assert!(result.has_error("field is referenced by a layout"));
        assert!(result.requires_manual_intervention());
        assert_warning_contains(&result, "Manual intervention required");
        assert!(!result.metadata.as_ref().unwrap().rolled_back);
        assert_eq!(h.events.count("rollback.failed"), 1);

        let record = h.run_record(result.run_id.unwrap()).await.unwrap();
        assert_step_failed(&record, StepType::Deploy);
        assert_eq!(record.run.status, RunStatus::Partial);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_never_deploys() {
        let mut gateway = MockDeploymentGateway::new();
        gateway.expect_deploy().never();
        gateway.expect_check_status().never();
        gateway.expect_describe_component().never();
        let extractor = Arc::new(StaticExtractor::new(sample_requirements()));
        let orchestrator = orchestrator_with(extractor, Arc::new(gateway)).unwrap();

        let result = orchestrator
            .run(RunOptions::new(sample_source(), "stg").dry_run())
            .await;

        assert_run_status(&result, RunStatus::Success);
        assert_warning_contains(&result, "dry run completed, no deployment performed");
        assert!(result.deployment_id.is_none());
        assert!(result.metadata.as_ref().unwrap().dry_run);

        let record = orchestrator
            .run_log()
            .get_run(result.run_id.unwrap())
            .await
            .unwrap();
        assert_step_sequence(
            &record,
            &[StepType::Parse, StepType::Generate, StepType::Validate],
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_with_generation_error_fails() {
        let generator = ScriptedGenerator::new().fail_on("Renewal Date", "unsupported type");
        let h = TestHarness::build(
            test_config(),
            Arc::new(StaticExtractor::new(sample_requirements())),
            Some(Arc::new(generator)),
        )
        .unwrap();

        let result = h.orchestrator.run(h.options().dry_run()).await;

        assert_run_status(&result, RunStatus::Failed);
        assert_eq!(h.gateway.deploy_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_units_never_deploy() {
        let requirements = ExtractedRequirements::new()
            .with_field(FieldRequirement::new("Tier", FieldType::Picklist).on("Account"));
        let mut gateway = MockDeploymentGateway::new();
        gateway.expect_deploy().never();
        let orchestrator =
            orchestrator_with(Arc::new(StaticExtractor::new(requirements)), Arc::new(gateway))
                .unwrap();

        let result = orchestrator
            .run(RunOptions::new(sample_source(), "stg"))
            .await;

        assert_run_status(&result, RunStatus::Failed);
        assert!(result.has_error("Account.Tier__c: picklist fields require at least one value"));

        let record = orchestrator
            .run_log()
            .get_run(result.run_id.unwrap())
            .await
            .unwrap();
        assert!(!record.has_step(StepType::Deploy));
        assert_step_failed(&record, StepType::Validate);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_extracted_fails_validation() {
        let h = TestHarness::new(ExtractedRequirements::new()).unwrap();

        let result = h.orchestrator.run(h.options()).await;

        assert_run_status(&result, RunStatus::Failed);
        assert!(result.has_error("no deployable units were generated"));
        assert_eq!(h.gateway.deploy_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_validation_failures_are_reported() {
        let generator = ScriptedGenerator::new().reject("org field limit reached");
        let h = TestHarness::build(
            test_config(),
            Arc::new(StaticExtractor::new(sample_requirements())),
            Some(Arc::new(generator)),
        )
        .unwrap();

        let result = h.orchestrator.run(h.options()).await;

        assert_run_status(&result, RunStatus::Failed);
        assert!(result.has_error("org field limit reached"));
        assert_eq!(h.gateway.deploy_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_generation_failure_does_not_stop_the_run() {
        let generator = ScriptedGenerator::new().fail_on("Renewal Date", "unsupported type");
        let h = TestHarness::build(
            test_config(),
            Arc::new(StaticExtractor::new(sample_requirements())),
            Some(Arc::new(generator)),
        )
        .unwrap();

        let result = h.orchestrator.run(h.options()).await;

        assert_run_status(&result, RunStatus::Partial);
        assert_eq!(result.errors.len(), 1);
        assert!(result.has_error("Renewal Date"));
        assert_eq!(names(&h.gateway.submitted_packages()[0]), vec![TIER, RULE]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_container_applies_to_unowned_requirements() {
        let requirements = ExtractedRequirements::new()
            .with_field(FieldRequirement::new("Region", FieldType::Text))
            .with_field(FieldRequirement::new("Score", FieldType::Number).on("Account"));
        let h = TestHarness::new(requirements).unwrap();

        let result = h
            .orchestrator
            .run(h.options().with_default_container("Lead"))
            .await;

        assert_run_status(&result, RunStatus::Success);
        assert_eq!(
            names(&h.gateway.submitted_packages()[0]),
            vec!["Lead.Region__c", "Account.Score__c"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_container_is_a_generation_error() {
        let requirements = ExtractedRequirements::new()
            .with_field(FieldRequirement::new("Region", FieldType::Text))
            .with_field(FieldRequirement::new("Score", FieldType::Number).on("Account"));
        let h = TestHarness::new(requirements).unwrap();

        let result = h.orchestrator.run(h.options()).await;

        assert_run_status(&result, RunStatus::Partial);
        assert!(result.has_error("Generation failed for requirement 'Region': no owning container"));
        assert_eq!(names(&h.gateway.submitted_packages()[0]), vec!["Account.Score__c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acceptance_criteria_are_merged() {
        let criteria = "Region must be captured for every account.";
        let extractor = Arc::new(
            StaticExtractor::new(sample_requirements()).with_response(
                criteria,
                ExtractedRequirements::new()
                    .with_field(FieldRequirement::new("Region", FieldType::Text).on("Account"))
                    .with_ambiguity("Is Region a free-text field or a picklist?"),
            ),
        );
        let h = TestHarness::build(test_config(), extractor.clone(), None).unwrap();
        let source = sample_source().with_acceptance_criteria(criteria);

        let result = h.orchestrator.run(RunOptions::new(source, "stg")).await;

        assert_run_status(&result, RunStatus::Success);
        assert_eq!(extractor.calls().len(), 2);
        assert_eq!(result.metadata.as_ref().unwrap().units.len(), 4);
        assert_warning_contains(&result, "free-text field or a picklist");
    }

    #[tokio::test(start_paused = true)]
    async fn test_extraction_failure_fails_parse() {
        let h = TestHarness::build(
            test_config(),
            Arc::new(StaticExtractor::failing("model unavailable")),
            None,
        )
        .unwrap();

        let result = h.orchestrator.run(h.options()).await;

        assert_run_status(&result, RunStatus::Failed);
        assert!(result.has_error("model unavailable"));
        let record = h.run_record(result.run_id.unwrap()).await.unwrap();
        assert_step_sequence(&record, &[StepType::Parse]);
        assert_step_failed(&record, StepType::Parse);
        assert_eq!(record.steps[0].error.as_ref().unwrap()["type"], "ExtractionError");
    }

    #[tokio::test(start_paused = true)]
    async fn test_production_is_redirected_to_staging() {
        let h = harness();

        let result = h
            .orchestrator
            .run(RunOptions::new(sample_source(), PRODUCTION_TARGET))
            .await;

        assert_run_status(&result, RunStatus::Success);
        assert_warning_contains(&result, "redirected to staging target 'Staging'");
        let metadata = result.metadata.as_ref().unwrap();
        assert_eq!(metadata.target_id.as_deref(), Some("stg"));
        assert_eq!(metadata.redirected_from.as_deref(), Some("prod"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_production_deploys_to_production() {
        let mut gateway = MockDeploymentGateway::new();
        gateway
            .expect_deploy()
            .withf(|target, _, _| target.id == "prod")
            .times(1)
            .returning(|_, _, _| Ok("0Af000000000001".to_string()));
        gateway
            .expect_check_status()
            .returning(|_, _| Ok(StatusReport::new(DeploymentStatus::Succeeded)));
        gateway
            .expect_get_deployment_details()
            .returning(|_, _| Ok(DeploymentDetails::default()));
        gateway
            .expect_describe_component()
            .returning(|_, kind, name| Ok(Some(ComponentDescriptor::new(kind, name))));
        let orchestrator = orchestrator_with(
            Arc::new(StaticExtractor::new(sample_requirements())),
            Arc::new(gateway),
        )
        .unwrap();

        let result = orchestrator
            .run(RunOptions::new(sample_source(), PRODUCTION_TARGET).force_production())
            .await;

        assert_run_status(&result, RunStatus::Success);
        assert_eq!(result.metadata.as_ref().unwrap().redirected_from, None);
        // Empty details differ from the submitted package.
        assert_warning_contains(&result, "details differ from the submitted package");
    }

    #[tokio::test(start_paused = true)]
    async fn test_production_without_staging_is_fatal() {
        let mut config = test_config();
        config.targets.retain(|t| t.is_production());
        let h = TestHarness::build(
            config,
            Arc::new(StaticExtractor::new(sample_requirements())),
            None,
        )
        .unwrap();

        let result = h
            .orchestrator
            .run(RunOptions::new(sample_source(), PRODUCTION_TARGET))
            .await;

        assert_run_status(&result, RunStatus::Failed);
        assert!(result.has_error("no staging target is registered"));
        assert_eq!(h.gateway.deploy_calls(), 0);
        let record = h.run_record(result.run_id.unwrap()).await.unwrap();
        assert_step_failed(&record, StepType::Deploy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_target_fails_before_submission() {
        let h = harness();

        let result = h
            .orchestrator
            .run(RunOptions::new(sample_source(), "uat"))
            .await;

        assert_run_status(&result, RunStatus::Failed);
        assert!(result.has_error("unknown target system 'uat'"));
        assert_eq!(h.gateway.deploy_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_mirrors_descriptor_through_mock() {
        let submitted: Arc<Mutex<Vec<DeploymentPackage>>> = Arc::new(Mutex::new(Vec::new()));
        let capture = submitted.clone();
        let mut gateway = MockDeploymentGateway::new();
        gateway
            .expect_deploy()
            .times(2)
            .returning(move |_, package, _| {
                let mut packages = capture.lock();
                packages.push(package.clone());
                Ok(format!("0Af00000000000{}", packages.len()))
            });
        gateway
            .expect_check_status()
            .returning(|_, _| Ok(StatusReport::new(DeploymentStatus::Succeeded)));
        gateway.expect_get_deployment_details().returning(|_, _| {
            Ok(DeploymentDetails {
                components: vec![
                    ComponentDescriptor::new(ComponentKind::CustomField, TIER),
                    ComponentDescriptor::new(ComponentKind::CustomField, RENEWAL),
                    ComponentDescriptor::new(ComponentKind::ValidationRule, RULE),
                ],
            })
        });
        gateway.expect_describe_component().returning(|_, kind, name| {
            if name == RULE {
                Ok(None)
            } else {
                Ok(Some(ComponentDescriptor::new(kind, name)))
            }
        });
        let orchestrator = orchestrator_with(
            Arc::new(StaticExtractor::new(sample_requirements())),
            Arc::new(gateway),
        )
        .unwrap();

        let result = orchestrator
            .run(RunOptions::new(sample_source(), "stg"))
            .await;

        assert_run_status(&result, RunStatus::Partial);
        assert!(result.warnings.iter().all(|w| !w.message.contains("differ")));
        let packages = submitted.lock();
        assert_eq!(packages[1].kind, PackageKind::Destroy);
        assert_eq!(packages[1].components(), packages[0].components());
        assert!(packages[1].units.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_deploy_failure_is_retried() {
        let h = harness();
        h.gateway
            .push_deploy_error(GatewayError::from_status(503, "service unavailable"));

        let result = h.orchestrator.run(h.options()).await;

        assert_run_status(&result, RunStatus::Success);
        assert_eq!(h.gateway.deploy_calls(), 2);
        assert_eq!(h.events.count("retry.scheduled"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_authorization_failure_is_not_retried() {
        let h = harness();
        h.gateway
            .push_deploy_error(GatewayError::from_status(401, "session expired"));

        let result = h.orchestrator.run(h.options()).await;

        assert_run_status(&result, RunStatus::Failed);
        assert_eq!(h.gateway.deploy_calls(), 1);
        assert_eq!(h.events.count("retry.scheduled"), 0);
        assert_eq!(
            h.orchestrator.gateway().breakers().deploy.snapshot().failure_count,
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_is_shared_across_runs() {
        let config = test_config()
            .with_retry(RetryConfig::new().with_max_retries(0).with_jitter(0.0))
            .with_circuit_breaker(CircuitBreakerConfig::new(2, 60_000, 1));
        let h = TestHarness::build(
            config,
            Arc::new(StaticExtractor::new(sample_requirements())),
            None,
        )
        .unwrap();
        h.gateway
            .push_deploy_error(GatewayError::from_status(502, "bad gateway"));
        h.gateway
            .push_deploy_error(GatewayError::from_status(502, "bad gateway"));

        let first = h.orchestrator.run(h.options()).await;
        let second = h.orchestrator.run(h.options()).await;
        let third = h.orchestrator.run(h.options()).await;

        assert_run_status(&first, RunStatus::Failed);
        assert_run_status(&second, RunStatus::Failed);
        assert_run_status(&third, RunStatus::Failed);
        assert!(third.has_error("is open"));
        assert_eq!(h.gateway.deploy_calls(), 2);
        assert_eq!(
            h.orchestrator.gateway().breakers().deploy.state(),
            CircuitState::Open
        );
        assert_eq!(h.events.count("circuit.opened"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_deployment_is_polled_to_completion() {
        let h = harness();
        h.gateway.set_pending_polls(3);

        let result = h.orchestrator.run(h.options()).await;

        assert_run_status(&result, RunStatus::Success);
        let record = h.run_record(result.run_id.unwrap()).await.unwrap();
        let deploy = record.steps_of(StepType::Deploy).next().unwrap();
        assert_eq!(deploy.output["polls"], 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_budget_exhaustion_fails_the_run() {
        let h = harness();
        h.gateway.set_pending_polls(100);

        let result = h.orchestrator.run(h.options()).await;

        assert_run_status(&result, RunStatus::Failed);
        assert!(result.has_error("did not finish within 5 status checks"));
        assert!(h.gateway.rollback_packages().is_empty());
        assert!(result.deployment_id.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_details_mismatch_only_warns() {
        let h = harness();
        h.gateway.set_details(DeploymentDetails {
            components: vec![ComponentDescriptor::new(ComponentKind::CustomField, TIER)],
        });

        let result = h.orchestrator.run(h.options()).await;

        assert_run_status(&result, RunStatus::Success);
        assert_warning_contains(&result, RENEWAL);
        assert_warning_contains(&result, "details differ");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_before_deploy_records_error_step() {
        struct CancellingExtractor {
            token: Arc<CancellationToken>,
        }

        #[async_trait]
        impl RequirementExtractor for CancellingExtractor {
            async fn parse(&self, _text: &str) -> Result<ExtractedRequirements, DeployError> {
                self.token.cancel("operator abort");
                Ok(sample_requirements())
            }
        }

        let token = Arc::new(CancellationToken::new());
        let h = TestHarness::build(
            test_config(),
            Arc::new(CancellingExtractor {
                token: token.clone(),
            }),
            None,
        )
        .unwrap();

        let result = h
            .orchestrator
            .run(h.options().with_cancellation(token))
            .await;

        assert_run_status(&result, RunStatus::Failed);
        assert!(result.has_error("operator abort"));
        assert_eq!(h.gateway.deploy_calls(), 0);
        let record = h.run_record(result.run_id.unwrap()).await.unwrap();
        assert_step_sequence(&record, &[StepType::Parse, StepType::Error]);
        assert_step_failed(&record, StepType::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_after_deploy_rolls_back() {
        struct CancelAfterDeploy {
            inner: Arc<FakeGateway>,
            token: Arc<CancellationToken>,
        }

        #[async_trait]
        impl DeploymentGateway for CancelAfterDeploy {
            async fn deploy(
                &self,
                target: &TargetSystem,
                package: &DeploymentPackage,
                options: &DeployOptions,
            ) -> Result<String, GatewayError> {
                self.inner.deploy(target, package, options).await
            }

            async fn check_status(
                &self,
                target: &TargetSystem,
                deployment_id: &str,
            ) -> Result<StatusReport, GatewayError> {
                self.inner.check_status(target, deployment_id).await
            }

            async fn describe_component(
                &self,
                target: &TargetSystem,
                kind: ComponentKind,
                full_name: &str,
            ) -> Result<Option<ComponentDescriptor>, GatewayError> {
                self.inner.describe_component(target, kind, full_name).await
            }

            async fn get_deployment_details(
                &self,
                target: &TargetSystem,
                deployment_id: &str,
            ) -> Result<DeploymentDetails, GatewayError> {
                self.token.cancel("maintenance window closed");
                self.inner.get_deployment_details(target, deployment_id).await
            }
        }

        let fake = Arc::new(FakeGateway::new());
        let token = Arc::new(CancellationToken::new());
        let gateway = Arc::new(CancelAfterDeploy {
            inner: fake.clone(),
            token: token.clone(),
        });
        let orchestrator = OrchestratorBuilder::new()
            .config(test_config())
            .extractor(Arc::new(StaticExtractor::new(sample_requirements())))
            .gateway(gateway)
            .build()
            .unwrap();

        let result = orchestrator
            .run(RunOptions::new(sample_source(), "stg").with_cancellation(token))
            .await;

        assert_run_status(&result, RunStatus::Partial);
        assert_warning_contains(&result, "rolled back due to cancellation");
        assert_eq!(fake.rollback_packages().len(), 1);
        assert!(!fake.has_component(TIER));

        let record = orchestrator
            .run_log()
            .get_run(result.run_id.unwrap())
            .await
            .unwrap();
        assert_step_sequence(
            &record,
            &[
                StepType::Parse,
                StepType::Generate,
                StepType::Validate,
                StepType::Deploy,
                StepType::Error,
                StepType::Deploy,
            ],
        );
    }

    struct CancelDuringLookup {
        inner: Arc<FakeGateway>,
        token: Arc<CancellationToken>,
    }

    #[async_trait]
    impl DeploymentGateway for CancelDuringLookup {
        async fn deploy(
            &self,
            target: &TargetSystem,
            package: &DeploymentPackage,
            options: &DeployOptions,
        ) -> Result<String, GatewayError> {
            self.inner.deploy(target, package, options).await
        }

        async fn check_status(
            &self,
            target: &TargetSystem,
            deployment_id: &str,
        ) -> Result<StatusReport, GatewayError> {
            self.inner.check_status(target, deployment_id).await
        }

        async fn describe_component(
            &self,
            target: &TargetSystem,
            kind: ComponentKind,
            full_name: &str,
        ) -> Result<Option<ComponentDescriptor>, GatewayError> {
            self.token.cancel("operator abort");
            self.inner.describe_component(target, kind, full_name).await
        }

        async fn get_deployment_details(
            &self,
            target: &TargetSystem,
            deployment_id: &str,
        ) -> Result<DeploymentDetails, GatewayError> {
            self.inner.get_deployment_details(target, deployment_id).await
        }
    }

    async fn run_cancelled_during_lookup(
        fake: Arc<FakeGateway>,
    ) -> AutomationResult {
        let token = Arc::new(CancellationToken::new());
        let gateway = Arc::new(CancelDuringLookup {
            inner: fake,
            token: token.clone(),
        });
        let orchestrator = orchestrator_with(
            Arc::new(StaticExtractor::new(sample_requirements())),
            gateway,
        )
        .unwrap();

        orchestrator
            .run(RunOptions::new(sample_source(), "stg").with_cancellation(token))
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_component_outranks_cancellation_during_verify() {
        let fake = Arc::new(FakeGateway::new());
        fake.hide_component(RENEWAL);

        let result = run_cancelled_during_lookup(fake.clone()).await;

        assert_run_status(&result, RunStatus::Partial);
        assert!(result.has_error(RENEWAL));
        assert!(!result.has_error("Run cancelled"));
        assert_warning_contains(&result, "rolled back due to verification failure");
        assert_eq!(fake.rollback_packages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_clean_verify_still_rolls_back() {
        let fake = Arc::new(FakeGateway::new());

        let result = run_cancelled_during_lookup(fake.clone()).await;

        assert_run_status(&result, RunStatus::Partial);
        assert!(result.has_error("operator abort"));
        assert_warning_contains(&result, "rolled back due to cancellation");
        assert!(!fake.has_component(TIER));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_run_log_failures_are_retried() {
        let run_log = Arc::new(FlakyRunLog::new());
        run_log.fail_next_writes(2);
        let orchestrator = OrchestratorBuilder::new()
            .config(test_config())
            .extractor(Arc::new(StaticExtractor::new(sample_requirements())))
            .gateway(Arc::new(FakeGateway::new()))
            .run_log(run_log.clone())
            .build()
            .unwrap();

        let result = orchestrator
            .run(RunOptions::new(sample_source(), "stg"))
            .await;

        assert_run_status(&result, RunStatus::Success);
        let record = run_log.inner().get_run(result.run_id.unwrap()).await.unwrap();
        assert_eq!(record.steps.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_run_log_reports_not_started() {
        let run_log = Arc::new(FlakyRunLog::new());
        run_log.set_unavailable(true);
        let gateway = Arc::new(FakeGateway::new());
        let orchestrator = OrchestratorBuilder::new()
            .config(test_config())
            .extractor(Arc::new(StaticExtractor::new(sample_requirements())))
            .gateway(gateway.clone())
            .run_log(run_log)
            .build()
            .unwrap();

        let result = orchestrator
            .run(RunOptions::new(sample_source(), "stg"))
            .await;

        assert_run_status(&result, RunStatus::Failed);
        assert!(result.run_id.is_none());
        assert!(result.has_error("run could not be started"));
        assert_eq!(gateway.deploy_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_of_one_source_are_listed() {
        let h = harness();

        h.orchestrator.run(h.options()).await;
        h.orchestrator.run(h.options().dry_run()).await;
        h.orchestrator
            .run(RunOptions::new(RequirementSource::new("PROJ-7", "other"), "stg"))
            .await;

        let runs = h.orchestrator.run_log().list_runs("PROJ-101").await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.status == RunStatus::Success));
    }

    #[test]
    fn test_error_kind_is_recorded_for_step_payloads() {
        let err = DeployError::VerificationFailed {
            missing: vec![RENEWAL.to_string()],
        };
        assert_eq!(err.to_dict()["type"], "VerificationFailure");
    }
}
