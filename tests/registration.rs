//! Cucumber suite for the customer registration feature.
//!
//! Run with: cargo test --test registration
//!
//! The run profile comes from `profiles.yaml` and `E2E_PROFILE`. Scenarios
//! run against the in-memory storefront unless the `playwright` feature is
//! enabled; every scenario gets its own browsing context from the lifecycle
//! manager. Results land in the profile's Cucumber JSON report.

mod support;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cucumber::event::ScenarioFinished;
use cucumber::gherkin::Step;
use cucumber::{given, then, when, writer, World, WriterExt};
use storefront_e2e::error::{Error, Result};
use storefront_e2e::{
    LifecycleManager, ProfileSet, RegisterPage, RegistrationDetails, ResponseMatcher,
    ResultCollector, RunConfig, RunReport, ScenarioMeta, ScenarioOutcome, ScenarioReport, ScenarioStatus,
    ScenarioWorld, StoredResponse,
};

#[given("I am on the registration page")]
async fn open_registration_page(world: &mut ScenarioWorld) -> Result<()> {
    RegisterPage::new(world.page()?).goto().await?;
    world.after_step().await;
    Ok(())
}

#[when("I fill in the registration form with valid data")]
async fn fill_registration_form(world: &mut ScenarioWorld, step: &Step) -> Result<()> {
    let table = step
        .table
        .as_ref()
        .ok_or_else(|| Error::Assertion("registration step needs a data table".to_string()))?;
    let (header, rows) = table
        .rows
        .split_first()
        .ok_or_else(|| Error::Assertion("registration table is empty".to_string()))?;
    let first = rows
        .first()
        .ok_or_else(|| Error::Assertion("registration table has no data row".to_string()))?;

    let row: HashMap<String, String> = header.iter().cloned().zip(first.iter().cloned()).collect();
    let details = RegistrationDetails::from_row(&row)?;

    RegisterPage::new(world.page()?)
        .fill_register_form(&details)
        .await?;
    world.data.registration = Some(details);
    world.after_step().await;
    Ok(())
}

#[when("I submit the form")]
async fn submit_form(world: &mut ScenarioWorld) -> Result<()> {
    RegisterPage::new(world.page()?).submit_register_form().await?;
    world.after_step().await;
    Ok(())
}

#[then("I validate the registration")]
async fn validate_registration(world: &mut ScenarioWorld) -> Result<()> {
    let details = world
        .data
        .registration
        .clone()
        .ok_or_else(|| Error::Assertion("no registration was submitted".to_string()))?;
    RegisterPage::new(world.page()?)
        .validate_registration(&details)
        .await?;
    world.after_step().await;
    Ok(())
}

#[then("the customer API returns the submitted email")]
async fn customer_api_returns_email(world: &mut ScenarioWorld) -> Result<()> {
    let response = ResponseMatcher::new("/rest/V1/customers/me", "GET")
        .wait(world.page()?, Duration::from_secs(5))
        .await?;
    world.save_response("customer", response.as_ref()).await;

    let expected = world
        .data
        .registration
        .as_ref()
        .map(|d| d.email.clone())
        .unwrap_or_default();
    let actual = world
        .get_response_data("customer")
        .and_then(StoredResponse::body)
        .and_then(|body| body["email"].as_str());
    if actual != Some(expected.as_str()) {
        return Err(Error::Assertion(format!(
            "customer API returned email {:?}, expected '{}'",
            actual, expected
        )));
    }

    world.after_step().await;
    Ok(())
}

/// Launches the browser engine the suite runs against.
#[cfg(not(feature = "playwright"))]
async fn launcher() -> storefront_e2e::browser::memory::MemoryLauncher {
    support::storefront_launcher()
}

#[cfg(feature = "playwright")]
async fn launcher() -> storefront_e2e::browser::playwright::PlaywrightLauncher {
    storefront_e2e::browser::playwright::PlaywrightLauncher::new()
        .await
        .expect("failed to start playwright")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let profiles = ProfileSet::load(root.join("profiles.yaml")).expect("failed to load profiles");
    let config = Arc::new(RunConfig::from_env(&profiles).expect("invalid run configuration"));

    let report_path = config.artifacts.resolve(&config.profile.report);
    if let Some(parent) = report_path.parent() {
        fs::create_dir_all(parent).expect("failed to create report directory");
    }
    let report_file = fs::File::create(&report_path).expect("failed to create cucumber report");

    let launcher = launcher().await;
    let manager = Arc::new(
        LifecycleManager::initialize_run(&launcher, config.clone())
            .await
            .expect("failed to launch browser"),
    );
    let collector = ResultCollector::new();
    let started_at = Utc::now();

    let before_manager = manager.clone();
    let after_manager = manager.clone();
    let after_collector = collector.clone();
    let profile = config.profile.clone();

    ScenarioWorld::cucumber()
        .max_concurrent_scenarios(config.profile.parallel)
        .before(move |_feature, _rule, scenario, world| {
            let manager = before_manager.clone();
            Box::pin(async move {
                let meta = ScenarioMeta::new(scenario.name.clone()).with_tags(scenario.tags.clone());
                match manager.before_scenario(&meta).await {
                    Ok(provisioned) => *world = provisioned,
                    Err(e) => panic!("{}", e),
                }
            })
        })
        .after(move |feature, _rule, scenario, ev, world| {
            let manager = after_manager.clone();
            let collector = after_collector.clone();
            let status = match ev {
                ScenarioFinished::StepPassed => ScenarioStatus::Passed,
                ScenarioFinished::StepSkipped => ScenarioStatus::Skipped,
                _ => ScenarioStatus::Failed,
            };
            Box::pin(async move {
                let mut report =
                    ScenarioReport::new(scenario.name.clone(), scenario.tags.clone(), status)
                        .with_feature(feature.name.clone());
                if let Some(world) = world {
                    let outcome = ScenarioOutcome::new(status, world.elapsed());
                    let teardown = manager.after_scenario(world, &outcome).await;
                    report.duration_ms = outcome.duration.as_millis() as u64;
                    report.steps_passed = world.steps_completed();
                    report.absorb(world, teardown);
                }
                collector.push(report);
            })
        })
        .with_writer(
            writer::Basic::raw(io::stdout(), writer::Coloring::Auto, 0)
                .summarized()
                .tee::<ScenarioWorld, _>(writer::Json::for_tee(report_file))
                .normalized(),
        )
        .filter_run(root.join(&config.profile.features), move |feature, _rule, scenario| {
            let tags: Vec<String> = feature.tags.iter().chain(&scenario.tags).cloned().collect();
            profile.selects(&tags)
        })
        .await;

    manager
        .finalize_run()
        .await
        .expect("failed to close browser");

    let mut report = RunReport::new(&config, started_at);
    report.scenarios = collector.drain();
    report
        .write_summary(&config.artifacts.summary_path())
        .expect("failed to write run summary");

    #[cfg(not(feature = "playwright"))]
    {
        let ledger = launcher.ledger();
        assert_eq!(ledger.open_contexts(), 0, "browsing contexts leaked");
        assert_eq!(ledger.open_pages(), 0, "pages leaked");
        assert_eq!(ledger.active_traces(), 0, "traces left running");
    }
    assert!(
        report.is_success(),
        "scenarios failed: {:?}",
        report
            .scenarios
            .iter()
            .filter(|s| !s.status.is_passed())
            .map(|s| &s.name)
            .collect::<Vec<_>>()
    );
}
