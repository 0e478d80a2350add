//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use reqwest::Url;
use serde_json::json;
use storefront_e2e::browser::memory::{Document, Exchange, MemoryLauncher, Site};
use storefront_e2e::{ArtifactLayout, LaunchSettings, RunConfig, RunProfile};

pub const BASE_URL: &str = "https://shop.example.test/";
pub const API_URL: &str = "https://api.shop.example.test/";

/// A storefront with a registration form.
///
/// Submitting the form lands on the account page, which echoes the submitted
/// name and email and fires a `GET /rest/V1/customers/me` fetch.
#[derive(Debug, Default)]
pub struct FakeStorefront;

impl Site for FakeStorefront {
    fn open(&self, url: &Url) -> Option<Document> {
        match url.path() {
            "/customer/account/create/" => Some(
                Document::new(url.as_str())
                    .with_input("#firstname")
                    .with_input("#lastname")
                    .with_input("#email_address")
                    .with_input("#password")
                    .with_input("#password-confirmation")
                    .with_button("Create an Account"),
            ),
            "/" => Some(Document::new(url.as_str())),
            _ => None,
        }
    }

    fn press(
        &self,
        document: &Document,
        button: &str,
        inputs: &HashMap<String, String>,
    ) -> Option<Document> {
        if button != "Create an Account" {
            return None;
        }
        let value = |key: &str| inputs.get(key).cloned().unwrap_or_default();
        let first = value("#firstname");
        let last = value("#lastname");
        let email = value("#email_address");

        let account = Url::parse(&document.url).ok()?.join("/customer/account/").ok()?;
        let profile = account.join("/rest/V1/customers/me").ok()?;

        Some(
            Document::new(account.as_str())
                .with_text(
                    ".message-success",
                    "Thank you for registering with Main Website Store.",
                )
                .with_text(
                    ".box-information .box-content",
                    format!("{} {}\n{}", first, last, email),
                )
                .with_exchange(Exchange::fetch(
                    "GET",
                    profile.as_str(),
                    &json!({ "firstname": first, "lastname": last, "email": email }),
                )),
        )
    }
}

pub fn storefront_launcher() -> MemoryLauncher {
    MemoryLauncher::with_site(Arc::new(FakeStorefront))
}

/// Run configuration rooted at `root` with the given launch settings.
pub fn run_config(root: &Path, launch: LaunchSettings) -> Arc<RunConfig> {
    Arc::new(
        RunConfig::new(
            "test",
            RunProfile::new(BASE_URL).with_api_url(API_URL),
        )
        .with_launch(launch)
        .with_artifacts(ArtifactLayout::new(root)),
    )
}
