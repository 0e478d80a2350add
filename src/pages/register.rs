//! Customer registration page object.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::browser::{LoadState, Page};
use crate::error::{Error, Result};

use super::BasePage;

/// Path of the account creation form.
pub const REGISTER_PATH: &str = "customer/account/create/";

const FIRST_NAME: &str = "#firstname";
const LAST_NAME: &str = "#lastname";
const EMAIL: &str = "#email_address";
const PASSWORD: &str = "#password";
const CONFIRM_PASSWORD: &str = "#password-confirmation";
const SUBMIT: &str = "Create an Account";
const SUCCESS_MESSAGE: &str = ".message-success";
const ACCOUNT_INFO: &str = ".box-information .box-content";

const SUCCESS_TEXT: &str = "Thank you for registering";
const ACCOUNT_PATH: &str = "/customer/account/";

/// Values submitted through the registration form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationDetails {
    #[serde(rename = "firstname")]
    pub first_name: String,
    #[serde(rename = "lastname")]
    pub last_name: String,
    pub email: String,
    pub password: String,
}

impl RegistrationDetails {
    /// Builds details from one data-table row keyed by column header.
    pub fn from_row(row: &HashMap<String, String>) -> Result<Self> {
        Ok(serde_json::from_value(serde_json::to_value(row)?)?)
    }
}

/// The customer registration page.
pub struct RegisterPage<'p> {
    base: BasePage<'p>,
}

impl<'p> RegisterPage<'p> {
    pub fn new(page: &'p dyn Page) -> Self {
        Self {
            base: BasePage::new(page),
        }
    }

    pub fn base(&self) -> &BasePage<'p> {
        &self.base
    }

    pub async fn goto(&self) -> Result<()> {
        self.base.goto(REGISTER_PATH).await
    }

    /// Fills every form field; the password goes into both password inputs.
    pub async fn fill_register_form(&self, details: &RegistrationDetails) -> Result<()> {
        let page = self.base.page();
        page.fill(FIRST_NAME, &details.first_name).await?;
        page.fill(LAST_NAME, &details.last_name).await?;
        page.fill(EMAIL, &details.email).await?;
        page.fill(PASSWORD, &details.password).await?;
        page.fill(CONFIRM_PASSWORD, &details.password).await?;
        Ok(())
    }

    pub async fn submit_register_form(&self) -> Result<()> {
        let page = self.base.page();
        page.click_button(SUBMIT).await?;
        page.wait_for_load_state(LoadState::NetworkIdle).await
    }

    /// Checks the landing page after a successful registration.
    pub async fn validate_registration(&self, details: &RegistrationDetails) -> Result<()> {
        let page = self.base.page();

        let success = page.text_content(SUCCESS_MESSAGE).await?.unwrap_or_default();
        expect_contains("success message", &success, SUCCESS_TEXT)?;

        let url = page.url();
        tracing::info!(url = %url, "registration landing page");
        expect_contains("current URL", &url, ACCOUNT_PATH)?;

        let info = page.text_content(ACCOUNT_INFO).await?.unwrap_or_default();
        expect_contains("welcome message", &info, &details.first_name)?;
        expect_contains("welcome message", &info, &details.last_name)?;
        expect_contains("account information", &info, &details.email)?;

        Ok(())
    }
}

fn expect_contains(what: &str, actual: &str, expected: &str) -> Result<()> {
    if actual.contains(expected) {
        Ok(())
    } else {
        Err(Error::Assertion(format!(
            "{} '{}' does not contain '{}'",
            what, actual, expected
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::memory::{Document, MemoryLauncher, Site};
    use crate::browser::{BrowserLauncher, ContextOptions, LaunchOptions};
    use crate::config::EngineKind;
    use reqwest::Url;
    use std::sync::Arc;

    /// Registration form that lands on a page echoing the submitted values,
    /// with a configurable success banner.
    struct Storefront {
        banner: &'static str,
    }

    impl Site for Storefront {
        fn open(&self, url: &Url) -> Option<Document> {
            (url.path() == "/customer/account/create/").then(|| {
                Document::new(url.as_str())
                    .with_input(FIRST_NAME)
                    .with_input(LAST_NAME)
                    .with_input(EMAIL)
                    .with_input(PASSWORD)
                    .with_input(CONFIRM_PASSWORD)
                    .with_button(SUBMIT)
            })
        }

        fn press(
            &self,
            document: &Document,
            _button: &str,
            inputs: &HashMap<String, String>,
        ) -> Option<Document> {
            let value = |k: &str| inputs.get(k).cloned().unwrap_or_default();
            let landing = document.url.replace("create/", "");
            Some(
                Document::new(landing)
                    .with_text(SUCCESS_MESSAGE, self.banner)
                    .with_text(
                        ACCOUNT_INFO,
                        format!("{} {}\n{}", value(FIRST_NAME), value(LAST_NAME), value(EMAIL)),
                    ),
            )
        }
    }

    fn details() -> RegistrationDetails {
        RegistrationDetails {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.test".to_string(),
            password: "Engine#1843".to_string(),
        }
    }

    async fn register(banner: &'static str) -> Result<()> {
        let launcher = MemoryLauncher::with_site(Arc::new(Storefront { banner }));
        let browser = launcher
            .launch(EngineKind::Chromium, LaunchOptions::default())
            .await?;
        let context = browser
            .new_context(ContextOptions {
                base_url: Some("https://shop.example.test/".to_string()),
                ..Default::default()
            })
            .await?;
        let page = context.new_page().await?;

        let register = RegisterPage::new(page.as_ref());
        register.goto().await?;
        register.fill_register_form(&details()).await?;
        register.submit_register_form().await?;
        register.validate_registration(&details()).await
    }

    #[test]
    fn details_from_table_row() {
        let row: HashMap<String, String> = [
            ("firstname", "Ada"),
            ("lastname", "Lovelace"),
            ("email", "ada@example.test"),
            ("password", "Engine#1843"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        assert_eq!(RegistrationDetails::from_row(&row).unwrap(), details());
    }

    #[test]
    fn details_from_incomplete_row_fails() {
        let row: HashMap<String, String> =
            [("firstname".to_string(), "Ada".to_string())].into_iter().collect();
        assert!(RegistrationDetails::from_row(&row).is_err());
    }

    #[tokio::test]
    async fn registration_flow_validates() {
        register("Thank you for registering with Main Website Store.")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_banner_is_an_assertion_failure() {
        let err = register("Something went wrong").await.unwrap_err();
        match err {
            Error::Assertion(msg) => assert!(msg.contains("success message")),
            other => panic!("unexpected error: {}", other),
        }
    }
}
