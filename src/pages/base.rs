//! Navigation and network helpers shared by every page object.

use std::time::Duration;

use serde_json::Value;

use crate::browser::{LoadState, NavigationOptions, Page};
use crate::error::Result;
use crate::network;

/// Navigation and network helpers shared by every page object.
#[derive(Clone, Copy)]
pub struct BasePage<'p> {
    page: &'p dyn Page,
}

impl<'p> BasePage<'p> {
    pub fn new(page: &'p dyn Page) -> Self {
        Self { page }
    }

    pub fn page(&self) -> &'p dyn Page {
        self.page
    }

    /// Navigates to `path`, waiting for the DOM content to load.
    pub async fn goto(&self, path: &str) -> Result<()> {
        tracing::debug!(path = %path, "navigating");
        self.page
            .goto(
                path,
                NavigationOptions {
                    timeout: Duration::from_secs(60),
                    wait_until: LoadState::DomContentLoaded,
                },
            )
            .await
    }

    /// Waits for an `xhr`/`fetch` response and returns its JSON body.
    pub async fn wait_for_response(
        &self,
        url: &str,
        method: &str,
        timeout: Duration,
    ) -> Result<Value> {
        network::wait_for_json(self.page, url, method, timeout).await
    }
}
