//! Page objects.
//!
//! Each page object borrows the scenario's page for the duration of a step;
//! none of them keep a page of their own.

mod base;
mod register;

pub use base::BasePage;
pub use register::{RegisterPage, RegistrationDetails};
