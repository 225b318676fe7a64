mod helpers;
mod merchants;
mod notifications;
mod orders;

pub mod mocks;
