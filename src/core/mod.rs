pub mod catalog;
pub mod checkout;
pub mod classifier;
pub mod install_url;
pub mod order;
pub mod poller;
pub mod response;
pub mod verifier;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::domain::model::{OrderRequest, OrderResult, Plan, ProvisioningProfile};
pub use crate::domain::ports::{EsimTransport, Sleeper};
pub use crate::utils::error::Result;
