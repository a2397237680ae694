pub mod altinkaynak;
pub mod borsa;
pub mod finans;
pub mod tefas;
pub mod util;

use crate::core::FetchError;
use crate::core::market::FundDetail;
use async_trait::async_trait;

pub use altinkaynak::AltinkaynakProvider;
pub use borsa::CollectApiProvider;
pub use finans::FinansProvider;
pub use tefas::TefasProvider;

/// Fetches and normalises one upstream snapshot.
///
/// Implementations convert every transport and parsing failure into a
/// [`FetchError`] and never panic on upstream input.
#[async_trait]
pub trait ProviderAdapter<T>: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<T, FetchError>;
}

/// Fund detail is addressed by fund code rather than fetched as a snapshot.
#[async_trait]
pub trait FundDetailProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_fund(&self, code: &str) -> Result<FundDetail, FetchError>;
}
