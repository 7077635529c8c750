mod bundle;
mod error;
pub mod message;

pub use bundle::{Bundle, ReliableOrder};
pub(crate) use bundle::PendingRequest;
pub use error::BundleError;
pub use message::{MessageKind, RawMessage};

/// Fills a freshly cleared bundle with messages that must lead every send
pub trait BundlePrimer {
    fn prime_bundle(&mut self, bundle: &mut Bundle);

    /// Number of unreliable messages `prime_bundle` adds. A bundle holding
    /// no more than these has nothing worth sending.
    fn num_unreliable_messages(&self) -> usize;
}
