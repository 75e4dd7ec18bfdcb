pub mod broadcaster;
pub mod fetcher;
pub mod history;
pub mod pubsub;
pub mod sample;

pub use broadcaster::PriceBroadcaster;
pub use fetcher::CoinDeskFetcher;
pub use history::HistoryBuffer;
pub use pubsub::{Subscriber, SubscriberRegistry};
pub use sample::Sample;
