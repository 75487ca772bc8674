pub mod cache;
pub mod record;

pub use cache::BodyCache;
pub use record::{ExchangeRecord, RecordSink, RequestRecord, ResponseRecord};
