pub mod client;
pub mod fields;
pub mod paginate;
pub mod query;
pub mod records;

#[cfg(test)]
pub mod fake;

pub use client::{KintoneApi, KintoneApp, KintoneClient, RecordPage, RecordUpdate, BATCH_WRITE_LIMIT};
pub use fields::RawRecord;
pub use paginate::fetch_all;
pub use query::RecordQuery;
