pub mod debounce;
pub mod poller;

pub use debounce::{DebouncedQuery, SearchFn, SearchFuture};
pub use poller::{start_polling, FetchFn, FetchFuture, Mount, StopHandle, Synchronizer};
