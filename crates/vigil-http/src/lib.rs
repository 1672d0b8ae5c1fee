//! HTTP capability used by the executor.
//!
//! [`HttpAdapter`] has one operation, `request`. [`LiveAdapter`] talks to the
//! network with `reqwest`; [`StubAdapter`] answers from a table matched by
//! exact URL, regex pattern, or predicate.

pub mod adapter;
pub mod live;
pub mod stub;

pub use adapter::{AdapterError, HttpAdapter, HttpRequest, HttpResponse};
pub use live::LiveAdapter;
pub use stub::{Stub, StubAdapter, StubMatcher, StubReply};
