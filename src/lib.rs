//! Client side of a Relatr trust-scoring service reached over Nostr relays.
//!
//! [`rpc::RpcClient`] calls the service's tools through ContextVM messages,
//! while [`sync::RecordSync`] reads and republishes the user's replaceable
//! lists (relay list and trusted assertion providers). Both sit on a
//! [`transport::RelayTransport`], implemented for real relays by
//! [`pool::RelayPool`].

pub mod config;
pub mod error;
pub mod event;
pub mod merge;
pub mod pool;
pub mod publish;
pub mod query;
pub mod relays;
pub mod rpc;
pub mod signer;
pub mod sync;
pub mod transport;

pub use error::{Error, Result, TransportError, TransportErrorKind};
pub use event::{Event, EventTemplate, Filter, Identity, Tag};
pub use merge::TagEdit;
pub use publish::{PublishOutcome, Publisher};
pub use relays::{RelaySelection, UserRelayList};
pub use rpc::{ClientConfig, ClientManager, RetryPolicy, RpcClient};
pub use signer::{KeySigner, RemoteSigner, Signer};
pub use sync::{RecordSync, RelayMarker};
pub use transport::{EventStream, PublishResult, RelayTransport};
