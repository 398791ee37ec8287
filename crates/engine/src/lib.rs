//! Engine adapter (C2) and chain builder (C3): turns a parsed
//! [`relaykit_codec::ProxyConfig`] into a running outbound plus a dial
//! function either engine's HTTP client can use, and composes N outbounds
//! into one chained instance.

pub mod automatic;
pub mod chain;
pub mod dial;
pub mod http_client;
pub mod inbound;
pub mod model;
pub mod singbox;
pub mod xray;

pub use automatic::AutomaticEngine;
pub use chain::{build_chain, build_chained_http_client, ChainInstance};
pub use dial::{BoxedConn, Conn, Dialer};
pub use http_client::{make_http_client, ConnectTimer, HttpBody, HttpClient, ZeroBody};
pub use inbound::{set_inbound, InboundConfig, InboundProtocol, InboundTransport};
pub use model::{Engine, EngineKind, Instance};
pub use singbox::SingBoxEngine;
pub use xray::XrayEngine;
