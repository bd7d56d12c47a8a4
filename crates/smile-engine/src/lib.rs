pub mod config;
pub mod error;
pub mod providers;
pub mod relay;
pub mod server;
pub mod transport;

pub use config::{ApiKey, ProviderKind, ProviderProfile, RelayConfig, ServerConfig};
pub use error::RelayError;
pub use providers::{GeminiProvider, ImageProvider, OpenAiProvider};
pub use relay::Relay;
pub use transport::{HttpTransport, InboundResponse, OutboundRequest, Transport};
