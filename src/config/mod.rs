mod settings;

pub use settings::{
    ApiConfig, BrokerConfig, DatabaseConfig, JwtConfig, MembershipBackend, MembershipConfig,
    OtelConfig, OverflowPolicy, ServerConfig, Settings, WebSocketConfig,
};
