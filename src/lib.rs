/// Surfer 库入口
///
/// 将核心模块导出为库，方便测试和复用
pub mod address;
pub mod cli;
pub mod config;
pub mod error;
pub mod inbound;
pub mod outbound;
pub mod protocol;
pub mod relay;
pub mod route;
pub mod server;
pub mod transport;

// 重新导出常用类型
pub use address::{AddressType, Destination};
pub use config::AppConfig;
pub use error::{Result, SurferError};
pub use outbound::{OutboundPolicy, OutboundProtocol};
pub use relay::{RelayPair, RelayState, RelayStats};
pub use route::{Router, TagRouter};
