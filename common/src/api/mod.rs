//! 设备传输层
//!
//! - `word`: 字/句子编解码
//! - `frame`: 结果帧与记录
//! - `session`: 基于字节流的命令会话
//! - `tcp`: TCP / TLS 连接器
//! - `traits`: 会话与连接器抽象

pub mod frame;
pub mod session;
pub mod tcp;
pub mod traits;
pub mod word;

pub use frame::{Record, ResultFrame};
pub use session::ApiSession;
pub use tcp::{TcpDeviceConnector, DEFAULT_API_PORT, DEFAULT_API_SSL_PORT};
pub use traits::{DeviceConnector, DeviceSession, Params, RouterTarget, Verb};
