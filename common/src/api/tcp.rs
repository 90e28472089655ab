//! TCP / TLS 设备连接器
//!
//! 每次 `connect` 建立一条新连接并完成登录，返回独立的会话。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use super::session::ApiSession;
use super::traits::{DeviceConnector, DeviceSession, RouterTarget};
use crate::error::DeviceError;

/// 明文 API 默认端口
pub const DEFAULT_API_PORT: u16 = 8728;
/// API-SSL 默认端口
pub const DEFAULT_API_SSL_PORT: u16 = 8729;

/// 可承载 API 会话的字节流（TCP 或 TLS）
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// 基于 TCP 的设备连接器
#[derive(Debug, Clone)]
pub struct TcpDeviceConnector {
    timeout: Duration,
}

impl TcpDeviceConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn open_stream(&self, target: &RouterTarget) -> Result<Box<dyn AsyncStream>, DeviceError> {
        let addr = format!("{}:{}", target.host, target.port);

        let tcp = match tokio::time::timeout(self.timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(DeviceError::Connection(format!("{}: {}", addr, e))),
            Err(_) => return Err(DeviceError::Timeout(self.timeout.as_secs())),
        };
        tcp.set_nodelay(true)?;

        if !target.secure {
            return Ok(Box::new(tcp));
        }

        let connector = TlsConnector::from(Arc::new(tls_client_config()?));
        let server_name = ServerName::try_from(target.host.clone())
            .map_err(|e| DeviceError::Connection(format!("无效的主机名 {}: {}", target.host, e)))?;

        match tokio::time::timeout(self.timeout, connector.connect(server_name, tcp)).await {
            Ok(Ok(tls)) => Ok(Box::new(tls)),
            Ok(Err(e)) => Err(DeviceError::Connection(format!("TLS 握手失败 {}: {}", addr, e))),
            Err(_) => Err(DeviceError::Timeout(self.timeout.as_secs())),
        }
    }
}

impl Default for TcpDeviceConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl DeviceConnector for TcpDeviceConnector {
    async fn connect(&self, target: &RouterTarget) -> Result<Box<dyn DeviceSession>, DeviceError> {
        debug!("🔗 连接路由器 {}", target);
        let stream = self.open_stream(target).await?;

        let mut session = ApiSession::new(stream, self.timeout);
        if let Err(e) = session.login(&target.username, &target.password).await {
            session.close().await;
            return Err(e);
        }

        info!("✅ 已登录路由器 {}", target);
        Ok(Box::new(session))
    }
}

/// 路由器通常使用自签名证书，跳过证书验证
fn tls_client_config() -> Result<rustls::ClientConfig, DeviceError> {
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| DeviceError::Connection(format!("TLS 配置失败: {}", e)))?
    .dangerous()
    .with_custom_certificate_verifier(Arc::new(SkipVerification))
    .with_no_client_auth();

    Ok(config)
}

#[derive(Debug)]
struct SkipVerification;

impl rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
