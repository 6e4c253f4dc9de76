//! Caller identity and request context extractors.
//!
//! Authentication happens upstream; the proxy forwards the verified
//! identity as trusted headers.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const DEVICE_ID_HEADER: &str = "x-device-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

/// Verified caller: a user on a registered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub device_id: String,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("admin role required".into()))
        }
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(&parts.headers, USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized("missing user identity".into()))?;
        let device_id = header(&parts.headers, DEVICE_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized("missing device identity".into()))?;
        let role = match header(&parts.headers, USER_ROLE_HEADER).as_deref() {
            Some(r) if r.eq_ignore_ascii_case("admin") => Role::Admin,
            _ => Role::User,
        };
        Ok(Self {
            user_id,
            device_id,
            role,
        })
    }
}

/// Client IP and user agent for the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    /// `CF-Connecting-IP`, then the first `X-Forwarded-For` hop, then the
    /// socket peer.
    pub fn from_parts(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let forwarded = header(headers, "x-forwarded-for").and_then(|v| {
            v.split(',')
                .map(str::trim)
                .find(|hop| !hop.is_empty())
                .map(str::to_string)
        });
        let ip = header(headers, "cf-connecting-ip")
            .or(forwarded)
            .or_else(|| peer.map(|addr| addr.ip().to_string()));
        Self {
            ip,
            user_agent: header(headers, "user-agent"),
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ClientInfo {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self::from_parts(&parts.headers, peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request};

    fn parts(headers: &[(&'static str, &'static str)]) -> Parts {
        let mut builder = Request::get("/");
        for (name, value) in headers {
            builder = builder.header(*name, HeaderValue::from_static(value));
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn extracts_user() {
        let mut parts = parts(&[
            ("x-user-id", "u1"),
            ("x-device-id", "phone-1"),
            ("x-user-role", "ADMIN"),
        ]);
        let user = AuthenticatedUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user.user_id, "u1");
        assert_eq!(user.device_id, "phone-1");
        assert!(user.is_admin());
    }

    #[tokio::test]
    async fn missing_device_is_unauthorized() {
        let mut parts = parts(&[("x-user-id", "u1")]);
        let err = AuthenticatedUser::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn non_admin_is_forbidden() {
        let mut parts = parts(&[("x-user-id", "u1"), ("x-device-id", "phone-1")]);
        let user = AuthenticatedUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(matches!(user.require_admin(), Err(ApiError::Forbidden(_))));
    }

    #[test]
    fn client_ip_precedence() {
        let peer: SocketAddr = "10.0.0.9:51000".parse().unwrap();

        let p = parts(&[
            ("cf-connecting-ip", "203.0.113.7"),
            ("x-forwarded-for", "198.51.100.1, 10.0.0.1"),
        ]);
        assert_eq!(
            ClientInfo::from_parts(&p.headers, Some(peer)).ip.as_deref(),
            Some("203.0.113.7")
        );

        let p = parts(&[("x-forwarded-for", " 198.51.100.1 , 10.0.0.1")]);
        assert_eq!(
            ClientInfo::from_parts(&p.headers, Some(peer)).ip.as_deref(),
            Some("198.51.100.1")
        );

        let p = parts(&[("user-agent", "gate-app/2.1")]);
        let info = ClientInfo::from_parts(&p.headers, Some(peer));
        assert_eq!(info.ip.as_deref(), Some("10.0.0.9"));
        assert_eq!(info.user_agent.as_deref(), Some("gate-app/2.1"));

        assert_eq!(ClientInfo::from_parts(&HeaderMap::new(), None), ClientInfo::default());
    }
}
