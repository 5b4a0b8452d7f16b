//! 凭证管理模块
//!
//! 提供 OIDC 令牌刷新和访问令牌缓存

mod refresher;
mod token;

pub use refresher::{
    parse_refresh_response, OidcTokenRefresher, TokenError, TokenGrant, TokenRefresher,
    DEFAULT_EXPIRES_IN_SECS,
};
pub use token::{RefreshObserver, TokenManager};
