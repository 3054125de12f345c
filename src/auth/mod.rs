pub mod csrf;
pub mod extractor;
pub mod jwks;
pub mod otp;
pub mod password;
pub mod pkce;
pub mod token;

pub use csrf::CsrfManager;
pub use extractor::{AdminUser, AuthUser};
pub use jwks::JwksVerifier;
pub use otp::{OtpService, Purpose};
pub use password::{hash_password, validate_password, verify_password};
pub use pkce::{verify_pkce, PkceStore};
pub use token::{Claims, Role, TokenService, TokenType, REFRESH_TTL_DAYS};
