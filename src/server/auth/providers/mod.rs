pub mod oauth2;
pub mod service_account;
pub mod static_header;

pub use oauth2::OAuth2TokenSource;
pub use service_account::ServiceAccountKeyAuthenticator;
pub use static_header::StaticHeaderAuthenticator;
